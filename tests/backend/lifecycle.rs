//! Hooks, stopping, and fatal errors in the consumer loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use task_backend::transport::InMemoryTransport;
use task_backend::{Backend, Envelope, Error, HandlerError, WorkerThread};

use crate::support::{builder, wait_until, BrokenTransport, Recorder, POLL};

// ============================================================================
// Test 1: Hooks run in registration order, once, before any dispatch
// ============================================================================

#[test]
fn hooks_run_in_order_once_before_dispatch() {
    let transport = InMemoryTransport::new();
    let events = Recorder::new();

    let backend = {
        let (a, b, c, task) = (events.clone(), events.clone(), events.clone(), events.clone());
        Arc::new(
            builder(&transport)
                .before_first_task("jobs", move || {
                    a.record("A");
                    Ok(())
                })
                .before_first_task("jobs", move || {
                    b.record("B");
                    Ok(())
                })
                .before_first_task("jobs", move || {
                    c.record("C");
                    Ok(())
                })
                .task("jobs", "work", move |_| {
                    task.record("work");
                    Ok(())
                })
                .build()
                .unwrap(),
        )
    };

    backend.send("jobs", &Envelope::new("work")).unwrap();
    let worker = WorkerThread::spawn(Arc::clone(&backend), "jobs");
    wait_until("first task", || transport.acknowledged("jobs").len() == 1);
    worker.stop().unwrap();

    // Restarting the loop on the same backend does not re-run the hooks.
    backend.send("jobs", &Envelope::new("work")).unwrap();
    let worker = WorkerThread::spawn(Arc::clone(&backend), "jobs");
    wait_until("second task", || transport.acknowledged("jobs").len() == 2);
    worker.stop().unwrap();

    assert_eq!(events.entries(), vec!["A", "B", "C", "work", "work"]);
}

// ============================================================================
// Test 2: Hooks are per queue
// ============================================================================

#[test]
fn hooks_only_run_for_their_queue() {
    let transport = InMemoryTransport::new();
    let events = Recorder::new();

    let backend = {
        let (jobs, mail) = (events.clone(), events.clone());
        Arc::new(
            builder(&transport)
                .before_first_task("jobs", move || {
                    jobs.record("jobs hook");
                    Ok(())
                })
                .before_first_task("mail", move || {
                    mail.record("mail hook");
                    Ok(())
                })
                .task("mail", "send", |_| Ok(()))
                .build()
                .unwrap(),
        )
    };

    let worker = WorkerThread::spawn(Arc::clone(&backend), "mail");
    wait_until("mail hook", || events.len() == 1);
    worker.stop().unwrap();

    assert_eq!(events.entries(), vec!["mail hook"]);
}

// ============================================================================
// Test 3: A failing hook aborts the run before anything is dequeued
// ============================================================================

#[test]
fn failing_hook_aborts_run() {
    let transport = InMemoryTransport::new();
    let calls = Recorder::new();

    let backend = {
        let calls = calls.clone();
        builder(&transport)
            .before_first_task("jobs", || Err(HandlerError::Rejected("database unreachable".into())))
            .task("jobs", "work", move |_| {
                calls.record("work");
                Ok(())
            })
            .build()
            .unwrap()
    };

    backend.send("jobs", &Envelope::new("work")).unwrap();

    let result = backend.run("jobs");
    assert!(matches!(
        result,
        Err(Error::Hook { ref queue, source: HandlerError::Rejected(_) }) if queue == "jobs"
    ));
    assert!(calls.entries().is_empty());
    assert_eq!(transport.pending("jobs").len(), 1);

    // Not marked as ran: the next attempt tries the hook again.
    assert!(matches!(backend.run("jobs"), Err(Error::Hook { .. })));
}

// ============================================================================
// Test 4: An idle loop exits within one poll interval of stop()
// ============================================================================

#[test]
fn idle_loop_stops_within_poll_timeout() {
    let transport = InMemoryTransport::new();
    let poll = Duration::from_millis(200);
    let backend = Arc::new(
        builder(&transport)
            .poll_timeout(poll)
            .task("jobs", "work", |_| Ok(()))
            .build()
            .unwrap(),
    );

    let worker = WorkerThread::spawn(Arc::clone(&backend), "jobs");
    wait_until("first poll", || transport.handles_created("jobs") == 1);
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    let stats = worker.stop().unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed < poll + Duration::from_millis(150), "took {elapsed:?}");
    assert_eq!(stats.handled, 0);
    assert!(stats.polls >= 1);
}

// ============================================================================
// Test 5: Stopping waits for the in-flight handler and acknowledges it
// ============================================================================

#[test]
fn stop_lets_in_flight_task_finish() {
    let transport = InMemoryTransport::new();
    let events = Recorder::new();

    let backend = {
        let events = events.clone();
        Arc::new(
            builder(&transport)
                .task("jobs", "slow", move |_| {
                    events.record("started");
                    thread::sleep(Duration::from_millis(100));
                    events.record("finished");
                    Ok(())
                })
                .build()
                .unwrap(),
        )
    };

    backend.send("jobs", &Envelope::new("slow")).unwrap();
    backend.send("jobs", &Envelope::new("slow")).unwrap();

    let worker = WorkerThread::spawn(Arc::clone(&backend), "jobs");
    wait_until("handler started", || events.len() == 1);
    let stats = worker.stop().unwrap();

    assert_eq!(events.entries(), vec!["started", "finished"]);
    assert_eq!(stats.handled, 1);
    assert_eq!(transport.acknowledged("jobs").len(), 1);
    assert_eq!(transport.pending("jobs").len(), 1);
}

// ============================================================================
// Test 6: stop() is idempotent
// ============================================================================

#[test]
fn stopping_twice_is_stopping_once() {
    let transport = InMemoryTransport::new();
    let backend = Arc::new(
        builder(&transport)
            .task("jobs", "work", |_| Ok(()))
            .build()
            .unwrap(),
    );

    let worker = WorkerThread::spawn(Arc::clone(&backend), "jobs");
    assert!(!backend.is_stopped());

    backend.stop();
    backend.stop();
    assert!(backend.is_stopped());

    let stats = worker.join().unwrap();
    assert_eq!(stats.handled, 0);
    assert!(backend.is_stopped());

    // A stopped backend can be run again.
    backend.send("jobs", &Envelope::new("work")).unwrap();
    let worker = WorkerThread::spawn(Arc::clone(&backend), "jobs");
    wait_until("task after restart", || transport.acknowledged("jobs").len() == 1);
    assert_eq!(worker.stop().unwrap().handled, 1);
}

// ============================================================================
// Test 7: A stop handle can be sent to another thread
// ============================================================================

#[test]
fn stop_handle_stops_from_another_thread() {
    let transport = InMemoryTransport::new();
    let backend = Arc::new(
        builder(&transport)
            .task("jobs", "work", |_| Ok(()))
            .build()
            .unwrap(),
    );

    let worker = WorkerThread::spawn(Arc::clone(&backend), "jobs");
    let handle = backend.stop_handle();
    thread::spawn(move || {
        thread::sleep(POLL);
        handle.stop();
    })
    .join()
    .unwrap();

    worker.join().unwrap();
    assert!(backend.is_stopped());
}

// ============================================================================
// Test 8: A dequeue failure ends the run with a transport error
// ============================================================================

#[test]
fn transport_failure_on_dequeue_is_fatal() {
    let backend = Backend::builder(Arc::new(BrokenTransport))
        .poll_timeout(POLL)
        .handle_signals(false)
        .task("jobs", "work", |_| Ok(()))
        .build()
        .unwrap();

    // Sending still works; only the consumer side is broken.
    backend.send("jobs", &Envelope::new("work")).unwrap();
    assert!(matches!(backend.run("jobs"), Err(Error::Transport(_))));
}

// ============================================================================
// Test 9: Dropping a worker thread requests a stop
// ============================================================================

#[test]
fn dropping_worker_thread_stops_loop() {
    let transport = InMemoryTransport::new();
    let backend = Arc::new(
        builder(&transport)
            .task("jobs", "work", |_| Ok(()))
            .build()
            .unwrap(),
    );

    let worker = WorkerThread::spawn(Arc::clone(&backend), "jobs");
    assert!(!backend.is_stopped());
    drop(worker);

    assert!(backend.is_stopped());
}

// ============================================================================
// Test 10: Spawning a new worker does not cancel an earlier stop request
// ============================================================================

#[test]
fn respawn_keeps_earlier_stop_request() {
    let transport = InMemoryTransport::new();
    let backend = Arc::new(
        builder(&transport)
            .task("jobs", "work", |_| Ok(()))
            .build()
            .unwrap(),
    );

    let first = WorkerThread::spawn(Arc::clone(&backend), "jobs");
    first.signal_stop();
    let second = WorkerThread::spawn(Arc::clone(&backend), "jobs");

    // The first loop still exits even though a new run started after its stop.
    wait_until("first worker exits", || first.is_finished());
    assert_eq!(first.join().unwrap().handled, 0);

    // The second loop keeps working.
    backend.send("jobs", &Envelope::new("work")).unwrap();
    wait_until("second worker handles task", || transport.acknowledged("jobs").len() == 1);
    assert!(!second.is_finished());
    assert_eq!(second.stop().unwrap().handled, 1);
    assert!(backend.is_stopped());
}

#[test]
fn dropping_old_worker_leaves_newer_one_running() {
    let transport = InMemoryTransport::new();
    let backend = Arc::new(
        builder(&transport)
            .task("jobs", "work", |_| Ok(()))
            .build()
            .unwrap(),
    );

    let first = WorkerThread::spawn(Arc::clone(&backend), "jobs");
    let second = WorkerThread::spawn(Arc::clone(&backend), "jobs");
    drop(first);
    assert!(!backend.is_stopped());

    backend.send("jobs", &Envelope::new("work")).unwrap();
    wait_until("task handled", || transport.acknowledged("jobs").len() == 1);
    thread::sleep(POLL * 2);
    assert!(!second.is_finished());
    second.stop().unwrap();
    assert!(backend.is_stopped());
}
