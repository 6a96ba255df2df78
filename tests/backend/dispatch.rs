//! Routing, failure isolation, and dispatch scopes.

use std::sync::Arc;

use serde_json::json;
use task_backend::transport::{InMemoryTransport, Transport};
use task_backend::{DispatchScope, Envelope, Error, HandlerError, WorkerThread};

use crate::support::{builder, wait_until, Recorder};

// ============================================================================
// Test 1: Each envelope reaches exactly the handler registered for it
// ============================================================================

#[test]
fn envelopes_reach_only_their_handler() {
    let transport = InMemoryTransport::new();
    let calls = Recorder::new();

    let backend = {
        let (resize, crop, other_queue) = (calls.clone(), calls.clone(), calls.clone());
        builder(&transport)
            .task("jobs", "resize", move |ctx| {
                let image_id: u64 = ctx.kwarg("image_id")?;
                resize.record(format!("{}:resize:{}", ctx.queue(), image_id));
                Ok(())
            })
            .task("jobs", "crop", move |ctx| {
                let edge: u32 = ctx.arg(0)?;
                crop.record(format!("{}:crop:{}", ctx.queue(), edge));
                Ok(())
            })
            .task("mail", "resize", move |ctx| {
                other_queue.record(format!("{}:resize", ctx.queue()));
                Ok(())
            })
            .build()
            .unwrap()
    };

    backend
        .dispatch("jobs", &Envelope::new("crop").arg(16))
        .unwrap();
    backend
        .dispatch("jobs", &Envelope::new("resize").kwarg("image_id", 42))
        .unwrap();
    backend.dispatch("mail", &Envelope::new("resize")).unwrap();

    assert_eq!(
        calls.entries(),
        vec!["jobs:crop:16", "jobs:resize:42", "mail:resize"]
    );
}

// ============================================================================
// Test 2: Unknown endpoints fail without invoking any handler
// ============================================================================

#[test]
fn unknown_endpoint_invokes_nothing() {
    let transport = InMemoryTransport::new();
    let calls = Recorder::new();

    let backend = {
        let calls = calls.clone();
        builder(&transport)
            .task("jobs", "resize", move |_| {
                calls.record("resize");
                Ok(())
            })
            .build()
            .unwrap()
    };

    let result = backend.dispatch("jobs", &Envelope::new("sharpen"));
    assert!(matches!(
        result,
        Err(HandlerError::UnknownEndpoint { ref queue, ref endpoint })
            if queue == "jobs" && endpoint == "sharpen"
    ));
    assert!(calls.entries().is_empty());
}

// ============================================================================
// Test 3: A failing task does not stop later tasks in the same run
// ============================================================================

#[test]
fn failure_does_not_block_later_envelopes() {
    let transport = InMemoryTransport::new();
    let calls = Recorder::new();

    let backend = {
        let calls = calls.clone();
        Arc::new(
            builder(&transport)
                .task("jobs", "resize", move |ctx| {
                    let image_id: u64 = ctx.kwarg("image_id")?;
                    if image_id == 0 {
                        return Err(HandlerError::Rejected("no image 0".into()));
                    }
                    calls.record(format!("resize:{}", image_id));
                    Ok(())
                })
                .build()
                .unwrap(),
        )
    };

    backend
        .send("jobs", &Envelope::new("resize").kwarg("image_id", 0))
        .unwrap();
    backend.send("jobs", &Envelope::new("unknown")).unwrap();
    backend
        .send("jobs", &Envelope::new("resize").kwarg("image_id", 7))
        .unwrap();
    backend.registry().put("jobs", b"not json").unwrap();
    backend
        .send("jobs", &Envelope::new("resize").kwarg("image_id", 8))
        .unwrap();

    let worker = WorkerThread::spawn(Arc::clone(&backend), "jobs");
    wait_until("two acknowledgements", || transport.acknowledged("jobs").len() == 2);
    let stats = worker.stop().unwrap();

    assert_eq!(calls.entries(), vec!["resize:7", "resize:8"]);
    assert_eq!(stats.handled, 2);
    assert_eq!(stats.failed, 3);
    // Failed jobs stay reserved for the transport to redeliver.
    assert_eq!(transport.reserved("jobs"), 3);
    assert!(transport.pending("jobs").is_empty());
}

// ============================================================================
// Test 4: Failed jobs come back after the transport releases them
// ============================================================================

#[test]
fn released_job_is_retried() {
    let transport = InMemoryTransport::new();
    let attempts = Recorder::new();

    let backend = {
        let attempts = attempts.clone();
        Arc::new(
            builder(&transport)
                .task("jobs", "flaky", move |_| {
                    attempts.record("attempt");
                    if attempts.len() == 1 {
                        Err(HandlerError::other("temporarily unavailable"))
                    } else {
                        Ok(())
                    }
                })
                .build()
                .unwrap(),
        )
    };

    backend.send("jobs", &Envelope::new("flaky")).unwrap();
    let worker = WorkerThread::spawn(Arc::clone(&backend), "jobs");

    wait_until("first attempt", || transport.reserved("jobs") == 1 && attempts.len() == 1);
    assert_eq!(transport.release("jobs"), 1);
    wait_until("retry acknowledged", || transport.acknowledged("jobs").len() == 1);

    let stats = worker.stop().unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.handled, 1);
    assert_eq!(attempts.len(), 2);
}

// ============================================================================
// Test 5: The dispatch scope wraps every dispatch, successful or not
// ============================================================================

struct Session(Recorder);

impl DispatchScope for Session {
    fn around(
        &self,
        queue: &str,
        envelope: &Envelope,
        dispatch: &mut dyn FnMut() -> Result<(), HandlerError>,
    ) -> Result<(), HandlerError> {
        self.0.record(format!("open {}/{}", queue, envelope.endpoint));
        let result = dispatch();
        self.0.record(format!("close {}", if result.is_ok() { "ok" } else { "err" }));
        result
    }
}

#[test]
fn scope_surrounds_each_dispatch() {
    let transport = InMemoryTransport::new();
    let events = Recorder::new();

    let backend = {
        let (ok, fail) = (events.clone(), events.clone());
        Arc::new(
            builder(&transport)
                .scope(Session(events.clone()))
                .task("jobs", "ok", move |_| {
                    ok.record("handler ok");
                    Ok(())
                })
                .task("jobs", "fail", move |_| {
                    fail.record("handler fail");
                    Err(HandlerError::Rejected("bad input".into()))
                })
                .build()
                .unwrap(),
        )
    };

    backend.send("jobs", &Envelope::new("fail")).unwrap();
    backend.send("jobs", &Envelope::new("ok")).unwrap();

    let worker = WorkerThread::spawn(Arc::clone(&backend), "jobs");
    wait_until("ok acknowledged", || transport.acknowledged("jobs").len() == 1);
    worker.stop().unwrap();

    assert_eq!(
        events.entries(),
        vec![
            "open jobs/fail",
            "handler fail",
            "close err",
            "open jobs/ok",
            "handler ok",
            "close ok",
        ]
    );
}

// ============================================================================
// Test 6: A raw receiver sees every envelope on its queue
// ============================================================================

#[test]
fn receiver_drains_whole_queue() {
    let transport = InMemoryTransport::new();
    let seen = Recorder::new();

    let backend = {
        let seen = seen.clone();
        Arc::new(
            builder(&transport)
                .receiver("events", move |envelope| {
                    seen.record(format!("{}{}", envelope.endpoint, json!(envelope.args)));
                    Ok(())
                })
                .build()
                .unwrap(),
        )
    };

    backend
        .send("events", &Envelope::new("signup").arg("ada"))
        .unwrap();
    backend.send("events", &Envelope::new("login").arg(1)).unwrap();

    let worker = WorkerThread::spawn(Arc::clone(&backend), "events");
    wait_until("both acknowledged", || transport.acknowledged("events").len() == 2);
    worker.stop().unwrap();

    assert_eq!(seen.entries(), vec!["signup[\"ada\"]", "login[1]"]);
}

// ============================================================================
// Test 7: An envelope with an empty endpoint is neither sent nor dispatched
// ============================================================================

#[test]
fn empty_endpoint_is_never_dispatched() {
    let transport = InMemoryTransport::new();
    let seen = Recorder::new();

    let backend = {
        let seen = seen.clone();
        Arc::new(
            builder(&transport)
                .receiver("events", move |envelope| {
                    seen.record(envelope.endpoint.clone());
                    Ok(())
                })
                .build()
                .unwrap(),
        )
    };

    assert!(matches!(
        backend.send("events", &Envelope::new("")),
        Err(Error::Encode(_))
    ));
    assert!(transport.pending("events").is_empty());

    // A foreign producer can still put one on the queue.
    let raw = transport.queue("events").unwrap();
    raw.put(br#"{"endpoint":"","args":[1]}"#).unwrap();
    backend.send("events", &Envelope::new("signup")).unwrap();

    let worker = WorkerThread::spawn(Arc::clone(&backend), "events");
    wait_until("valid envelope acknowledged", || transport.acknowledged("events").len() == 1);
    let stats = worker.stop().unwrap();

    assert_eq!(seen.entries(), vec!["signup"]);
    assert_eq!(stats.failed, 1);
    assert_eq!(transport.reserved("events"), 1);
}
