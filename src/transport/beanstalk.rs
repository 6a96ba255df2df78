//! Blocking beanstalkd client.
//!
//! Implements just the commands the dispatch runtime needs: `use`, `watch`,
//! `ignore`, `put`, `reserve-with-timeout` and `delete`. A job that is
//! reserved but never deleted is released back to the ready list by the
//! server once its time-to-run expires; that is the redelivery policy the
//! consumer loop leaves failed tasks to.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::{Delivery, QueueHandle, Transport, TransportError};

/// Default job priority (lower is more urgent).
pub const DEFAULT_PRIORITY: u32 = 1 << 31;

/// Default time-to-run in seconds.
pub const DEFAULT_TTR: u32 = 120;

/// Extra time granted to the socket on top of a reserve timeout before the
/// read is considered hung.
const READ_GRACE: Duration = Duration::from_secs(5);

/// Per-job settings used for `put`.
#[derive(Clone, Debug)]
pub struct BeanstalkOptions {
    pub priority: u32,
    pub ttr: u32,
    /// Read timeout for commands other than reserve.
    pub command_timeout: Duration,
}

impl Default for BeanstalkOptions {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            ttr: DEFAULT_TTR,
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// A beanstalkd server address. Every queue handle gets its own connection,
/// since the used and watched tube lists are per-connection state.
#[derive(Clone, Debug)]
pub struct BeanstalkTransport {
    address: String,
    options: BeanstalkOptions,
}

impl BeanstalkTransport {
    pub fn new(address: impl Into<String>, options: BeanstalkOptions) -> Self {
        Self {
            address: address.into(),
            options,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Transport for BeanstalkTransport {
    fn queue(&self, name: &str) -> Result<Box<dyn QueueHandle>, TransportError> {
        let queue = BeanstalkQueue::open(&self.address, name, self.options.clone())?;
        Ok(Box::new(queue))
    }
}

/// A connection bound to one tube for both `put` and `reserve`.
pub struct BeanstalkQueue {
    tube: String,
    options: BeanstalkOptions,
    connection: Mutex<Connection>,
}

impl BeanstalkQueue {
    /// Connect to `address`, use and watch `tube`, and stop watching `default`.
    pub fn open(address: &str, tube: &str, options: BeanstalkOptions) -> Result<Self, TransportError> {
        let mut connection = Connection::connect(address)?;
        connection.set_read_timeout(options.command_timeout)?;

        match connection.command(&format!("use {}", tube))? {
            Response::Using(name) if name == tube => {}
            other => return Err(other.unexpected("use")),
        }
        match connection.command(&format!("watch {}", tube))? {
            Response::Watching(_) => {}
            other => return Err(other.unexpected("watch")),
        }
        if tube != "default" {
            match connection.command("ignore default")? {
                Response::Watching(_) => {}
                other => return Err(other.unexpected("ignore")),
            }
        }

        tracing::debug!(address, tube, "opened beanstalkd queue handle");

        Ok(Self {
            tube: tube.to_string(),
            options,
            connection: Mutex::new(connection),
        })
    }

    pub fn tube(&self) -> &str {
        &self.tube
    }
}

impl QueueHandle for BeanstalkQueue {
    fn put(&self, body: &[u8]) -> Result<(), TransportError> {
        let mut connection = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        connection.set_read_timeout(self.options.command_timeout)?;

        let header = format!(
            "put {} 0 {} {}\r\n",
            self.options.priority,
            self.options.ttr,
            body.len()
        );
        let mut frame = Vec::with_capacity(header.len() + body.len() + 2);
        frame.extend_from_slice(header.as_bytes());
        frame.extend_from_slice(body);
        frame.extend_from_slice(b"\r\n");
        connection.send(&frame)?;

        match connection.read_response()? {
            Response::Inserted(_) => Ok(()),
            Response::Buried(id) => Err(TransportError::Rejected(format!(
                "job {} buried: server out of memory",
                id
            ))),
            Response::Other(line) => Err(TransportError::Rejected(line)),
            other => Err(other.unexpected("put")),
        }
    }

    fn get(&self, timeout: Duration) -> Result<Option<Delivery>, TransportError> {
        let mut connection = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        connection.set_read_timeout(timeout.saturating_add(READ_GRACE))?;

        match connection.command(&format!("reserve-with-timeout {}", ceil_secs(timeout)))? {
            Response::Reserved { id, bytes } => {
                let body = connection.read_body(bytes)?;
                Ok(Some(Delivery::new(id, body)))
            }
            Response::TimedOut | Response::DeadlineSoon => Ok(None),
            Response::Other(line) => Err(TransportError::Rejected(line)),
            other => Err(other.unexpected("reserve-with-timeout")),
        }
    }

    fn task_done(&self, delivery: &Delivery) -> Result<(), TransportError> {
        let mut connection = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        connection.set_read_timeout(self.options.command_timeout)?;

        match connection.command(&format!("delete {}", delivery.id))? {
            Response::Deleted => Ok(()),
            Response::Other(line) => Err(TransportError::Rejected(line)),
            other => Err(other.unexpected("delete")),
        }
    }
}

fn ceil_secs(timeout: Duration) -> u64 {
    timeout.as_secs().saturating_add(u64::from(timeout.subsec_nanos() > 0))
}

struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Connection {
    fn connect(address: &str) -> Result<Self, TransportError> {
        let writer = TcpStream::connect(address)?;
        writer.set_nodelay(true)?;
        let reader = BufReader::new(writer.try_clone()?);
        Ok(Self { reader, writer })
    }

    fn set_read_timeout(&self, timeout: Duration) -> Result<(), TransportError> {
        self.writer.set_read_timeout(Some(timeout))?;
        Ok(())
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.writer.write_all(frame)?;
        self.writer.flush()?;
        Ok(())
    }

    fn command(&mut self, line: &str) -> Result<Response, TransportError> {
        let mut frame = Vec::with_capacity(line.len() + 2);
        frame.extend_from_slice(line.as_bytes());
        frame.extend_from_slice(b"\r\n");
        self.send(&frame)?;
        self.read_response()
    }

    fn read_response(&mut self) -> Result<Response, TransportError> {
        let mut line = Vec::new();
        if self.reader.read_until(b'\n', &mut line)? == 0 {
            return Err(TransportError::Closed);
        }
        if !line.ends_with(b"\r\n") {
            return Err(TransportError::Protocol(format!(
                "response line not terminated by CRLF: {:?}",
                String::from_utf8_lossy(&line)
            )));
        }
        line.truncate(line.len() - 2);
        let line = String::from_utf8(line)
            .map_err(|e| TransportError::Protocol(format!("response is not UTF-8: {}", e)))?;
        Response::parse(&line)
    }

    fn read_body(&mut self, bytes: usize) -> Result<Vec<u8>, TransportError> {
        let mut body = vec![0; bytes + 2];
        self.reader.read_exact(&mut body)?;
        if !body.ends_with(b"\r\n") {
            return Err(TransportError::Protocol("job body not terminated by CRLF".into()));
        }
        body.truncate(bytes);
        Ok(body)
    }
}

/// A parsed server response line.
#[derive(Debug, PartialEq, Eq)]
enum Response {
    Inserted(u64),
    Buried(u64),
    Reserved { id: u64, bytes: usize },
    TimedOut,
    DeadlineSoon,
    Deleted,
    Using(String),
    Watching(u32),
    /// Errors and responses this client never expects (`NOT_FOUND`,
    /// `JOB_TOO_BIG`, `DRAINING`, `BAD_FORMAT`, ...).
    Other(String),
}

impl Response {
    fn parse(line: &str) -> Result<Self, TransportError> {
        let mut parts = line.split(' ');
        let word = parts.next().unwrap_or_default();
        let response = match word {
            "INSERTED" => Response::Inserted(number(parts.next(), line)?),
            "BURIED" if parts.clone().next().is_some() => Response::Buried(number(parts.next(), line)?),
            "RESERVED" => Response::Reserved {
                id: number(parts.next(), line)?,
                bytes: number(parts.next(), line)?,
            },
            "TIMED_OUT" => Response::TimedOut,
            "DEADLINE_SOON" => Response::DeadlineSoon,
            "DELETED" => Response::Deleted,
            "USING" => Response::Using(
                parts
                    .next()
                    .ok_or_else(|| TransportError::Protocol(format!("malformed response: {}", line)))?
                    .to_string(),
            ),
            "WATCHING" => Response::Watching(number(parts.next(), line)?),
            _ => return Ok(Response::Other(line.to_string())),
        };
        if parts.next().is_some() {
            return Err(TransportError::Protocol(format!("malformed response: {}", line)));
        }
        Ok(response)
    }

    fn unexpected(self, command: &str) -> TransportError {
        TransportError::Protocol(format!("unexpected response to {}: {:?}", command, self))
    }
}

fn number<T: std::str::FromStr>(part: Option<&str>, line: &str) -> Result<T, TransportError> {
    part.and_then(|p| p.parse().ok())
        .ok_or_else(|| TransportError::Protocol(format!("malformed response: {}", line)))
}
