//! Connection URI parsing.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ConfigError;

/// Port used when the URI does not name one (the beanstalkd default).
pub const DEFAULT_PORT: u16 = 11300;

/// Transport family selected by the URI scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    /// beanstalkd protocol, spelled `btq://` or `beanstalk://`.
    Beanstalk,
    /// Process-local in-memory queues; the host names the namespace.
    Memory,
}

/// A parsed `scheme://host[:port]` string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionUri {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\w+)://([-.\w]+)(?::(\d+))?$").expect("connection URI pattern compiles")
    })
}

impl ConnectionUri {
    /// Parse a connection URI.
    ///
    /// ```
    /// use task_backend::transport::{ConnectionUri, Scheme};
    ///
    /// let uri: ConnectionUri = "btq://queue.internal".parse().unwrap();
    /// assert_eq!(uri.scheme, Scheme::Beanstalk);
    /// assert_eq!(uri.port, 11300);
    /// ```
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let captures = pattern()
            .captures(input)
            .ok_or_else(|| ConfigError::InvalidUri(input.to_string()))?;

        let scheme = match &captures[1] {
            "btq" | "beanstalk" => Scheme::Beanstalk,
            "memory" => Scheme::Memory,
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };

        let port = match captures.get(3) {
            Some(port) => port
                .as_str()
                .parse()
                .map_err(|_| ConfigError::InvalidUri(input.to_string()))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            scheme,
            host: captures[2].to_string(),
            port,
        })
    }

    /// `host:port`, suitable for `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for ConnectionUri {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.scheme {
            Scheme::Beanstalk => "btq",
            Scheme::Memory => "memory",
        };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}
