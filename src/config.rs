//! Endpoint parameters and URI parsing.
//!
//! Supports the following address forms:
//! - `tcp://host[:port][/?key=value&…]`: TCP endpoint
//! - `redis://[user:pass@]host[:port][/db][?key=value]`: TCP endpoint, db in path
//! - `unix:///path/to/socket` or `unix:/path/to/socket`: Unix domain socket
//! - `host[:port]`: shorthand for `tcp://`
//!
//! Recognized query keys: `database` (or `db`), `username`, `password`,
//! `timeout`, `read_write_timeout`, `persistent`, `async_connect`,
//! `tcp_nodelay`, `alias` and `weight`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use url::{Host, Url};

use crate::error::{Error, Result};

/// Default server port.
pub const DEFAULT_PORT: u16 = 6379;
/// Default server host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default transport scheme.
pub const DEFAULT_SCHEME: &str = "tcp";
/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything needed to open one endpoint connection.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointParameters {
    /// Transport scheme (`tcp`, `redis`, `unix`, or a custom registered one).
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Socket path for `unix` endpoints.
    pub path: Option<String>,
    /// Database index selected right after connecting.
    pub database: Option<u32>,
    /// ACL username sent with AUTH.
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout: Duration,
    /// Socket read/write timeout (`None` blocks indefinitely).
    pub read_write_timeout: Option<Duration>,
    pub persistent: bool,
    pub async_connect: bool,
    pub tcp_nodelay: bool,
    /// Name used as the pool key inside a cluster.
    pub alias: Option<String>,
    /// Relative weight inside a cluster ring.
    pub weight: Option<u32>,
}

impl Default for EndpointParameters {
    fn default() -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            path: None,
            database: None,
            username: None,
            password: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_write_timeout: None,
            persistent: false,
            async_connect: false,
            tcp_nodelay: true,
            alias: None,
            weight: None,
        }
    }
}

impl EndpointParameters {
    /// TCP endpoint at `host:port`.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Unix domain socket endpoint.
    pub fn unix(path: impl Into<String>) -> Self {
        Self {
            scheme: "unix".to_string(),
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Parse an endpoint URI.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(Error::client("empty endpoint URI"));
        }

        // `host:port` would otherwise parse as a URL with scheme `host`.
        let normalized = if uri.contains("://") || uri.starts_with("unix:") {
            uri.to_string()
        } else {
            format!("{DEFAULT_SCHEME}://{uri}")
        };

        let url = Url::parse(&normalized)
            .map_err(|e| Error::client(format!("invalid endpoint URI '{uri}': {e}")))?;

        let mut params = Self {
            scheme: url.scheme().to_ascii_lowercase(),
            ..Self::default()
        };

        match params.scheme.as_str() {
            "tls" | "rediss" => {
                return Err(Error::client(format!(
                    "scheme '{}' is not supported: TLS connections are not available",
                    params.scheme
                )));
            }
            "unix" => {
                let path = url.path();
                if path.is_empty() || path == "/" {
                    return Err(Error::client(format!("missing socket path in '{uri}'")));
                }
                params.path = Some(path.to_string());
            }
            _ => {
                match url.host() {
                    Some(Host::Ipv6(addr)) => params.host = addr.to_string(),
                    Some(host) => {
                        let host = host.to_string();
                        if !host.is_empty() {
                            params.host = host;
                        }
                    }
                    None => {}
                }
                params.port = url.port().unwrap_or(DEFAULT_PORT);

                if let Some(db) = split_path(url.path()) {
                    params.database = Some(parse_database(db)?);
                }
            }
        }

        if !url.username().is_empty() {
            params.username = Some(url.username().to_string());
        }
        if let Some(password) = url.password() {
            if !password.is_empty() {
                params.password = Some(password.to_string());
            }
        }

        for (key, value) in url.query_pairs() {
            params.set_option(&key, &value)?;
        }

        Ok(params)
    }

    /// Apply one `key=value` option as found in a URI query string.
    ///
    /// Unknown keys are ignored.
    pub fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "database" | "db" => self.database = Some(parse_database(value)?),
            "username" => self.username = non_empty(value),
            "password" => self.password = non_empty(value),
            "timeout" => {
                self.connect_timeout = parse_seconds(key, value)?.unwrap_or(DEFAULT_CONNECT_TIMEOUT)
            }
            "read_write_timeout" => self.read_write_timeout = parse_seconds(key, value)?,
            "persistent" => self.persistent = parse_bool(key, value)?,
            "async_connect" => self.async_connect = parse_bool(key, value)?,
            "tcp_nodelay" => self.tcp_nodelay = parse_bool(key, value)?,
            "alias" => self.alias = non_empty(value),
            "weight" => {
                self.weight = Some(value.parse().map_err(|_| {
                    Error::client(format!("invalid weight: {value}"))
                })?)
            }
            other => tracing::trace!(key = other, "ignoring unknown endpoint option"),
        }
        Ok(())
    }

    // ── Builder-style setters ──

    pub fn with_database(mut self, database: u32) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_write_timeout(mut self, timeout: Duration) -> Self {
        self.read_write_timeout = Some(timeout);
        self
    }

    /// `host:port` for network endpoints, the socket path for unix ones.
    pub fn identifier(&self) -> String {
        if self.scheme == "unix" {
            return self.path.clone().unwrap_or_default();
        }
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for EndpointParameters {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_uri(s)
    }
}

impl fmt::Display for EndpointParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier())
    }
}

// ── URI parsing helpers ────────────────────────────────────────────

/// `/3` → `Some("3")`, `/` or empty → `None`.
fn split_path(path: &str) -> Option<&str> {
    let trimmed = path.trim_matches('/');
    (!trimmed.is_empty()).then_some(trimmed)
}

fn parse_database(value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| Error::client(format!("invalid database index: {value}")))
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" | "" => Ok(false),
        _ => Err(Error::client(format!("invalid boolean for '{key}': {value}"))),
    }
}

/// Seconds, fractional allowed. Zero or negative means "no timeout".
fn parse_seconds(key: &str, value: &str) -> Result<Option<Duration>> {
    let secs: f64 = value
        .parse()
        .map_err(|_| Error::client(format!("invalid number of seconds for '{key}': {value}")))?;
    if secs <= 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|_| Error::client(format!("invalid number of seconds for '{key}': {value}")))
}

// ── Tests ──────────────────────────────────────────────────────────
