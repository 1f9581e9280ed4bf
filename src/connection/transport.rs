//! Byte transports and the scheme → connector registry.
//!
//! An [`EndpointConnection`] never opens sockets itself: it asks the
//! [`Connector`] registered for its scheme. The default factory knows `tcp`
//! and `redis` (TCP with connect timeout) and `unix` (Unix domain sockets);
//! tests and embedders can register their own.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;

use crate::command;
use crate::config::EndpointParameters;
use crate::connection::endpoint::EndpointConnection;
use crate::error::{Error, Result};

/// A bidirectional byte stream to one server.
pub trait Transport: Read + Write + Send {}

impl<T: Read + Write + Send> Transport for T {}

/// Opens transports for one scheme.
pub trait Connector: Send + Sync {
    fn open(&self, params: &EndpointParameters) -> io::Result<Box<dyn Transport>>;
}

// ── TCP ────────────────────────────────────────────────────────────

/// TCP connector: tries every resolved address with the connect timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn open(&self, params: &EndpointParameters) -> io::Result<Box<dyn Transport>> {
        let mut last_err = None;

        for addr in (params.host.as_str(), params.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, params.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(params.read_write_timeout)?;
                    stream.set_write_timeout(params.read_write_timeout)?;
                    stream.set_nodelay(params.tcp_nodelay)?;
                    return Ok(Box::new(stream));
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("could not resolve {}", params.host),
            )
        }))
    }
}

// ── Unix domain sockets ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct UnixConnector;

impl Connector for UnixConnector {
    #[cfg(unix)]
    fn open(&self, params: &EndpointParameters) -> io::Result<Box<dyn Transport>> {
        use std::os::unix::net::UnixStream;

        let path = params.path.as_deref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "missing unix socket path")
        })?;
        let stream = UnixStream::connect(path)?;
        stream.set_read_timeout(params.read_write_timeout)?;
        stream.set_write_timeout(params.read_write_timeout)?;
        Ok(Box::new(stream))
    }

    #[cfg(not(unix))]
    fn open(&self, _params: &EndpointParameters) -> io::Result<Box<dyn Transport>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "unix domain sockets are not available on this platform",
        ))
    }
}

// ── Factory ────────────────────────────────────────────────────────

/// Maps scheme names to connectors and builds endpoint connections.
#[derive(Clone)]
pub struct ConnectionFactory {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl ConnectionFactory {
    /// A factory with no schemes registered.
    pub fn empty() -> Self {
        Self {
            connectors: HashMap::new(),
        }
    }

    /// Register (or replace) the connector for `scheme`.
    pub fn register(&mut self, scheme: &str, connector: impl Connector + 'static) {
        self.connectors
            .insert(scheme.to_ascii_lowercase(), Arc::new(connector));
    }

    /// Remove the connector for `scheme`. Returns whether one was registered.
    pub fn unregister(&mut self, scheme: &str) -> bool {
        self.connectors.remove(&scheme.to_ascii_lowercase()).is_some()
    }

    pub fn supports(&self, scheme: &str) -> bool {
        self.connectors.contains_key(&scheme.to_ascii_lowercase())
    }

    /// Build a (not yet connected) endpoint connection.
    ///
    /// `AUTH` is queued when a password is set and `SELECT` when a database
    /// is set; both are replayed on every successful connect.
    pub fn create(&self, params: EndpointParameters) -> Result<EndpointConnection> {
        let connector = self
            .connectors
            .get(&params.scheme.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| {
                Error::client(format!("unknown connection scheme: '{}'", params.scheme))
            })?;

        let mut init = Vec::new();
        if let Some(password) = params.password.as_deref() {
            init.push(command::auth(params.username.as_deref(), password));
        }
        if let Some(database) = params.database {
            init.push(command::select(database));
        }

        let mut connection = EndpointConnection::new(params, connector);
        for cmd in init {
            connection.add_init_command(cmd);
        }
        Ok(connection)
    }

    /// Parse `uri` and build a connection for it.
    pub fn create_from_uri(&self, uri: &str) -> Result<EndpointConnection> {
        self.create(EndpointParameters::from_uri(uri)?)
    }
}

impl Default for ConnectionFactory {
    fn default() -> Self {
        let mut factory = Self::empty();
        factory.register("tcp", TcpConnector);
        factory.register("redis", TcpConnector);
        factory.register("unix", UnixConnector);
        factory
    }
}

impl fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<_> = self.connectors.keys().collect();
        schemes.sort();
        f.debug_struct("ConnectionFactory")
            .field("schemes", &schemes)
            .finish()
    }
}

// ── Tests ──────────────────────────────────────────────────────────
