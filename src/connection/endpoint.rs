//! Blocking connection to a single server endpoint.
//!
//! Owns at most one transport plus an integrated read buffer. Replies are
//! pulled straight from the buffer by the RESP parser; any I/O failure or
//! malformed reply drops the transport before the error surfaces, so a
//! connection is never left in the middle of a reply.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use memchr::memmem;

use crate::command::{Command, RawCommand};
use crate::config::EndpointParameters;
use crate::connection::transport::{Connector, Transport};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::resp::parser::{parse_reply, ReplySource};
use crate::resp::stream::{read_streamed, Streamed};
use crate::resp::Reply;

/// Initial read buffer capacity.
const DEFAULT_BUF_CAPACITY: usize = 16 * 1024;

/// Bytes requested from the transport per read.
const READ_CHUNK: usize = 8 * 1024;

/// A single connection to one server.
pub struct EndpointConnection {
    params: EndpointParameters,
    identifier: String,
    connector: Arc<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    /// Data read from the transport but not yet consumed by the parser.
    buf: BytesMut,
    /// Commands replayed on every successful connect.
    init_commands: Vec<RawCommand>,
}

impl EndpointConnection {
    pub fn new(params: EndpointParameters, connector: Arc<dyn Connector>) -> Self {
        Self {
            identifier: params.identifier(),
            params,
            connector,
            transport: None,
            buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            init_commands: Vec::new(),
        }
    }

    pub fn parameters(&self) -> &EndpointParameters {
        &self.params
    }

    /// `host:port`, or the socket path for unix endpoints.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Queue a command to run right after every connect.
    pub fn add_init_command(&mut self, cmd: RawCommand) {
        self.init_commands.push(cmd);
    }

    pub fn init_commands(&self) -> &[RawCommand] {
        &self.init_commands
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Open the transport and replay the init commands.
    pub fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(Error::client(format!(
                "connection to {} is already open",
                self.identifier
            )));
        }

        let transport = self
            .connector
            .open(&self.params)
            .map_err(|e| self.fault(e))?;
        self.transport = Some(transport);
        self.buf.clear();
        tracing::debug!(endpoint = %self.identifier, "connected");

        if !self.init_commands.is_empty() {
            self.run_init_commands()?;
        }
        Ok(())
    }

    /// Close the transport. Does nothing when already closed.
    pub fn disconnect(&mut self) {
        if self.transport.take().is_some() {
            tracing::debug!(endpoint = %self.identifier, "disconnected");
        }
        self.buf.clear();
    }

    /// Write every init command, then read every reply.
    fn run_init_commands(&mut self) -> Result<()> {
        let mut batch = Vec::new();
        for cmd in &self.init_commands {
            batch.extend_from_slice(&cmd.serialize());
        }
        self.write_bytes(&batch)?;

        for idx in 0..self.init_commands.len() {
            if let Reply::Error(err) = parse_reply(self)? {
                let id = self.init_commands[idx].id().to_string();
                self.disconnect();
                return Err(Error::Communication {
                    endpoint: self.identifier.clone(),
                    source: io::Error::other(format!("`{id}` failed: {err}")),
                });
            }
        }
        Ok(())
    }

    // ── Raw I/O ──

    /// Write the whole buffer, connecting first if needed.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if !self.is_connected() {
            self.connect()?;
        }

        let mut written = 0;
        while written < data.len() {
            let result = match self.transport.as_mut() {
                Some(transport) => transport.write(&data[written..]),
                None => Err(not_connected()),
            };
            match result {
                Ok(0) => {
                    return Err(self.fault(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "error while writing bytes to the server",
                    )))
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(self.fault(e)),
            }
        }

        let flushed = match self.transport.as_mut() {
            Some(transport) => transport.flush(),
            None => Err(not_connected()),
        };
        flushed.map_err(|e| self.fault(e))?;

        tracing::trace!(endpoint = %self.identifier, bytes = data.len(), "wrote request");
        Ok(())
    }

    /// Pull more bytes from the transport into the read buffer.
    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let result = match self.transport.as_mut() {
                Some(transport) => transport.read(&mut chunk),
                None => Err(not_connected()),
            };
            match result {
                Ok(0) => {
                    return Err(self.fault(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed by server",
                    )))
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(self.fault(e)),
            }
        }
    }

    /// Drop the transport and wrap `err` with this endpoint's identity.
    fn fault(&mut self, err: io::Error) -> Error {
        tracing::warn!(endpoint = %self.identifier, error = %err, "communication fault");
        self.disconnect();
        Error::Communication {
            endpoint: self.identifier.clone(),
            source: err,
        }
    }

    // ── Replies ──

    /// Read one raw reply. Error replies are returned inline.
    pub fn read_reply(&mut self) -> Result<Reply> {
        parse_reply(self)
    }

    /// Read one reply, handing back arrays as a lazy iterator.
    pub fn read_streaming(&mut self) -> Result<Streamed<'_, Self>> {
        read_streamed(self)
    }

    /// Write `cmd` and read its reply, reshaped by the command unless it is
    /// a status or error reply.
    pub fn execute_command(&mut self, cmd: &dyn Command) -> Result<Reply> {
        self.write_request(cmd)?;
        if cmd.closes_connection() {
            self.disconnect();
            return Ok(Reply::Null);
        }
        self.read_response(cmd)
    }

    pub fn write_request(&mut self, cmd: &dyn Command) -> Result<()> {
        self.write_bytes(&cmd.serialize())
    }

    pub fn read_response(&mut self, cmd: &dyn Command) -> Result<Reply> {
        match self.read_reply()? {
            reply @ (Reply::Status(_) | Reply::Error(_)) => Ok(reply),
            reply => cmd.parse_reply(reply),
        }
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection is not open")
}

impl ReplySource for EndpointConnection {
    fn read_line(&mut self) -> Result<Bytes> {
        let mut scanned = 0;
        loop {
            if let Some(pos) = memmem::find(&self.buf[scanned..], b"\r\n") {
                let end = scanned + pos;
                let line = self.buf.split_to(end + 2).freeze();
                return Ok(line.slice(..end));
            }
            // The previous chunk may have ended on '\r'.
            scanned = self.buf.len().saturating_sub(1);
            self.fill()?;
        }
    }

    fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        while self.buf.len() < len {
            self.fill()?;
        }
        Ok(self.buf.split_to(len).freeze())
    }

    fn protocol_error(&mut self, message: String) -> Error {
        tracing::warn!(endpoint = %self.identifier, %message, "malformed reply");
        self.disconnect();
        Error::Protocol {
            endpoint: self.identifier.clone(),
            message,
        }
    }

    fn abandon(&mut self) {
        self.disconnect();
    }
}

impl Connection for EndpointConnection {
    fn connect(&mut self) -> Result<()> {
        EndpointConnection::connect(self)
    }

    fn disconnect(&mut self) {
        EndpointConnection::disconnect(self)
    }

    fn is_connected(&self) -> bool {
        EndpointConnection::is_connected(self)
    }

    fn identifier(&self) -> String {
        self.identifier.clone()
    }

    fn write_request(&mut self, cmd: &dyn Command) -> Result<()> {
        EndpointConnection::write_request(self, cmd)
    }

    fn read_response(&mut self, cmd: &dyn Command) -> Result<Reply> {
        EndpointConnection::read_response(self, cmd)
    }

    fn read_reply(&mut self) -> Result<Reply> {
        EndpointConnection::read_reply(self)
    }

    fn execute_command(&mut self, cmd: &dyn Command) -> Result<Reply> {
        EndpointConnection::execute_command(self, cmd)
    }
}

impl fmt::Debug for EndpointConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConnection")
            .field("endpoint", &self.identifier)
            .field("connected", &self.is_connected())
            .field("buffered", &self.buf.len())
            .finish()
    }
}

impl fmt::Display for EndpointConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier)
    }
}

// ── Tests ──────────────────────────────────────────────────────────
