//! In-memory transports for unit tests.

use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::EndpointParameters;
use crate::connection::endpoint::EndpointConnection;
use crate::connection::transport::{Connector, Transport};

/// Bytes written by the client, shared with the test.
pub(crate) type Captured = Arc<Mutex<Vec<u8>>>;

/// Reads come from a fixed script, writes are captured.
struct Scripted {
    input: Cursor<Vec<u8>>,
    written: Captured,
    read_chunk: usize,
    write_budget: Option<usize>,
}

impl Read for Scripted {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = out.len().min(self.read_chunk);
        self.input.read(&mut out[..n])
    }
}

impl Write for Scripted {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = match self.write_budget {
            Some(0) => return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe")),
            Some(budget) => {
                let n = data.len().min(budget);
                self.write_budget = Some(budget - n);
                n
            }
            None => data.len(),
        };
        self.written.lock().extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Connector handing out a fresh [`Scripted`] transport on every open.
#[derive(Clone)]
pub(crate) struct MockConnector {
    script: Vec<u8>,
    written: Captured,
    read_chunk: usize,
    write_budget: Option<usize>,
}

impl MockConnector {
    pub(crate) fn new(script: &[u8]) -> Self {
        Self {
            script: script.to_vec(),
            written: Arc::new(Mutex::new(Vec::new())),
            read_chunk: 4096,
            write_budget: None,
        }
    }

    /// Hand out at most `n` bytes per read.
    pub(crate) fn read_chunk(mut self, n: usize) -> Self {
        self.read_chunk = n;
        self
    }

    /// Accept `n` bytes, then fail every write.
    pub(crate) fn write_budget(mut self, n: usize) -> Self {
        self.write_budget = Some(n);
        self
    }

    pub(crate) fn captured(&self) -> Captured {
        Arc::clone(&self.written)
    }

    pub(crate) fn endpoint(self, params: EndpointParameters) -> (EndpointConnection, Captured) {
        let written = self.captured();
        (EndpointConnection::new(params, Arc::new(self)), written)
    }
}

impl Connector for MockConnector {
    fn open(&self, _params: &EndpointParameters) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(Scripted {
            input: Cursor::new(self.script.clone()),
            written: Arc::clone(&self.written),
            read_chunk: self.read_chunk,
            write_budget: self.write_budget,
        }))
    }
}

/// Connector that always refuses.
pub(crate) struct Refusing;

impl Connector for Refusing {
    fn open(&self, _params: &EndpointParameters) -> io::Result<Box<dyn Transport>> {
        Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
    }
}

/// Endpoint at the default address replying with `script`.
pub(crate) fn endpoint(script: &[u8]) -> (EndpointConnection, Captured) {
    MockConnector::new(script).endpoint(EndpointParameters::default())
}

/// Captured bytes as text, for readable assertions.
pub(crate) fn text(captured: &Captured) -> String {
    String::from_utf8_lossy(&captured.lock()).into_owned()
}
