//! Pull-based RESP2 reply parser.
//!
//! Replies are read from a [`ReplySource`]: one header line is pulled, its
//! first byte selects the handler, and the handler pulls whatever payload it
//! needs (exact byte counts for bulk strings, nested replies for arrays).
//! The endpoint connection is the production source; [`SliceSource`] parses
//! from memory.

use bytes::Bytes;
use memchr::memmem;
use std::io;

use crate::error::{Error, ErrorReply, Result};
use crate::resp::types::Reply;

/// Something replies can be pulled from.
pub trait ReplySource {
    /// Read the next line, returning it without its CRLF terminator.
    fn read_line(&mut self) -> Result<Bytes>;

    /// Read exactly `len` bytes.
    fn read_bytes(&mut self, len: usize) -> Result<Bytes>;

    /// Build a malformed-response error, resetting the source first.
    fn protocol_error(&mut self, message: String) -> Error;

    /// Give up on whatever is still unread. Sources backed by a socket
    /// disconnect so that the next request starts on a clean stream.
    fn abandon(&mut self);
}

/// Result of reading one header: either a complete reply, or the element
/// count of a non-null array whose elements have not been read yet.
#[derive(Debug)]
pub(crate) enum Head {
    Value(Reply),
    Array(usize),
}

/// Read and fully materialize one reply. Error replies are returned inline
/// as [`Reply::Error`].
pub fn parse_reply<S: ReplySource + ?Sized>(src: &mut S) -> Result<Reply> {
    match read_head(src)? {
        Head::Value(reply) => Ok(reply),
        Head::Array(count) => {
            let mut elements = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                elements.push(parse_reply(src)?);
            }
            Ok(Reply::Array(elements))
        }
    }
}

/// Read one header line and dispatch on its prefix. Arrays stop after the
/// header so the caller decides between eager and streamed consumption.
pub(crate) fn read_head<S: ReplySource + ?Sized>(src: &mut S) -> Result<Head> {
    let line = src.read_line()?;
    if line.is_empty() {
        return Err(src.protocol_error("unexpected empty reply header".into()));
    }
    let payload = &line[1..];

    match line[0] {
        b'+' => Ok(Head::Value(Reply::Status(lossy(payload)))),
        b'-' => Ok(Head::Value(Reply::Error(ErrorReply::parse(&lossy(payload))))),
        b':' => parse_integer(src, payload).map(Head::Value),
        b'$' => match parse_length(payload) {
            Some(-1) => Ok(Head::Value(Reply::Null)),
            Some(len) if len >= 0 => {
                let len = len as usize;
                let data = src.read_bytes(len + 2)?;
                if &data[len..] != b"\r\n" {
                    return Err(src.protocol_error("bulk reply not terminated by CRLF".into()));
                }
                Ok(Head::Value(Reply::Bulk(data.slice(..len))))
            }
            _ => Err(src.protocol_error(format!(
                "cannot parse '{}' as a valid length for a bulk reply",
                lossy(payload)
            ))),
        },
        b'*' => match parse_length(payload) {
            Some(-1) => Ok(Head::Value(Reply::Null)),
            Some(count) if count >= 0 => Ok(Head::Array(count as usize)),
            _ => Err(src.protocol_error(format!(
                "cannot parse '{}' as a valid length for a multi-bulk reply",
                lossy(payload)
            ))),
        },
        other => Err(src.protocol_error(format!(
            "unknown reply prefix: 0x{other:02x}"
        ))),
    }
}

/// `:<integer>\r\n`, with `:nil` standing for null.
fn parse_integer<S: ReplySource + ?Sized>(src: &mut S, payload: &[u8]) -> Result<Reply> {
    if payload == b"nil" {
        return Ok(Reply::Null);
    }
    match parse_int_from_bytes(payload) {
        Some(n) => Ok(Reply::Integer(n)),
        None => Err(src.protocol_error(format!(
            "cannot parse '{}' as a valid numeric reply",
            lossy(payload)
        ))),
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Parse an integer from a byte slice (no allocations).
fn parse_int_from_bytes(bytes: &[u8]) -> Option<i64> {
    let (negative, digits) = match bytes.first()? {
        b'-' => (true, &bytes[1..]),
        b'+' => (false, &bytes[1..]),
        _ => (false, bytes),
    };
    if digits.is_empty() {
        return None;
    }

    // Accumulate as negative so i64::MIN does not overflow.
    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        n = n.checked_mul(10)?.checked_sub((b - b'0') as i64)?;
    }
    if negative {
        Some(n)
    } else {
        n.checked_neg()
    }
}

/// Length headers must be canonical decimal: no sign other than a leading
/// `-`, no padding.
fn parse_length(bytes: &[u8]) -> Option<i64> {
    if bytes.first() == Some(&b'+') {
        return None;
    }
    if bytes.len() > 1 && bytes[0] == b'0' {
        return None;
    }
    parse_int_from_bytes(bytes)
}

// ── Reply reader ───────────────────────────────────────────────────

/// Reads replies and decides what error replies become.
///
/// In the default (raising) mode an error reply turns into
/// [`Error::Server`]; in silent mode it is handed back as an inline
/// [`Reply::Error`] value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyReader {
    silent_errors: bool,
}

impl ReplyReader {
    pub fn new(silent_errors: bool) -> Self {
        Self { silent_errors }
    }

    pub fn silent() -> Self {
        Self::new(true)
    }

    pub fn is_silent(&self) -> bool {
        self.silent_errors
    }

    /// Parse one reply from `src`, applying the error mode.
    pub fn read<S: ReplySource + ?Sized>(&self, src: &mut S) -> Result<Reply> {
        let reply = parse_reply(src)?;
        self.check(reply)
    }

    /// Apply the error mode to an already decoded reply.
    pub fn check(&self, reply: Reply) -> Result<Reply> {
        match reply {
            Reply::Error(err) if !self.silent_errors => Err(Error::Server(err)),
            other => Ok(other),
        }
    }
}

// ── In-memory source ───────────────────────────────────────────────

/// A [`ReplySource`] over a byte buffer.
#[derive(Debug, Clone)]
pub struct SliceSource {
    buf: Bytes,
    pos: usize,
}

impl SliceSource {
    pub fn new(buf: impl Into<Bytes>) -> Self {
        Self {
            buf: buf.into(),
            pos: 0,
        }
    }

    /// Number of bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn eof(&self) -> Error {
        Error::Communication {
            endpoint: "buffer".into(),
            source: io::Error::new(io::ErrorKind::UnexpectedEof, "reply truncated"),
        }
    }
}

impl ReplySource for SliceSource {
    fn read_line(&mut self) -> Result<Bytes> {
        let rest = &self.buf[self.pos..];
        match memmem::find(rest, b"\r\n") {
            Some(end) => {
                let line = self.buf.slice(self.pos..self.pos + end);
                self.pos += end + 2;
                Ok(line)
            }
            None => {
                self.pos = self.buf.len();
                Err(self.eof())
            }
        }
    }

    fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        if self.remaining() < len {
            self.pos = self.buf.len();
            return Err(self.eof());
        }
        let data = self.buf.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(data)
    }

    fn protocol_error(&mut self, message: String) -> Error {
        self.abandon();
        Error::Protocol {
            endpoint: "buffer".into(),
            message,
        }
    }

    fn abandon(&mut self) {
        self.pos = self.buf.len();
    }
}

/// Parse one reply from a byte slice, returning it with the number of bytes
/// consumed. Error replies are returned inline.
pub fn parse_slice(buf: &[u8]) -> Result<(Reply, usize)> {
    let mut src = SliceSource::new(Bytes::copy_from_slice(buf));
    let reply = parse_reply(&mut src)?;
    Ok((reply, src.position()))
}

// ── Tests ──────────────────────────────────────────────────────────
