use bytes::Bytes;

use crate::error::ErrorReply;

/// A decoded server reply.
///
/// `Map` never comes off the wire; command reply transformers use it when
/// they reshape a flat array into key/value pairs.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// +OK\r\n
    Status(String),
    /// -ERR message\r\n, kept inline
    Error(ErrorReply),
    /// :1000\r\n
    Integer(i64),
    /// $6\r\nfoobar\r\n
    Bulk(Bytes),
    /// *2\r\n…
    Array(Vec<Reply>),
    /// Key/value pairs produced by reply transformers.
    Map(Vec<(Reply, Reply)>),
    /// $-1\r\n, *-1\r\n or :nil\r\n
    Null,
}

// ── Convenience accessors ──────────────────────────────────────────

impl Reply {
    pub fn status(text: impl Into<String>) -> Self {
        Self::Status(text.into())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Self::Bulk(data.into())
    }

    /// Try to interpret this value as a UTF-8 string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Status(s) => Some(s),
            Self::Bulk(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Try to interpret this value as bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bulk(b) => Some(b),
            Self::Status(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to interpret this value as an array (consumes self).
    pub fn into_array(self) -> Option<Vec<Reply>> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn is_status(&self) -> bool {
        matches!(self, Self::Status(_))
    }

    /// True for the `+OK` status.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Status(s) if s == "OK")
    }

    /// True for the `+QUEUED` acknowledgement sent inside MULTI.
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Status(s) if s == "QUEUED")
    }

    pub fn as_error(&self) -> Option<&ErrorReply> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the type name as a static string (useful for error messages).
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Error(_) => "error",
            Self::Integer(_) => "integer",
            Self::Bulk(_) => "bulk",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Null => "null",
        }
    }
}

impl From<&str> for Reply {
    fn from(s: &str) -> Self {
        Self::Bulk(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<i64> for Reply {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

// ── Tests ──────────────────────────────────────────────────────────
