use std::error::Error as StdError;
use std::fmt;
use std::io;

use thiserror::Error;

// ── Error taxonomy ─────────────────────────────────────────────────
//
//  Error
//  ├── Client            local misuse, raised immediately
//  ├── Server            error reply from the server
//  ├── Communication     I/O or timeout, connection already closed
//  │   └── Protocol      malformed response (also a communication fault)
//  ├── Aborted           EXEC rejected because of a WATCH conflict
//  ├── Distributor       empty hash ring
//  └── Callback          error returned by a caller-supplied block

/// Structured server error kinds for programmatic matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Generic ERR
    Err,
    /// WRONGTYPE Operation against a key holding the wrong kind of value
    WrongType,
    /// NOSCRIPT No matching script
    NoScript,
    /// BUSY Redis is busy running a script
    Busy,
    /// LOADING Redis is loading the dataset in memory
    Loading,
    /// READONLY You can't write against a read only replica
    ReadOnly,
    /// EXECABORT Transaction discarded because of previous errors
    ExecAbort,
    /// NOAUTH / WRONGPASS
    Auth,
    /// Any other error prefix
    Other(String),
}

impl ErrorKind {
    /// Classify an error code (the first word of an error reply).
    pub fn from_code(code: &str) -> Self {
        match code {
            "ERR" => Self::Err,
            "WRONGTYPE" => Self::WrongType,
            "NOSCRIPT" => Self::NoScript,
            "BUSY" => Self::Busy,
            "LOADING" => Self::Loading,
            "READONLY" => Self::ReadOnly,
            "EXECABORT" => Self::ExecAbort,
            "NOAUTH" | "WRONGPASS" => Self::Auth,
            other => Self::Other(other.to_string()),
        }
    }
}

/// An error reply (`-CODE message`) as sent by the server.
///
/// The leading code word is kept apart from the human readable message, so
/// `-ERR bad` has code `ERR` and message `bad`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReply {
    code: String,
    message: String,
}

impl ErrorReply {
    /// Split a raw error line (without the `-` prefix) into code and message.
    pub fn parse(line: &str) -> Self {
        match line.split_once(' ') {
            Some((code, message)) => Self {
                code: code.to_string(),
                message: message.to_string(),
            },
            None => Self {
                code: line.to_string(),
                message: String::new(),
            },
        }
    }

    /// The error code, e.g. `ERR` or `WRONGTYPE`.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The message without its code prefix.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_code(&self.code)
    }
}

impl fmt::Display for ErrorReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(&self.code)
        } else {
            write!(f, "{} {}", self.code, self.message)
        }
    }
}

/// All error variants for redlink.
#[derive(Debug, Error)]
pub enum Error {
    /// The caller misused the API (nested transaction, WATCH after MULTI, ...).
    #[error("client error: {0}")]
    Client(String),

    /// The server answered with an error reply.
    #[error("server error: {0}")]
    Server(ErrorReply),

    /// Socket level failure. The connection has been closed already.
    #[error("connection error [{endpoint}]: {source}")]
    Communication {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// The server sent something that violates the protocol.
    #[error("protocol error [{endpoint}]: {message}")]
    Protocol { endpoint: String, message: String },

    /// EXEC returned a null reply: a watched key changed.
    #[error("transaction aborted: {0}")]
    Aborted(String),

    /// Lookups against a distributor that has no nodes.
    #[error("distributor error: {0}")]
    Distributor(String),

    /// Error raised by a caller-supplied pipeline or transaction block.
    #[error("callback error: {0}")]
    Callback(#[source] Box<dyn StdError + Send + Sync>),
}

impl Error {
    pub fn client(msg: impl Into<String>) -> Self {
        Self::Client(msg.into())
    }

    /// Wrap an arbitrary caller error so it can be returned from a block.
    pub fn callback<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self::Callback(err.into())
    }

    /// True for I/O failures and malformed responses alike.
    pub fn is_communication(&self) -> bool {
        matches!(self, Self::Communication { .. } | Self::Protocol { .. })
    }

    pub fn is_server(&self) -> bool {
        matches!(self, Self::Server(_))
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }

    /// True when the underlying socket operation hit its timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Communication { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Identifier of the endpoint a communication fault happened on.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::Communication { endpoint, .. } | Self::Protocol { endpoint, .. } => {
                Some(endpoint)
            }
            _ => None,
        }
    }

    /// The server error reply carried by this error, if any.
    pub fn server_reply(&self) -> Option<&ErrorReply> {
        match self {
            Self::Server(reply) => Some(reply),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ── Tests ──────────────────────────────────────────────────────────
