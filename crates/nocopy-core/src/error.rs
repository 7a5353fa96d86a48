//! Shared error type across nocopy crates.

use thiserror::Error;

use crate::message::Fault;

/// Error classes (stable API, used in logs and test vectors).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed wire frame.
    Protocol,
    /// Request/reply correlation conflict.
    Correlation,
    /// A middleware refused the frame.
    Middleware,
    /// A remote handler answered with a failure.
    Application,
    /// Substrate publish/subscribe failure.
    Transport,
    /// Cancellation or deadline.
    Lifecycle,
    /// Invalid configuration.
    Config,
    /// Internal error.
    Internal,
}

impl ErrorKind {
    /// String representation used in logs and test vectors.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Protocol => "PROTOCOL",
            ErrorKind::Correlation => "CORRELATION",
            ErrorKind::Middleware => "MIDDLEWARE",
            ErrorKind::Application => "APPLICATION",
            ErrorKind::Transport => "TRANSPORT",
            ErrorKind::Lifecycle => "LIFECYCLE",
            ErrorKind::Config => "CONFIG",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type used by core and broker.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("empty")]
    Empty,
    #[error("no payload")]
    NoPayload,
    #[error("redundant message")]
    RedundantMessage,
    #[error("illegal type")]
    IllegalType,
    #[error("illegal middleware: {0}")]
    IllegalMiddleware(String),
    #[error("bad frame: {0}")]
    BadFrame(String),
    #[error("illegal id")]
    IllegalId,
    #[error("digest do not match")]
    DigestMismatch,
    #[error("algorithm do not match")]
    AlgorithmMismatch,
    #[error(transparent)]
    Failure(#[from] Fault),
    #[error("transport: {0}")]
    Transport(String),
    #[error("transport closed")]
    Closed,
    #[error("cancelled")]
    Cancelled,
    #[error("timeout")]
    Timeout,
    #[error("config: {0}")]
    Config(String),
    #[error("unsupported config version")]
    UnsupportedVersion,
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Map the error to its stable class.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Empty
            | Error::NoPayload
            | Error::RedundantMessage
            | Error::IllegalType
            | Error::IllegalMiddleware(_)
            | Error::BadFrame(_) => ErrorKind::Protocol,
            Error::IllegalId => ErrorKind::Correlation,
            Error::DigestMismatch | Error::AlgorithmMismatch => ErrorKind::Middleware,
            Error::Failure(_) => ErrorKind::Application,
            Error::Transport(_) | Error::Closed => ErrorKind::Transport,
            Error::Cancelled | Error::Timeout => ErrorKind::Lifecycle,
            Error::Config(_) | Error::UnsupportedVersion => ErrorKind::Config,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::BadFrame(e.to_string())
    }
}
