//! Error types for Silo.

use thiserror::Error;

/// Errors shared across the cache backends and the HTTP layer.
///
/// Variants carry strings rather than source errors so the type stays
/// `Clone + PartialEq`: the reassembly pipe stores a terminal condition
/// once and hands the same value to every subsequent read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The key does not exist in the cache. Not a failure; maps to 404 at
    /// the HTTP boundary.
    #[error("cache miss")]
    Miss,

    /// The operation's context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation's deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A transfer reported success but left a gap in the delivered bytes.
    #[error("broken stream: transfer completed with missing blocks")]
    BrokenStream,

    /// A remote-store failure, wrapped with operation context.
    #[error("{context}: {message}")]
    Backend { context: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap a remote-store failure with operation context.
    pub fn backend(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Error::Backend {
            context: context.into(),
            message: err.to_string(),
        }
    }

    /// True for the cancellation conditions, which are propagated unwrapped
    /// so callers can distinguish them from backend failures.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        // Recover an Error that crossed an AsyncRead boundary intact.
        match err.get_ref().and_then(|e| e.downcast_ref::<Error>()) {
            Some(inner) => inner.clone(),
            None => Error::Io(err.to_string()),
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        std::io::Error::other(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
