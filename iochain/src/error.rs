//! Error types shared by every part of the engine.

use std::io;
use thiserror::Error;

/// Convenient alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while wiring up or driving sessions.
///
/// Configuration errors (`NullArgument`, `IllegalState`, `DuplicateName`,
/// `UnknownName`, `TypeMismatch`, `FilterLifecycle`) are returned synchronously
/// from setup calls. I/O-path errors (`WriteTimeout`, `WriteToClosedSession`,
/// `Io`) travel on write futures and as `exception_caught` chain events.
#[derive(Debug, Error)]
pub enum Error {
    /// A required argument was missing or empty.
    #[error("{0} must not be empty")]
    NullArgument(&'static str),

    /// An argument was outside its permitted range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not allowed in the current state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A filter with the same name already exists in the chain.
    #[error("other filter is using the same name: {0}")]
    DuplicateName(String),

    /// No filter with the given name exists in the chain.
    #[error("filter not found: {0}")]
    UnknownName(String),

    /// A session configuration of the wrong transport type was supplied.
    #[error("incompatible session configuration: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The configuration type the transport declares.
        expected: &'static str,
        /// The configuration type that was supplied.
        actual: &'static str,
    },

    /// A filter's add/remove lifecycle hook failed.
    #[error("{method}() failed for filter {name}")]
    FilterLifecycle {
        /// Name the filter was (or would have been) registered under.
        name: String,
        /// The hook that failed.
        method: &'static str,
        /// What the hook reported.
        #[source]
        source: Box<Error>,
    },

    /// A write stayed in flight longer than the configured write timeout.
    #[error("write request timed out on session {session_id}")]
    WriteTimeout {
        /// The session whose write timed out.
        session_id: u64,
    },

    /// Writes were requested on, or left queued in, a closed session.
    #[error("{requests} write request(s) failed: session {session_id} is closed")]
    WriteToClosedSession {
        /// The closed session.
        session_id: u64,
        /// How many requests the failure covers.
        requests: usize,
    },

    /// A transport-level I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Any other failure raised by a filter or handler.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wraps an arbitrary error raised by user code.
    pub fn other<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Other(err.into())
    }

    /// Returns `true` for errors that belong to the write path.
    pub fn is_write_error(&self) -> bool {
        matches!(
            self,
            Error::WriteTimeout { .. } | Error::WriteToClosedSession { .. }
        )
    }
}
