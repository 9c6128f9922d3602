//! Error Taxonomy
//!
//! Two families of errors live here:
//!
//! - [`SessionError`]: returned synchronously from façade operations
//!   (capacity, unknown id, ended session, turn already running).
//! - [`StreamFailure`]: the `Err` arm of every item the generation service
//!   yields. A turn absorbs it and renders it into the sink; it never
//!   reaches the caller of `send`.

use thiserror::Error;

use crate::session::SessionId;

/// Errors surfaced by session lifecycle operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Store is still full after the eviction sweep
    #[error("maximum number of sessions ({max}) reached; end a session first")]
    CapacityExceeded {
        /// Configured capacity
        max: usize,
    },

    /// No session with this id exists
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// Session exists but has been ended
    #[error("session {0} is not active")]
    Inactive(SessionId),

    /// A turn is already streaming on this session
    #[error("session {0} is busy with another message")]
    Busy(SessionId),
}

impl SessionError {
    /// Stable machine-readable kind, used by wire protocols
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CapacityExceeded { .. } => "capacityExceeded",
            Self::NotFound(_) => "notFound",
            Self::Inactive(_) => "inactive",
            Self::Busy(_) => "busy",
        }
    }
}

/// Failure while opening or reading a generation stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamFailure {
    /// The service process or connection could not be started
    #[error("failed to start generation service: {0}")]
    Spawn(String),

    /// I/O failure while reading the stream
    #[error("stream transport error: {0}")]
    Transport(String),

    /// The stream produced something that is not a valid event
    #[error("invalid stream event: {0}")]
    Protocol(String),

    /// The service itself reported an error
    #[error("{0}")]
    Service(String),
}

impl StreamFailure {
    /// Failure reported by the service, rendered verbatim
    pub fn service(message: impl Into<String>) -> Self {
        Self::Service(message.into())
    }
}

/// Result alias for façade operations
pub type SessionResult<T> = Result<T, SessionError>;
