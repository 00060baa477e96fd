use std::error::Error as StdError;

use crate::state::BackendState;

/// Crate-wide result type for backend operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed backend errors shared by every connector.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session could not be established (handshake, login, transport).
    #[error("connect failed: {reason}")]
    Connect { reason: String },

    /// A room could not be joined.
    #[error("failed to join room [{room}]: {reason}")]
    Join { room: String, reason: String },

    /// The event loop stopped for a reason other than cancellation.
    #[error("read failed: {reason}")]
    Read { reason: String },

    /// A single outbound delivery failed.
    #[error("failed to write to room [{room}]: {reason}")]
    Write { room: String, reason: String },

    /// An inbound event referenced a room this backend was not told to join.
    #[error("cannot find target [{room}]")]
    TargetNotFound { room: String },

    /// Operation requires a live session.
    #[error("backend is not connected")]
    NotConnected,

    /// Operation is not allowed from the backend's current lifecycle state.
    #[error("cannot move from {from} to {to}")]
    InvalidState { from: BackendState, to: BackendState },

    /// Protocol-specific configuration is malformed.
    #[error("invalid backend config: {message}")]
    InvalidConfig { message: String },

    /// No factory is registered for a backend type.
    #[error("unknown backend type: {backend_type}")]
    UnknownBackendType { backend_type: String },

    /// The read loop stopped because shutdown was requested.
    #[error("cancelled")]
    Cancelled,

    /// Wrapped source error from an external dependency.
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn connect(reason: impl std::fmt::Display) -> Self {
        Self::Connect {
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn join(room: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Join {
            room: room.into(),
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn read(reason: impl std::fmt::Display) -> Self {
        Self::Read {
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn write(room: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Write {
            room: room.into(),
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn invalid_config(message: impl std::fmt::Display) -> Self {
        Self::InvalidConfig {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// True when this is the expected shutdown signal rather than a fault.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
