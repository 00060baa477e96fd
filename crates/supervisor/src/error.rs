pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Why [`crate::Supervisor::start`] returned.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to connect backend [{backend}]")]
    Connect {
        backend: String,
        #[source]
        source: relaybot_channels::Error,
    },

    #[error("failed to set targets for backend [{backend}]")]
    Join {
        backend: String,
        #[source]
        source: relaybot_channels::Error,
    },

    #[error("failed to read from backend [{backend}]")]
    Read {
        backend: String,
        #[source]
        source: relaybot_channels::Error,
    },

    /// A read task panicked or was aborted.
    #[error("read task failed: {0}")]
    Task(String),

    #[error("backend name [{0}] is configured more than once")]
    DuplicateBackend(String),

    #[error(transparent)]
    Routing(#[from] relaybot_routing::Error),

    /// Shutdown was requested through the caller's token.
    #[error("relay cancelled")]
    Cancelled,
}

impl SupervisorError {
    /// True for a requested shutdown, false for any fault.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Name of the backend the error originated from, if any.
    pub fn backend(&self) -> Option<&str> {
        match self {
            Self::Connect { backend, .. }
            | Self::Join { backend, .. }
            | Self::Read { backend, .. }
            | Self::DuplicateBackend(backend) => Some(backend.as_str()),
            _ => None,
        }
    }
}
