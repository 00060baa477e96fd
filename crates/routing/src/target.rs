use serde::{Deserialize, Serialize};

/// A room on a specific backend, e.g. `irc1` / `#general`.
///
/// In configuration files a target is written as `{ server = "...", name = "..." }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Backend instance name, matching its configuration key.
    #[serde(rename = "server")]
    pub backend: String,
    /// Protocol-specific room identifier (IRC channel, Matrix room ID or alias).
    #[serde(rename = "name")]
    pub room: String,
}

impl Target {
    pub fn new(backend: impl Into<String>, room: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            room: room.into(),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.backend, self.room)
    }
}

/// Directed forwarding rule: messages originating at `from` are sent to `to`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteEdge {
    pub from: Target,
    pub to: Target,
}

impl RouteEdge {
    pub fn new(from: Target, to: Target) -> Self {
        Self { from, to }
    }

    /// Both endpoints are the same room on the same backend.
    #[must_use]
    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }
}

impl std::fmt::Display for RouteEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}
