use relaybot_routing::Target;

/// Who said what.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    pub sender: String,
    pub text: String,
}

impl Payload {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
        }
    }
}

/// A message in flight between two rooms.
///
/// Freshly read envelopes have no destination; the supervisor fills it in
/// with [`MessageEnvelope::routed_to`] once per outbound hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub source: Target,
    pub destination: Option<Target>,
    pub payload: Payload,
}

impl MessageEnvelope {
    /// Envelope as produced by a backend's read loop.
    pub fn inbound(source: Target, payload: Payload) -> Self {
        Self {
            source,
            destination: None,
            payload,
        }
    }

    /// Copy of this envelope addressed to `destination`.
    #[must_use]
    pub fn routed_to(&self, destination: Target) -> Self {
        Self {
            source: self.source.clone(),
            destination: Some(destination),
            payload: self.payload.clone(),
        }
    }

    /// Text delivered to the destination room: `(<sender>@<backend>) <text>`.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for MessageEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}@{}) {}",
            self.payload.sender, self.source.backend, self.payload.text
        )
    }
}
