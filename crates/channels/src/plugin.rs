use {
    async_trait::async_trait, relaybot_routing::Target, tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
};

use crate::{Error, Result, message::MessageEnvelope};

/// Producer half of a backend's private inbound queue.
pub type InboundSender = mpsc::Sender<MessageEnvelope>;

/// Consumer half of a backend's private inbound queue.
pub type InboundReceiver = mpsc::Receiver<MessageEnvelope>;

/// Create a bounded inbound queue. `capacity` is clamped to at least 1.
pub fn inbound_queue(capacity: usize) -> (InboundSender, InboundReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Push `envelope` onto a backend's inbound queue, giving up once `cancel`
/// fires.
///
/// The routing task closes the queue when it shuts down, so a closed queue
/// under a cancelled token is reported as [`Error::Cancelled`].
pub async fn forward(
    inbound: &InboundSender,
    cancel: &CancellationToken,
    envelope: MessageEnvelope,
) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        sent = inbound.send(envelope) => match sent {
            Ok(()) => Ok(()),
            Err(_) if cancel.is_cancelled() => Err(Error::Cancelled),
            Err(_) => Err(Error::read("inbound queue closed")),
        },
    }
}

/// Capability every chat protocol connector implements.
///
/// All methods take `&self`: while one task sits in [`Backend::read`], other
/// backends' routing tasks call [`Backend::write`] on the same instance.
/// Connectors keep their session behind interior mutability.
///
/// Lifecycle: `connect` → `set_targets` → `read` (until cancelled). `write`
/// is valid any time after `connect` succeeded.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Stable identifier matching the configuration key.
    fn name(&self) -> &str;

    /// Establish the session. Must not return `Ok` before the remote end
    /// has confirmed the session is ready.
    async fn connect(&self) -> Result<()>;

    /// Join every target's room, skipping rooms already joined.
    async fn set_targets(&self, targets: Vec<Target>) -> Result<()>;

    /// Run the protocol event loop, pushing an envelope (without destination)
    /// for every chat message not sent by this backend's own identity.
    ///
    /// Returns [`crate::Error::Cancelled`] once `cancel` fires, after the
    /// session has been released.
    async fn read(&self, cancel: CancellationToken, inbound: InboundSender) -> Result<()>;

    /// Deliver `msg` to `msg.destination`'s room on this backend.
    async fn write(&self, msg: &MessageEnvelope) -> Result<()>;

    /// Release the session without going through `read`. Idempotent.
    async fn disconnect(&self) -> Result<()>;
}
