//! Metric names recorded when the `metrics` feature is enabled.

/// Envelopes taken off a backend's inbound queue.
pub const MESSAGES_RECEIVED_TOTAL: &str = "relaybot_messages_received_total";
/// Successful writes to a destination backend.
pub const MESSAGES_DELIVERED_TOTAL: &str = "relaybot_messages_delivered_total";
/// Failed writes to a destination backend.
pub const WRITE_ERRORS_TOTAL: &str = "relaybot_write_errors_total";
/// Backends currently in their read loop.
pub const BACKENDS_ACTIVE: &str = "relaybot_backends_active";
