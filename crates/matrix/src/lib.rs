//! Matrix backend for relaybot.
//!
//! Talks to a homeserver through the client-server HTTP API: password login,
//! room joins, long-poll `/sync` for inbound messages and `m.room.message`
//! sends for outbound ones.

pub mod api;
pub mod config;
pub mod plugin;
pub mod sync;

pub use {
    config::MatrixServerConfig,
    plugin::{MatrixBackend, factory},
};

/// Backend type key under `servers.<type>` in the config file.
pub const BACKEND_TYPE: &str = "matrix";
