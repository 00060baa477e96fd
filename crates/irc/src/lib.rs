//! IRC backend for relaybot.
//!
//! Implements [`relaybot_channels::Backend`] over a plain or TLS TCP
//! connection. A background driver task owns the socket, answers `PING`s and
//! hands `PRIVMSG`s to the read loop.

pub mod codec;
pub mod config;
pub mod connection;
pub mod message;
pub mod plugin;
pub mod tls;

pub use {
    config::IrcServerConfig,
    plugin::{IrcBackend, factory},
};

/// Backend type key under `servers.<type>` in the config file.
pub const BACKEND_TYPE: &str = "irc";
