//! Backend capability contract.
//!
//! Each chat protocol (IRC, Matrix, ...) implements the [`Backend`] trait.
//! The supervisor only ever talks to backends through this trait, so it never
//! needs to know which protocol sits behind a name.

pub mod error;
pub mod message;
pub mod plugin;
pub mod registry;
pub mod state;

pub use {
    error::{Error, Result},
    message::{MessageEnvelope, Payload},
    plugin::{Backend, InboundReceiver, InboundSender, forward, inbound_queue},
    registry::{BackendFactory, BackendOptions, BackendRegistry},
    state::{BackendBase, BackendState},
};
