//! Static routing table for the relay.
//!
//! A [`Target`] names a room on a backend. A [`RouteEdge`] forwards every
//! message seen at `from` to `to`. The [`RoutingTable`] is built once from
//! configuration and only ever queried afterwards.

pub mod error;
pub mod table;
pub mod target;

pub use {
    error::{Error, Result},
    table::RoutingTable,
    target::{RouteEdge, Target},
};
