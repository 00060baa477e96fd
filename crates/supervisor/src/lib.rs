//! Relay supervisor: connects every backend, joins the rooms the routing
//! table needs, then runs one read task and one routing task per backend
//! until cancellation or the first read failure.

pub mod error;
#[cfg(feature = "metrics")]
pub mod metric_names;
mod router;
pub mod supervisor;

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod testing;

pub use {
    error::{Result, SupervisorError},
    supervisor::{Supervisor, SupervisorOptions},
};
