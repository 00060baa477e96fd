//! Config schema: backend instances, routes, and relay tuning.
use std::collections::BTreeMap;

use {
    relaybot_routing::{RouteEdge, RoutingTable},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Trace-level logging plus protocol traces in every connector.
    pub debug: bool,
    pub relay: RelaySettings,
    /// Backend type (`irc`, `matrix`) → instance name → connector-specific table.
    ///
    /// Instance tables are kept untyped here; each connector parses its own.
    pub servers: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    /// Ordered route declarations forming the routing table.
    pub mappings: Vec<RouteEdge>,
}

impl RelayConfig {
    /// Every configured backend instance name, across all types.
    pub fn backend_names(&self) -> impl Iterator<Item = &str> {
        self.servers
            .values()
            .flat_map(|instances| instances.keys().map(String::as_str))
    }

    /// Build the routing table, rejecting routes that reference backends
    /// not present under `servers`.
    pub fn routing_table(&self) -> relaybot_routing::Result<RoutingTable> {
        let table = RoutingTable::new(self.mappings.clone());
        table.check_backends(self.backend_names())?;
        Ok(table)
    }
}

/// Relay runtime tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Capacity of each backend's inbound queue. Defaults to 64.
    pub queue_capacity: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self { queue_capacity: 64 }
    }
}
