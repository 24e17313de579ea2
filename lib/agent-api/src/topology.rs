//! Router listener and connector records

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Role of listeners and connectors that carry router-to-router links
pub const ROLE_INTER_ROUTER: &str = "inter-router";

/// Map of router container id to the listeners that router advertises.
/// This is the body of a topology broadcast.
pub type RouterTopology = BTreeMap<String, Vec<Listener>>;

/// A listener configured on a router
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    #[serde(default)]
    pub name: String,
    pub host: String,
    pub port: String,
    #[serde(default)]
    pub role: String,
}

/// A connector configured on a router
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connector {
    pub name: String,
    pub host: String,
    pub port: String,
    #[serde(default)]
    pub role: String,
}

impl Listener {
    pub fn is_inter_router(&self) -> bool {
        self.role == ROLE_INTER_ROUTER
    }
}

impl Connector {
    /// Build the inter-router connector that targets the given listener
    pub fn inter_router(name: impl Into<String>, listener: &Listener) -> Self {
        Self {
            name: name.into(),
            host: listener.host.clone(),
            port: listener.port.clone(),
            role: ROLE_INTER_ROUTER.to_string(),
        }
    }

    pub fn is_inter_router(&self) -> bool {
        self.role == ROLE_INTER_ROUTER
    }

    /// Whether two connectors point at the same endpoint with the same role
    pub fn same_target(&self, other: &Connector) -> bool {
        self.host == other.host && self.port == other.port && self.role == other.role
    }
}
