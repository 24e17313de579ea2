//! Topology federation between agent replicas

use crate::event::ConnectionId;
use crate::metrics::AgentMetrics;
use crate::registry::ConnectionRegistry;
use agent_api::{Message, RouterTopology};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// The router map last reported by one sibling agent
#[derive(Clone, Debug)]
pub struct FederatedSlice {
    /// Connection the slice arrived on
    pub connection: ConnectionId,
    pub routers: RouterTopology,
    pub received_at: DateTime<Utc>,
}

/// Federated cache of the routers known to sibling agents, keyed by the
/// sending agent's container id. Each slice is replaced whole per message.
#[derive(Debug, Default)]
pub struct KnownRouters {
    agents: BTreeMap<String, FederatedSlice>,
}

impl KnownRouters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the slice reported by `agent` over `connection`. Returns true if
    /// the routers changed.
    pub fn replace(&mut self, agent: &str, connection: ConnectionId, routers: RouterTopology) -> bool {
        let changed = self
            .agents
            .get(agent)
            .map_or(true, |slice| slice.routers != routers);
        self.agents.insert(
            agent.to_string(),
            FederatedSlice {
                connection,
                routers,
                received_at: Utc::now(),
            },
        );
        changed
    }

    /// Purge the slice `agent` delivered over `connection`. A slice that
    /// arrived on another connection is kept. Returns true if one was removed.
    pub fn remove(&mut self, agent: &str, connection: ConnectionId) -> bool {
        match self.agents.get(agent) {
            Some(slice) if slice.connection == connection => {
                self.agents.remove(agent);
                true
            }
            _ => false,
        }
    }

    pub fn slice(&self, agent: &str) -> Option<&FederatedSlice> {
        self.agents.get(agent)
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Union of all slices
    pub fn routers(&self) -> RouterTopology {
        let now = Utc::now();
        let mut all = RouterTopology::new();
        for (agent, slice) in &self.agents {
            debug!(
                "agent {} reported {} router(s) {}s ago",
                agent,
                slice.routers.len(),
                (now - slice.received_at).num_seconds()
            );
            for (id, listeners) in &slice.routers {
                all.insert(id.clone(), listeners.clone());
            }
        }
        all
    }
}

/// Send the current connected-router snapshot to every topology subscriber
pub fn publish_topology(registry: &ConnectionRegistry, metrics: &AgentMetrics) {
    let topology = registry.topology();
    let message = match Message::topology(&topology) {
        Ok(message) => message,
        Err(e) => {
            warn!("Failed to encode router topology: {}", e);
            return;
        }
    };

    for (id, subscriber) in registry.subscribers() {
        match subscriber.sender.send(message.clone()) {
            Ok(()) => metrics.topology_broadcasts_total.inc(),
            Err(e) => warn!("Failed to send topology to {}: {}", id, e),
        }
    }
}
