//! Prometheus metrics for the control plane

use crate::status::FleetStatus;
use crate::Result;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Gauges and counters describing the fleet as seen by this agent
#[derive(Clone)]
pub struct AgentMetrics {
    pub connected_routers: IntGauge,
    pub connected_brokers: IntGauge,
    pub known_agents: IntGauge,
    pub addresses: IntGauge,
    pub synchronized: IntGauge,
    pub connectivity_check_failures_total: IntCounter,
    pub topology_broadcasts_total: IntCounter,
    pub unrecognised_messages_total: IntCounter,
    /// Prometheus registry for metrics
    pub registry: Arc<Registry>,
}

impl AgentMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let connected_routers = IntGauge::new("agent_connected_routers", "Routers connected to this agent")?;
        let connected_brokers = IntGauge::new("agent_connected_brokers", "Brokers connected to this agent")?;
        let known_agents = IntGauge::new(
            "agent_known_agents",
            "Sibling agents with a reported router set",
        )?;
        let addresses = IntGauge::new("agent_addresses", "Addresses in the desired set")?;
        let synchronized = IntGauge::new(
            "agent_synchronized",
            "1 when all routers and brokers are synchronized and connected",
        )?;
        let connectivity_check_failures_total = IntCounter::new(
            "agent_connectivity_check_failures_total",
            "Router connector reconciliations that failed",
        )?;
        let topology_broadcasts_total = IntCounter::new(
            "agent_topology_broadcasts_total",
            "Topology messages sent to subscribers",
        )?;
        let unrecognised_messages_total = IntCounter::new(
            "agent_unrecognised_messages_total",
            "Messages received with an unrecognised subject",
        )?;

        registry.register(Box::new(connected_routers.clone()))?;
        registry.register(Box::new(connected_brokers.clone()))?;
        registry.register(Box::new(known_agents.clone()))?;
        registry.register(Box::new(addresses.clone()))?;
        registry.register(Box::new(synchronized.clone()))?;
        registry.register(Box::new(connectivity_check_failures_total.clone()))?;
        registry.register(Box::new(topology_broadcasts_total.clone()))?;
        registry.register(Box::new(unrecognised_messages_total.clone()))?;

        Ok(Self {
            connected_routers,
            connected_brokers,
            known_agents,
            addresses,
            synchronized,
            connectivity_check_failures_total,
            topology_broadcasts_total,
            unrecognised_messages_total,
            registry,
        })
    }

    pub fn observe(&self, status: &FleetStatus, known_agents: usize) {
        self.connected_routers.set(status.routers as i64);
        self.connected_brokers.set(status.brokers as i64);
        self.addresses.set(status.addresses as i64);
        self.known_agents.set(known_agents as i64);
        self.synchronized.set(i64::from(status.is_synchronized()));
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| crate::CoreError::Internal(e.to_string()))
    }
}
