//! A connected router and its provisioning state

use crate::event::ConnectionId;
use crate::link::RouterLink;
use crate::{CoreError, Result};
use agent_api::{AddressDefinition, Connector, Listener, RouterTopology};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Lifecycle of a router peer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouterState {
    /// Registered, management link not usable yet
    Connecting,
    /// Retrieving listeners and connectors, initial address push outstanding
    Provisioning,
    /// Initially provisioned, latest address push not acknowledged
    Ready,
    /// Latest address push acknowledged
    Synchronized,
}

/// Connector changes needed to move a router toward the desired mesh
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectorPlan {
    pub create: Vec<Connector>,
    pub delete: Vec<String>,
}

impl ConnectorPlan {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.delete.is_empty()
    }
}

/// Result of acknowledging an address push
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// This acknowledgement completed initial provisioning
    pub provisioned: bool,
    /// The router now holds the latest pushed address set
    pub synchronized: bool,
}

#[derive(Debug)]
pub struct ConnectedRouter {
    container_id: String,
    connection: ConnectionId,
    link: Arc<dyn RouterLink>,
    state: RouterState,
    listeners: Option<Vec<Listener>>,
    connectors: Option<Vec<Connector>>,
    // connector names with a create or delete outstanding
    in_flight: BTreeSet<String>,
    pending_generation: Option<u64>,
    addresses: Option<BTreeSet<String>>,
    initial_provisioning_completed: bool,
    fully_connected: bool,
}

impl ConnectedRouter {
    pub fn new(container_id: String, connection: ConnectionId, link: Arc<dyn RouterLink>) -> Self {
        Self {
            container_id,
            connection,
            link,
            state: RouterState::Connecting,
            listeners: None,
            connectors: None,
            in_flight: BTreeSet::new(),
            pending_generation: None,
            addresses: None,
            initial_provisioning_completed: false,
            fully_connected: false,
        }
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn state(&self) -> RouterState {
        self.state
    }

    pub fn listeners(&self) -> Option<&[Listener]> {
        self.listeners.as_deref()
    }

    pub fn connectors(&self) -> Option<&[Connector]> {
        self.connectors.as_deref()
    }

    pub fn initial_provisioning_completed(&self) -> bool {
        self.initial_provisioning_completed
    }

    pub fn fully_connected(&self) -> bool {
        self.fully_connected
    }

    pub fn is_synchronized(&self) -> bool {
        self.state == RouterState::Synchronized
    }

    pub fn is_ready_for_connectivity_check(&self) -> bool {
        self.initial_provisioning_completed && self.connectors.is_some()
    }

    /// Management link is up: fetch listener and connector state
    pub fn on_ready(&mut self) -> Result<()> {
        if self.state == RouterState::Connecting {
            self.state = RouterState::Provisioning;
        }
        self.link.retrieve_listeners()?;
        self.link.retrieve_connectors()
    }

    /// Push the full address set to the router
    pub fn sync_addresses(&mut self, generation: u64, addresses: &[AddressDefinition]) -> Result<()> {
        self.pending_generation = Some(generation);
        if self.state == RouterState::Synchronized {
            self.state = RouterState::Ready;
        }
        self.link.sync_addresses(generation, addresses)
    }

    pub fn on_addresses_synced(&mut self, generation: u64, addresses: Vec<String>) -> SyncOutcome {
        let provisioned = !self.initial_provisioning_completed;
        self.initial_provisioning_completed = true;
        self.addresses = Some(addresses.into_iter().collect());

        let synchronized = self.pending_generation == Some(generation);
        self.state = if synchronized {
            RouterState::Synchronized
        } else {
            debug!(
                "{} acknowledged generation {} while {:?} is pending",
                self.container_id, generation, self.pending_generation
            );
            RouterState::Ready
        };

        SyncOutcome {
            provisioned,
            synchronized,
        }
    }

    pub fn on_listeners_retrieved(&mut self, listeners: Vec<Listener>) {
        self.listeners = Some(listeners);
    }

    pub fn on_connectors_retrieved(&mut self, connectors: Vec<Connector>) {
        self.in_flight.clear();
        self.connectors = Some(connectors);
    }

    pub fn on_connector_created(&mut self, connector: Connector) {
        self.in_flight.remove(&connector.name);
        let connectors = self.connectors.get_or_insert_with(Vec::new);
        connectors.retain(|c| c.name != connector.name);
        connectors.push(connector);
    }

    pub fn on_connector_deleted(&mut self, name: &str) {
        self.in_flight.remove(name);
        if let Some(connectors) = self.connectors.as_mut() {
            connectors.retain(|c| c.name != name);
        }
    }

    /// A connector operation failed; refresh the connector state from the router
    pub fn on_connector_failed(&mut self, name: &str) -> Result<()> {
        self.in_flight.remove(name);
        self.fully_connected = false;
        self.link.retrieve_connectors()
    }

    pub fn close(&self) {
        self.link.close();
    }

    /// Whether the router's reported address view names exactly `expected`
    pub fn verify_addresses(&self, expected: &BTreeSet<String>) -> bool {
        self.addresses.as_ref() == Some(expected)
    }

    /// Compute the connector changes toward one inter-router connector per other router
    pub fn plan_connectors(&self, all_routers: &RouterTopology) -> Result<ConnectorPlan> {
        let existing = self.connectors.as_ref().ok_or_else(|| CoreError::NotReady {
            router: self.container_id.clone(),
            reason: "connectors not retrieved".to_string(),
        })?;

        let desired: BTreeMap<&str, Connector> = all_routers
            .iter()
            .filter(|(id, _)| id.as_str() != self.container_id)
            .filter_map(|(id, listeners)| {
                listeners
                    .iter()
                    .find(|l| l.is_inter_router())
                    .map(|l| (id.as_str(), Connector::inter_router(id.as_str(), l)))
            })
            .collect();

        let mut plan = ConnectorPlan::default();
        let mut present = BTreeSet::new();
        for connector in existing.iter().filter(|c| c.is_inter_router()) {
            match desired.get(connector.name.as_str()) {
                Some(wanted) if wanted.same_target(connector) => {
                    present.insert(connector.name.as_str());
                }
                // stale, or pointing at an old endpoint: recreated on a later pass
                _ => plan.delete.push(connector.name.clone()),
            }
        }
        let replaced: BTreeSet<&str> = plan.delete.iter().map(String::as_str).collect();
        plan.create = desired
            .into_iter()
            .filter(|(name, _)| !present.contains(name) && !replaced.contains(name))
            .map(|(_, connector)| connector)
            .collect();

        Ok(plan)
    }

    /// Reconcile the router's connectors toward the given global router set
    pub fn check_connectors(&mut self, all_routers: &RouterTopology) -> Result<()> {
        let plan = self.plan_connectors(all_routers)?;
        self.fully_connected = plan.is_empty();
        if plan.is_empty() {
            debug!("{} is fully connected", self.container_id);
            return Ok(());
        }

        for name in &plan.delete {
            if self.in_flight.insert(name.clone()) {
                info!("{}: deleting connector {}", self.container_id, name);
                if let Err(e) = self.link.delete_connector(name) {
                    self.in_flight.remove(name);
                    return Err(e);
                }
            }
        }
        for connector in &plan.create {
            if self.in_flight.insert(connector.name.clone()) {
                info!(
                    "{}: creating connector to {} at {}:{}",
                    self.container_id, connector.name, connector.host, connector.port
                );
                if let Err(e) = self.link.create_connector(connector) {
                    self.in_flight.remove(&connector.name);
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
