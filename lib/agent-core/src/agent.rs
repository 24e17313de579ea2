//! The control plane: single owner of all fleet state

use crate::address_store::AddressStore;
use crate::broker::ConnectedBroker;
use crate::connectivity::ConnectivityChecker;
use crate::event::{AgentEvent, BrokerEvent, ConnectionId, Peer, RouterEvent};
use crate::federation::{publish_topology, KnownRouters};
use crate::link::MessageSender;
use crate::metrics::AgentMetrics;
use crate::registry::{ConnectionInfo, ConnectionRegistry, RegisteredSender};
use crate::router::ConnectedRouter;
use crate::status::{FleetStatus, StatusHandle, StatusTracker};
use crate::sync;
use agent_api::message::{SUBJECT_HEALTH_CHECK, SUBJECT_ROUTERS};
use agent_api::{Message, PeerRole, RawAddress, RouterTopology};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug)]
pub struct AgentOptions {
    /// Container id this agent declares to its peers
    pub container_id: String,
    /// Maintenance mode: never reconcile router connectors
    pub disable_connectivity: bool,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            container_id: "router-agent".to_string(),
            disable_connectivity: false,
        }
    }
}

/// Keeps routers and brokers converged on the address configuration and the
/// routers connected in a full mesh.
///
/// Every mutation happens inside [`ControlPlane::handle`], one event at a
/// time; peer I/O is asynchronous and reports back through further events.
pub struct ControlPlane {
    options: AgentOptions,
    store: AddressStore,
    registry: ConnectionRegistry,
    known_routers: KnownRouters,
    checker: ConnectivityChecker,
    status: StatusTracker,
    metrics: AgentMetrics,
}

impl ControlPlane {
    pub fn new(options: AgentOptions, metrics: AgentMetrics) -> Self {
        let checker = ConnectivityChecker::new(options.disable_connectivity);
        if checker.is_disabled() {
            warn!("Connectivity checking disabled");
        }
        let mut plane = Self {
            options,
            store: AddressStore::new(),
            registry: ConnectionRegistry::new(),
            known_routers: KnownRouters::new(),
            checker,
            status: StatusTracker::new(),
            metrics,
        };
        plane.refresh_status();
        plane
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    pub fn status(&self) -> StatusHandle {
        self.status.handle()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn known_routers(&self) -> &KnownRouters {
        &self.known_routers
    }

    pub fn address_store(&self) -> &AddressStore {
        &self.store
    }

    /// Consume events until every sender is dropped
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<AgentEvent>) {
        info!("Control plane {} started", self.options.container_id);
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        info!("Event channel closed, control plane stopping");
    }

    /// React to one event. Aggregate state is refreshed before returning.
    pub fn handle(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::AddressesUpdated(raw) => self.sync_addresses(raw),
            AgentEvent::PeerOpened {
                connection,
                container_id,
                peer,
            } => self.on_peer_opened(connection, container_id, peer),
            AgentEvent::PeerClosed { connection } => self.on_peer_closed(connection),
            AgentEvent::Router { connection, event } => self.on_router_event(connection, event),
            AgentEvent::Broker { connection, event } => self.on_broker_event(connection, event),
            AgentEvent::SubscriberAttached { connection, sender } => self.subscribe(connection, sender),
            AgentEvent::SubscriberDetached { connection } => self.unsubscribe(connection),
            AgentEvent::ClientAttached { connection, sender } => self.add_client(connection, sender),
            AgentEvent::ClientDetached { connection } => self.remove_client(connection),
            AgentEvent::MessageReceived {
                connection,
                message,
            } => self.on_message(connection, message),
        }
        self.refresh_status();
    }

    /// Replace the desired address set and push it to every peer
    pub fn sync_addresses(&mut self, raw: Vec<RawAddress>) {
        self.store.update(raw);
        sync::addresses_updated(&self.store, &mut self.registry);
    }

    /// True only if every connected router reports exactly `expected`
    pub fn verify_addresses(&self, expected: &BTreeSet<String>) -> bool {
        sync::verify_addresses(&self.registry, expected)
    }

    pub fn is_synchronized(&self) -> bool {
        self.fleet_status().is_synchronized()
    }

    pub fn fleet_status(&self) -> FleetStatus {
        FleetStatus::capture(&self.store, &self.registry)
    }

    /// Federated view united with the locally connected routers
    pub fn all_routers(&self) -> RouterTopology {
        ConnectivityChecker::all_routers(&self.known_routers, &self.registry)
    }

    /// Reconcile the connectors of every ready router
    pub fn check_connectivity(&mut self) {
        if self.checker.is_disabled() {
            return;
        }
        let all_routers = self.all_routers();
        let report = self
            .checker
            .check_all(&mut self.registry, &all_routers, &self.metrics);
        debug!("connectivity check: {:?}", report);
    }

    fn check_router_connectors(&mut self, container_id: &str, connection: ConnectionId) {
        if self.checker.is_disabled() {
            return;
        }
        let all_routers = self.all_routers();
        if let Some(router) = self.registry.router_on(container_id, connection) {
            self.checker.check_router(router, &all_routers, &self.metrics);
        }
    }

    /// The locally connected router set changed
    fn connected_routers_updated(&mut self) {
        self.check_connectivity();
        publish_topology(&self.registry, &self.metrics);
    }

    /// Re-evaluate the synchronized predicate and wake waiters if it holds
    fn on_synchronized(&mut self) {
        let status = self.fleet_status();
        self.status.on_synchronized(status);
    }

    /// Store the current status; a newly synchronized status wakes waiters
    /// whichever event completed it.
    fn refresh_status(&mut self) {
        let status = self.fleet_status();
        self.metrics
            .observe(&status, self.known_routers.agent_count());
        if status.is_synchronized() && status != self.status.current() {
            self.status.on_synchronized(status);
        } else {
            self.status.refresh(status);
        }
    }

    fn on_peer_opened(&mut self, connection: ConnectionId, container_id: String, peer: Peer) {
        self.registry
            .open_connection(connection, container_id.clone(), peer.role());

        match peer {
            Peer::Router(link) => {
                info!("Router connected from {}", container_id);
                let router = ConnectedRouter::new(container_id, connection, link);
                if let Some(old) = self.registry.register_router(router) {
                    info!("Router {} reconnected, replacing {}", old.container_id(), old.connection());
                    old.close();
                }
            }
            Peer::Broker(link) => {
                info!("broker {} connected", container_id);
                let mut broker = ConnectedBroker::new(container_id, connection, link);
                if self.store.is_initialised() {
                    sync::sync_broker(&self.store, &mut broker);
                }
                if let Some(old) = self.registry.register_broker(broker) {
                    old.close();
                }
                self.check_connectivity();
            }
            Peer::Federation => {
                info!("agent {} connected", container_id);
                self.registry.register_agent(container_id, connection);
            }
            Peer::Client => {
                debug!("client {} connected", container_id);
            }
        }
    }

    /// Remove every registry entry created by the closed connection
    fn on_peer_closed(&mut self, connection: ConnectionId) {
        let Some(ConnectionInfo { container_id, role }) = self.registry.close_connection(connection) else {
            debug!("close for unknown connection {}", connection);
            return;
        };

        self.registry.remove_subscriber(&container_id, connection);
        self.registry.remove_client(&container_id, connection);

        match role {
            PeerRole::Router => {
                if self.registry.deregister_router(&container_id, connection).is_some() {
                    info!("router {} disconnected", container_id);
                    self.connected_routers_updated();
                    self.on_synchronized();
                }
            }
            PeerRole::Broker => {
                info!("broker disconnected: {}", container_id);
                if let Some(broker) = self.registry.deregister_broker(&container_id, connection) {
                    broker.close();
                    self.check_connectivity();
                    self.on_synchronized();
                }
            }
            PeerRole::Federation => {
                if self.registry.deregister_agent(&container_id, connection) {
                    info!("agent {} disconnected", container_id);
                }
                if self.known_routers.remove(&container_id, connection) {
                    info!("dropping routers reported by agent {}", container_id);
                    self.check_connectivity();
                }
            }
            PeerRole::Client => {}
        }
    }

    fn on_router_event(&mut self, connection: ConnectionId, event: RouterEvent) {
        let Some(container_id) = self.container_of(connection) else {
            debug!("router event for unknown connection {}: {:?}", connection, event);
            return;
        };
        let initialised = self.store.is_initialised();
        let Some(router) = self.registry.router_on(&container_id, connection) else {
            debug!("router event for replaced router {}: {:?}", container_id, event);
            return;
        };

        match event {
            RouterEvent::Ready => {
                if let Err(e) = router.on_ready() {
                    warn!("Failed to retrieve state of router {}: {}", container_id, e);
                }
                if initialised {
                    sync::sync_router(&self.store, router);
                }
            }
            RouterEvent::ListenersRetrieved(listeners) => {
                router.on_listeners_retrieved(listeners);
                // advertise only once listeners are known
                self.connected_routers_updated();
            }
            RouterEvent::ConnectorsRetrieved(connectors) => {
                router.on_connectors_retrieved(connectors);
                self.check_router_connectors(&container_id, connection);
            }
            RouterEvent::ConnectorCreated(connector) => {
                router.on_connector_created(connector);
                self.check_router_connectors(&container_id, connection);
            }
            RouterEvent::ConnectorDeleted(name) => {
                router.on_connector_deleted(&name);
                self.check_router_connectors(&container_id, connection);
            }
            RouterEvent::ConnectorFailed { name, error: reason } => {
                error!("connector {} on {} failed: {}", name, container_id, reason);
                if let Err(e) = router.on_connector_failed(&name) {
                    warn!("Failed to refresh connectors of {}: {}", container_id, e);
                }
            }
            RouterEvent::AddressesSynced {
                generation,
                addresses,
            } => {
                let outcome = router.on_addresses_synced(generation, addresses);
                if outcome.provisioned {
                    info!("router {} provisioned", container_id);
                    self.check_router_connectors(&container_id, connection);
                }
                self.on_synchronized();
            }
            RouterEvent::RequestFailed { operation, error: reason } => {
                warn!("{} on router {} failed: {}", operation, container_id, reason);
            }
        }
    }

    fn on_broker_event(&mut self, connection: ConnectionId, event: BrokerEvent) {
        let Some(id) = self.container_of(connection) else {
            debug!("broker event for unknown connection {}: {:?}", connection, event);
            return;
        };
        let Some(broker) = self.registry.broker_on(&id, connection) else {
            return;
        };

        match event {
            BrokerEvent::AddressesSynced { generation } => {
                if broker.on_addresses_synced(generation) {
                    debug!("broker {} synchronized", id);
                }
                self.on_synchronized();
            }
            BrokerEvent::RequestFailed { operation, error: reason } => {
                warn!("{} on broker {} failed: {}", operation, id, reason);
            }
        }
    }

    /// Register a topology subscriber and send it the current snapshot
    fn subscribe(&mut self, connection: ConnectionId, sender: Arc<dyn MessageSender>) {
        let Some(container_id) = self.container_of(connection) else {
            return;
        };
        match Message::topology(&self.registry.topology()) {
            Ok(snapshot) => {
                if let Err(e) = sender.send(snapshot) {
                    warn!("Failed to send initial topology to {}: {}", container_id, e);
                } else {
                    self.metrics.topology_broadcasts_total.inc();
                }
            }
            Err(e) => warn!("Failed to encode router topology: {}", e),
        }
        self.registry
            .add_subscriber(container_id, RegisteredSender { connection, sender });
    }

    fn unsubscribe(&mut self, connection: ConnectionId) {
        if let Some(container_id) = self.container_of(connection) {
            self.registry.remove_subscriber(&container_id, connection);
        }
    }

    /// Allocate a fresh reply address for a client attaching a dynamic source
    fn add_client(&mut self, connection: ConnectionId, sender: Arc<dyn MessageSender>) {
        let Some(container_id) = self.container_of(connection) else {
            return;
        };
        let address = uuid::Uuid::new_v4().to_string();
        if let Err(e) = sender.set_source(&address) {
            warn!("Failed to assign address to client {}: {}", container_id, e);
            return;
        }
        debug!("client {} assigned address {}", container_id, address);
        self.registry
            .add_client(container_id, RegisteredSender { connection, sender });
    }

    fn remove_client(&mut self, connection: ConnectionId) {
        if let Some(container_id) = self.container_of(connection) {
            self.registry.remove_client(&container_id, connection);
        }
    }

    fn on_message(&mut self, connection: ConnectionId, message: Message) {
        let Some(ConnectionInfo { container_id, role }) = self.registry.connection(connection).cloned() else {
            return;
        };

        match message.subject() {
            Some(SUBJECT_ROUTERS) if role == PeerRole::Federation => {
                match message.router_topology() {
                    Ok(routers) => {
                        if self.known_routers.replace(&container_id, connection, routers) {
                            debug!("router set of agent {} changed", container_id);
                        }
                        self.check_connectivity();
                    }
                    Err(e) => warn!("Invalid topology from {}: {}", container_id, e),
                }
            }
            Some(SUBJECT_HEALTH_CHECK) => self.on_health_check(&container_id, &message),
            subject => {
                info!(
                    "unrecognised subject {:?} from {} ({:?})",
                    subject, container_id, role
                );
                self.metrics.unrecognised_messages_total.inc();
            }
        }
    }

    fn on_health_check(&self, container_id: &str, request: &Message) {
        let result = match request.expected_addresses() {
            Ok(expected) => self.verify_addresses(&expected),
            Err(e) => {
                warn!("Invalid health-check request from {}: {}", container_id, e);
                false
            }
        };

        match self.registry.client(container_id) {
            Some(client) => {
                let response = Message::health_check_response(request, result);
                if let Err(e) = client.sender.send(response) {
                    warn!("Failed to answer health-check from {}: {}", container_id, e);
                }
            }
            None => info!("health-check from {} without a reply link", container_id),
        }
    }

    fn container_of(&self, connection: ConnectionId) -> Option<String> {
        self.registry
            .connection(connection)
            .map(|info| info.container_id.clone())
    }
}
