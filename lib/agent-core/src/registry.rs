//! Connection registry for routers, brokers, sibling agents and links

use crate::broker::ConnectedBroker;
use crate::event::ConnectionId;
use crate::link::MessageSender;
use crate::router::ConnectedRouter;
use agent_api::{PeerRole, RouterTopology};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// A sending link registered by a peer, remembered with its connection
#[derive(Clone, Debug)]
pub struct RegisteredSender {
    pub connection: ConnectionId,
    pub sender: Arc<dyn MessageSender>,
}

/// Information about an open connection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub container_id: String,
    pub role: PeerRole,
}

/// ConnectionRegistry tracks live peers by role and container id.
///
/// Each entry remembers the connection that created it; removal by a
/// different connection is ignored so that a reconnect is never undone by the
/// late close of the connection it replaced.
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ConnectionInfo>,
    routers: BTreeMap<String, ConnectedRouter>,
    brokers: BTreeMap<String, ConnectedBroker>,
    // federation siblings: container id -> connection
    agents: BTreeMap<String, ConnectionId>,
    subscribers: BTreeMap<String, RegisteredSender>,
    clients: BTreeMap<String, RegisteredSender>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            routers: BTreeMap::new(),
            brokers: BTreeMap::new(),
            agents: BTreeMap::new(),
            subscribers: BTreeMap::new(),
            clients: BTreeMap::new(),
        }
    }

    /// Record a newly opened connection
    pub fn open_connection(&mut self, connection: ConnectionId, container_id: String, role: PeerRole) {
        debug!("Connection {} opened by {} as {:?}", connection, container_id, role);
        self.connections
            .insert(connection, ConnectionInfo { container_id, role });
    }

    pub fn connection(&self, connection: ConnectionId) -> Option<&ConnectionInfo> {
        self.connections.get(&connection)
    }

    pub fn close_connection(&mut self, connection: ConnectionId) -> Option<ConnectionInfo> {
        self.connections.remove(&connection)
    }

    /// Register a router, replacing any prior entry for the same container id
    pub fn register_router(&mut self, router: ConnectedRouter) -> Option<ConnectedRouter> {
        let id = router.container_id().to_string();
        debug!("Registered router: {}", id);
        self.routers.insert(id, router)
    }

    /// Deregister a router if it was registered by `connection`
    pub fn deregister_router(&mut self, container_id: &str, connection: ConnectionId) -> Option<ConnectedRouter> {
        match self.routers.get(container_id) {
            Some(r) if r.connection() == connection => {
                debug!("Deregistered router: {}", container_id);
                self.routers.remove(container_id)
            }
            _ => None,
        }
    }

    pub fn router(&self, container_id: &str) -> Option<&ConnectedRouter> {
        self.routers.get(container_id)
    }

    /// Look up a router by id, only if it belongs to `connection`
    pub fn router_on(&mut self, container_id: &str, connection: ConnectionId) -> Option<&mut ConnectedRouter> {
        self.routers
            .get_mut(container_id)
            .filter(|r| r.connection() == connection)
    }

    pub fn routers(&self) -> impl Iterator<Item = &ConnectedRouter> {
        self.routers.values()
    }

    pub fn routers_mut(&mut self) -> impl Iterator<Item = &mut ConnectedRouter> {
        self.routers.values_mut()
    }

    pub fn router_count(&self) -> usize {
        self.routers.len()
    }

    /// Register a broker, replacing any prior entry for the same id
    pub fn register_broker(&mut self, broker: ConnectedBroker) -> Option<ConnectedBroker> {
        let id = broker.id().to_string();
        debug!("Registered broker: {}", id);
        self.brokers.insert(id, broker)
    }

    pub fn deregister_broker(&mut self, id: &str, connection: ConnectionId) -> Option<ConnectedBroker> {
        match self.brokers.get(id) {
            Some(b) if b.connection() == connection => {
                debug!("Deregistered broker: {}", id);
                self.brokers.remove(id)
            }
            _ => None,
        }
    }

    pub fn broker_on(&mut self, id: &str, connection: ConnectionId) -> Option<&mut ConnectedBroker> {
        self.brokers
            .get_mut(id)
            .filter(|b| b.connection() == connection)
    }

    pub fn brokers(&self) -> impl Iterator<Item = &ConnectedBroker> {
        self.brokers.values()
    }

    pub fn brokers_mut(&mut self) -> impl Iterator<Item = &mut ConnectedBroker> {
        self.brokers.values_mut()
    }

    pub fn broker_count(&self) -> usize {
        self.brokers.len()
    }

    pub fn register_agent(&mut self, container_id: String, connection: ConnectionId) {
        debug!("Registered agent: {}", container_id);
        self.agents.insert(container_id, connection);
    }

    /// Returns true if the sibling was registered by `connection` and removed
    pub fn deregister_agent(&mut self, container_id: &str, connection: ConnectionId) -> bool {
        if self.agents.get(container_id) == Some(&connection) {
            self.agents.remove(container_id);
            debug!("Deregistered agent: {}", container_id);
            true
        } else {
            false
        }
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn add_subscriber(&mut self, container_id: String, entry: RegisteredSender) {
        debug!("Added topology subscriber: {}", container_id);
        self.subscribers.insert(container_id, entry);
    }

    pub fn remove_subscriber(&mut self, container_id: &str, connection: ConnectionId) -> bool {
        remove_sender(&mut self.subscribers, container_id, connection)
    }

    pub fn subscribers(&self) -> impl Iterator<Item = (&String, &RegisteredSender)> {
        self.subscribers.iter()
    }

    pub fn add_client(&mut self, container_id: String, entry: RegisteredSender) {
        debug!("Added client: {}", container_id);
        self.clients.insert(container_id, entry);
    }

    pub fn remove_client(&mut self, container_id: &str, connection: ConnectionId) -> bool {
        remove_sender(&mut self.clients, container_id, connection)
    }

    pub fn client(&self, container_id: &str) -> Option<&RegisteredSender> {
        self.clients.get(container_id)
    }

    /// Map of locally connected routers to their listeners, for routers whose
    /// listeners have been retrieved
    pub fn topology(&self) -> RouterTopology {
        self.routers
            .values()
            .filter_map(|r| {
                r.listeners()
                    .map(|l| (r.container_id().to_string(), l.to_vec()))
            })
            .collect()
    }
}

fn remove_sender(
    senders: &mut BTreeMap<String, RegisteredSender>,
    container_id: &str,
    connection: ConnectionId,
) -> bool {
    match senders.get(container_id) {
        Some(entry) if entry.connection == connection => {
            senders.remove(container_id);
            true
        }
        _ => false,
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
