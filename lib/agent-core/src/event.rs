//! Events consumed by the control plane

use crate::link::{BrokerLink, MessageSender, RouterLink};
use agent_api::{Connector, Listener, Message, PeerRole, RawAddress};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type EventSender = mpsc::UnboundedSender<AgentEvent>;

/// Identifies one transport connection for the lifetime of the process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A newly opened peer, already classified by role
#[derive(Clone, Debug)]
pub enum Peer {
    Router(Arc<dyn RouterLink>),
    Broker(Arc<dyn BrokerLink>),
    Federation,
    Client,
}

impl Peer {
    pub fn role(&self) -> PeerRole {
        match self {
            Peer::Router(_) => PeerRole::Router,
            Peer::Broker(_) => PeerRole::Broker,
            Peer::Federation => PeerRole::Federation,
            Peer::Client => PeerRole::Client,
        }
    }
}

/// Completions and notifications from a router's management link
#[derive(Clone, Debug, PartialEq)]
pub enum RouterEvent {
    /// Management link usable; provisioning can start
    Ready,
    ListenersRetrieved(Vec<Listener>),
    ConnectorsRetrieved(Vec<Connector>),
    ConnectorCreated(Connector),
    ConnectorDeleted(String),
    ConnectorFailed { name: String, error: String },
    AddressesSynced { generation: u64, addresses: Vec<String> },
    RequestFailed { operation: String, error: String },
}

/// Completions from a broker's management link
#[derive(Clone, Debug, PartialEq)]
pub enum BrokerEvent {
    AddressesSynced { generation: u64 },
    RequestFailed { operation: String, error: String },
}

#[derive(Debug)]
pub enum AgentEvent {
    /// Full snapshot from the address source
    AddressesUpdated(Vec<RawAddress>),
    PeerOpened {
        connection: ConnectionId,
        container_id: String,
        peer: Peer,
    },
    PeerClosed {
        connection: ConnectionId,
    },
    Router {
        connection: ConnectionId,
        event: RouterEvent,
    },
    Broker {
        connection: ConnectionId,
        event: BrokerEvent,
    },
    SubscriberAttached {
        connection: ConnectionId,
        sender: Arc<dyn MessageSender>,
    },
    SubscriberDetached {
        connection: ConnectionId,
    },
    ClientAttached {
        connection: ConnectionId,
        sender: Arc<dyn MessageSender>,
    },
    ClientDetached {
        connection: ConnectionId,
    },
    MessageReceived {
        connection: ConnectionId,
        message: Message,
    },
}
