//! Control plane of the router agent
//!
//! This library provides:
//! - Connection registry for routers, brokers, sibling agents, subscribers and clients
//! - Address store and the fan-out of addresses to brokers and routers
//! - Connectivity checker driving every router toward a full mesh
//! - Topology federation between agent replicas
//! - Synchronization status tracking and stable-state waiting
//!
//! All state is owned by one [`ControlPlane`] that consumes [`AgentEvent`]s
//! from a single channel.

pub mod address_store;
pub mod agent;
pub mod broker;
pub mod connectivity;
pub mod error;
pub mod event;
pub mod federation;
pub mod link;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod status;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use address_store::AddressStore;
pub use agent::{AgentOptions, ControlPlane};
pub use broker::ConnectedBroker;
pub use connectivity::ConnectivityChecker;
pub use error::{CoreError, Result};
pub use event::{AgentEvent, BrokerEvent, ConnectionId, EventSender, Peer, RouterEvent};
pub use federation::KnownRouters;
pub use link::{BrokerLink, MessageSender, RouterLink};
pub use metrics::AgentMetrics;
pub use registry::ConnectionRegistry;
pub use router::{ConnectedRouter, RouterState};
pub use status::{FleetStatus, StableExpectation, StatusHandle, StatusTracker};
