//! Shared data model for the router agent
//!
//! This library defines the types exchanged between the agent and its peers:
//! - AddressDefinition: desired addresses and their broker allocation
//! - Listener / Connector: router topology records
//! - Message: subject-addressed messages (topology broadcast, health-check)
//! - ManagementRequest / ManagementResponse: router and broker management bodies
//! - PeerRole: classification of a peer from its connection properties

pub mod address;
pub mod error;
pub mod management;
pub mod message;
pub mod peer;
pub mod topology;

pub use address::{AddressDefinition, Allocation, RawAddress};
pub use error::{ApiError, Result};
pub use management::{ManagementRequest, ManagementResponse};
pub use message::Message;
pub use peer::{ConnectionProperties, PeerRole};
pub use topology::{Connector, Listener, RouterTopology};
