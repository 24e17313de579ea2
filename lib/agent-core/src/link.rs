//! Operations the control plane invokes on peers
//!
//! Every call only enqueues work on the peer's connection and returns
//! immediately. Completions come back later as [`AgentEvent`]s.
//!
//! [`AgentEvent`]: crate::AgentEvent

use crate::Result;
use agent_api::{AddressDefinition, Connector, Message};
use std::fmt::Debug;

/// Management operations on a connected router
pub trait RouterLink: Debug + Send + Sync {
    fn retrieve_listeners(&self) -> Result<()>;

    fn retrieve_connectors(&self) -> Result<()>;

    fn create_connector(&self, connector: &Connector) -> Result<()>;

    fn delete_connector(&self, name: &str) -> Result<()>;

    /// Push the full address set; acknowledged with the same generation
    fn sync_addresses(&self, generation: u64, addresses: &[AddressDefinition]) -> Result<()>;

    fn close(&self);
}

/// Management operations on a connected broker
pub trait BrokerLink: Debug + Send + Sync {
    /// Push the broker's allocated subset. Brokers treat this as an idempotent
    /// reconciliation: an unchanged set causes no work on their side.
    fn sync_addresses(&self, generation: u64, addresses: &[AddressDefinition]) -> Result<()>;

    fn close(&self);
}

/// Sending end of a link attached by a peer (topology subscriber or client)
pub trait MessageSender: Debug + Send + Sync {
    /// Confirm the dynamically allocated source address of the link
    fn set_source(&self, address: &str) -> Result<()>;

    fn send(&self, message: Message) -> Result<()>;
}
