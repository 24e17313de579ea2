//! A connected broker

use crate::event::ConnectionId;
use crate::link::BrokerLink;
use crate::Result;
use agent_api::AddressDefinition;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub struct ConnectedBroker {
    id: String,
    connection: ConnectionId,
    link: Arc<dyn BrokerLink>,
    pending_generation: Option<u64>,
    addresses_synchronized: bool,
}

impl ConnectedBroker {
    pub fn new(id: String, connection: ConnectionId, link: Arc<dyn BrokerLink>) -> Self {
        Self {
            id,
            connection,
            link,
            pending_generation: None,
            addresses_synchronized: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn addresses_synchronized(&self) -> bool {
        self.addresses_synchronized
    }

    /// Push the broker's allocated subset
    pub fn sync_addresses(&mut self, generation: u64, allocated: &[AddressDefinition]) -> Result<()> {
        debug!(
            "syncing broker {} with {:?}",
            self.id,
            allocated.iter().map(|a| a.address.as_str()).collect::<Vec<_>>()
        );
        self.pending_generation = Some(generation);
        self.addresses_synchronized = false;
        self.link.sync_addresses(generation, allocated)
    }

    /// Returns true when the acknowledgement covers the latest push
    pub fn on_addresses_synced(&mut self, generation: u64) -> bool {
        if self.pending_generation == Some(generation) {
            self.addresses_synchronized = true;
        }
        self.addresses_synchronized
    }

    pub fn close(&self) {
        self.link.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBrokerLink;

    #[test]
    fn test_synchronized_tracks_latest_push() {
        let link = Arc::new(MockBrokerLink::default());
        let mut broker = ConnectedBroker::new("broker-0".to_string(), ConnectionId(3), link.clone());
        assert!(!broker.addresses_synchronized());

        broker.sync_addresses(1, &[]).unwrap();
        broker.sync_addresses(2, &[]).unwrap();
        assert!(!broker.on_addresses_synced(1));
        assert!(broker.on_addresses_synced(2));
        assert_eq!(link.synced().len(), 2);

        broker.close();
        assert!(link.is_closed());
    }
}
