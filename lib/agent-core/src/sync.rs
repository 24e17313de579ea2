//! Fan-out of the address store to brokers and routers

use crate::address_store::AddressStore;
use crate::broker::ConnectedBroker;
use crate::registry::ConnectionRegistry;
use crate::router::ConnectedRouter;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Push a broker the subset of addresses allocated to it
pub fn sync_broker(store: &AddressStore, broker: &mut ConnectedBroker) {
    let allocated = store.allocated_to(broker.id());
    if let Err(e) = broker.sync_addresses(store.generation(), &allocated) {
        warn!("Failed to sync addresses to broker {}: {}", broker.id(), e);
    }
}

/// Push a router the entire working set
pub fn sync_router(store: &AddressStore, router: &mut ConnectedRouter) {
    if let Err(e) = router.sync_addresses(store.generation(), store.addresses()) {
        warn!("Failed to sync addresses to router {}: {}", router.container_id(), e);
    }
}

/// Push the current working set to every connected broker and router
pub fn addresses_updated(store: &AddressStore, registry: &mut ConnectionRegistry) {
    for broker in registry.brokers_mut() {
        sync_broker(store, broker);
    }
    for router in registry.routers_mut() {
        sync_router(store, router);
    }
}

/// True only if every connected router reports exactly the expected addresses
pub fn verify_addresses(registry: &ConnectionRegistry, expected: &BTreeSet<String>) -> bool {
    debug!("verifying addresses to match: {:?}", expected);
    registry.routers().all(|r| r.verify_addresses(expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ConnectionId;
    use crate::testing::{MockBrokerLink, MockRouterLink};
    use agent_api::{Allocation, RawAddress};
    use std::sync::Arc;

    fn raw(address: &str, brokers: &[&str]) -> RawAddress {
        RawAddress {
            address: Some(address.to_string()),
            kind: Some("queue".to_string()),
            allocated_to: brokers.iter().map(|b| Allocation::new(*b)).collect(),
        }
    }

    #[test]
    fn test_fan_out_partitions_by_allocation() {
        let mut store = AddressStore::new();
        store.update(vec![raw("q1", &["b0"]), raw("q2", &["b1"]), raw("t1", &[])]);

        let b0 = Arc::new(MockBrokerLink::default());
        let b1 = Arc::new(MockBrokerLink::default());
        let r1 = Arc::new(MockRouterLink::default());
        let mut registry = ConnectionRegistry::new();
        registry.register_broker(ConnectedBroker::new("b0".to_string(), ConnectionId(1), b0.clone()));
        registry.register_broker(ConnectedBroker::new("b1".to_string(), ConnectionId(2), b1.clone()));
        registry.register_router(ConnectedRouter::new("r1".to_string(), ConnectionId(3), r1.clone()));

        addresses_updated(&store, &mut registry);

        assert_eq!(b0.synced(), vec![(1, vec!["q1".to_string()])]);
        assert_eq!(b1.synced(), vec![(1, vec!["q2".to_string()])]);
        assert_eq!(
            r1.synced(),
            vec![(1, vec!["q1".to_string(), "q2".to_string(), "t1".to_string()])]
        );
    }

    #[test]
    fn test_unchanged_update_pushes_identical_targets() {
        let mut store = AddressStore::new();
        let b0 = Arc::new(MockBrokerLink::default());
        let r1 = Arc::new(MockRouterLink::default());
        let mut registry = ConnectionRegistry::new();
        registry.register_broker(ConnectedBroker::new("b0".to_string(), ConnectionId(1), b0.clone()));
        registry.register_router(ConnectedRouter::new("r1".to_string(), ConnectionId(2), r1.clone()));

        for _ in 0..2 {
            store.update(vec![raw("q1", &["b0"]), raw("q2", &[])]);
            addresses_updated(&store, &mut registry);
        }

        let broker_pushes = b0.synced();
        assert_eq!(broker_pushes.len(), 2);
        assert_eq!(broker_pushes[0].1, broker_pushes[1].1);
        let router_pushes = r1.synced();
        assert_eq!(router_pushes[0].1, router_pushes[1].1);
    }

    #[test]
    fn test_verify_requires_every_router_to_match() {
        let mut registry = ConnectionRegistry::new();
        let expected: BTreeSet<String> = ["q1".to_string()].into_iter().collect();
        assert!(verify_addresses(&registry, &expected));

        let mut r1 = ConnectedRouter::new("r1".to_string(), ConnectionId(1), Arc::new(MockRouterLink::default()));
        r1.on_addresses_synced(1, vec!["q1".to_string()]);
        registry.register_router(r1);
        assert!(verify_addresses(&registry, &expected));

        let r2 = ConnectedRouter::new("r2".to_string(), ConnectionId(2), Arc::new(MockRouterLink::default()));
        registry.register_router(r2);
        assert!(!verify_addresses(&registry, &expected));
    }
}
