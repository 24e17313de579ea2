//! Synchronization status tracking and stable-state waiting

use crate::address_store::AddressStore;
use crate::registry::ConnectionRegistry;
use crate::{CoreError, Result};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Point-in-time snapshot of fleet convergence
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FleetStatus {
    pub addresses: usize,
    pub routers: usize,
    pub brokers: usize,
    pub brokers_synchronized: bool,
    pub routers_synchronized: bool,
    pub routers_connected: bool,
}

impl FleetStatus {
    pub fn capture(store: &AddressStore, registry: &ConnectionRegistry) -> Self {
        Self {
            addresses: store.len(),
            routers: registry.router_count(),
            brokers: registry.broker_count(),
            brokers_synchronized: are_brokers_synchronized(registry),
            routers_synchronized: are_routers_synchronized(registry),
            routers_connected: are_routers_connected(registry),
        }
    }

    pub fn is_synchronized(&self) -> bool {
        self.routers_synchronized && self.brokers_synchronized && self.routers_connected
    }
}

pub fn are_brokers_synchronized(registry: &ConnectionRegistry) -> bool {
    registry.brokers().all(|b| b.addresses_synchronized())
}

pub fn are_routers_synchronized(registry: &ConnectionRegistry) -> bool {
    registry.routers().all(|r| r.is_synchronized())
}

/// A single router is connected by definition; otherwise every router must
/// report being fully connected
pub fn are_routers_connected(registry: &ConnectionRegistry) -> bool {
    registry.router_count() == 1 || registry.routers().all(|r| r.fully_connected())
}

/// Expected cardinalities for a stable fleet; unset fields are not checked
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StableExpectation {
    pub addresses: Option<usize>,
    pub routers: Option<usize>,
    pub brokers: Option<usize>,
}

impl StableExpectation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn addresses(mut self, count: usize) -> Self {
        self.addresses = Some(count);
        self
    }

    pub fn routers(mut self, count: usize) -> Self {
        self.routers = Some(count);
        self
    }

    pub fn brokers(mut self, count: usize) -> Self {
        self.brokers = Some(count);
        self
    }

    pub fn is_met_by(&self, status: &FleetStatus) -> bool {
        self.addresses.map_or(true, |n| n == status.addresses)
            && self.routers.map_or(true, |n| n == status.routers)
            && self.brokers.map_or(true, |n| n == status.brokers)
            && status.is_synchronized()
    }
}

/// Owner side of the status channel, held by the control plane.
///
/// The stored snapshot is refreshed after every event; waiters are only woken
/// when a re-evaluation finds the fleet synchronized.
pub struct StatusTracker {
    tx: watch::Sender<FleetStatus>,
}

impl StatusTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(FleetStatus::default());
        Self { tx }
    }

    pub fn handle(&self) -> StatusHandle {
        StatusHandle {
            rx: self.tx.subscribe(),
        }
    }

    pub fn current(&self) -> FleetStatus {
        self.tx.borrow().clone()
    }

    /// Store the snapshot without waking anyone
    pub fn refresh(&self, status: FleetStatus) {
        self.tx.send_if_modified(|current| {
            *current = status;
            false
        });
    }

    /// Store the snapshot and emit the wake-up if the fleet is synchronized.
    /// Returns whether the wake-up was emitted.
    pub fn on_synchronized(&self, status: FleetStatus) -> bool {
        let synchronized = status.is_synchronized();
        self.tx.send_if_modified(|current| {
            *current = status;
            synchronized
        });
        if synchronized {
            debug!("fleet synchronized");
        }
        synchronized
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of the status channel, cloneable across tasks
#[derive(Clone, Debug)]
pub struct StatusHandle {
    rx: watch::Receiver<FleetStatus>,
}

impl StatusHandle {
    pub fn current(&self) -> FleetStatus {
        self.rx.borrow().clone()
    }

    pub fn is_synchronized(&self) -> bool {
        self.rx.borrow().is_synchronized()
    }

    /// Wait until the expectation holds together with the synchronized
    /// predicate. Resolves immediately if it already holds; otherwise it is
    /// re-checked on each wake-up, ignoring wake-ups where it does not hold.
    pub async fn wait_for_stable(
        &self,
        expected: StableExpectation,
        timeout: Option<Duration>,
    ) -> Result<FleetStatus> {
        let mut rx = self.rx.clone();
        let current = rx.borrow_and_update().clone();
        if expected.is_met_by(&current) {
            return Ok(current);
        }

        let wait = async move {
            loop {
                if rx.changed().await.is_err() {
                    return Err(CoreError::StatusClosed);
                }
                let status = rx.borrow_and_update().clone();
                if expected.is_met_by(&status) {
                    return Ok(status);
                }
                debug!("woken but not stable yet: {:?}", status);
            }
        };

        match timeout {
            None => wait.await,
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(result) => result,
                Err(_) => Err(CoreError::StableTimeout(self.current())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synced(addresses: usize, routers: usize, brokers: usize) -> FleetStatus {
        FleetStatus {
            addresses,
            routers,
            brokers,
            brokers_synchronized: true,
            routers_synchronized: true,
            routers_connected: true,
        }
    }

    #[test]
    fn test_empty_registry_is_synchronized() {
        let status = FleetStatus::capture(&AddressStore::new(), &ConnectionRegistry::new());
        assert!(status.is_synchronized());
    }

    #[test]
    fn test_expectation() {
        let expected = StableExpectation::new().addresses(3).routers(2).brokers(1);
        assert!(expected.is_met_by(&synced(3, 2, 1)));
        assert!(!expected.is_met_by(&synced(3, 1, 1)));

        let mut unsynced = synced(3, 2, 1);
        unsynced.routers_connected = false;
        assert!(!expected.is_met_by(&unsynced));

        assert!(StableExpectation::new().is_met_by(&synced(0, 0, 0)));
    }

    #[tokio::test]
    async fn test_wait_resolves_immediately_when_stable() {
        let tracker = StatusTracker::new();
        tracker.refresh(synced(3, 2, 1));
        let status = tracker
            .handle()
            .wait_for_stable(StableExpectation::new().addresses(3).routers(2).brokers(1), None)
            .await
            .unwrap();
        assert_eq!(status, synced(3, 2, 1));
    }

    #[tokio::test]
    async fn test_wait_ignores_wakeups_that_do_not_match() {
        let tracker = StatusTracker::new();
        let handle = tracker.handle();
        let waiter = tokio::spawn(async move {
            handle
                .wait_for_stable(StableExpectation::new().addresses(3).routers(2).brokers(1), None)
                .await
        });
        tokio::task::yield_now().await;

        // synchronized, but with the wrong router count
        assert!(tracker.on_synchronized(synced(3, 1, 1)));
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        // right counts but not synchronized: no wake-up at all
        let mut pending = synced(3, 2, 1);
        pending.brokers_synchronized = false;
        assert!(!tracker.on_synchronized(pending));

        assert!(tracker.on_synchronized(synced(3, 2, 1)));
        let status = waiter.await.unwrap().unwrap();
        assert_eq!(status, synced(3, 2, 1));
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let tracker = StatusTracker::new();
        tracker.refresh(synced(1, 0, 0));
        let result = tracker
            .handle()
            .wait_for_stable(
                StableExpectation::new().addresses(2),
                Some(Duration::from_millis(20)),
            )
            .await;
        match result {
            Err(CoreError::StableTimeout(last)) => assert_eq!(last.addresses, 1),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refresh_does_not_wake() {
        let tracker = StatusTracker::new();
        let mut rx = tracker.handle().rx;
        rx.borrow_and_update();
        tracker.refresh(synced(1, 1, 1));
        assert!(!rx.has_changed().unwrap());
        assert_eq!(rx.borrow().addresses, 1);
    }
}
