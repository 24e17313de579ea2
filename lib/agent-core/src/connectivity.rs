//! Connectivity checker driving every connected router toward a full mesh

use crate::federation::KnownRouters;
use crate::metrics::AgentMetrics;
use crate::registry::ConnectionRegistry;
use crate::router::ConnectedRouter;
use agent_api::RouterTopology;
use tracing::{error, info};

/// Outcome of one checking pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub checked: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct ConnectivityChecker {
    disabled: bool,
}

impl ConnectivityChecker {
    pub fn new(disabled: bool) -> Self {
        Self { disabled }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Every router known anywhere: the federated view plus the locally
    /// connected routers, local entries taking precedence
    pub fn all_routers(known: &KnownRouters, registry: &ConnectionRegistry) -> RouterTopology {
        let mut all = known.routers();
        for router in registry.routers() {
            let listeners = router.listeners().map(<[_]>::to_vec).unwrap_or_default();
            all.insert(router.container_id().to_string(), listeners);
        }
        all
    }

    /// Reconcile the connectors of every ready router. A failure on one router
    /// is logged and does not stop the pass.
    pub fn check_all(
        &self,
        registry: &mut ConnectionRegistry,
        all_routers: &RouterTopology,
        metrics: &AgentMetrics,
    ) -> CheckReport {
        let mut report = CheckReport::default();
        if self.disabled {
            return report;
        }

        for router in registry.routers_mut() {
            match self.check_router(router, all_routers, metrics) {
                Some(true) => report.checked += 1,
                Some(false) => report.failed += 1,
                None => report.skipped += 1,
            }
        }
        report
    }

    /// Reconcile one router. Returns None if the router is not ready (or
    /// checking is disabled), otherwise whether reconciliation succeeded.
    pub fn check_router(
        &self,
        router: &mut ConnectedRouter,
        all_routers: &RouterTopology,
        metrics: &AgentMetrics,
    ) -> Option<bool> {
        if self.disabled {
            return None;
        }
        if !router.is_ready_for_connectivity_check() {
            info!(
                "{} not ready for connectivity check: {} {}",
                router.container_id(),
                router.initial_provisioning_completed(),
                router.connectors().is_some()
            );
            return None;
        }

        info!("checking connectivity for {}", router.container_id());
        match router.check_connectors(all_routers) {
            Ok(()) => Some(true),
            Err(e) => {
                error!("connectivity check failed for {}: {}", router.container_id(), e);
                metrics.connectivity_check_failures_total.inc();
                Some(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ConnectionId;
    use crate::testing::{inter_router_listener, MockRouterLink};
    use std::sync::Arc;

    fn ready_router(id: &str, connection: u64, link: Arc<MockRouterLink>) -> ConnectedRouter {
        let mut router = ConnectedRouter::new(id.to_string(), ConnectionId(connection), link);
        router.on_listeners_retrieved(vec![inter_router_listener(id)]);
        router.on_connectors_retrieved(vec![]);
        router.on_addresses_synced(1, vec![]);
        router
    }

    #[test]
    fn test_all_routers_is_union() {
        let mut known = KnownRouters::new();
        let mut remote = RouterTopology::new();
        remote.insert("r-remote".to_string(), vec![inter_router_listener("r-remote")]);
        known.replace("agent-y", ConnectionId(9), remote);

        let mut registry = ConnectionRegistry::new();
        registry.register_router(ready_router("r-local", 1, Arc::new(MockRouterLink::default())));
        // connected but listeners not retrieved yet: still part of the view
        registry.register_router(ConnectedRouter::new(
            "r-new".to_string(),
            ConnectionId(2),
            Arc::new(MockRouterLink::default()),
        ));

        let all = ConnectivityChecker::all_routers(&known, &registry);
        assert_eq!(
            all.keys().collect::<Vec<_>>(),
            vec!["r-local", "r-new", "r-remote"]
        );
    }

    #[test]
    fn test_failure_on_one_router_does_not_stop_others() {
        let metrics = AgentMetrics::new().unwrap();
        let failing = Arc::new(MockRouterLink::failing_connectors());
        let healthy = Arc::new(MockRouterLink::default());

        let mut registry = ConnectionRegistry::new();
        registry.register_router(ready_router("a", 1, failing.clone()));
        registry.register_router(ready_router("b", 2, healthy.clone()));

        let all = ConnectivityChecker::all_routers(&KnownRouters::new(), &registry);
        let report = ConnectivityChecker::new(false).check_all(&mut registry, &all, &metrics);

        assert_eq!(report.failed, 1);
        assert_eq!(report.checked, 1);
        assert_eq!(failing.created(), vec!["b".to_string()]);
        assert_eq!(healthy.created(), vec!["a".to_string()]);
        assert_eq!(metrics.connectivity_check_failures_total.get(), 1);
    }

    #[test]
    fn test_disabled_checker_does_nothing() {
        let metrics = AgentMetrics::new().unwrap();
        let link = Arc::new(MockRouterLink::default());
        let mut registry = ConnectionRegistry::new();
        registry.register_router(ready_router("a", 1, link.clone()));
        registry.register_router(ready_router("b", 2, Arc::new(MockRouterLink::default())));

        let all = ConnectivityChecker::all_routers(&KnownRouters::new(), &registry);
        let report = ConnectivityChecker::new(true).check_all(&mut registry, &all, &metrics);

        assert_eq!(report, CheckReport::default());
        assert!(link.created().is_empty());
    }

    #[test]
    fn test_unready_router_is_skipped() {
        let metrics = AgentMetrics::new().unwrap();
        let link = Arc::new(MockRouterLink::default());
        let mut registry = ConnectionRegistry::new();
        registry.register_router(ConnectedRouter::new("a".to_string(), ConnectionId(1), link.clone()));

        let all = ConnectivityChecker::all_routers(&KnownRouters::new(), &registry);
        let report = ConnectivityChecker::new(false).check_all(&mut registry, &all, &metrics);
        assert_eq!(report.skipped, 1);
        assert!(link.calls().is_empty());
    }
}
