//! Sibling agent discovery through a labelled pod group

use crate::client::DiscoveryClient;
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, ResourceExt};
use kube_runtime::{watcher, WatchStreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A reachable sibling agent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sibling {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl Sibling {
    /// A pod is a sibling once it is running, has an IP and exposes the named port
    pub fn from_pod(pod: &Pod, port_name: &str) -> Option<Self> {
        let status = pod.status.as_ref()?;
        if status.phase.as_deref() != Some("Running") {
            return None;
        }
        let host = status.pod_ip.clone().filter(|ip| !ip.is_empty())?;
        let port = pod
            .spec
            .as_ref()?
            .containers
            .iter()
            .flat_map(|c| c.ports.iter().flatten())
            .find(|p| p.name.as_deref() == Some(port_name))?
            .container_port;

        Some(Self {
            name: pod.name_any(),
            host,
            port: u16::try_from(port).ok()?,
        })
    }
}

/// Membership changes between two observations of the group
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupChanges {
    pub added: Vec<Sibling>,
    pub removed: Vec<String>,
}

/// Connects to and disconnects from sibling agents
#[async_trait]
pub trait SiblingDialer: Send + Sync {
    async fn dial(&self, sibling: &Sibling) -> anyhow::Result<()>;

    async fn hang_up(&self, name: &str);
}

/// Current sibling membership, excluding this agent's own pod
#[derive(Debug)]
pub struct PodGroup {
    own_name: String,
    members: BTreeMap<String, Sibling>,
}

impl PodGroup {
    pub fn new(own_name: impl Into<String>) -> Self {
        Self {
            own_name: own_name.into(),
            members: BTreeMap::new(),
        }
    }

    /// Replace the membership with `observed`. A sibling whose address
    /// changed is reported as removed and added again.
    pub fn update(&mut self, observed: impl IntoIterator<Item = Sibling>) -> GroupChanges {
        let observed: BTreeMap<String, Sibling> = observed
            .into_iter()
            .filter(|s| s.name != self.own_name)
            .map(|s| (s.name.clone(), s))
            .collect();

        let mut changes = GroupChanges::default();
        for (name, member) in &self.members {
            if observed.get(name) != Some(member) {
                changes.removed.push(name.clone());
            }
        }
        for (name, sibling) in &observed {
            if self.members.get(name) != Some(sibling) {
                changes.added.push(sibling.clone());
            }
        }
        self.members = observed;
        changes
    }

    /// Apply an observation: hang up on departed siblings and dial new ones.
    /// A sibling that fails to dial is forgotten and retried next time.
    pub async fn reconcile(&mut self, observed: Vec<Sibling>, dialer: &dyn SiblingDialer) {
        let changes = self.update(observed);
        for name in &changes.removed {
            info!("Sibling {} left", name);
            dialer.hang_up(name).await;
        }
        for sibling in &changes.added {
            info!("Sibling {} at {}:{}", sibling.name, sibling.host, sibling.port);
            if let Err(e) = dialer.dial(sibling).await {
                warn!("Failed to connect to sibling {}: {}", sibling.name, e);
                self.forget(&sibling.name);
            }
        }
        debug!("Sibling group: {} members", self.members.len());
    }

    /// Forget a member so that the next update retries it
    pub fn forget(&mut self, name: &str) {
        self.members.remove(name);
    }

    pub fn members(&self) -> impl Iterator<Item = &Sibling> {
        self.members.values()
    }
}

pub struct PodWatcher {
    client: DiscoveryClient,
    selector: String,
    port_name: String,
    group: PodGroup,
}

impl PodWatcher {
    pub fn new(
        client: DiscoveryClient,
        selector: impl Into<String>,
        port_name: impl Into<String>,
        own_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            selector: selector.into(),
            port_name: port_name.into(),
            group: PodGroup::new(own_name),
        }
    }

    /// Watch the sibling pods and keep one connection per sibling
    pub async fn run(mut self, dialer: Arc<dyn SiblingDialer>) -> anyhow::Result<()> {
        info!(
            "Watching sibling agents in {} with selector {}",
            self.client.namespace(),
            self.selector
        );
        let api: Api<Pod> = Api::namespaced(self.client.clone_client(), self.client.namespace());
        let config = watcher::Config::default().labels(&self.selector);
        let mut stream = watcher(api, config).default_backoff().boxed();

        let mut snapshot = Snapshot::new();
        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => {
                    if snapshot.apply(event) {
                        let observed: Vec<_> = snapshot
                            .objects()
                            .filter_map(|pod| Sibling::from_pod(pod, &self.port_name))
                            .collect();
                        self.group.reconcile(observed, dialer.as_ref()).await;
                    }
                }
                Err(e) => warn!("Sibling pod watch error: {}", e),
            }
        }
        Ok(())
    }
}
