//! Kubernetes client for address and sibling discovery

use kube::Client;

/// DiscoveryClient wraps the Kubernetes client and the watched namespace
#[derive(Clone)]
pub struct DiscoveryClient {
    client: Client,
    namespace: String,
}

impl DiscoveryClient {
    /// Connect using the in-cluster or kubeconfig defaults
    pub async fn new(namespace: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self {
            client,
            namespace: namespace.into(),
        })
    }

    /// Get the underlying Kubernetes client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Get a clone of the Kubernetes client
    pub fn clone_client(&self) -> Client {
        self.client.clone()
    }
}
