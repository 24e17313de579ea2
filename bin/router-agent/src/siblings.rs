//! Bridges the sibling pod group to the peer dialer

use agent_discovery::{Sibling, SiblingDialer};
use agent_link::Dialer;
use async_trait::async_trait;

pub struct LinkDialer(pub Dialer);

#[async_trait]
impl SiblingDialer for LinkDialer {
    async fn dial(&self, sibling: &Sibling) -> anyhow::Result<()> {
        self.0.connect(&sibling.name, &sibling.host, sibling.port).await?;
        Ok(())
    }

    async fn hang_up(&self, name: &str) {
        self.0.disconnect(name).await;
    }
}
