//! Address definitions sourced from labelled ConfigMaps

use crate::client::DiscoveryClient;
use crate::snapshot::Snapshot;
use agent_api::RawAddress;
use agent_core::{AgentEvent, EventSender};
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, ResourceExt};
use kube_runtime::{watcher, WatchStreamExt};
use tracing::{debug, info, warn};

/// ConfigMap key holding one JSON-encoded address definition
pub const CONFIG_KEY: &str = "config.json";

/// Extract the address definitions held by a set of ConfigMaps.
/// ConfigMaps without the key or with unparsable JSON are skipped.
pub fn addresses_from_config_maps<'a>(config_maps: impl Iterator<Item = &'a ConfigMap>) -> Vec<RawAddress> {
    config_maps
        .filter_map(|config_map| {
            let json = config_map.data.as_ref()?.get(CONFIG_KEY)?;
            match serde_json::from_str::<RawAddress>(json) {
                Ok(address) => Some(address),
                Err(e) => {
                    warn!("Skipping address config {}: {}", config_map.name_any(), e);
                    None
                }
            }
        })
        .collect()
}

pub struct AddressSource {
    client: DiscoveryClient,
    selector: String,
}

impl AddressSource {
    pub fn new(client: DiscoveryClient, selector: impl Into<String>) -> Self {
        Self {
            client,
            selector: selector.into(),
        }
    }

    /// Watch the selected ConfigMaps and post a full snapshot on every change
    pub async fn run(self, events: EventSender) -> anyhow::Result<()> {
        info!(
            "Watching address config in {} with selector {}",
            self.client.namespace(),
            self.selector
        );
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone_client(), self.client.namespace());
        let config = watcher::Config::default().labels(&self.selector);
        let mut stream = watcher(api, config).default_backoff().boxed();

        let mut snapshot = Snapshot::new();
        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => {
                    if !snapshot.apply(event) {
                        continue;
                    }
                    let addresses = addresses_from_config_maps(snapshot.objects());
                    debug!("Address config snapshot with {} definitions", addresses.len());
                    if events.send(AgentEvent::AddressesUpdated(addresses)).is_err() {
                        info!("Control plane stopped, ending address watch");
                        return Ok(());
                    }
                }
                Err(e) => warn!("Address config watch error: {}", e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn config_map(name: &str, json: Option<&str>) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            data: json.map(|json| BTreeMap::from([(CONFIG_KEY.to_string(), json.to_string())])),
            ..Default::default()
        }
    }

    #[test]
    fn test_definitions_are_read_from_config_key() {
        let maps = vec![
            config_map("q1", Some(r#"{"address":"q1","type":"queue","allocated_to":["b0"]}"#)),
            config_map("empty", None),
            config_map("broken", Some("{not json")),
            config_map("partial", Some(r#"{"address":"t1"}"#)),
        ];
        let addresses = addresses_from_config_maps(maps.iter());

        // incomplete definitions are kept here; the address store filters them
        assert_eq!(addresses.len(), 2);
        assert_eq!(addresses[0].address.as_deref(), Some("q1"));
        assert_eq!(addresses[0].allocated_to.len(), 1);
        assert_eq!(addresses[1].kind, None);
    }
}
