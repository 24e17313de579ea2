//! Peer classification from connection properties

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const PRODUCT_ROUTER: &str = "qpid-dispatch-router";
pub const PRODUCT_BROKER: &str = "apache-activemq-artemis";
pub const PRODUCT_AGENT: &str = "ragent";

/// Properties a peer declares when opening a connection
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ConnectionProperties {
    pub fn with_product(product: impl Into<String>) -> Self {
        Self {
            product: Some(product.into()),
            extra: BTreeMap::new(),
        }
    }
}

/// Role of a peer, resolved once when its connection opens
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerRole {
    Router,
    Broker,
    Federation,
    Client,
}

impl PeerRole {
    pub fn from_properties(properties: &ConnectionProperties) -> Self {
        match properties.product.as_deref() {
            Some(PRODUCT_ROUTER) => PeerRole::Router,
            Some(PRODUCT_BROKER) => PeerRole::Broker,
            Some(PRODUCT_AGENT) => PeerRole::Federation,
            _ => PeerRole::Client,
        }
    }
}
