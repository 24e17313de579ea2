//! Kubernetes integration for the router agent
pub mod address_source;
pub mod client;
pub mod pod_group;
pub mod snapshot;

pub use address_source::AddressSource;
pub use client::DiscoveryClient;
pub use pod_group::{PodGroup, PodWatcher, Sibling, SiblingDialer};
pub use snapshot::Snapshot;
