//! Desired address set, replaced wholesale on every update

use agent_api::{AddressDefinition, RawAddress};
use tracing::debug;

/// Holds the current desired address set
pub struct AddressStore {
    addresses: Vec<AddressDefinition>,
    initialised: bool,
    // Bumped on every update; peers acknowledge pushes by generation
    generation: u64,
}

impl AddressStore {
    pub fn new() -> Self {
        Self {
            addresses: Vec::new(),
            initialised: false,
            generation: 0,
        }
    }

    /// Replace the working set with the valid definitions from `raw`.
    /// Returns the new generation.
    pub fn update(&mut self, raw: Vec<RawAddress>) -> u64 {
        self.addresses = raw
            .into_iter()
            .filter_map(AddressDefinition::from_raw)
            .collect();
        self.initialised = true;
        self.generation += 1;

        debug!(
            "addresses updated (generation {}): {:?}",
            self.generation,
            self.addresses.iter().map(|a| a.address.as_str()).collect::<Vec<_>>()
        );
        self.generation
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn addresses(&self) -> &[AddressDefinition] {
        &self.addresses
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// The subset of the working set allocated to the given broker
    pub fn allocated_to(&self, broker_id: &str) -> Vec<AddressDefinition> {
        self.addresses
            .iter()
            .filter(|a| a.is_allocated_to(broker_id))
            .cloned()
            .collect()
    }
}

impl Default for AddressStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_api::Allocation;

    fn raw(address: Option<&str>, kind: Option<&str>, brokers: &[&str]) -> RawAddress {
        RawAddress {
            address: address.map(str::to_string),
            kind: kind.map(str::to_string),
            allocated_to: brokers.iter().map(|b| Allocation::new(*b)).collect(),
        }
    }

    #[test]
    fn test_update_keeps_only_complete_definitions() {
        let mut store = AddressStore::new();
        assert!(!store.is_initialised());

        store.update(vec![
            raw(Some("a"), Some("queue"), &[]),
            raw(Some("b"), None, &[]),
            raw(None, Some("topic"), &[]),
            raw(Some(""), Some("queue"), &[]),
            raw(Some("c"), Some("anycast"), &[]),
        ]);

        assert!(store.is_initialised());
        let names: Vec<_> = store.addresses().iter().map(|a| a.address.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_update_replaces_wholesale() {
        let mut store = AddressStore::new();
        store.update(vec![raw(Some("a"), Some("queue"), &[]), raw(Some("b"), Some("queue"), &[])]);
        store.update(vec![raw(Some("c"), Some("queue"), &[])]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.addresses()[0].address, "c");
    }

    #[test]
    fn test_empty_update_still_initialises() {
        let mut store = AddressStore::new();
        let generation = store.update(vec![]);
        assert!(store.is_initialised());
        assert!(store.is_empty());
        assert_eq!(generation, 1);
    }

    #[test]
    fn test_allocated_to_selects_exact_subset() {
        let mut store = AddressStore::new();
        store.update(vec![
            raw(Some("q1"), Some("queue"), &["broker-0"]),
            raw(Some("q2"), Some("queue"), &["broker-1"]),
            raw(Some("q3"), Some("queue"), &["broker-0", "broker-1"]),
            raw(Some("t1"), Some("anycast"), &[]),
        ]);

        let b0: Vec<_> = store.allocated_to("broker-0").into_iter().map(|a| a.address).collect();
        let b1: Vec<_> = store.allocated_to("broker-1").into_iter().map(|a| a.address).collect();
        assert_eq!(b0, vec!["q1", "q3"]);
        assert_eq!(b1, vec!["q2", "q3"]);
        assert!(store.allocated_to("broker-2").is_empty());
    }
}
