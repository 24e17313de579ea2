//! Folding watch events into full snapshots

use kube::ResourceExt;
use kube_runtime::watcher::Event;
use std::collections::BTreeMap;

/// Current set of watched objects keyed by name.
///
/// Nothing is reported until the initial list completes; from then on every
/// change yields a new full snapshot.
#[derive(Debug)]
pub struct Snapshot<K> {
    objects: BTreeMap<String, K>,
    listing: Option<BTreeMap<String, K>>,
    ready: bool,
}

impl<K> Default for Snapshot<K> {
    fn default() -> Self {
        Self {
            objects: BTreeMap::new(),
            listing: None,
            ready: false,
        }
    }
}

impl<K: ResourceExt> Snapshot<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one watch event. Returns true if a new snapshot is available.
    pub fn apply(&mut self, event: Event<K>) -> bool {
        match event {
            Event::Init => {
                self.listing = Some(BTreeMap::new());
                false
            }
            Event::InitApply(object) => {
                self.listing
                    .get_or_insert_with(BTreeMap::new)
                    .insert(object.name_any(), object);
                false
            }
            Event::InitDone => {
                // a relist replaces everything seen before it
                self.objects = self.listing.take().unwrap_or_default();
                self.ready = true;
                true
            }
            Event::Apply(object) => {
                self.objects.insert(object.name_any(), object);
                self.ready
            }
            Event::Delete(object) => {
                self.objects.remove(&object.name_any());
                self.ready
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn objects(&self) -> impl Iterator<Item = &K> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_nothing_reported_before_initial_list() {
        let mut snapshot = Snapshot::new();
        assert!(!snapshot.apply(Event::Init));
        assert!(!snapshot.apply(Event::InitApply(config_map("a"))));
        assert!(!snapshot.is_ready());

        assert!(snapshot.apply(Event::InitDone));
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_changes_after_init_are_reported() {
        let mut snapshot = Snapshot::new();
        snapshot.apply(Event::Init);
        snapshot.apply(Event::InitDone);
        assert!(snapshot.is_empty());

        assert!(snapshot.apply(Event::Apply(config_map("a"))));
        assert!(snapshot.apply(Event::Apply(config_map("b"))));
        assert!(snapshot.apply(Event::Delete(config_map("a"))));
        let names: Vec<_> = snapshot.objects().map(|c| c.name_any()).collect();
        assert_eq!(names, vec!["b"]);
    }

    #[test]
    fn test_relist_drops_objects_deleted_meanwhile() {
        let mut snapshot = Snapshot::new();
        snapshot.apply(Event::Init);
        snapshot.apply(Event::InitApply(config_map("a")));
        snapshot.apply(Event::InitApply(config_map("b")));
        snapshot.apply(Event::InitDone);

        snapshot.apply(Event::Init);
        snapshot.apply(Event::InitApply(config_map("b")));
        // still serving the previous snapshot while relisting
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.apply(Event::InitDone));
        assert_eq!(snapshot.len(), 1);
    }
}
