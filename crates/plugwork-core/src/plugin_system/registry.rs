use dashmap::{DashMap, DashSet};
use dashmap::mapref::entry::Entry;

use crate::plugin_system::descriptor::{PluginDescriptor, TypeIdentity};

/// Discovered-but-not-yet-instantiated plugin types.
///
/// Every single-key operation is atomic without locking unrelated keys. An
/// identity that has been retired (moved to the active set once) is never
/// admitted again.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    entries: DashMap<TypeIdentity, PluginDescriptor>,
    retired: DashSet<TypeIdentity>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert-if-absent. Returns `false` if the identity is already present or retired.
    pub fn register(&self, descriptor: PluginDescriptor) -> bool {
        let identity = descriptor.identity();
        if self.retired.contains(&identity) {
            return false;
        }
        let inserted = match self.entries.entry(identity) {
            Entry::Vacant(slot) => {
                slot.insert(descriptor);
                true
            }
            Entry::Occupied(_) => false,
        };
        // A concurrent retire may have slipped in between the two checks
        if inserted && self.retired.contains(&identity) {
            self.entries.remove(&identity);
            return false;
        }
        inserted
    }

    /// Get a descriptor by identity
    pub fn get(&self, identity: &TypeIdentity) -> Option<PluginDescriptor> {
        self.entries.get(identity).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, identity: &TypeIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    /// Remove-if-present
    pub fn remove(&self, identity: &TypeIdentity) -> Option<PluginDescriptor> {
        self.entries.remove(identity).map(|(_, descriptor)| descriptor)
    }

    /// Permanently close the registry to `identity` and drop its entry.
    pub fn retire(&self, identity: &TypeIdentity) -> Option<PluginDescriptor> {
        self.retired.insert(*identity);
        self.remove(identity)
    }

    pub fn is_retired(&self, identity: &TypeIdentity) -> bool {
        self.retired.contains(identity)
    }

    /// Clone out every descriptor matching `predicate`.
    ///
    /// The snapshot is not isolated from concurrent registrations or loads.
    /// `predicate` runs after the map guards are released, so it may call
    /// back into the registry.
    pub fn snapshot_where<F>(&self, predicate: F) -> Vec<PluginDescriptor>
    where
        F: Fn(&PluginDescriptor) -> bool,
    {
        let descriptors: Vec<PluginDescriptor> = self.entries.iter().map(|entry| entry.value().clone()).collect();
        descriptors.into_iter().filter(|descriptor| predicate(descriptor)).collect()
    }

    /// Drop every pending descriptor. Retired identities stay retired.
    pub fn clear(&self) -> usize {
        let identities = self.identities();
        identities
            .iter()
            .filter(|identity| self.entries.remove(*identity).is_some())
            .count()
    }

    pub fn identities(&self) -> Vec<TypeIdentity> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
