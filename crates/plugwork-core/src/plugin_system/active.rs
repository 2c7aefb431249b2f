use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::plugin_system::descriptor::TypeIdentity;
use crate::plugin_system::traits::Plugin;

/// A live plugin instance together with the token the loader assigned to it.
#[derive(Clone)]
pub struct ActiveEntry {
    token: u64,
    instance: Arc<dyn Plugin>,
}

impl ActiveEntry {
    pub(crate) fn new(instance: Arc<dyn Plugin>) -> Self {
        Self {
            token: instance.base().token(),
            instance,
        }
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn instance(&self) -> &Arc<dyn Plugin> {
        &self.instance
    }
}

impl fmt::Debug for ActiveEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveEntry")
            .field("token", &self.token)
            .field("base", self.instance.base())
            .finish()
    }
}

/// Currently instantiated plugins, at most one per identity.
///
/// Callers must never invoke plugin code while holding a map guard: release
/// hooks call back into [`ActiveSet::remove_instance`].
#[derive(Debug, Default)]
pub struct ActiveSet {
    entries: DashMap<TypeIdentity, ActiveEntry>,
}

impl ActiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert-if-absent. On conflict the rejected entry is handed back.
    pub fn try_insert(&self, identity: TypeIdentity, entry: ActiveEntry) -> Result<(), ActiveEntry> {
        match self.entries.entry(identity) {
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
            Entry::Occupied(_) => Err(entry),
        }
    }

    /// Remove-if-present, whatever instance is stored.
    pub fn remove(&self, identity: &TypeIdentity) -> Option<ActiveEntry> {
        self.entries.remove(identity).map(|(_, entry)| entry)
    }

    /// Remove only if the stored instance carries `token`.
    pub fn remove_instance(&self, identity: &TypeIdentity, token: u64) -> Option<ActiveEntry> {
        self.entries
            .remove_if(identity, |_, entry| entry.token == token)
            .map(|(_, entry)| entry)
    }

    /// Shared handle to the active instance of `identity`
    pub fn get(&self, identity: &TypeIdentity) -> Option<Arc<dyn Plugin>> {
        self.entries
            .get(identity)
            .map(|entry| Arc::clone(&entry.instance))
    }

    pub fn holds(&self, identity: &TypeIdentity, token: u64) -> bool {
        self.entries
            .get(identity)
            .is_some_and(|entry| entry.token == token)
    }

    pub fn contains(&self, identity: &TypeIdentity) -> bool {
        self.entries.contains_key(identity)
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
