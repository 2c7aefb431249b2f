use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, error, info, warn};

use crate::config::{BatchPolicy, LoaderConfig};
use crate::plugin_system::active::{ActiveEntry, ActiveSet};
use crate::plugin_system::descriptor::{Capability, PluginDescriptor, TypeIdentity};
use crate::plugin_system::discovery::{admission, DiscoverySource};
use crate::plugin_system::error::{CallbackError, CallbackResult, LoaderError, Result};
use crate::plugin_system::registry::PluginRegistry;
use crate::plugin_system::traits::{Dispose, Initialize, Plugin};

/// Erased pre-construction callback. Receives the descriptor being loaded and
/// the injected, not yet initialized instance.
type PreInit<'a> = dyn FnMut(&PluginDescriptor, &mut dyn Plugin) -> CallbackResult + 'a;

struct LoaderShared {
    config: LoaderConfig,
    registry: PluginRegistry,
    active: ActiveSet,
    next_token: AtomicU64,
}

impl LoaderShared {
    /// Release every active instance while it is still in the active set,
    /// then drop its entry.
    fn teardown(&self) {
        let discarded = self.registry.clear();
        let mut released = 0;
        for identity in self.active.identities() {
            let Some(instance) = self.active.get(&identity) else {
                continue;
            };
            release_instance(&instance);
            // Hooks normally unload themselves; a forgetful hook leaves the entry behind
            self.active.remove_instance(&identity, instance.base().token());
            released += 1;
        }
        if discarded > 0 || released > 0 {
            info!(
                "Loader teardown: released {} active plugin(s), discarded {} pending registration(s)",
                released, discarded
            );
        }
    }
}

impl Drop for LoaderShared {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn release_instance(instance: &Arc<dyn Plugin>) {
    let identity = instance.base().identity();
    if panic::catch_unwind(AssertUnwindSafe(|| instance.dispose())).is_err() {
        error!(
            "Release hook of plugin '{}' panicked; continuing",
            identity.map(|i| i.name()).unwrap_or("<unknown>")
        );
    }
}

fn downcast_mut<T: Plugin>(plugin: &mut dyn Plugin) -> std::result::Result<&mut T, CallbackError> {
    plugin
        .as_any_mut()
        .downcast_mut::<T>()
        .ok_or_else(|| format!("instance is not a '{}'", std::any::type_name::<T>()).into())
}

fn downcast_arc<T: Plugin>(instance: Arc<dyn Plugin>) -> Result<Arc<T>> {
    let identity = instance
        .base()
        .identity()
        .unwrap_or_else(TypeIdentity::of::<T>);
    instance
        .into_any_arc()
        .downcast::<T>()
        .map_err(|_| LoaderError::TypeMismatch {
            identity,
            expected: std::any::type_name::<T>(),
        })
}

/// Weak back-reference from a plugin to the loader that created it.
///
/// Instances never keep their loader alive; once every [`PluginLoader`] clone
/// is dropped the handle is detached and every request through it is a no-op.
#[derive(Clone)]
pub struct LoaderHandle {
    shared: Weak<LoaderShared>,
}

impl LoaderHandle {
    /// The loader, if it is still alive
    pub fn upgrade(&self) -> Option<PluginLoader> {
        self.shared.upgrade().map(|shared| PluginLoader { shared })
    }

    pub fn is_attached(&self) -> bool {
        self.shared.strong_count() > 0
    }

    /// Whether this handle refers to `loader`
    pub fn points_to(&self, loader: &PluginLoader) -> bool {
        Weak::ptr_eq(&self.shared, &Arc::downgrade(&loader.shared))
    }

    pub(crate) fn unload_instance(&self, identity: TypeIdentity, token: u64) -> bool {
        match self.shared.upgrade() {
            Some(shared) => {
                let removed = shared.active.remove_instance(&identity, token).is_some();
                if removed {
                    info!("Unloaded plugin '{}'", identity);
                }
                removed
            }
            None => false,
        }
    }

    pub(crate) fn holds_instance(&self, identity: TypeIdentity, token: u64) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.active.holds(&identity, token))
    }
}

impl fmt::Debug for LoaderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderHandle")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Discovers, instantiates, tracks and tears down plugins.
///
/// Clones share the same registry and active set. Single-key operations are
/// atomic; batch operations ([`load_where`](Self::load_where),
/// [`teardown_all`](Self::teardown_all)) are atomic per entry only and give no
/// snapshot isolation across entries. Dropping the last clone tears down every
/// active plugin.
#[derive(Clone)]
pub struct PluginLoader {
    shared: Arc<LoaderShared>,
}

impl Default for PluginLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLoader")
            .field("registered", &self.shared.registry.len())
            .field("active", &self.shared.active.len())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl PluginLoader {
    pub fn new() -> Self {
        Self::with_config(LoaderConfig::default())
    }

    pub fn with_config(config: LoaderConfig) -> Self {
        Self {
            shared: Arc::new(LoaderShared {
                config,
                registry: PluginRegistry::new(),
                active: ActiveSet::new(),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    /// Build a loader from a config file (format picked from the extension).
    pub fn from_config_file(path: &Path) -> Result<Self> {
        let config = LoaderConfig::from_path(path)?;
        info!("Loaded loader configuration from {}", path.display());
        Ok(Self::with_config(config))
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.shared.config
    }

    /// Weak handle to this loader, as injected into plugins
    pub fn handle(&self) -> LoaderHandle {
        LoaderHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    // --- Discovery ---

    /// Register every admissible candidate of `source`. Returns the number of
    /// identities newly added to the registry.
    pub fn discover(&self, source: &dyn DiscoverySource) -> usize {
        let mut added = 0;
        for descriptor in source.candidates() {
            let identity = descriptor.identity();
            if let Err(reason) = admission(&descriptor) {
                if self.shared.config.log_skipped_candidates {
                    debug!("Skipping '{}' from '{}': {}", identity, source.name(), reason);
                }
                continue;
            }
            if self.shared.active.contains(&identity) {
                debug!("Skipping '{}' from '{}': already active", identity, source.name());
                continue;
            }
            if self.shared.registry.register(descriptor) {
                debug!("Registered plugin '{}' from '{}'", identity, source.name());
                added += 1;
            }
        }
        info!("Discovered {} new plugin(s) in '{}'", added, source.name());
        added
    }

    // --- Single loads ---

    /// Load `T`, using its registered descriptor if there is one.
    pub fn load<T: Plugin + Default + Initialize>(&self) -> Result<Arc<T>> {
        self.load_typed::<T>(None)
    }

    /// Load `T`, running `pre_init` on the injected instance before its initializer.
    pub fn load_with<T, F>(&self, mut pre_init: F) -> Result<Arc<T>>
    where
        T: Plugin + Default + Initialize,
        F: FnMut(&mut T) -> CallbackResult,
    {
        let erased: &mut PreInit<'_> =
            &mut |_: &PluginDescriptor, plugin: &mut dyn Plugin| pre_init(downcast_mut::<T>(plugin)?);
        self.load_typed::<T>(Some(erased))
    }

    /// Load a registered identity.
    pub fn load_identity(&self, identity: TypeIdentity) -> Result<Arc<dyn Plugin>> {
        self.load_registered(identity, None)
    }

    pub fn load_identity_with<F>(&self, identity: TypeIdentity, mut pre_init: F) -> Result<Arc<dyn Plugin>>
    where
        F: FnMut(&mut dyn Plugin) -> CallbackResult,
    {
        let erased: &mut PreInit<'_> = &mut |_: &PluginDescriptor, plugin: &mut dyn Plugin| pre_init(plugin);
        self.load_registered(identity, Some(erased))
    }

    /// Load an arbitrary descriptor, registered or not.
    pub fn load_descriptor(&self, descriptor: &PluginDescriptor) -> Result<Arc<dyn Plugin>> {
        self.load_inner(descriptor, None)
    }

    pub fn load_descriptor_with<F>(&self, descriptor: &PluginDescriptor, mut pre_init: F) -> Result<Arc<dyn Plugin>>
    where
        F: FnMut(&mut dyn Plugin) -> CallbackResult,
    {
        let erased: &mut PreInit<'_> = &mut |_: &PluginDescriptor, plugin: &mut dyn Plugin| pre_init(plugin);
        self.load_inner(descriptor, Some(erased))
    }

    // --- Batch loads ---

    /// Load every registered type matching `predicate`.
    ///
    /// With [`BatchPolicy::AbortOnFirstError`] the first failure is returned
    /// unchanged and the remaining candidates stay registered; plugins loaded
    /// before it stay active. With [`BatchPolicy::ContinueOnError`] every
    /// candidate is attempted and failures are reported together as
    /// [`LoaderError::BatchLoad`].
    pub fn load_where<P>(&self, predicate: P) -> Result<Vec<Arc<dyn Plugin>>>
    where
        P: Fn(&PluginDescriptor) -> bool,
    {
        self.load_batch(predicate, None)
    }

    pub fn load_where_with<P, F>(&self, predicate: P, mut pre_init: F) -> Result<Vec<Arc<dyn Plugin>>>
    where
        P: Fn(&PluginDescriptor) -> bool,
        F: FnMut(&mut dyn Plugin) -> CallbackResult,
    {
        let erased: &mut PreInit<'_> = &mut |_: &PluginDescriptor, plugin: &mut dyn Plugin| pre_init(plugin);
        self.load_batch(predicate, Some(erased))
    }

    /// Load every registered type that is-a `C`.
    pub fn load_capable<C: ?Sized + 'static>(&self) -> Result<Vec<Arc<dyn Plugin>>> {
        let capability = Capability::of::<C>();
        self.load_batch(|descriptor| descriptor.supports(capability), None)
    }

    /// Load every registered type that is-a `C`, handing each instance to
    /// `pre_init` viewed as `C`.
    pub fn load_capable_with<C, F>(&self, mut pre_init: F) -> Result<Vec<Arc<dyn Plugin>>>
    where
        C: ?Sized + 'static,
        F: FnMut(&mut C) -> CallbackResult,
    {
        let capability = Capability::of::<C>();
        let erased: &mut PreInit<'_> = &mut |descriptor: &PluginDescriptor, plugin: &mut dyn Plugin| {
            let viewed = descriptor
                .cast::<C>(plugin)
                .ok_or_else(|| format!("'{}' cannot be viewed as '{}'", descriptor.identity(), capability))?;
            pre_init(viewed)
        };
        self.load_batch(|descriptor| descriptor.supports(capability), Some(erased))
    }

    // --- Detached instances ---

    /// Run the full construction protocol for `T` without tracking the result.
    ///
    /// The returned instance carries this loader's handle but is owned by the
    /// caller; its release hook never affects the active set.
    pub fn instantiate<T: Plugin + Default + Initialize>(&self) -> Result<Box<T>> {
        self.instantiate_typed::<T>(None)
    }

    pub fn instantiate_with<T, F>(&self, mut pre_init: F) -> Result<Box<T>>
    where
        T: Plugin + Default + Initialize,
        F: FnMut(&mut T) -> CallbackResult,
    {
        let erased: &mut PreInit<'_> =
            &mut |_: &PluginDescriptor, plugin: &mut dyn Plugin| pre_init(downcast_mut::<T>(plugin)?);
        self.instantiate_typed::<T>(Some(erased))
    }

    // --- Unloading ---

    /// Remove `identity` from the active set and run its release hook.
    ///
    /// The hook runs at most once per instance, so a hook that calls back
    /// into `unload` for its own identity is a no-op. Unknown identities are
    /// ignored. The identity is not re-registered.
    pub fn unload(&self, identity: TypeIdentity) -> bool {
        match self.shared.active.remove(&identity) {
            Some(entry) => {
                info!("Unloaded plugin '{}'", identity);
                release_instance(entry.instance());
                true
            }
            None => false,
        }
    }

    /// Discard every pending registration and release every active plugin.
    ///
    /// Each instance is released while still in the active set, then its
    /// entry is removed. Each release hook runs exactly once; hooks may call
    /// back into the loader. A panicking hook is logged and the remaining
    /// plugins are still released. Calling this again is a no-op.
    ///
    /// Per-entry atomic only: a load racing with teardown may leave its
    /// instance active, to be released by the next teardown.
    pub fn teardown_all(&self) {
        self.shared.teardown();
    }

    // --- Queries ---

    pub fn is_loaded(&self, identity: TypeIdentity) -> bool {
        self.shared.active.contains(&identity)
    }

    /// The active instance of `T`, if any
    pub fn get<T: Plugin>(&self) -> Option<Arc<T>> {
        let instance = self.shared.active.get(&TypeIdentity::of::<T>())?;
        downcast_arc::<T>(instance).ok()
    }

    /// The active instance of `identity`, if any
    pub fn instance(&self, identity: TypeIdentity) -> Option<Arc<dyn Plugin>> {
        self.shared.active.get(&identity)
    }

    pub fn is_registered(&self, identity: TypeIdentity) -> bool {
        self.shared.registry.contains(&identity)
    }

    /// Identities waiting in the registry
    pub fn registered(&self) -> Vec<TypeIdentity> {
        self.shared.registry.identities()
    }

    /// Identities currently active
    pub fn active(&self) -> Vec<TypeIdentity> {
        self.shared.active.identities()
    }

    pub fn registered_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn active_count(&self) -> usize {
        self.shared.active.len()
    }

    // --- Internals ---

    fn load_typed<T: Plugin + Default + Initialize>(&self, pre_init: Option<&mut PreInit<'_>>) -> Result<Arc<T>> {
        let identity = TypeIdentity::of::<T>();
        let descriptor = self
            .shared
            .registry
            .get(&identity)
            .unwrap_or_else(PluginDescriptor::new::<T>);
        let instance = self.load_inner(&descriptor, pre_init)?;
        downcast_arc::<T>(instance)
    }

    fn load_registered(&self, identity: TypeIdentity, pre_init: Option<&mut PreInit<'_>>) -> Result<Arc<dyn Plugin>> {
        if self.shared.active.contains(&identity) {
            return Err(LoaderError::AlreadyLoaded { identity });
        }
        let descriptor = self
            .shared
            .registry
            .get(&identity)
            .ok_or(LoaderError::NotRegistered { identity })?;
        self.load_inner(&descriptor, pre_init)
    }

    fn load_batch<P>(&self, predicate: P, mut pre_init: Option<&mut PreInit<'_>>) -> Result<Vec<Arc<dyn Plugin>>>
    where
        P: Fn(&PluginDescriptor) -> bool,
    {
        let candidates = self.shared.registry.snapshot_where(predicate);
        let policy = self.shared.config.batch_policy;
        debug!("Batch load: {} candidate(s), policy {:?}", candidates.len(), policy);

        let mut loaded = Vec::with_capacity(candidates.len());
        let mut failures = Vec::new();
        for descriptor in candidates {
            let identity = descriptor.identity();
            if !self.shared.registry.contains(&identity) {
                debug!("Batch load: '{}' left the registry concurrently, skipping", identity);
                continue;
            }
            match self.load_inner(&descriptor, pre_init.as_deref_mut()) {
                Ok(instance) => loaded.push(instance),
                Err(LoaderError::AlreadyLoaded { .. }) => {
                    debug!("Batch load: '{}' was loaded concurrently, skipping", identity);
                }
                Err(err) => match policy {
                    BatchPolicy::AbortOnFirstError => return Err(err),
                    BatchPolicy::ContinueOnError => failures.push((identity, err)),
                },
            }
        }

        if failures.is_empty() {
            Ok(loaded)
        } else {
            Err(LoaderError::BatchLoad {
                loaded: loaded
                    .iter()
                    .filter_map(|instance| instance.base().identity())
                    .collect(),
                failures,
            })
        }
    }

    fn load_inner(&self, descriptor: &PluginDescriptor, pre_init: Option<&mut PreInit<'_>>) -> Result<Arc<dyn Plugin>> {
        let identity = descriptor.identity();
        if self.shared.active.contains(&identity) {
            warn!("Refusing to load '{}': already loaded", identity);
            return Err(LoaderError::AlreadyLoaded { identity });
        }

        let instance: Arc<dyn Plugin> = Arc::from(self.construct(descriptor, pre_init)?);
        // Leave the registry before entering the active set, so the identity is
        // never in both
        self.shared.registry.retire(&identity);
        if self
            .shared
            .active
            .try_insert(identity, ActiveEntry::new(Arc::clone(&instance)))
            .is_err()
        {
            warn!("Lost load race for '{}': already loaded", identity);
            return Err(LoaderError::AlreadyLoaded { identity });
        }
        info!("Loaded plugin '{}'", identity);
        Ok(instance)
    }

    fn instantiate_typed<T: Plugin + Default + Initialize>(&self, pre_init: Option<&mut PreInit<'_>>) -> Result<Box<T>> {
        let descriptor = PluginDescriptor::new::<T>();
        let instance = self.construct(&descriptor, pre_init)?;
        instance
            .into_any_box()
            .downcast::<T>()
            .map_err(|_| LoaderError::TypeMismatch {
                identity: descriptor.identity(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// allocate -> inject -> pre-init -> initialize
    fn construct(&self, descriptor: &PluginDescriptor, pre_init: Option<&mut PreInit<'_>>) -> Result<Box<dyn Plugin>> {
        let identity = descriptor.identity();
        if descriptor.is_abstract() {
            return Err(LoaderError::AbstractType { identity });
        }
        let initializer = descriptor
            .initializer()
            .ok_or(LoaderError::NoDefaultInitializer { identity })?;

        let mut instance = descriptor.allocate();
        let token = self.shared.next_token.fetch_add(1, Ordering::Relaxed);
        instance.base_mut().inject(self.handle(), identity, token);
        debug!("Allocated and injected '{}' (token {})", identity, token);

        if let Some(pre_init) = pre_init {
            pre_init(descriptor, &mut *instance)
                .map_err(|source| LoaderError::PreInitFailure { identity, source })?;
        }

        initializer(&mut *instance).map_err(|source| LoaderError::InitializerFailure { identity, source })?;
        instance.base().mark_initialized();
        debug!("Initialized '{}' (token {})", identity, token);
        Ok(instance)
    }
}
