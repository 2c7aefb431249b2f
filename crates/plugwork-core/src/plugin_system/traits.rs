use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use log::warn;

use crate::plugin_system::descriptor::TypeIdentity;
use crate::plugin_system::error::CallbackResult;
use crate::plugin_system::loader::LoaderHandle;

/// Lifecycle state of a single plugin instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PluginState {
    /// Zero state produced by the allocator; no user logic has run
    Allocated = 0,
    /// Loader back-reference and identity are set
    Injected = 1,
    /// The no-argument initializer completed
    Initialized = 2,
    /// The release hook has run (terminal)
    Released = 3,
}

impl PluginState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PluginState::Allocated,
            1 => PluginState::Injected,
            2 => PluginState::Initialized,
            _ => PluginState::Released,
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginState::Allocated => write!(f, "allocated"),
            PluginState::Injected => write!(f, "injected"),
            PluginState::Initialized => write!(f, "initialized"),
            PluginState::Released => write!(f, "released"),
        }
    }
}

/// Loader-managed part of every plugin.
///
/// Plugins embed a `PluginBase` and expose it through [`Plugin::base`]. Only
/// the loader writes it; plugins read their loader and identity from it.
#[derive(Default)]
pub struct PluginBase {
    loader: Option<LoaderHandle>,
    identity: Option<TypeIdentity>,
    token: u64,
    state: AtomicU8,
}

impl PluginBase {
    /// Handle to the owning loader, set before any user logic runs
    pub fn loader(&self) -> Option<&LoaderHandle> {
        self.loader.as_ref()
    }

    pub fn identity(&self) -> Option<TypeIdentity> {
        self.identity
    }

    /// Per-instance token assigned by the loader (0 until injected)
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn state(&self) -> PluginState {
        PluginState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Ask the owning loader to drop this instance from its active set.
    ///
    /// Only removes the active entry if it is this very instance. No-op when
    /// the loader is gone or the instance is not active.
    pub fn request_unload(&self) -> bool {
        match (&self.loader, self.identity) {
            (Some(loader), Some(identity)) => loader.unload_instance(identity, self.token),
            _ => false,
        }
    }

    pub(crate) fn inject(&mut self, loader: LoaderHandle, identity: TypeIdentity, token: u64) {
        self.loader = Some(loader);
        self.identity = Some(identity);
        self.token = token;
        self.state.store(PluginState::Injected as u8, Ordering::Release);
    }

    pub(crate) fn mark_initialized(&self) {
        self.state.store(PluginState::Initialized as u8, Ordering::Release);
    }

    /// Initialized -> Released, exactly once
    fn begin_release(&self) -> bool {
        self.state
            .compare_exchange(
                PluginState::Initialized as u8,
                PluginState::Released as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn is_still_active(&self) -> bool {
        match (&self.loader, self.identity) {
            (Some(loader), Some(identity)) => loader.holds_instance(identity, self.token),
            _ => false,
        }
    }
}

impl fmt::Debug for PluginBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginBase")
            .field("identity", &self.identity)
            .field("token", &self.token)
            .field("state", &self.state())
            .field("attached", &self.loader.as_ref().is_some_and(|l| l.is_attached()))
            .finish()
    }
}

/// Upcasting helpers, implemented for every `Send + Sync + 'static` type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any_box(self: Box<Self>) -> Box<dyn Any>;
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any_box(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Core trait that all plugins must implement
pub trait Plugin: AsAny + Send + Sync {
    /// The embedded loader-managed state
    fn base(&self) -> &PluginBase;

    fn base_mut(&mut self) -> &mut PluginBase;

    /// Release hook.
    ///
    /// Never call this directly: hosts release a plugin through
    /// [`Dispose::dispose`] (or the loader's `unload` / `teardown_all`), which
    /// guarantees the hook runs at most once per instance.
    ///
    /// The default asks the owning loader to unload this instance. Overrides
    /// doing custom cleanup should still end with `self.base().request_unload()`,
    /// otherwise the instance stays in the active set.
    fn release(&self) {
        self.base().request_unload();
    }
}

impl fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("identity", &self.base().identity())
            .field("state", &self.base().state())
            .finish()
    }
}

/// The no-argument initializer of a plugin type.
///
/// Runs on an instance whose loader back-reference is already set and whose
/// fields may have been written by a pre-construction callback.
pub trait Initialize {
    fn initialize(&mut self) -> CallbackResult;
}

/// Runs the release hook of a plugin at most once.
pub trait Dispose {
    /// Returns `false` if the instance was never initialized or already released.
    fn dispose(&self) -> bool;
}

impl<P: Plugin + ?Sized> Dispose for P {
    fn dispose(&self) -> bool {
        let base = self.base();
        if !base.begin_release() {
            return false;
        }
        self.release();
        if base.is_still_active() {
            warn!(
                "Release hook of plugin '{}' did not unload it; instance is still active",
                base.identity().map(|i| i.name()).unwrap_or("<unknown>")
            );
        }
        true
    }
}

/// Implements [`Plugin::base`] and [`Plugin::base_mut`] for a struct field.
#[macro_export]
macro_rules! impl_plugin_base {
    ($field:ident) => {
        fn base(&self) -> &$crate::plugin_system::PluginBase {
            &self.$field
        }

        fn base_mut(&mut self) -> &mut $crate::plugin_system::PluginBase {
            &mut self.$field
        }
    };
}
