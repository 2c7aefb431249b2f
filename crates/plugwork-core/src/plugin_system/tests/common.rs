#![cfg(test)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::plugin_system::descriptor::PluginDescriptor;
use crate::plugin_system::error::CallbackResult;
use crate::plugin_system::traits::{Initialize, Plugin, PluginBase, PluginState};

// ===== CAPABILITIES =====

/// Base capability used by the batch-load tests
pub trait Greeter: Send + Sync {
    fn set_id(&mut self, id: u32);
    fn greeting(&self) -> String;
}

/// Lets a pre-init callback attach a release counter to any numbered plugin
pub trait Tracked: Send + Sync {
    fn track(&mut self, counter: Arc<AtomicUsize>);
}

// ===== MOCK PLUGINS =====

/// Discoverable greeter. Its initializer copies `id` into `observed_id`, so
/// tests can tell what the pre-construction callback wrote.
#[derive(Debug, Default)]
pub struct Alpha {
    base: PluginBase,
    pub id: u32,
    pub observed_id: u32,
    pub loader_seen_by_initializer: bool,
    pub release_counter: Option<Arc<AtomicUsize>>,
}

impl Plugin for Alpha {
    crate::impl_plugin_base!(base);

    fn release(&self) {
        if let Some(counter) = &self.release_counter {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        self.base().request_unload();
    }
}

impl Initialize for Alpha {
    fn initialize(&mut self) -> CallbackResult {
        self.observed_id = self.id;
        self.loader_seen_by_initializer = self.base.loader().is_some()
            && self.base.state() == PluginState::Injected;
        Ok(())
    }
}

impl Greeter for Alpha {
    fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    fn greeting(&self) -> String {
        format!("alpha #{}", self.observed_id)
    }
}

pub fn alpha_descriptor() -> PluginDescriptor {
    PluginDescriptor::builder::<Alpha>()
        .with_initializer()
        .capability::<dyn Greeter>(|plugin| plugin)
        .discoverable()
        .build()
}

/// Second greeter, used where two subtypes are needed
#[derive(Debug, Default)]
pub struct Bravo {
    base: PluginBase,
    pub id: u32,
    pub observed_id: u32,
}

impl Plugin for Bravo {
    crate::impl_plugin_base!(base);
}

impl Initialize for Bravo {
    fn initialize(&mut self) -> CallbackResult {
        self.observed_id = self.id;
        Ok(())
    }
}

impl Greeter for Bravo {
    fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    fn greeting(&self) -> String {
        format!("bravo #{}", self.observed_id)
    }
}

pub fn bravo_descriptor() -> PluginDescriptor {
    PluginDescriptor::builder::<Bravo>()
        .with_initializer()
        .capability::<dyn Greeter>(|plugin| plugin)
        .discoverable()
        .build()
}

/// Discoverable, but not a greeter
#[derive(Debug, Default)]
pub struct Delta {
    base: PluginBase,
    pub initialized: bool,
}

impl Plugin for Delta {
    crate::impl_plugin_base!(base);
}

impl Initialize for Delta {
    fn initialize(&mut self) -> CallbackResult {
        self.initialized = true;
        Ok(())
    }
}

pub fn delta_descriptor() -> PluginDescriptor {
    PluginDescriptor::builder::<Delta>().with_initializer().discoverable().build()
}

/// Has no no-argument initializer
#[derive(Debug, Default)]
pub struct NoInit {
    base: PluginBase,
}

impl Plugin for NoInit {
    crate::impl_plugin_base!(base);
}

pub fn no_init_descriptor() -> PluginDescriptor {
    PluginDescriptor::builder::<NoInit>().discoverable().build()
}

/// Stands in for an abstract base type
#[derive(Debug, Default)]
pub struct AbstractBase {
    base: PluginBase,
}

impl Plugin for AbstractBase {
    crate::impl_plugin_base!(base);
}

impl Initialize for AbstractBase {
    fn initialize(&mut self) -> CallbackResult {
        Ok(())
    }
}

pub fn abstract_descriptor() -> PluginDescriptor {
    PluginDescriptor::builder::<AbstractBase>()
        .with_initializer()
        .mark_abstract()
        .discoverable()
        .build()
}

/// Constructible but never marked discoverable
#[derive(Debug, Default)]
pub struct Hidden {
    base: PluginBase,
}

impl Plugin for Hidden {
    crate::impl_plugin_base!(base);
}

impl Initialize for Hidden {
    fn initialize(&mut self) -> CallbackResult {
        Ok(())
    }
}

pub fn hidden_descriptor() -> PluginDescriptor {
    PluginDescriptor::new::<Hidden>()
}

/// Greeter whose initializer always fails
#[derive(Debug, Default)]
pub struct Faulty {
    base: PluginBase,
    id: u32,
}

impl Plugin for Faulty {
    crate::impl_plugin_base!(base);
}

impl Initialize for Faulty {
    fn initialize(&mut self) -> CallbackResult {
        Err(format!("faulty plugin refuses to start (id {})", self.id).into())
    }
}

impl Greeter for Faulty {
    fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    fn greeting(&self) -> String {
        "never".to_string()
    }
}

pub fn faulty_descriptor() -> PluginDescriptor {
    PluginDescriptor::builder::<Faulty>()
        .with_initializer()
        .capability::<dyn Greeter>(|plugin| plugin)
        .discoverable()
        .build()
}

/// Release hook that forgets to unload
#[derive(Debug, Default)]
pub struct Forgetful {
    base: PluginBase,
    pub release_counter: Option<Arc<AtomicUsize>>,
}

impl Plugin for Forgetful {
    crate::impl_plugin_base!(base);

    fn release(&self) {
        if let Some(counter) = &self.release_counter {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Initialize for Forgetful {
    fn initialize(&mut self) -> CallbackResult {
        Ok(())
    }
}

/// Release hook that calls back into the loader for its own identity
#[derive(Debug, Default)]
pub struct Echo {
    base: PluginBase,
    pub release_counter: Option<Arc<AtomicUsize>>,
}

impl Plugin for Echo {
    crate::impl_plugin_base!(base);

    fn release(&self) {
        if let Some(counter) = &self.release_counter {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        if let (Some(loader), Some(identity)) = (
            self.base().loader().and_then(|handle| handle.upgrade()),
            self.base().identity(),
        ) {
            loader.unload(identity);
        }
        self.base().request_unload();
    }
}

impl Initialize for Echo {
    fn initialize(&mut self) -> CallbackResult {
        Ok(())
    }
}

/// Release hook that records whether it still saw itself loaded
#[derive(Debug, Default)]
pub struct Witness {
    base: PluginBase,
    pub saw_itself_loaded: Arc<AtomicBool>,
}

impl Plugin for Witness {
    crate::impl_plugin_base!(base);

    fn release(&self) {
        if let (Some(loader), Some(identity)) = (
            self.base().loader().and_then(|handle| handle.upgrade()),
            self.base().identity(),
        ) {
            self.saw_itself_loaded
                .store(loader.is_loaded(identity), Ordering::SeqCst);
        }
        self.base().request_unload();
    }
}

impl Initialize for Witness {
    fn initialize(&mut self) -> CallbackResult {
        Ok(())
    }
}

/// Release hook that panics
#[derive(Debug, Default)]
pub struct Volatile {
    base: PluginBase,
}

impl Plugin for Volatile {
    crate::impl_plugin_base!(base);

    fn release(&self) {
        panic!("volatile plugin exploded during release");
    }
}

impl Initialize for Volatile {
    fn initialize(&mut self) -> CallbackResult {
        Ok(())
    }
}

/// One distinct plugin type per `N`, for tests that need many identities
#[derive(Debug, Default)]
pub struct Numbered<const N: usize> {
    base: PluginBase,
    pub release_counter: Option<Arc<AtomicUsize>>,
}

impl<const N: usize> Plugin for Numbered<N> {
    crate::impl_plugin_base!(base);

    fn release(&self) {
        if let Some(counter) = &self.release_counter {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        self.base().request_unload();
    }
}

impl<const N: usize> Initialize for Numbered<N> {
    fn initialize(&mut self) -> CallbackResult {
        Ok(())
    }
}

impl<const N: usize> Tracked for Numbered<N> {
    fn track(&mut self, counter: Arc<AtomicUsize>) {
        self.release_counter = Some(counter);
    }
}

fn numbered_descriptor<const N: usize>() -> PluginDescriptor {
    PluginDescriptor::builder::<Numbered<N>>()
        .with_initializer()
        .capability::<dyn Tracked>(|plugin| plugin)
        .discoverable()
        .build()
}

pub fn numbered_descriptors() -> Vec<PluginDescriptor> {
    vec![
        numbered_descriptor::<0>(),
        numbered_descriptor::<1>(),
        numbered_descriptor::<2>(),
        numbered_descriptor::<3>(),
        numbered_descriptor::<4>(),
        numbered_descriptor::<5>(),
        numbered_descriptor::<6>(),
        numbered_descriptor::<7>(),
    ]
}

/// Pre-init callback helper attaching a shared release counter
pub fn counted(counter: Arc<AtomicUsize>) -> impl FnMut(&mut Alpha) -> CallbackResult {
    move |plugin: &mut Alpha| {
        plugin.release_counter = Some(Arc::clone(&counter));
        Ok(())
    }
}
