use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::plugin_system::error::CallbackResult;
use crate::plugin_system::traits::{Initialize, Plugin};

/// Stable token distinguishing one plugin type from another.
///
/// Equality and hashing only consider the [`TypeId`]; the type name is kept
/// for display and logging.
#[derive(Clone, Copy)]
pub struct TypeIdentity {
    id: TypeId,
    name: &'static str,
}

impl TypeIdentity {
    /// Identity of `T`
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeIdentity {}

impl Hash for TypeIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeIdentity({})", self.name)
    }
}

impl fmt::Display for TypeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A base capability a plugin type may satisfy, usually a trait object type
/// (`Capability::of::<dyn Greeter>()`) or a concrete plugin type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Capability(TypeIdentity);

impl Capability {
    pub fn of<C: ?Sized + 'static>() -> Self {
        Self(TypeIdentity::of::<C>())
    }

    pub fn identity(&self) -> TypeIdentity {
        self.0
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Erased view of a plugin instance as capability `C`.
trait CapabilityCast<C: ?Sized> {
    fn cast<'a>(&self, plugin: &'a mut dyn Plugin) -> Option<&'a mut C>;
}

type CastFor<C> = Box<dyn CapabilityCast<C> + Send + Sync>;

struct Upcast<T, C: ?Sized> {
    upcast: fn(&mut T) -> &mut C,
}

impl<T: Plugin, C: ?Sized + 'static> CapabilityCast<C> for Upcast<T, C> {
    fn cast<'a>(&self, plugin: &'a mut dyn Plugin) -> Option<&'a mut C> {
        plugin.as_any_mut().downcast_mut::<T>().map(self.upcast)
    }
}

fn reflexive<T>(plugin: &mut T) -> &mut T {
    plugin
}

fn allocate_erased<T: Plugin + Default>() -> Box<dyn Plugin> {
    Box::new(T::default())
}

fn initialize_erased<T: Plugin + Initialize>(plugin: &mut dyn Plugin) -> CallbackResult {
    match plugin.as_any_mut().downcast_mut::<T>() {
        Some(typed) => typed.initialize(),
        None => Err(format!("initializer for '{}' received a foreign instance", type_name::<T>()).into()),
    }
}

pub(crate) type AllocateFn = fn() -> Box<dyn Plugin>;
pub(crate) type InitializerFn = fn(&mut dyn Plugin) -> CallbackResult;

/// Describes a constructible plugin type.
///
/// Construction is split in two: `allocate` produces the zero state of the
/// type (its `Default`) without running any user logic, and the optional
/// no-argument initializer runs user logic on that already-allocated
/// instance. The loader injects its context between the two steps.
#[derive(Clone)]
pub struct PluginDescriptor {
    identity: TypeIdentity,
    is_abstract: bool,
    discoverable: bool,
    allocate: AllocateFn,
    initializer: Option<InitializerFn>,
    capabilities: Arc<HashMap<Capability, Arc<dyn Any + Send + Sync>>>,
}

impl PluginDescriptor {
    /// Descriptor for a type with a no-argument initializer.
    pub fn new<T: Plugin + Default + Initialize>() -> Self {
        Self::builder::<T>().with_initializer().build()
    }

    /// Descriptor for a type that can be allocated but has no initializer.
    pub fn without_initializer<T: Plugin + Default>() -> Self {
        Self::builder::<T>().build()
    }

    pub fn builder<T: Plugin + Default>() -> DescriptorBuilder<T> {
        let descriptor = PluginDescriptor {
            identity: TypeIdentity::of::<T>(),
            is_abstract: false,
            discoverable: false,
            allocate: allocate_erased::<T>,
            initializer: None,
            capabilities: Arc::new(HashMap::new()),
        };
        DescriptorBuilder {
            descriptor,
            _marker: PhantomData,
        }
        .capability::<T>(reflexive::<T>)
    }

    pub fn identity(&self) -> TypeIdentity {
        self.identity
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// Whether the type carries the discoverability marker
    pub fn is_discoverable(&self) -> bool {
        self.discoverable
    }

    pub fn has_initializer(&self) -> bool {
        self.initializer.is_some()
    }

    /// Whether the described type is-a `capability`
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains_key(&capability)
    }

    pub fn is_subtype_of<C: ?Sized + 'static>(&self) -> bool {
        self.supports(Capability::of::<C>())
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        self.capabilities.keys().copied().collect()
    }

    /// View an instance of the described type as capability `C`.
    ///
    /// Returns `None` if the type does not declare `C` or if `plugin` is not an
    /// instance of the described type.
    pub fn cast<'a, C: ?Sized + 'static>(&self, plugin: &'a mut dyn Plugin) -> Option<&'a mut C> {
        self.capabilities
            .get(&Capability::of::<C>())
            .and_then(|entry| entry.downcast_ref::<CastFor<C>>())
            .and_then(|caster| caster.cast(plugin))
    }

    pub(crate) fn allocate(&self) -> Box<dyn Plugin> {
        (self.allocate)()
    }

    pub(crate) fn initializer(&self) -> Option<InitializerFn> {
        self.initializer
    }
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("identity", &self.identity)
            .field("is_abstract", &self.is_abstract)
            .field("discoverable", &self.discoverable)
            .field("has_initializer", &self.has_initializer())
            .field("capabilities", &self.capabilities.keys().map(|c| c.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Typed builder for [`PluginDescriptor`].
pub struct DescriptorBuilder<T> {
    descriptor: PluginDescriptor,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Plugin + Default> DescriptorBuilder<T> {
    /// Declare that `T` is-a `C`, with the upcast used to view instances as `C`.
    pub fn capability<C: ?Sized + 'static>(mut self, upcast: fn(&mut T) -> &mut C) -> Self {
        let caster: CastFor<C> = Box::new(Upcast { upcast });
        Arc::make_mut(&mut self.descriptor.capabilities)
            .insert(Capability::of::<C>(), Arc::new(caster));
        self
    }

    /// Apply the discoverability marker.
    pub fn discoverable(mut self) -> Self {
        self.descriptor.discoverable = true;
        self
    }

    /// Mark the type as abstract: it is described but never instantiated.
    pub fn mark_abstract(mut self) -> Self {
        self.descriptor.is_abstract = true;
        self
    }

    pub fn build(self) -> PluginDescriptor {
        self.descriptor
    }
}

impl<T: Plugin + Default + Initialize> DescriptorBuilder<T> {
    /// Use `T`'s [`Initialize`] implementation as the no-argument initializer.
    pub fn with_initializer(mut self) -> Self {
        self.descriptor.initializer = Some(initialize_erased::<T>);
        self
    }
}
