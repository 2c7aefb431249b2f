//! Discovery sources: bundles of candidate plugin types.
//!
//! Plugins are made discoverable by explicit self-registration into a
//! process-wide catalog with [`register_plugin!`](crate::register_plugin),
//! which collects [`CatalogEntry`] values through `inventory`. A catalog bundle
//! plays the role of a compiled unit of plugin types; [`CatalogSource`] scans
//! one bundle (or all of them). [`StaticSource`] wraps an explicit list.
use std::fmt;

use crate::plugin_system::descriptor::PluginDescriptor;

pub use inventory;

/// A bundle of candidate plugin types.
pub trait DiscoverySource {
    /// Name used in log output
    fn name(&self) -> &str;

    /// Every candidate type in the bundle, admissible or not
    fn candidates(&self) -> Vec<PluginDescriptor>;
}

/// Why a candidate was not admitted to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Abstract,
    NotDiscoverable,
    NoDefaultInitializer,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Abstract => write!(f, "type is abstract"),
            SkipReason::NotDiscoverable => write!(f, "type is not marked discoverable"),
            SkipReason::NoDefaultInitializer => write!(f, "type has no no-argument initializer"),
        }
    }
}

/// Silent admission filter applied to every candidate during discovery.
pub fn admission(descriptor: &PluginDescriptor) -> Result<(), SkipReason> {
    if descriptor.is_abstract() {
        Err(SkipReason::Abstract)
    } else if !descriptor.is_discoverable() {
        Err(SkipReason::NotDiscoverable)
    } else if !descriptor.has_initializer() {
        Err(SkipReason::NoDefaultInitializer)
    } else {
        Ok(())
    }
}

/// An explicit list of candidates
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    name: String,
    descriptors: Vec<PluginDescriptor>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptors: Vec::new(),
        }
    }

    pub fn with(mut self, descriptor: PluginDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn push(&mut self, descriptor: PluginDescriptor) {
        self.descriptors.push(descriptor);
    }
}

impl DiscoverySource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn candidates(&self) -> Vec<PluginDescriptor> {
        self.descriptors.clone()
    }
}

impl DiscoverySource for Vec<PluginDescriptor> {
    fn name(&self) -> &str {
        "<list>"
    }

    fn candidates(&self) -> Vec<PluginDescriptor> {
        self.clone()
    }
}

/// One self-registered plugin type in the process-wide catalog.
pub struct CatalogEntry {
    bundle: &'static str,
    describe: fn() -> PluginDescriptor,
}

impl CatalogEntry {
    pub const fn new(bundle: &'static str, describe: fn() -> PluginDescriptor) -> Self {
        Self { bundle, describe }
    }

    pub fn bundle(&self) -> &'static str {
        self.bundle
    }

    pub fn describe(&self) -> PluginDescriptor {
        (self.describe)()
    }
}

inventory::collect!(CatalogEntry);

/// Scans the self-registration catalog.
#[derive(Debug, Clone)]
pub struct CatalogSource {
    bundle: Option<String>,
}

impl CatalogSource {
    /// Only entries registered under `bundle`
    pub fn bundle(bundle: impl Into<String>) -> Self {
        Self {
            bundle: Some(bundle.into()),
        }
    }

    /// Every entry in the catalog
    pub fn all() -> Self {
        Self { bundle: None }
    }

    /// Names of all bundles with at least one entry
    pub fn bundles() -> Vec<&'static str> {
        let mut bundles: Vec<&'static str> = inventory::iter::<CatalogEntry>
            .into_iter()
            .map(|entry| entry.bundle)
            .collect();
        bundles.sort_unstable();
        bundles.dedup();
        bundles
    }
}

impl DiscoverySource for CatalogSource {
    fn name(&self) -> &str {
        self.bundle.as_deref().unwrap_or("<catalog>")
    }

    fn candidates(&self) -> Vec<PluginDescriptor> {
        inventory::iter::<CatalogEntry>
            .into_iter()
            .filter(|entry| match &self.bundle {
                Some(bundle) => entry.bundle == bundle.as_str(),
                None => true,
            })
            .map(CatalogEntry::describe)
            .collect()
    }
}

/// Register a plugin descriptor in the process-wide catalog.
///
/// ```rust,ignore
/// register_plugin!("audio", PluginDescriptor::builder::<Mixer>().with_initializer().discoverable().build());
/// ```
///
/// Without a bundle name the registering crate's package name is used.
#[macro_export]
macro_rules! register_plugin {
    ($bundle:expr, $descriptor:expr $(,)?) => {
        const _: () = {
            fn __plugwork_describe() -> $crate::plugin_system::PluginDescriptor {
                $descriptor
            }
            $crate::plugin_system::discovery::inventory::submit! {
                $crate::plugin_system::discovery::CatalogEntry::new($bundle, __plugwork_describe)
            }
        };
    };
    ($descriptor:expr $(,)?) => {
        $crate::register_plugin!(env!("CARGO_PKG_NAME"), $descriptor);
    };
}
