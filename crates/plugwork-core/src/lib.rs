pub mod config;
pub mod plugin_system;

// Re-export key public types/traits for easier use by plugin crates
pub use config::{BatchPolicy, LoaderConfig};
pub use plugin_system::error::{LoaderError, Result};
pub use plugin_system::{
    Capability, CatalogSource, Dispose, Initialize, Plugin, PluginBase, PluginDescriptor, PluginLoader,
    PluginState, StaticSource, TypeIdentity,
};
