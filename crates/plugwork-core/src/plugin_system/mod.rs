//! # Plugwork Plugin System
//!
//! This module is the loader core: it discovers candidate plugin types,
//! instantiates them under a two-phase construction protocol, tracks which
//! instances are active and tears them down deterministically.
//!
//! ## Key Submodules and Responsibilities:
//!
//! - **[`descriptor`]**: Type identities, capabilities and the
//!   [`PluginDescriptor`] that knows how to allocate and initialize a plugin type.
//! - **[`traits`]**: The [`Plugin`] contract, the embedded [`PluginBase`]
//!   carrying the loader back-reference, the [`Initialize`] hook and [`Dispose`].
//! - **[`discovery`]**: [`DiscoverySource`] bundles, the admission filter and
//!   the process-wide self-registration catalog.
//! - **[`registry`]**: The [`PluginRegistry`] of discovered-but-unloaded types.
//! - **[`active`]**: The [`ActiveSet`] of live instances.
//! - **[`loader`]**: The [`PluginLoader`] orchestrating all of the above.
//! - **[`error`]**: [`LoaderError`] and the callback error types.
//!
//! ## Lifecycle
//!
//! A type identity moves `Unknown -> Registered -> Active -> Removed` and never
//! returns from Active to Registered. An instance moves
//! `Allocated -> Injected -> Initialized -> Released`:
//!
//! 1. the descriptor allocates the zero state of the type,
//! 2. the loader injects its handle and the identity,
//! 3. an optional pre-construction callback configures the instance,
//! 4. the type's no-argument initializer runs, seeing what step 3 wrote.
pub mod active;
pub mod descriptor;
pub mod discovery;
pub mod error;
pub mod loader;
pub mod registry;
pub mod traits;

pub use active::{ActiveEntry, ActiveSet};
pub use descriptor::{Capability, DescriptorBuilder, PluginDescriptor, TypeIdentity};
pub use discovery::{CatalogEntry, CatalogSource, DiscoverySource, SkipReason, StaticSource};
pub use error::{CallbackError, CallbackResult, LoaderError};
pub use loader::{LoaderHandle, PluginLoader};
pub use registry::PluginRegistry;
pub use traits::{AsAny, Dispose, Initialize, Plugin, PluginBase, PluginState};
// Test module declaration
#[cfg(test)]
mod tests;
