//! # Plugwork Plugin System Errors
//!
//! Defines error types specific to the plugin loader.
//!
//! [`LoaderError`] is the primary enum returned by every fallible
//! [`PluginLoader`](crate::plugin_system::PluginLoader) operation. Errors raised
//! by plugin code itself (pre-construction callbacks and initializers) travel as
//! [`CallbackError`] and are wrapped unmodified as the `source` of
//! [`LoaderError::PreInitFailure`] or [`LoaderError::InitializerFailure`].
// crates/plugwork-core/src/plugin_system/error.rs
use crate::config::ConfigError;
use crate::plugin_system::descriptor::TypeIdentity;

/// Error type raised by plugin-supplied code (pre-init callbacks, initializers).
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of plugin-supplied code.
pub type CallbackResult = std::result::Result<(), CallbackError>;

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("Plugin '{identity}' has already been loaded")]
    AlreadyLoaded { identity: TypeIdentity },

    #[error("Plugin '{identity}' does not provide a no-argument initializer")]
    NoDefaultInitializer { identity: TypeIdentity },

    #[error("Plugin '{identity}' is abstract and cannot be instantiated")]
    AbstractType { identity: TypeIdentity },

    #[error("Plugin '{identity}' is not registered")]
    NotRegistered { identity: TypeIdentity },

    #[error("Pre-construction callback failed for plugin '{identity}': {source}")]
    PreInitFailure {
        identity: TypeIdentity,
        #[source]
        source: CallbackError,
    },

    #[error("Initializer failed for plugin '{identity}': {source}")]
    InitializerFailure {
        identity: TypeIdentity,
        #[source]
        source: CallbackError,
    },

    #[error("Plugin '{identity}' is not an instance of '{expected}'")]
    TypeMismatch {
        identity: TypeIdentity,
        expected: &'static str,
    },

    #[error("Batch load finished with {} failure(s) ({} plugin(s) loaded)", failures.len(), loaded.len())]
    BatchLoad {
        loaded: Vec<TypeIdentity>,
        failures: Vec<(TypeIdentity, LoaderError)>,
    },

    #[error("Loader configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl LoaderError {
    /// The plugin identity the error refers to, if it concerns a single plugin.
    pub fn identity(&self) -> Option<TypeIdentity> {
        match self {
            LoaderError::AlreadyLoaded { identity }
            | LoaderError::NoDefaultInitializer { identity }
            | LoaderError::AbstractType { identity }
            | LoaderError::NotRegistered { identity }
            | LoaderError::PreInitFailure { identity, .. }
            | LoaderError::InitializerFailure { identity, .. }
            | LoaderError::TypeMismatch { identity, .. } => Some(*identity),
            LoaderError::BatchLoad { .. } | LoaderError::Config(_) => None,
        }
    }
}

/// Shorthand for Result with the loader's error type
pub type Result<T> = std::result::Result<T, LoaderError>;
