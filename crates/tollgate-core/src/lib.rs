//! Tollgate Core Library
//!
//! Host side of the Tollgate plugin system: the plugin loader, the module
//! openers and load policy, the capability registry plugins register into,
//! and configuration.
//!
//! ```no_run
//! use tollgate_core::{HostCapabilities, PluginLoader, TollgateConfig};
//!
//! let config = TollgateConfig::load(None)?;
//! let mut loader = PluginLoader::with_policy(config.plugins.policy.clone());
//! let mut host = HostCapabilities::new();
//! loader.load_all(&config.plugins.modules, &mut host)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod capability;
pub mod config;
pub mod plugin;

pub use capability::{HostCapabilities, RouteInfo};
pub use config::{ConfigError, PluginsConfig, TollgateConfig};
pub use plugin::{
    LinkedImage, LinkedOpener, LoadError, LoadPolicy, LoadedModule, ModuleInspection,
    ModuleReference, ModuleStage, NativeOpener, OpenError, PluginLoader,
};

/// Re-export of the plugin SDK.
pub use tollgate_plugin_sdk as sdk;

/// Tollgate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
