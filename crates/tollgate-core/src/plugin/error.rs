//! Errors produced while loading plugin modules.

use std::path::PathBuf;

use tollgate_plugin_sdk::PluginError;

use super::contract::ContractViolation;
use super::policy::PolicyViolation;
use super::{ModuleReference, ModuleStage};

/// First failure of a loading pass.
///
/// Every variant names the module it happened in; the underlying cause is
/// available through [`std::error::Error::source`].
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The module's code image could not be loaded.
    #[error("failed to open plugin module `{locator}`")]
    ModuleOpen {
        locator: ModuleReference,
        #[source]
        source: OpenError,
    },

    /// The image does not export the initialization entry point.
    #[error("plugin module `{locator}` does not export entry point `{symbol}`")]
    EntryPointNotFound {
        locator: ModuleReference,
        symbol: &'static str,
    },

    /// The entry point does not match the host's calling contract. It was
    /// not invoked.
    #[error("entry point `{symbol}` of plugin module `{locator}` has an incompatible signature")]
    SignatureMismatch {
        locator: ModuleReference,
        symbol: &'static str,
        #[source]
        violation: ContractViolation,
    },

    /// The entry point ran and reported failure.
    #[error("plugin module `{locator}` failed to initialize")]
    InitializationFailed {
        locator: ModuleReference,
        #[source]
        source: PluginError,
    },
}

impl LoadError {
    /// The module the error belongs to.
    pub fn locator(&self) -> &ModuleReference {
        match self {
            LoadError::ModuleOpen { locator, .. }
            | LoadError::EntryPointNotFound { locator, .. }
            | LoadError::SignatureMismatch { locator, .. }
            | LoadError::InitializationFailed { locator, .. } => locator,
        }
    }

    /// The last stage the module reached before failing.
    pub fn stage(&self) -> ModuleStage {
        match self {
            LoadError::ModuleOpen { .. } => ModuleStage::Unopened,
            LoadError::EntryPointNotFound { .. } => ModuleStage::Opened,
            LoadError::SignatureMismatch { .. } => ModuleStage::Resolved,
            LoadError::InitializationFailed { .. } => ModuleStage::Validated,
        }
    }

    /// Short machine-readable kind, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::ModuleOpen { .. } => "module_open",
            LoadError::EntryPointNotFound { .. } => "entry_point_not_found",
            LoadError::SignatureMismatch { .. } => "signature_mismatch",
            LoadError::InitializationFailed { .. } => "initialization_failed",
        }
    }
}

/// Why a module image could not be opened.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    /// Nothing exists at the module path.
    #[error("module file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The path was rejected by the load policy.
    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    /// The dynamic loader rejected the file.
    #[error("dynamic loader error: {0}")]
    Library(#[from] libloading::Error),

    /// No linked module is registered under this name.
    #[error("no linked module named `{0}`")]
    UnknownLinked(String),
}
