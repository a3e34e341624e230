//! Plugin loading for Tollgate.
//!
//! Plugins are native libraries (.so on Linux, .dylib on macOS, .dll on
//! Windows) or modules linked into the host binary. Each one exports an
//! initialization entry point that receives the host's capability handle
//! ([`tollgate_plugin_sdk::Registrar`]) and registers routes, interceptors
//! and filters into it.
//!
//! ## Loading pass
//!
//! [`PluginLoader::load_all`] walks an ordered list of modules once. Every
//! module goes through four stages, in order, and the first failure ends the
//! pass:
//!
//! ```text
//! Unopened ──open──▶ Opened ──resolve──▶ Resolved ──validate──▶ Validated ──invoke──▶ Invoked
//!     │                 │                    │                      │
//!     ▼                 ▼                    ▼                      ▼
//! ModuleOpen    EntryPointNotFound    SignatureMismatch    InitializationFailed
//! ```
//!
//! The entry symbol is only turned into a callable function after its
//! exported signature descriptor has been checked against the host's
//! expected contract.

use std::fmt::{self, Display, Formatter};
use std::path::Path;

use serde::{Deserialize, Serialize};

pub mod contract;
pub mod error;
pub mod image;
pub mod linked;
pub mod loader;
pub mod native;
pub mod policy;

pub use contract::{ContractViolation, Mismatch, UnverifiedEntry, VerifiedEntry};
pub use error::{LoadError, OpenError};
pub use image::{ModuleImage, ModuleOpener, SymbolAddr};
pub use linked::{LinkedImage, LinkedOpener};
pub use loader::{LoadedModule, ModuleInspection, PluginLoader};
pub use native::{NativeImage, NativeOpener};
pub use policy::{LoadPolicy, PolicyViolation, PLATFORM_EXTENSIONS};

/// Locator prefix for modules linked into the host binary.
pub const LINKED_SCHEME: &str = "linked:";

/// Locator of a single plugin module.
///
/// Either a filesystem path to a native library or `linked:<name>` for a
/// module registered with a [`LinkedOpener`]. Two references are the same
/// module exactly when their locator strings are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleReference(String);

impl ModuleReference {
    /// Create a reference from a locator string.
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    /// Reference to a module linked into the host under `name`.
    pub fn linked(name: &str) -> Self {
        Self(format!("{LINKED_SCHEME}{name}"))
    }

    /// The locator string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the linked module, if this is a `linked:` locator.
    pub fn linked_name(&self) -> Option<&str> {
        self.0.strip_prefix(LINKED_SCHEME)
    }

    /// The locator interpreted as a filesystem path.
    pub fn path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl Display for ModuleReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ModuleReference {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ModuleReference {
    fn from(locator: &str) -> Self {
        Self::new(locator)
    }
}

impl From<String> for ModuleReference {
    fn from(locator: String) -> Self {
        Self(locator)
    }
}

impl From<&Path> for ModuleReference {
    fn from(path: &Path) -> Self {
        Self(path.to_string_lossy().into_owned())
    }
}

/// Stage a module has reached within a loading pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStage {
    Unopened,
    Opened,
    Resolved,
    Validated,
    Invoked,
}

impl Display for ModuleStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleStage::Unopened => "unopened",
            ModuleStage::Opened => "opened",
            ModuleStage::Resolved => "resolved",
            ModuleStage::Validated => "validated",
            ModuleStage::Invoked => "invoked",
        };
        f.write_str(name)
    }
}
