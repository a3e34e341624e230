//! The plugin loading pass.

use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tollgate_plugin_sdk::signature::DeclaredSignature;
use tollgate_plugin_sdk::{PluginError, PluginResult, Registrar, ENTRY_POINT_SYMBOL, SIGNATURE_SYMBOL};
use tracing::{debug, error, info, warn};

use super::contract::{UnverifiedEntry, VerifiedEntry};
use super::error::LoadError;
use super::image::{ModuleImage, ModuleOpener};
use super::native::NativeOpener;
use super::policy::LoadPolicy;
use super::{ModuleReference, ModuleStage};

/// A module whose entry point has been invoked.
///
/// Its image is never unloaded: handlers the module registered point into
/// it and may outlive the loader.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub reference: ModuleReference,
    pub signature: DeclaredSignature,
    pub loaded_at: DateTime<Utc>,
    /// Whether the entry point returned `Ok`.
    pub initialized: bool,
}

/// Result of [`PluginLoader::inspect`].
#[derive(Debug, Serialize)]
pub struct ModuleInspection {
    pub reference: ModuleReference,
    /// Last stage reached. `Validated` means the module would be invoked.
    pub stage: ModuleStage,
    /// The exported descriptor, when it could be read.
    pub declared: Option<DeclaredSignature>,
    /// Why the module would be refused.
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<LoadError>,
}

impl ModuleInspection {
    pub fn is_compatible(&self) -> bool {
        self.error.is_none()
    }
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<LoadError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(err) => serializer.serialize_some(&error_chain(err)),
        None => serializer.serialize_none(),
    }
}

/// Render an error and its sources as one line.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

/// Loads plugin modules and hands them the host capability.
///
/// Each call to [`load_all`](Self::load_all) is an independent pass; the
/// loader keeps no state across passes other than the records of invoked
/// modules. Images opened by a pass are never unmapped, so the capability
/// handle keeps serving after the loader is dropped.
pub struct PluginLoader {
    opener: Box<dyn ModuleOpener>,
    expected: DeclaredSignature,
    loaded: Vec<LoadedModule>,
}

impl PluginLoader {
    /// Loader for native libraries under the default [`LoadPolicy`].
    pub fn new() -> Self {
        Self::with_policy(LoadPolicy::default())
    }

    /// Loader for native libraries under `policy`.
    pub fn with_policy(policy: LoadPolicy) -> Self {
        Self::with_opener(Box::new(NativeOpener::new(policy)))
    }

    /// Loader using a custom opener.
    pub fn with_opener(opener: Box<dyn ModuleOpener>) -> Self {
        Self {
            opener,
            expected: DeclaredSignature::expected(),
            loaded: Vec::new(),
        }
    }

    /// The entry contract modules are checked against.
    pub fn expected(&self) -> &DeclaredSignature {
        &self.expected
    }

    /// Modules invoked so far, in invocation order.
    pub fn loaded(&self) -> &[LoadedModule] {
        &self.loaded
    }

    /// Load every module in `modules`, in order, and invoke its entry point
    /// with `capability`.
    ///
    /// Stops at the first failure and returns it; later modules are not
    /// touched. Registrations made by modules invoked before the failure
    /// remain in `capability`: nothing is rolled back.
    ///
    /// No deduplication is done. Loading the same list twice invokes every
    /// entry point twice.
    pub fn load_all(
        &mut self,
        modules: &[ModuleReference],
        capability: &mut dyn Registrar,
    ) -> Result<(), LoadError> {
        if modules.is_empty() {
            debug!(category = "plugin", "No plugin modules to load");
            return Ok(());
        }

        info!(
            category = "plugin",
            count = modules.len(),
            "Loading plugin modules"
        );

        for (index, reference) in modules.iter().enumerate() {
            if let Err(err) = self.load_one(reference, capability) {
                error!(
                    category = "plugin",
                    module = %reference,
                    index,
                    stage = %err.stage(),
                    kind = err.kind(),
                    error = %error_chain(&err),
                    "Plugin loading aborted"
                );
                return Err(err);
            }
        }

        info!(
            category = "plugin",
            count = modules.len(),
            "All plugin modules loaded"
        );
        Ok(())
    }

    fn load_one(
        &mut self,
        reference: &ModuleReference,
        capability: &mut dyn Registrar,
    ) -> Result<(), LoadError> {
        let image = self.open(reference)?;
        // Registered handlers and their vtables live in the image.
        let image: &'static dyn ModuleImage = Box::leak(image);

        let entry = validate(image, reference, &self.expected)?;
        let outcome = invoke_guarded(&entry, capability);

        self.loaded.push(LoadedModule {
            reference: reference.clone(),
            signature: entry.declared().clone(),
            loaded_at: Utc::now(),
            initialized: outcome.is_ok(),
        });

        match outcome {
            Ok(()) => {
                info!(category = "plugin", module = %reference, "Plugin module loaded");
                Ok(())
            }
            Err(source) => Err(LoadError::InitializationFailed {
                locator: reference.clone(),
                source,
            }),
        }
    }

    fn open(&self, reference: &ModuleReference) -> Result<Box<dyn ModuleImage>, LoadError> {
        debug!(category = "plugin", module = %reference, "Opening plugin module");
        let image = self
            .opener
            .open(reference)
            .map_err(|source| LoadError::ModuleOpen {
                locator: reference.clone(),
                source,
            })?;
        debug!(category = "plugin", module = %reference, stage = %ModuleStage::Opened);
        Ok(image)
    }

    /// Open, resolve and validate a module without invoking it.
    pub fn inspect(&self, reference: &ModuleReference) -> ModuleInspection {
        let mut inspection = ModuleInspection {
            reference: reference.clone(),
            stage: ModuleStage::Unopened,
            declared: None,
            error: None,
        };

        let image = match self.open(reference) {
            Ok(image) => image,
            Err(err) => {
                inspection.error = Some(err);
                return inspection;
            }
        };
        match validate(&*image, reference, &self.expected) {
            Ok(entry) => {
                inspection.stage = ModuleStage::Validated;
                inspection.declared = Some(entry.declared().clone());
            }
            Err(err) => {
                inspection.stage = err.stage();
                if let LoadError::SignatureMismatch { violation, .. } = &err {
                    inspection.declared = violation.declared.clone();
                }
                inspection.error = Some(err);
            }
        }
        inspection
    }
}

impl Default for PluginLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLoader")
            .field("expected", &self.expected)
            .field("loaded", &self.loaded)
            .finish_non_exhaustive()
    }
}

/// Resolve the entry point in `image` and check it against `expected`.
fn validate<'img>(
    image: &'img dyn ModuleImage,
    reference: &ModuleReference,
    expected: &DeclaredSignature,
) -> Result<VerifiedEntry<'img>, LoadError> {
    let entry =
        UnverifiedEntry::resolve(image).ok_or_else(|| LoadError::EntryPointNotFound {
            locator: reference.clone(),
            symbol: ENTRY_POINT_SYMBOL,
        })?;
    debug!(category = "plugin", module = %reference, stage = %ModuleStage::Resolved);

    let entry = entry.verify(expected).map_err(|violation| {
        warn!(
            category = "plugin",
            module = %reference,
            descriptor = SIGNATURE_SYMBOL,
            violation = %violation,
            "Refusing to invoke entry point"
        );
        LoadError::SignatureMismatch {
            locator: reference.clone(),
            symbol: ENTRY_POINT_SYMBOL,
            violation,
        }
    })?;
    debug!(category = "plugin", module = %reference, stage = %ModuleStage::Validated);

    Ok(entry)
}

/// Invoke the entry point, turning a panic into an initialization failure.
fn invoke_guarded(entry: &VerifiedEntry<'_>, capability: &mut dyn Registrar) -> PluginResult<()> {
    panic::catch_unwind(AssertUnwindSafe(|| entry.invoke(capability))).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(PluginError::InitializationFailed(format!(
            "entry point panicked: {message}"
        )))
    })
}
