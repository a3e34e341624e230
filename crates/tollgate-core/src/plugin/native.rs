//! Native plugin loader for .so/.dylib/.dll files.

use libloading::Library;

use super::error::OpenError;
use super::image::{ModuleImage, ModuleOpener, SymbolAddr};
use super::policy::LoadPolicy;
use super::ModuleReference;

/// Opens plugin modules with the platform dynamic loader.
#[derive(Debug, Clone, Default)]
pub struct NativeOpener {
    policy: LoadPolicy,
}

impl NativeOpener {
    /// Create an opener enforcing `policy`.
    pub fn new(policy: LoadPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &LoadPolicy {
        &self.policy
    }
}

impl ModuleOpener for NativeOpener {
    fn open(&self, reference: &ModuleReference) -> Result<Box<dyn ModuleImage>, OpenError> {
        if let Some(name) = reference.linked_name() {
            return Err(OpenError::UnknownLinked(name.to_string()));
        }

        let path = reference.path();
        if !path.exists() {
            return Err(OpenError::NotFound(path.to_path_buf()));
        }
        self.policy.check(path)?;

        // SAFETY: loading a library runs its initializers. The path passed the
        // load policy; beyond that the host trusts its configured plugins.
        let library = unsafe { Library::new(path) }?;

        Ok(Box::new(NativeImage { library }))
    }
}

/// A loaded native library. Unloaded when dropped.
#[derive(Debug)]
pub struct NativeImage {
    library: Library,
}

impl ModuleImage for NativeImage {
    fn symbol(&self, name: &str) -> Option<SymbolAddr> {
        // SAFETY: the symbol is read as an untyped address. Typing it is left
        // to contract validation.
        let symbol = unsafe { self.library.get::<*const ()>(name.as_bytes()) }.ok()?;
        SymbolAddr::new(*symbol)
    }
}
