//! Plugin modules linked into the host binary.
//!
//! A linked module is addressed as `linked:<name>` and goes through the same
//! resolve, validate and invoke stages as a native library. Its "image" is a
//! symbol table built at registration time.

use std::collections::HashMap;

use tollgate_plugin_sdk::signature::{EntrySignature, PluginInitFn};
use tollgate_plugin_sdk::{ENTRY_POINT_SYMBOL, SIGNATURE_SYMBOL};

use super::error::OpenError;
use super::image::{ModuleImage, ModuleOpener, SymbolAddr};
use super::ModuleReference;

/// Descriptor for entry points compiled together with the host.
static LINKED_SIGNATURE: EntrySignature = EntrySignature::current();

/// Symbol table of a linked module.
#[derive(Debug, Clone, Default)]
pub struct LinkedImage {
    symbols: HashMap<String, SymbolAddr>,
}

impl LinkedImage {
    /// Image exporting `init` and the descriptor of this host build.
    pub fn new(init: PluginInitFn) -> Self {
        Self::empty()
            .with_entry(init)
            .with_signature(&LINKED_SIGNATURE)
    }

    /// Image exporting nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Export `init` under the entry point symbol.
    pub fn with_entry(self, init: PluginInitFn) -> Self {
        match SymbolAddr::new(init as *const ()) {
            Some(addr) => self.with_symbol(ENTRY_POINT_SYMBOL, addr),
            None => self,
        }
    }

    /// Export `signature` under the descriptor symbol.
    pub fn with_signature(self, signature: &'static EntrySignature) -> Self {
        match SymbolAddr::new(signature as *const EntrySignature as *const ()) {
            Some(addr) => self.with_symbol(SIGNATURE_SYMBOL, addr),
            None => self,
        }
    }

    /// Export an arbitrary address.
    pub fn with_symbol(mut self, name: impl Into<String>, addr: SymbolAddr) -> Self {
        self.symbols.insert(name.into(), addr);
        self
    }
}

impl ModuleImage for LinkedImage {
    fn symbol(&self, name: &str) -> Option<SymbolAddr> {
        self.symbols.get(name).copied()
    }
}

/// Opener for `linked:` references.
///
/// Anything else is handed to the fallback opener, if one is set.
#[derive(Default)]
pub struct LinkedOpener {
    modules: HashMap<String, LinkedImage>,
    fallback: Option<Box<dyn ModuleOpener>>,
}

impl LinkedOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a linked module under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, image: LinkedImage) -> &mut Self {
        self.modules.insert(name.into(), image);
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_module(mut self, name: impl Into<String>, image: LinkedImage) -> Self {
        self.register(name, image);
        self
    }

    /// Opener used for references that are not `linked:`.
    pub fn with_fallback(mut self, fallback: Box<dyn ModuleOpener>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Names of the registered linked modules, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl ModuleOpener for LinkedOpener {
    fn open(&self, reference: &ModuleReference) -> Result<Box<dyn ModuleImage>, OpenError> {
        match reference.linked_name() {
            Some(name) => self
                .modules
                .get(name)
                .map(|image| Box::new(image.clone()) as Box<dyn ModuleImage>)
                .ok_or_else(|| OpenError::UnknownLinked(name.to_string())),
            None => match &self.fallback {
                Some(fallback) => fallback.open(reference),
                None => Err(OpenError::NotFound(reference.path().to_path_buf())),
            },
        }
    }
}

impl std::fmt::Debug for LinkedOpener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkedOpener")
            .field("modules", &self.names())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
