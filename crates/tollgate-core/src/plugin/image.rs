//! Loaded module images and the openers that produce them.

use std::ptr::NonNull;

use super::error::OpenError;
use super::ModuleReference;

/// Address of an exported symbol inside a loaded image.
///
/// Carries no type. Only [`super::contract`] turns an address into something
/// callable, after the module's signature descriptor has been checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolAddr(NonNull<()>);

impl SymbolAddr {
    /// Wrap a raw address. Returns `None` for null.
    pub fn new(ptr: *const ()) -> Option<Self> {
        NonNull::new(ptr as *mut ()).map(Self)
    }

    /// The raw address.
    pub fn as_ptr(self) -> *const () {
        self.0.as_ptr() as *const ()
    }
}

/// A module whose code is loaded into the process.
///
/// The image keeps its code mapped for as long as it is alive; addresses it
/// returns are valid only while it is.
pub trait ModuleImage {
    /// Look up an exported symbol by name.
    fn symbol(&self, name: &str) -> Option<SymbolAddr>;
}

/// Turns a [`ModuleReference`] into a loaded [`ModuleImage`].
pub trait ModuleOpener {
    /// Load the module's code image.
    fn open(&self, reference: &ModuleReference) -> Result<Box<dyn ModuleImage>, OpenError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_symbol_rejected() {
        assert!(SymbolAddr::new(std::ptr::null()).is_none());
    }

    #[test]
    fn test_symbol_round_trip() {
        static VALUE: u32 = 7;
        let ptr = &VALUE as *const u32 as *const ();
        let addr = SymbolAddr::new(ptr).unwrap();
        assert_eq!(addr.as_ptr(), ptr);
    }
}
