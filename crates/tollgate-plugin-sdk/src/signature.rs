//! Entry point signature descriptor.
//!
//! A symbol looked up in a shared library carries no type information, so a
//! plugin exports, next to its entry point, a plain-data [`EntrySignature`]
//! describing the entry point's calling contract. The host reads and checks
//! the descriptor before it treats the entry symbol as a [`PluginInitFn`].
//!
//! The descriptor only holds integers and `(pointer, length)` string pairs,
//! so the host can read it safely even when the plugin was built against an
//! incompatible revision of this crate. Use [`export_plugin!`](crate::export_plugin)
//! to emit both symbols; the macro derives the descriptor from the same
//! function type it exports.

use std::fmt::{self, Display, Formatter};

use serde::Serialize;

use crate::capability::{Registrar, CAPABILITY_VERSION};
use crate::error::PluginResult;

/// Name of the exported initialization entry point.
pub const ENTRY_POINT_SYMBOL: &str = "tollgate_plugin_init";

/// Name of the exported [`EntrySignature`] static.
pub const SIGNATURE_SYMBOL: &str = "tollgate_plugin_signature";

/// First field of every descriptor (`"TGSG"` little-endian).
pub const SIGNATURE_MAGIC: u32 = u32::from_le_bytes(*b"TGSG");

/// Layout revision of [`EntrySignature`].
pub const SIGNATURE_ABI_VERSION: u32 = 1;

/// Maximum number of parameter or result types a descriptor can list.
pub const MAX_ENTRY_TYPES: usize = 4;

/// Declared type of the entry point's only parameter.
pub const CAPABILITY_PARAM_TYPE: &str = "&mut dyn tollgate_plugin_sdk::Registrar";

/// Declared type of the entry point's only result.
pub const ENTRY_RESULT_TYPE: &str = "Result<(), tollgate_plugin_sdk::PluginError>";

/// Version of this crate, compiled into host and plugins alike.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// `rustc --version` of the compiler that built this crate.
pub const RUSTC_VERSION: &str = env!("TOLLGATE_RUSTC_VERSION");

/// Type of the initialization entry point.
pub type PluginInitFn = fn(&mut dyn Registrar) -> PluginResult<()>;

/// Borrowed UTF-8 string laid out as `(pointer, length)`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawStr {
    pub ptr: *const u8,
    pub len: usize,
}

impl RawStr {
    /// Unused slot
    pub const EMPTY: RawStr = RawStr {
        ptr: std::ptr::null(),
        len: 0,
    };

    /// Point at a static string.
    pub const fn new(s: &'static str) -> Self {
        Self {
            ptr: s.as_ptr(),
            len: s.len(),
        }
    }

    /// Copy the string out.
    ///
    /// # Safety
    /// `ptr` must be null or point to `len` readable bytes.
    unsafe fn to_owned_string(self, field: &'static str) -> Result<String, SignatureError> {
        if self.ptr.is_null() {
            if self.len == 0 {
                return Ok(String::new());
            }
            return Err(SignatureError::InvalidString(field));
        }
        let bytes = std::slice::from_raw_parts(self.ptr, self.len);
        String::from_utf8(bytes.to_vec()).map_err(|_| SignatureError::InvalidString(field))
    }
}

/// Plain-data description of an entry point's calling contract.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EntrySignature {
    /// Must equal [`SIGNATURE_MAGIC`]
    pub magic: u32,

    /// Must equal [`SIGNATURE_ABI_VERSION`]
    pub abi_version: u32,

    /// Number of used slots in `params`
    pub param_count: u32,

    /// Number of used slots in `results`
    pub result_count: u32,

    /// Parameter type names
    pub params: [RawStr; MAX_ENTRY_TYPES],

    /// Result type names
    pub results: [RawStr; MAX_ENTRY_TYPES],

    /// [`CAPABILITY_VERSION`] the plugin was built against
    pub capability_version: u32,

    /// [`SDK_VERSION`] the plugin was built against
    pub sdk_version: RawStr,

    /// [`RUSTC_VERSION`] of the plugin's compiler
    pub rustc_version: RawStr,
}

// Only ever points at `'static` string data.
unsafe impl Sync for EntrySignature {}
unsafe impl Send for EntrySignature {}

impl EntrySignature {
    /// Descriptor of [`PluginInitFn`] as compiled into this crate.
    pub const fn current() -> Self {
        let e = RawStr::EMPTY;
        let params = [RawStr::new(CAPABILITY_PARAM_TYPE), e, e, e];
        let results = [RawStr::new(ENTRY_RESULT_TYPE), e, e, e];

        Self {
            magic: SIGNATURE_MAGIC,
            abi_version: SIGNATURE_ABI_VERSION,
            param_count: 1,
            result_count: 1,
            params,
            results,
            capability_version: CAPABILITY_VERSION,
            sdk_version: RawStr::new(SDK_VERSION),
            rustc_version: RawStr::new(RUSTC_VERSION),
        }
    }

    /// Replace the declared parameter list.
    ///
    /// Panics if more than [`MAX_ENTRY_TYPES`] are given.
    pub fn with_params(mut self, params: &[&'static str]) -> Self {
        assert!(params.len() <= MAX_ENTRY_TYPES, "too many parameter types");
        self.params = [RawStr::EMPTY; MAX_ENTRY_TYPES];
        for (slot, ty) in self.params.iter_mut().zip(params) {
            *slot = RawStr::new(*ty);
        }
        self.param_count = params.len() as u32;
        self
    }

    /// Replace the declared result list.
    ///
    /// Panics if more than [`MAX_ENTRY_TYPES`] are given.
    pub fn with_results(mut self, results: &[&'static str]) -> Self {
        assert!(results.len() <= MAX_ENTRY_TYPES, "too many result types");
        self.results = [RawStr::EMPTY; MAX_ENTRY_TYPES];
        for (slot, ty) in self.results.iter_mut().zip(results) {
            *slot = RawStr::new(*ty);
        }
        self.result_count = results.len() as u32;
        self
    }

    /// Replace the declared capability interface version.
    pub fn with_capability_version(mut self, version: u32) -> Self {
        self.capability_version = version;
        self
    }

    /// Replace the declared SDK version.
    pub fn with_sdk_version(mut self, version: &'static str) -> Self {
        self.sdk_version = RawStr::new(version);
        self
    }

    /// Replace the declared compiler version.
    pub fn with_rustc_version(mut self, version: &'static str) -> Self {
        self.rustc_version = RawStr::new(version);
        self
    }
}

impl Default for EntrySignature {
    fn default() -> Self {
        Self::current()
    }
}

/// Owned copy of a descriptor, readable without `unsafe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeclaredSignature {
    pub abi_version: u32,
    pub params: Vec<String>,
    pub results: Vec<String>,
    pub capability_version: u32,
    pub sdk_version: String,
    pub rustc_version: String,
}

impl DeclaredSignature {
    /// The contract this build of the crate expects.
    pub fn expected() -> Self {
        Self {
            abi_version: SIGNATURE_ABI_VERSION,
            params: vec![CAPABILITY_PARAM_TYPE.to_string()],
            results: vec![ENTRY_RESULT_TYPE.to_string()],
            capability_version: CAPABILITY_VERSION,
            sdk_version: SDK_VERSION.to_string(),
            rustc_version: RUSTC_VERSION.to_string(),
        }
    }

    /// Parse a raw descriptor.
    ///
    /// The magic and layout version are checked before any other field is
    /// touched.
    ///
    /// # Safety
    /// `raw` must point to readable memory at least the size of
    /// [`EntrySignature`] and its string fields must be null or valid for
    /// their length.
    pub unsafe fn from_raw(raw: *const EntrySignature) -> Result<Self, SignatureError> {
        if raw.is_null() {
            return Err(SignatureError::Null);
        }

        let magic = std::ptr::read_unaligned(std::ptr::addr_of!((*raw).magic));
        if magic != SIGNATURE_MAGIC {
            return Err(SignatureError::BadMagic(magic));
        }
        let abi_version = std::ptr::read_unaligned(std::ptr::addr_of!((*raw).abi_version));
        if abi_version != SIGNATURE_ABI_VERSION {
            return Err(SignatureError::UnsupportedVersion {
                expected: SIGNATURE_ABI_VERSION,
                found: abi_version,
            });
        }

        let raw = &*raw;
        let params = read_types(&raw.params, raw.param_count, "params")?;
        let results = read_types(&raw.results, raw.result_count, "results")?;

        Ok(Self {
            abi_version,
            params,
            results,
            capability_version: raw.capability_version,
            sdk_version: raw.sdk_version.to_owned_string("sdk_version")?,
            rustc_version: raw.rustc_version.to_owned_string("rustc_version")?,
        })
    }
}

unsafe fn read_types(
    slots: &[RawStr; MAX_ENTRY_TYPES],
    count: u32,
    field: &'static str,
) -> Result<Vec<String>, SignatureError> {
    let count = count as usize;
    if count > MAX_ENTRY_TYPES {
        return Err(SignatureError::TooManyTypes { field, count });
    }
    slots[..count]
        .iter()
        .map(|slot| unsafe { slot.to_owned_string(field) })
        .collect()
}

impl Display for DeclaredSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let results = match self.results.as_slice() {
            [] => "()".to_string(),
            [single] => single.clone(),
            many => format!("({})", many.join(", ")),
        };
        write!(
            f,
            "fn({}) -> {} [capability v{}, sdk {}, {}]",
            self.params.join(", "),
            results,
            self.capability_version,
            self.sdk_version,
            self.rustc_version
        )
    }
}

/// Descriptor parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("signature descriptor pointer is null")]
    Null,

    #[error("not a signature descriptor (magic {0:#010x})")]
    BadMagic(u32),

    #[error("unsupported descriptor layout: expected v{expected}, found v{found}")]
    UnsupportedVersion { expected: u32, found: u32 },

    #[error("descriptor lists {count} {field}, at most {max} are allowed", max = MAX_ENTRY_TYPES)]
    TooManyTypes { field: &'static str, count: usize },

    #[error("invalid string in descriptor field '{0}'")]
    InvalidString(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_round_trips_to_expected() {
        let raw = EntrySignature::current();
        let declared = unsafe { DeclaredSignature::from_raw(&raw) }.unwrap();
        assert_eq!(declared, DeclaredSignature::expected());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut raw = EntrySignature::current();
        raw.magic = 0xdead_beef;
        let err = unsafe { DeclaredSignature::from_raw(&raw) }.unwrap_err();
        assert_eq!(err, SignatureError::BadMagic(0xdead_beef));
    }

    #[test]
    fn test_unsupported_layout_rejected() {
        let mut raw = EntrySignature::current();
        raw.abi_version = 7;
        let err = unsafe { DeclaredSignature::from_raw(&raw) }.unwrap_err();
        assert_eq!(
            err,
            SignatureError::UnsupportedVersion {
                expected: SIGNATURE_ABI_VERSION,
                found: 7
            }
        );
    }

    #[test]
    fn test_oversized_count_rejected() {
        let mut raw = EntrySignature::current();
        raw.param_count = 9;
        let err = unsafe { DeclaredSignature::from_raw(&raw) }.unwrap_err();
        assert!(matches!(err, SignatureError::TooManyTypes { count: 9, .. }));
    }

    #[test]
    fn test_display() {
        let declared = DeclaredSignature {
            abi_version: 1,
            params: vec!["u32".into(), "u64".into()],
            results: vec![],
            capability_version: 1,
            sdk_version: "0.1.0".into(),
            rustc_version: "rustc 1.85.0".into(),
        };
        assert_eq!(
            declared.to_string(),
            "fn(u32, u64) -> () [capability v1, sdk 0.1.0, rustc 1.85.0]"
        );
    }
}
