//! Entry point contract validation.
//!
//! A resolved entry symbol starts out as an [`UnverifiedEntry`]: an address
//! plus whatever signature descriptor the module exported. The only way to
//! obtain a callable [`VerifiedEntry`] is [`UnverifiedEntry::verify`], which
//! compares the descriptor with the host's expected contract and refuses on
//! any difference.

use std::fmt::{self, Display, Formatter};
use std::marker::PhantomData;

use tollgate_plugin_sdk::signature::{DeclaredSignature, EntrySignature, PluginInitFn};
use tollgate_plugin_sdk::{
    PluginResult, Registrar, SignatureError, ENTRY_POINT_SYMBOL, SIGNATURE_SYMBOL,
};

use super::image::{ModuleImage, SymbolAddr};

/// One difference between a module's declared entry signature and the
/// host's expected one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    /// The module exports no signature descriptor at all.
    MissingDescriptor { symbol: &'static str },

    /// The descriptor could not be read.
    UnreadableDescriptor(SignatureError),

    /// Wrong number of parameters.
    ParamCount { expected: usize, found: usize },

    /// Parameter at `index` has the wrong type.
    ParamType {
        index: usize,
        expected: String,
        found: String,
    },

    /// Wrong number of results.
    ResultCount { expected: usize, found: usize },

    /// Result at `index` has the wrong type.
    ResultType {
        index: usize,
        expected: String,
        found: String,
    },

    /// The capability interface revision differs.
    CapabilityVersion { expected: u32, found: u32 },

    /// Built against another SDK version.
    SdkVersion { expected: String, found: String },

    /// Built by another compiler.
    RustcVersion { expected: String, found: String },
}

impl Display for Mismatch {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::MissingDescriptor { symbol } => {
                write!(f, "no `{symbol}` descriptor exported, contract cannot be verified")
            }
            Mismatch::UnreadableDescriptor(err) => write!(f, "unreadable descriptor: {err}"),
            Mismatch::ParamCount { expected, found } => {
                write!(f, "expected {expected} parameter(s), found {found}")
            }
            Mismatch::ParamType {
                index,
                expected,
                found,
            } => write!(f, "parameter {index}: expected `{expected}`, found `{found}`"),
            Mismatch::ResultCount { expected, found } => {
                write!(f, "expected {expected} result(s), found {found}")
            }
            Mismatch::ResultType {
                index,
                expected,
                found,
            } => write!(f, "result {index}: expected `{expected}`, found `{found}`"),
            Mismatch::CapabilityVersion { expected, found } => {
                write!(f, "capability interface v{found}, host provides v{expected}")
            }
            Mismatch::SdkVersion { expected, found } => {
                write!(f, "built against SDK {found}, host uses {expected}")
            }
            Mismatch::RustcVersion { expected, found } => {
                write!(f, "built by `{found}`, host built by `{expected}`")
            }
        }
    }
}

/// All reasons an entry point was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractViolation {
    /// The descriptor, when one could be read.
    pub declared: Option<DeclaredSignature>,

    /// Every difference found, never empty.
    pub mismatches: Vec<Mismatch>,
}

impl ContractViolation {
    /// Whether any mismatch satisfies `pred`.
    pub fn has(&self, pred: impl Fn(&Mismatch) -> bool) -> bool {
        self.mismatches.iter().any(pred)
    }
}

impl Display for ContractViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, mismatch) in self.mismatches.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{mismatch}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ContractViolation {}

/// Compare a declared signature with the expected one.
pub fn compare(declared: &DeclaredSignature, expected: &DeclaredSignature) -> Vec<Mismatch> {
    let mut mismatches = Vec::new();

    if declared.params.len() != expected.params.len() {
        mismatches.push(Mismatch::ParamCount {
            expected: expected.params.len(),
            found: declared.params.len(),
        });
    }
    for (index, (found, want)) in declared.params.iter().zip(&expected.params).enumerate() {
        if found != want {
            mismatches.push(Mismatch::ParamType {
                index,
                expected: want.clone(),
                found: found.clone(),
            });
        }
    }

    if declared.results.len() != expected.results.len() {
        mismatches.push(Mismatch::ResultCount {
            expected: expected.results.len(),
            found: declared.results.len(),
        });
    }
    for (index, (found, want)) in declared.results.iter().zip(&expected.results).enumerate() {
        if found != want {
            mismatches.push(Mismatch::ResultType {
                index,
                expected: want.clone(),
                found: found.clone(),
            });
        }
    }

    if declared.capability_version != expected.capability_version {
        mismatches.push(Mismatch::CapabilityVersion {
            expected: expected.capability_version,
            found: declared.capability_version,
        });
    }
    if declared.sdk_version != expected.sdk_version {
        mismatches.push(Mismatch::SdkVersion {
            expected: expected.sdk_version.clone(),
            found: declared.sdk_version.clone(),
        });
    }
    if declared.rustc_version != expected.rustc_version {
        mismatches.push(Mismatch::RustcVersion {
            expected: expected.rustc_version.clone(),
            found: declared.rustc_version.clone(),
        });
    }

    mismatches
}

/// A resolved entry symbol whose type has not been checked.
///
/// Borrows the image it came from so it cannot outlive the loaded code.
#[derive(Debug)]
pub struct UnverifiedEntry<'img> {
    entry: SymbolAddr,
    signature: Option<SymbolAddr>,
    signature_symbol: &'static str,
    _image: PhantomData<&'img ()>,
}

impl<'img> UnverifiedEntry<'img> {
    /// Pair an entry address with the (possibly absent) descriptor address
    /// found under `signature_symbol` in the same image.
    pub fn new(
        entry: SymbolAddr,
        signature: Option<SymbolAddr>,
        signature_symbol: &'static str,
    ) -> Self {
        Self {
            entry,
            signature,
            signature_symbol,
            _image: PhantomData,
        }
    }

    /// Look up the entry point and its descriptor in `image`.
    ///
    /// Returns `None` when the entry point is not exported.
    pub fn resolve(image: &'img dyn ModuleImage) -> Option<Self> {
        let entry = image.symbol(ENTRY_POINT_SYMBOL)?;
        Some(Self::new(
            entry,
            image.symbol(SIGNATURE_SYMBOL),
            SIGNATURE_SYMBOL,
        ))
    }

    /// Read the exported descriptor.
    pub fn declared(&self) -> Result<DeclaredSignature, Mismatch> {
        let addr = self.signature.ok_or(Mismatch::MissingDescriptor {
            symbol: self.signature_symbol,
        })?;
        // SAFETY: the address was exported by the module under the descriptor
        // symbol and stays mapped for 'img. `from_raw` checks the magic and
        // layout version before it reads the remaining fields.
        unsafe { DeclaredSignature::from_raw(addr.as_ptr() as *const EntrySignature) }
            .map_err(Mismatch::UnreadableDescriptor)
    }

    /// Check the entry against `expected`.
    ///
    /// Fails closed: a missing or unreadable descriptor is a violation.
    pub fn verify(
        self,
        expected: &DeclaredSignature,
    ) -> Result<VerifiedEntry<'img>, ContractViolation> {
        let declared = self.declared().map_err(|mismatch| ContractViolation {
            declared: None,
            mismatches: vec![mismatch],
        })?;

        let mismatches = compare(&declared, expected);
        if !mismatches.is_empty() {
            return Err(ContractViolation {
                declared: Some(declared),
                mismatches,
            });
        }

        Ok(VerifiedEntry {
            entry: self.entry,
            declared,
            _image: PhantomData,
        })
    }
}

/// An entry point whose descriptor matched the host contract.
#[derive(Debug)]
pub struct VerifiedEntry<'img> {
    entry: SymbolAddr,
    declared: DeclaredSignature,
    _image: PhantomData<&'img ()>,
}

impl<'img> VerifiedEntry<'img> {
    /// The signature the module declared.
    pub fn declared(&self) -> &DeclaredSignature {
        &self.declared
    }

    /// Call the entry point with the capability handle.
    pub fn invoke(&self, registrar: &mut dyn Registrar) -> PluginResult<()> {
        // SAFETY: the module declared exactly `PluginInitFn` with the same
        // SDK and compiler as the host, and the image is alive for 'img.
        let init = unsafe { std::mem::transmute::<*const (), PluginInitFn>(self.entry.as_ptr()) };
        init(registrar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_plugin_sdk::signature::{CAPABILITY_PARAM_TYPE, ENTRY_RESULT_TYPE};

    fn expected() -> DeclaredSignature {
        DeclaredSignature::expected()
    }

    #[test]
    fn test_identical_signature_has_no_mismatch() {
        assert!(compare(&expected(), &expected()).is_empty());
    }

    #[test]
    fn test_extra_parameter() {
        let mut declared = expected();
        declared.params.push("u32".into());

        let mismatches = compare(&declared, &expected());
        assert_eq!(
            mismatches,
            vec![Mismatch::ParamCount {
                expected: 1,
                found: 2
            }]
        );
    }

    #[test]
    fn test_wrong_parameter_type() {
        let mut declared = expected();
        declared.params[0] = "&mut dyn other::Registrar".into();

        let mismatches = compare(&declared, &expected());
        assert_eq!(
            mismatches,
            vec![Mismatch::ParamType {
                index: 0,
                expected: CAPABILITY_PARAM_TYPE.into(),
                found: "&mut dyn other::Registrar".into(),
            }]
        );
    }

    #[test]
    fn test_missing_result() {
        let mut declared = expected();
        declared.results.clear();

        let mismatches = compare(&declared, &expected());
        assert_eq!(
            mismatches,
            vec![Mismatch::ResultCount {
                expected: 1,
                found: 0
            }]
        );
    }

    #[test]
    fn test_all_mismatches_reported() {
        let mut declared = expected();
        declared.results = vec!["bool".into()];
        declared.capability_version += 1;
        declared.rustc_version = "rustc 0.0.0".into();

        let violation = ContractViolation {
            declared: Some(declared.clone()),
            mismatches: compare(&declared, &expected()),
        };
        assert_eq!(violation.mismatches.len(), 3);
        assert!(violation.has(|m| matches!(m, Mismatch::ResultType { .. })));
        assert!(violation.to_string().contains(ENTRY_RESULT_TYPE));
        assert!(violation.to_string().contains("; "));
    }

    #[test]
    fn test_missing_descriptor_fails_closed() {
        fn never(_: &mut dyn Registrar) -> PluginResult<()> {
            unreachable!("must not be called")
        }
        let entry = SymbolAddr::new(never as PluginInitFn as *const ()).unwrap();
        let violation = UnverifiedEntry::new(entry, None, "sig")
            .verify(&expected())
            .unwrap_err();
        assert_eq!(
            violation.mismatches,
            vec![Mismatch::MissingDescriptor { symbol: "sig" }]
        );
        assert!(violation.declared.is_none());
    }
}
