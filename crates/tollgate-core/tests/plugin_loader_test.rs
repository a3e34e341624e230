//! Plugin Loader Tests
//!
//! Drives `PluginLoader::load_all` over linked modules:
//! - Ordering and fail-fast behavior
//! - Each error kind and the stage it reports
//! - Signature validation before invocation
//! - Repeated loading passes

use std::error::Error as _;

use tollgate_core::plugin::{
    ContractViolation, LinkedImage, LinkedOpener, LoadError, Mismatch, ModuleReference,
    ModuleStage, OpenError, PluginLoader, SymbolAddr,
};
use tollgate_core::HostCapabilities;
use tollgate_plugin_sdk::signature::{
    EntrySignature, PluginInitFn, CAPABILITY_PARAM_TYPE, ENTRY_RESULT_TYPE,
};
use tollgate_plugin_sdk::{
    Filter, Interceptor, PluginError, PluginResult, ProxyRequest, Registrar, Route,
    SignatureError, ENTRY_POINT_SYMBOL, SIGNATURE_SYMBOL,
};

/// Registrar that records every call with its sequence index.
#[derive(Default)]
struct Recorder {
    calls: Vec<(usize, String)>,
}

impl Recorder {
    fn names(&self) -> Vec<&str> {
        self.calls.iter().map(|(_, n)| n.as_str()).collect()
    }

    fn record(&mut self, name: &str) {
        let index = self.calls.len();
        self.calls.push((index, name.to_string()));
    }
}

impl Registrar for Recorder {
    fn register_route(&mut self, route: Route) -> PluginResult<()> {
        self.record(&route.key());
        Ok(())
    }

    fn register_interceptor(
        &mut self,
        name: &str,
        _interceptor: Box<dyn Interceptor>,
    ) -> PluginResult<()> {
        self.record(name);
        Ok(())
    }

    fn register_filter(&mut self, name: &str, _filter: Box<dyn Filter>) -> PluginResult<()> {
        self.record(name);
        Ok(())
    }
}

fn allow_all(_: &ProxyRequest) -> bool {
    true
}

fn module_a(registrar: &mut dyn Registrar) -> PluginResult<()> {
    registrar.register_filter("a", Box::new(allow_all))
}

fn module_b(registrar: &mut dyn Registrar) -> PluginResult<()> {
    registrar.register_filter("b", Box::new(allow_all))
}

fn module_c(registrar: &mut dyn Registrar) -> PluginResult<()> {
    registrar.register_filter("c", Box::new(allow_all))
}

fn failing(registrar: &mut dyn Registrar) -> PluginResult<()> {
    registrar.register_filter("partial", Box::new(allow_all))?;
    Err(PluginError::InitializationFailed("missing upstream".into()))
}

/// Image exporting `init` with a custom descriptor.
fn with_descriptor(init: PluginInitFn, signature: EntrySignature) -> LinkedImage {
    LinkedImage::empty()
        .with_entry(init)
        .with_signature(Box::leak(Box::new(signature)))
}

fn loader() -> PluginLoader {
    static GARBAGE: [u8; 256] = [0; 256];
    let garbage = SymbolAddr::new(GARBAGE.as_ptr() as *const ()).unwrap();

    let opener = LinkedOpener::new()
        .with_module("a", LinkedImage::new(module_a))
        .with_module("b", LinkedImage::new(module_b))
        .with_module("c", LinkedImage::new(module_c))
        .with_module("failing", LinkedImage::new(failing))
        .with_module(
            "no-entry",
            LinkedImage::empty().with_signature(Box::leak(Box::new(EntrySignature::current()))),
        )
        .with_module("no-descriptor", LinkedImage::empty().with_entry(module_a))
        .with_module(
            "garbage-descriptor",
            LinkedImage::empty()
                .with_entry(module_a)
                .with_symbol(SIGNATURE_SYMBOL, garbage),
        )
        .with_module(
            "two-params",
            with_descriptor(
                module_a,
                EntrySignature::current().with_params(&[CAPABILITY_PARAM_TYPE, "u32"]),
            ),
        )
        .with_module(
            "wrong-param",
            with_descriptor(
                module_a,
                EntrySignature::current().with_params(&["&mut HashMap<String, String>"]),
            ),
        )
        .with_module(
            "wrong-result",
            with_descriptor(module_a, EntrySignature::current().with_results(&["()"])),
        )
        .with_module(
            "no-result",
            with_descriptor(module_a, EntrySignature::current().with_results(&[])),
        )
        .with_module(
            "old-capability",
            with_descriptor(module_a, EntrySignature::current().with_capability_version(0)),
        )
        .with_module(
            "other-rustc",
            with_descriptor(
                module_a,
                EntrySignature::current().with_rustc_version("rustc 1.0.0 (a59807d2d 2015-05-13)"),
            ),
        );

    PluginLoader::with_opener(Box::new(opener))
}

fn refs(names: &[&str]) -> Vec<ModuleReference> {
    names.iter().map(|n| ModuleReference::linked(n)).collect()
}

fn violation(err: LoadError) -> ContractViolation {
    match err {
        LoadError::SignatureMismatch {
            violation, symbol, ..
        } => {
            assert_eq!(symbol, ENTRY_POINT_SYMBOL);
            violation
        }
        other => panic!("expected SignatureMismatch, got {other}"),
    }
}

#[test]
fn test_empty_list_succeeds() {
    let mut loader = loader();
    let mut recorder = Recorder::default();

    loader.load_all(&[], &mut recorder).unwrap();

    assert!(recorder.calls.is_empty());
    assert!(loader.loaded().is_empty());
}

#[test]
fn test_modules_invoked_in_order() {
    let mut loader = loader();
    let mut recorder = Recorder::default();

    loader
        .load_all(&refs(&["c", "a", "b"]), &mut recorder)
        .unwrap();

    assert_eq!(
        recorder.calls,
        vec![(0, "c".to_string()), (1, "a".to_string()), (2, "b".to_string())]
    );
    let loaded: Vec<_> = loader.loaded().iter().map(|m| m.reference.clone()).collect();
    assert_eq!(loaded, refs(&["c", "a", "b"]));
}

#[test]
fn test_unknown_module_stops_pass() {
    let mut loader = loader();
    let mut recorder = Recorder::default();

    let err = loader
        .load_all(&refs(&["a", "missing", "b"]), &mut recorder)
        .unwrap_err();

    assert_eq!(err.locator(), &ModuleReference::linked("missing"));
    assert_eq!(err.stage(), ModuleStage::Unopened);
    match &err {
        LoadError::ModuleOpen { source, .. } => {
            assert!(matches!(source, OpenError::UnknownLinked(name) if name == "missing"));
        }
        other => panic!("expected ModuleOpen, got {other}"),
    }
    assert_eq!(recorder.names(), vec!["a"]);
}

#[test]
fn test_missing_entry_point() {
    let mut loader = loader();
    let mut recorder = Recorder::default();

    let err = loader
        .load_all(&refs(&["no-entry", "a"]), &mut recorder)
        .unwrap_err();

    assert!(matches!(
        err,
        LoadError::EntryPointNotFound { symbol, .. } if symbol == ENTRY_POINT_SYMBOL
    ));
    assert_eq!(err.locator(), &ModuleReference::linked("no-entry"));
    assert_eq!(err.stage(), ModuleStage::Opened);
    assert!(recorder.calls.is_empty());
    assert!(loader.loaded().is_empty());
}

#[test]
fn test_missing_descriptor_not_invoked() {
    let mut loader = loader();
    let mut recorder = Recorder::default();

    let err = loader
        .load_all(&refs(&["no-descriptor"]), &mut recorder)
        .unwrap_err();

    assert_eq!(err.stage(), ModuleStage::Resolved);
    let violation = violation(err);
    assert!(violation.has(|m| matches!(m, Mismatch::MissingDescriptor { .. })));
    assert!(recorder.calls.is_empty());
}

#[test]
fn test_garbage_descriptor_not_invoked() {
    let mut loader = loader();
    let mut recorder = Recorder::default();

    let err = loader
        .load_all(&refs(&["garbage-descriptor"]), &mut recorder)
        .unwrap_err();

    let violation = violation(err);
    assert_eq!(
        violation.mismatches,
        vec![Mismatch::UnreadableDescriptor(SignatureError::BadMagic(0))]
    );
    assert!(recorder.calls.is_empty());
}

#[test]
fn test_wrong_arity_not_invoked() {
    let mut loader = loader();
    let mut recorder = Recorder::default();

    let err = loader
        .load_all(&refs(&["a", "two-params", "b"]), &mut recorder)
        .unwrap_err();

    assert_eq!(err.locator(), &ModuleReference::linked("two-params"));
    let violation = violation(err);
    assert_eq!(
        violation.mismatches,
        vec![Mismatch::ParamCount {
            expected: 1,
            found: 2
        }]
    );
    assert_eq!(recorder.names(), vec!["a"]);
}

#[test]
fn test_wrong_parameter_type_not_invoked() {
    let mut loader = loader();
    let mut recorder = Recorder::default();

    let err = loader
        .load_all(&refs(&["wrong-param"]), &mut recorder)
        .unwrap_err();

    let violation = violation(err);
    assert!(violation.has(|m| matches!(
        m,
        Mismatch::ParamType { index: 0, expected, .. } if expected == CAPABILITY_PARAM_TYPE
    )));
    assert!(recorder.calls.is_empty());
}

#[test]
fn test_wrong_result_type_not_invoked() {
    let mut loader = loader();
    let mut recorder = Recorder::default();

    let err = loader
        .load_all(&refs(&["wrong-result"]), &mut recorder)
        .unwrap_err();
    assert_eq!(
        violation(err).mismatches,
        vec![Mismatch::ResultType {
            index: 0,
            expected: ENTRY_RESULT_TYPE.to_string(),
            found: "()".to_string(),
        }]
    );

    let err = loader
        .load_all(&refs(&["no-result"]), &mut recorder)
        .unwrap_err();
    assert_eq!(
        violation(err).mismatches,
        vec![Mismatch::ResultCount {
            expected: 1,
            found: 0
        }]
    );

    assert!(recorder.calls.is_empty());
}

#[test]
fn test_version_mismatches_not_invoked() {
    let mut loader = loader();

    let mut recorder = Recorder::default();
    let err = loader
        .load_all(&refs(&["old-capability"]), &mut recorder)
        .unwrap_err();
    assert!(violation(err).has(|m| matches!(m, Mismatch::CapabilityVersion { found: 0, .. })));

    let err = loader
        .load_all(&refs(&["other-rustc"]), &mut recorder)
        .unwrap_err();
    assert!(violation(err).has(|m| matches!(m, Mismatch::RustcVersion { .. })));

    assert!(recorder.calls.is_empty());
}

#[test]
fn test_initialization_failure_keeps_earlier_mutations() {
    let mut loader = loader();
    let mut recorder = Recorder::default();

    let err = loader
        .load_all(&refs(&["a", "failing", "b"]), &mut recorder)
        .unwrap_err();

    assert_eq!(err.stage(), ModuleStage::Validated);
    assert_eq!(err.kind(), "initialization_failed");
    match &err {
        LoadError::InitializationFailed { source, locator } => {
            assert_eq!(locator, &ModuleReference::linked("failing"));
            assert_eq!(
                source,
                &PluginError::InitializationFailed("missing upstream".into())
            );
        }
        other => panic!("expected InitializationFailed, got {other}"),
    }
    assert!(err.source().is_some());

    // Nothing is rolled back and "b" never runs.
    assert_eq!(recorder.names(), vec!["a", "partial"]);

    // Both invoked modules stay loaded.
    assert_eq!(loader.loaded().len(), 2);
    assert!(loader.loaded()[0].initialized);
    assert!(!loader.loaded()[1].initialized);
}

#[test]
fn test_second_pass_double_applies() {
    let mut loader = loader();
    let mut recorder = Recorder::default();
    let modules = refs(&["a", "b"]);

    loader.load_all(&modules, &mut recorder).unwrap();
    loader.load_all(&modules, &mut recorder).unwrap();

    assert_eq!(recorder.names(), vec!["a", "b", "a", "b"]);
    assert_eq!(
        recorder.calls.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
        vec![0, 1, 2, 3]
    );
    assert_eq!(loader.loaded().len(), 4);
}

#[test]
fn test_second_pass_into_host_registry_conflicts() {
    let mut loader = loader();
    let mut host = HostCapabilities::new();
    let modules = refs(&["a"]);

    loader.load_all(&modules, &mut host).unwrap();
    let err = loader.load_all(&modules, &mut host).unwrap_err();

    match err {
        LoadError::InitializationFailed { source, .. } => {
            assert_eq!(source, PluginError::duplicate("filter", "a"));
        }
        other => panic!("expected InitializationFailed, got {other}"),
    }
    assert_eq!(host.filter_names(), vec!["a"]);
}

#[test]
fn test_error_messages_name_module() {
    let mut loader = loader();
    let mut recorder = Recorder::default();

    let err = loader
        .load_all(&refs(&["wrong-result"]), &mut recorder)
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "entry point `tollgate_plugin_init` of plugin module `linked:wrong-result` has an incompatible signature"
    );
    let cause = err.source().map(|s| s.to_string()).unwrap_or_default();
    assert!(cause.contains("result 0"), "{cause}");
}
