//! Declarative macros for plugin development.

/// Export a plugin entry point together with its signature descriptor.
///
/// Takes the path of a function with the [`PluginInitFn`](crate::PluginInitFn)
/// signature and generates the two symbols the host looks up:
/// `tollgate_plugin_init` and `tollgate_plugin_signature`. The descriptor is
/// produced by the same SDK build the wrapper is compiled against, so both
/// always describe each other.
///
/// # Example
///
/// ```rust
/// use tollgate_plugin_sdk::prelude::*;
///
/// fn init(registrar: &mut dyn Registrar) -> PluginResult<()> {
///     registrar.register_route(Route::get("/health", |_: &ProxyRequest| {
///         ProxyResponse::text("ok")
///     }))
/// }
///
/// export_plugin!(init);
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($init:path) => {
        #[no_mangle]
        pub fn tollgate_plugin_init(
            registrar: &mut dyn $crate::Registrar,
        ) -> $crate::PluginResult<()> {
            let init: $crate::PluginInitFn = $init;
            init(registrar)
        }

        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static tollgate_plugin_signature: $crate::signature::EntrySignature =
            $crate::signature::EntrySignature::current();
    };
}
