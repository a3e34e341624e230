//! Tollgate Plugin SDK
//!
//! Contract crate shared by the Tollgate proxy and the native plugins it
//! loads. A plugin is a `cdylib` that depends on this crate and exports one
//! initialization function through [`export_plugin!`].
//!
//! # Quick Start
//!
//! ```rust
//! use tollgate_plugin_sdk::prelude::*;
//!
//! fn init(registrar: &mut dyn Registrar) -> PluginResult<()> {
//!     registrar.register_route(Route::get("/hello", |_: &ProxyRequest| {
//!         ProxyResponse::text("hello from a plugin")
//!     }))?;
//!     registrar.register_filter("no-admin", Box::new(|req: &ProxyRequest| {
//!         !req.path.starts_with("/admin")
//!     }))
//! }
//!
//! export_plugin!(init);
//! ```
//!
//! # Compatibility
//!
//! Host and plugin exchange Rust types (`&mut dyn Registrar`, boxed
//! handlers, [`PluginError`]), so both must be built by the same compiler
//! against the same SDK version. The exported [`signature::EntrySignature`]
//! records both and the host refuses to call an entry point whose descriptor
//! does not match its own.

pub mod capability;
pub mod error;
#[macro_use]
pub mod macros;
pub mod signature;

pub use capability::{
    Filter, Handler, Interceptor, ProxyRequest, ProxyResponse, Registrar, Route,
    CAPABILITY_VERSION,
};
pub use error::{PluginError, PluginResult};
pub use signature::{
    DeclaredSignature, EntrySignature, PluginInitFn, SignatureError, ENTRY_POINT_SYMBOL,
    SIGNATURE_SYMBOL,
};

/// Prelude module with common imports
pub mod prelude {
    pub use crate::capability::{
        Filter, Handler, Interceptor, ProxyRequest, ProxyResponse, Registrar, Route,
    };
    pub use crate::error::{PluginError, PluginResult};
    pub use crate::export_plugin;
    pub use serde_json::{json, Value};
}
