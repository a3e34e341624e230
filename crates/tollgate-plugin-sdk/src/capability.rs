//! The capability handle a plugin receives from the host.
//!
//! The host owns one [`Registrar`] per loading pass and lends it to every
//! plugin entry point in turn. The trait only offers registration calls: a
//! plugin can add routes, interceptors and filters, it cannot read or replace
//! what other plugins registered.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PluginResult;

/// Version of the [`Registrar`] interface.
///
/// Bumped whenever a method is added, removed or changes shape, so a plugin
/// compiled against another revision is rejected before it is called.
pub const CAPABILITY_VERSION: u32 = 1;

/// Registration surface exposed by the host to plugin entry points.
pub trait Registrar {
    /// Register a handler for `route.method` + `route.path`.
    fn register_route(&mut self, route: Route) -> PluginResult<()>;

    /// Register a named interceptor. Interceptors run in registration order.
    fn register_interceptor(
        &mut self,
        name: &str,
        interceptor: Box<dyn Interceptor>,
    ) -> PluginResult<()>;

    /// Register a named filter. A request is rejected if any filter denies it.
    fn register_filter(&mut self, name: &str, filter: Box<dyn Filter>) -> PluginResult<()>;
}

/// Request as seen by plugin handlers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRequest {
    /// HTTP method, compared case-insensitively
    pub method: String,

    /// Request path including the leading slash
    pub path: String,

    /// Header map (lower-cased names)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Raw body
    #[serde(default)]
    pub body: Vec<u8>,
}

impl ProxyRequest {
    /// Create a request without headers or body.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            path: path.into(),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    /// Set a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Set the body
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Get a header by name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Response produced by a route handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyResponse {
    /// HTTP status code
    pub status: u16,

    /// Header map (lower-cased names)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Raw body
    #[serde(default)]
    pub body: Vec<u8>,
}

impl ProxyResponse {
    /// Create a response with a status and no body
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    /// 200 with a plain text body
    pub fn text(body: impl Into<String>) -> Self {
        Self::new(200)
            .with_header("content-type", "text/plain; charset=utf-8")
            .with_body(body.into().into_bytes())
    }

    /// 200 with a JSON body
    pub fn json(value: &Value) -> Self {
        Self::new(200)
            .with_header("content-type", "application/json")
            .with_body(value.to_string().into_bytes())
    }

    /// Set a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Set the body
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Body as UTF-8, lossy
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Handles requests for a registered route.
pub trait Handler: Send + Sync {
    fn handle(&self, request: &ProxyRequest) -> ProxyResponse;
}

impl<F> Handler for F
where
    F: Fn(&ProxyRequest) -> ProxyResponse + Send + Sync,
{
    fn handle(&self, request: &ProxyRequest) -> ProxyResponse {
        self(request)
    }
}

/// Observes and rewrites traffic around route handlers.
pub trait Interceptor: Send + Sync {
    /// Called before the route handler. An error aborts the request.
    fn on_request(&self, request: &mut ProxyRequest) -> PluginResult<()>;

    /// Called after the route handler.
    fn on_response(&self, _request: &ProxyRequest, _response: &mut ProxyResponse) {}
}

/// Decides whether a request may proceed.
pub trait Filter: Send + Sync {
    fn allow(&self, request: &ProxyRequest) -> bool;
}

impl<F> Filter for F
where
    F: Fn(&ProxyRequest) -> bool + Send + Sync,
{
    fn allow(&self, request: &ProxyRequest) -> bool {
        self(request)
    }
}

/// A route registration.
pub struct Route {
    /// HTTP method, compared case-insensitively
    pub method: String,

    /// Exact request path
    pub path: String,

    /// Request handler
    pub handler: Box<dyn Handler>,
}

impl Route {
    /// Create a route from any handler.
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        handler: impl Handler + 'static,
    ) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            path: path.into(),
            handler: Box::new(handler),
        }
    }

    /// Shorthand for a `GET` route
    pub fn get(path: impl Into<String>, handler: impl Handler + 'static) -> Self {
        Self::new("GET", path, handler)
    }

    /// `"METHOD /path"`, the key routes are registered under
    pub fn key(&self) -> String {
        format!("{} {}", self.method.to_ascii_uppercase(), self.path)
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
