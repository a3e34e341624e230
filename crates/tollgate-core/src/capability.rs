//! Host capability registry.
//!
//! [`HostCapabilities`] is the `Registrar` handed to plugin entry points.
//! It collects what plugins register and runs requests through it:
//!
//! ```text
//! filters ──▶ request interceptors ──▶ route handler ──▶ response interceptors
//! ```

use std::collections::BTreeMap;

use serde::Serialize;
use tollgate_plugin_sdk::{
    Filter, Handler, Interceptor, PluginError, PluginResult, ProxyRequest, ProxyResponse,
    Registrar, Route,
};
use tracing::debug;

/// A registered route, for introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteInfo {
    pub method: String,
    pub path: String,
}

/// Registry of everything plugins have registered.
#[derive(Default)]
pub struct HostCapabilities {
    routes: BTreeMap<String, RegisteredRoute>,
    interceptors: Vec<(String, Box<dyn Interceptor>)>,
    filters: Vec<(String, Box<dyn Filter>)>,
}

struct RegisteredRoute {
    info: RouteInfo,
    handler: Box<dyn Handler>,
}

impl HostCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered routes, sorted by method then path.
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.routes.values().map(|r| r.info.clone()).collect()
    }

    /// Interceptor names in registration order.
    pub fn interceptor_names(&self) -> Vec<&str> {
        self.interceptors.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Filter names in registration order.
    pub fn filter_names(&self) -> Vec<&str> {
        self.filters.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// True when nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.interceptors.is_empty() && self.filters.is_empty()
    }

    /// Run a request through filters, interceptors and the matching route.
    ///
    /// A denying filter answers 403. A request interceptor error answers 403
    /// for [`PluginError::PermissionDenied`] and 500 otherwise. An unknown
    /// route answers 404. Response interceptors see every response produced
    /// after the request interceptors ran.
    pub fn dispatch(&self, mut request: ProxyRequest) -> ProxyResponse {
        if let Some((name, _)) = self.filters.iter().find(|(_, f)| !f.allow(&request)) {
            debug!(filter = %name, path = %request.path, "Request denied by filter");
            return ProxyResponse::new(403).with_body(format!("denied by filter `{name}`"));
        }

        for (name, interceptor) in &self.interceptors {
            if let Err(err) = interceptor.on_request(&mut request) {
                debug!(interceptor = %name, error = %err, "Request aborted by interceptor");
                let status = match err {
                    PluginError::PermissionDenied(_) => 403,
                    _ => 500,
                };
                return ProxyResponse::new(status).with_body(err.to_string());
            }
        }

        let key = route_key(&request.method, &request.path);
        let mut response = match self.routes.get(&key) {
            Some(route) => route.handler.handle(&request),
            None => ProxyResponse::new(404).with_body(format!("no route for {key}")),
        };

        for (_, interceptor) in &self.interceptors {
            interceptor.on_response(&request, &mut response);
        }
        response
    }
}

fn route_key(method: &str, path: &str) -> String {
    format!("{} {}", method.to_ascii_uppercase(), path)
}

impl Registrar for HostCapabilities {
    fn register_route(&mut self, route: Route) -> PluginResult<()> {
        // Fields are public, so the method may not have gone through `Route::new`.
        let method = route.method.to_ascii_uppercase();
        let key = route_key(&method, &route.path);
        if self.routes.contains_key(&key) {
            return Err(PluginError::duplicate("route", key));
        }
        debug!(route = %key, "Route registered");
        self.routes.insert(
            key,
            RegisteredRoute {
                info: RouteInfo {
                    method,
                    path: route.path,
                },
                handler: route.handler,
            },
        );
        Ok(())
    }

    fn register_interceptor(
        &mut self,
        name: &str,
        interceptor: Box<dyn Interceptor>,
    ) -> PluginResult<()> {
        if self.interceptors.iter().any(|(n, _)| n == name) {
            return Err(PluginError::duplicate("interceptor", name));
        }
        debug!(interceptor = %name, "Interceptor registered");
        self.interceptors.push((name.to_string(), interceptor));
        Ok(())
    }

    fn register_filter(&mut self, name: &str, filter: Box<dyn Filter>) -> PluginResult<()> {
        if self.filters.iter().any(|(n, _)| n == name) {
            return Err(PluginError::duplicate("filter", name));
        }
        debug!(filter = %name, "Filter registered");
        self.filters.push((name.to_string(), filter));
        Ok(())
    }
}

impl std::fmt::Debug for HostCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostCapabilities")
            .field("routes", &self.routes.keys().collect::<Vec<_>>())
            .field("interceptors", &self.interceptor_names())
            .field("filters", &self.filter_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_route() {
        let mut host = HostCapabilities::new();
        host.register_route(Route::get("/a", |_: &ProxyRequest| ProxyResponse::text("1")))
            .unwrap();
        let err = host
            .register_route(Route::new("get", "/a", |_: &ProxyRequest| {
                ProxyResponse::text("2")
            }))
            .unwrap_err();
        assert_eq!(err, PluginError::duplicate("route", "GET /a"));
    }

    #[test]
    fn test_same_path_other_method() {
        let mut host = HostCapabilities::new();
        host.register_route(Route::get("/a", |_: &ProxyRequest| ProxyResponse::text("get")))
            .unwrap();
        host.register_route(Route::new("POST", "/a", |_: &ProxyRequest| {
            ProxyResponse::text("post")
        }))
        .unwrap();
        assert_eq!(host.routes().len(), 2);
        assert_eq!(
            host.dispatch(ProxyRequest::new("post", "/a")).body_text(),
            "post"
        );
    }

    #[test]
    fn test_route_literal_with_lowercase_method() {
        let mut host = HostCapabilities::new();
        host.register_route(Route {
            method: "get".into(),
            path: "/a".into(),
            handler: Box::new(|_: &ProxyRequest| ProxyResponse::text("lower")),
        })
        .unwrap();

        assert_eq!(host.routes()[0].method, "GET");
        let response = host.dispatch(ProxyRequest::new("GET", "/a"));
        assert_eq!(response.status, 200);
        assert_eq!(response.body_text(), "lower");

        let err = host
            .register_route(Route::get("/a", |_: &ProxyRequest| ProxyResponse::text("2")))
            .unwrap_err();
        assert_eq!(err, PluginError::duplicate("route", "GET /a"));
    }

    #[test]
    fn test_unknown_route() {
        let host = HostCapabilities::new();
        assert!(host.is_empty());
        let response = host.dispatch(ProxyRequest::new("GET", "/missing"));
        assert_eq!(response.status, 404);
        assert_eq!(response.body_text(), "no route for GET /missing");
    }

    #[test]
    fn test_filter_denies() {
        let mut host = HostCapabilities::new();
        host.register_filter("deny-all", Box::new(|_: &ProxyRequest| false))
            .unwrap();
        let response = host.dispatch(ProxyRequest::new("GET", "/"));
        assert_eq!(response.status, 403);
    }
}
