//! Echo Plugin
//!
//! A small plugin used to exercise the host end to end:
//! - `GET /echo` and `POST /echo` answer with the request body
//! - `GET /echo/stats` reports how many requests were echoed
//! - the `echo-stamp` interceptor marks every response it sees
//! - the `echo-no-admin` filter rejects paths under `/admin`

use std::sync::atomic::{AtomicU64, Ordering};

use tollgate_plugin_sdk::prelude::*;

/// Requests echoed since the plugin was loaded.
static ECHOED: AtomicU64 = AtomicU64::new(0);

/// Header added to every response.
pub const STAMP_HEADER: &str = "x-tollgate-echo";

fn echo(request: &ProxyRequest) -> ProxyResponse {
    ECHOED.fetch_add(1, Ordering::Relaxed);
    let mut response = ProxyResponse::new(200).with_body(request.body.clone());
    if let Some(content_type) = request.header("content-type") {
        response = response.with_header("content-type", content_type);
    }
    response
}

fn stats(_request: &ProxyRequest) -> ProxyResponse {
    ProxyResponse::json(&json!({
        "echoed": ECHOED.load(Ordering::Relaxed),
    }))
}

struct Stamp;

impl Interceptor for Stamp {
    fn on_request(&self, _request: &mut ProxyRequest) -> PluginResult<()> {
        Ok(())
    }

    fn on_response(&self, request: &ProxyRequest, response: &mut ProxyResponse) {
        response
            .headers
            .insert(STAMP_HEADER.to_string(), request.method.clone());
    }
}

fn no_admin(request: &ProxyRequest) -> bool {
    !request.path.starts_with("/admin")
}

/// Register everything this plugin provides.
pub fn init(registrar: &mut dyn Registrar) -> PluginResult<()> {
    registrar.register_route(Route::get("/echo", echo))?;
    registrar.register_route(Route::new("POST", "/echo", echo))?;
    registrar.register_route(Route::get("/echo/stats", stats))?;
    registrar.register_interceptor("echo-stamp", Box::new(Stamp))?;
    registrar.register_filter("echo-no-admin", Box::new(no_admin))?;
    Ok(())
}

export_plugin!(init);
