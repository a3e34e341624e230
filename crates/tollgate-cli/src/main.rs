//! Command-line interface for the Tollgate plugin host.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tollgate_core::plugin::{LinkedImage, LinkedOpener, ModuleInspection, ModuleOpener, NativeOpener};
use tollgate_core::{HostCapabilities, ModuleReference, PluginLoader, RouteInfo, TollgateConfig};
use tollgate_plugin_sdk::signature::{DeclaredSignature, ENTRY_POINT_SYMBOL, SIGNATURE_SYMBOL};
use tollgate_plugin_sdk::{ProxyRequest, ProxyResponse};
use tracing::{debug, info};

/// Environment variable switching logs to JSON.
const LOG_JSON_ENV: &str = "TOLLGATE_LOG_JSON";

/// Tollgate - plugin host for the Tollgate proxy.
#[derive(Parser, Debug)]
#[command(name = "tollgate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Config file (default: ~/.tollgate/tollgate.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Load the configured plugin modules and show what they registered.
    Load {
        /// Extra module to load after the configured ones (path or linked:<name>).
        #[arg(short, long = "plugin", value_name = "MODULE")]
        plugins: Vec<String>,

        /// Dispatch a request after loading, e.g. "GET /echo".
        #[arg(short, long, value_name = "METHOD PATH")]
        dispatch: Option<String>,

        /// Body of the dispatched request.
        #[arg(short, long, requires = "dispatch")]
        body: Option<String>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Check a module against the entry contract without invoking it.
    Inspect {
        /// Module to inspect (path or linked:<name>).
        #[arg(required = true)]
        module: String,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the entry contract plugins must declare.
    Contract,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Load {
            plugins,
            dispatch,
            body,
            json,
        } => {
            run_load(args.config, plugins, dispatch, body, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Inspect { module, json } => run_inspect(args.config, module, json),
        Command::Contract => {
            print_contract();
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(verbose: bool) {
    // Check if JSON logging is requested (for production/container environments)
    let json_logging = std::env::var(LOG_JSON_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_directive = if verbose {
        "tollgate=debug"
    } else {
        "tollgate=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Opener for `linked:` modules built into this binary, falling back to
/// native libraries under the configured policy.
fn build_opener(config: &TollgateConfig) -> Box<dyn ModuleOpener> {
    let native = NativeOpener::new(config.plugins.policy.clone());
    Box::new(
        LinkedOpener::new()
            .with_module("echo", LinkedImage::new(tollgate_plugin_echo::init))
            .with_fallback(Box::new(native)),
    )
}

fn load_config(path: Option<PathBuf>) -> Result<TollgateConfig> {
    let config = TollgateConfig::load(path.as_deref()).context("Failed to load configuration")?;
    debug!(modules = config.plugins.modules.len(), "Configuration loaded");
    Ok(config)
}

#[derive(Debug, Serialize)]
struct LoadReport {
    modules: Vec<ModuleReference>,
    routes: Vec<RouteInfo>,
    interceptors: Vec<String>,
    filters: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<DispatchReport>,
}

#[derive(Debug, Serialize)]
struct DispatchReport {
    status: u16,
    headers: BTreeMap<String, String>,
    body: String,
}

impl From<ProxyResponse> for DispatchReport {
    fn from(response: ProxyResponse) -> Self {
        Self {
            status: response.status,
            body: response.body_text(),
            headers: response.headers,
        }
    }
}

fn run_load(
    config: Option<PathBuf>,
    plugins: Vec<String>,
    dispatch: Option<String>,
    body: Option<String>,
    json: bool,
) -> Result<()> {
    let config = load_config(config)?;
    let request = dispatch
        .as_deref()
        .map(|line| parse_request(line, body))
        .transpose()?;

    let mut modules = config.plugins.modules.clone();
    modules.extend(plugins.into_iter().map(ModuleReference::from));

    let mut loader = PluginLoader::with_opener(build_opener(&config));
    let mut host = HostCapabilities::new();

    // A failed pass leaves earlier registrations in `host`; it is discarded.
    loader
        .load_all(&modules, &mut host)
        .context("Plugin loading failed")?;
    info!(count = loader.loaded().len(), "Plugins ready");

    let report = LoadReport {
        modules: loader.loaded().iter().map(|m| m.reference.clone()).collect(),
        routes: host.routes(),
        interceptors: host.interceptor_names().into_iter().map(String::from).collect(),
        filters: host.filter_names().into_iter().map(String::from).collect(),
        response: request.map(|req| host.dispatch(req).into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn parse_request(line: &str, body: Option<String>) -> Result<ProxyRequest> {
    let Some((method, path)) = line.trim().split_once(' ') else {
        bail!("Invalid request `{line}`, expected \"METHOD PATH\"");
    };
    let path = path.trim();
    if !path.starts_with('/') {
        bail!("Invalid request path `{path}`, must start with '/'");
    }
    let mut request = ProxyRequest::new(method, path);
    if let Some(body) = body {
        request = request.with_body(body);
    }
    Ok(request)
}

fn print_report(report: &LoadReport) {
    println!("Loaded {} plugin module(s)", report.modules.len());
    for module in &report.modules {
        println!("  {module}");
    }

    println!();
    println!("Routes:");
    for route in &report.routes {
        println!("  {} {}", route.method, route.path);
    }
    println!("Interceptors:");
    for name in &report.interceptors {
        println!("  {name}");
    }
    println!("Filters:");
    for name in &report.filters {
        println!("  {name}");
    }

    if let Some(response) = &report.response {
        println!();
        println!("Status: {}", response.status);
        for (name, value) in &response.headers {
            println!("{name}: {value}");
        }
        println!();
        println!("{}", response.body);
    }
}

fn run_inspect(config: Option<PathBuf>, module: String, json: bool) -> Result<ExitCode> {
    let config = load_config(config)?;
    let loader = PluginLoader::with_opener(build_opener(&config));
    let inspection = loader.inspect(&ModuleReference::from(module));

    if json {
        println!("{}", serde_json::to_string_pretty(&inspection)?);
    } else {
        print_inspection(&inspection);
    }

    Ok(if inspection.is_compatible() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_inspection(inspection: &ModuleInspection) {
    if inspection.is_compatible() {
        println!("Plugin Validation: PASSED");
    } else {
        println!("Plugin Validation: FAILED");
    }
    println!();
    println!("Module:          {}", inspection.reference);
    println!("Stage reached:   {}", inspection.stage);
    match &inspection.declared {
        Some(declared) => println!("Declared:        {declared}"),
        None => println!("Declared:        <none>"),
    }

    if let Some(err) = &inspection.error {
        println!();
        println!("Error: {}", tollgate_core::plugin::loader::error_chain(err));
        println!();
        println!("Expected:        {}", DeclaredSignature::expected());
    }
}

fn print_contract() {
    let expected = DeclaredSignature::expected();
    println!("Entry point:     {ENTRY_POINT_SYMBOL}");
    println!("Descriptor:      {SIGNATURE_SYMBOL}");
    println!("Signature:       {expected}");
    println!("Parameters:      {}", expected.params.join(", "));
    println!("Results:         {}", expected.results.join(", "));
    println!("Capability:      v{}", expected.capability_version);
    println!("SDK:             {}", expected.sdk_version);
    println!("Compiler:        {}", expected.rustc_version);
}
