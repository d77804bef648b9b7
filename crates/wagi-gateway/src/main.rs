//! Wagi gateway entry point.
//!
//! Loads settings, merges the module documents, binds deployment variables
//! and starts the HTTP service.
//!
//! # Environment variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `WAGI_SETTINGS` | Settings file (TOML / YAML / JSON). |
//! | `WAGI_LISTEN`, `WAGI_REQUEST_TIMEOUT_MS`, ... | Override any settings field. |
//! | `RUST_LOG` | Log filter, default `wagi_gateway=info`. |
//!
//! Every other process variable is available to `${NAME}` placeholders in
//! module documents.

use anyhow::{Context, bail};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wagi_gateway::{Gateway, GatewaySettings, server};
use wagi_kernel::gateway::{DeploymentVars, ModuleDocument};

#[derive(Debug, Parser)]
#[command(name = "wagi-gateway", version, about = "Route HTTP requests to sandboxed modules")]
struct Cli {
    /// Settings file.
    #[arg(short, long, env = "WAGI_SETTINGS")]
    settings: Option<PathBuf>,

    /// Module documents, later files override earlier ones.
    #[arg(short, long = "modules", num_args = 1..)]
    modules: Vec<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:3000.
    #[arg(short, long)]
    listen: Option<String>,

    /// Directory relative module references resolve against.
    #[arg(long)]
    module_dir: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    let mut settings = GatewaySettings::load(cli.settings.as_deref()).context("loading settings")?;
    if !cli.modules.is_empty() {
        settings.modules = cli.modules;
    }
    if let Some(listen) = cli.listen {
        settings.listen = listen;
    }
    if cli.module_dir.is_some() {
        settings.module_dir = cli.module_dir;
    }
    if settings.modules.is_empty() {
        bail!("no module documents given; pass --modules <FILE>... or set `modules` in settings");
    }

    let document = ModuleDocument::load_layered(&settings.modules).context("loading module documents")?;
    info!(
        documents = settings.modules.len(),
        modules = document.modules().len(),
        listen = %settings.listen,
        "wagi gateway configuration loaded"
    );

    let gateway = Gateway::builder(document)
        .deployment(DeploymentVars::from_process_env())
        .settings(settings)
        .build()
        .context("building gateway")?;
    for disabled in &gateway.report().disabled {
        warn!(route = %disabled.route_id, reason = %disabled.reason, "route will not be served");
    }

    server::serve(Arc::new(gateway)).await.context("serving")?;
    Ok(())
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("wagi_gateway=info".parse()?);
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}
