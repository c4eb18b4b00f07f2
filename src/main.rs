//! Workflow runtime server: wires the run store and orchestration engine
//! to the HTTP control plane and serves it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use workflow_runtime_api::{build_router, AppState};
use workflow_runtime_common::{telemetry, Config};
use workflow_runtime_core::RunStore;
use workflow_runtime_orchestrator::{CatalogCostCalculator, DefaultDependencyResolver, InMemoryRunStore};

/// Budget- and concurrency-bounded orchestration runtime for DAGs of
/// LLM-invoking tasks.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Listening address, e.g. 0.0.0.0:8080. Overrides `server.addr` from
    /// config/env.
    #[arg(long)]
    addr: Option<String>,

    /// Optional TOML config file path.
    #[arg(long)]
    config: Option<String>,

    /// Directory to write `run-<id>.json` snapshots to on run
    /// termination. Disabled (no audit files) when omitted.
    #[arg(long)]
    audit_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        Config::load(cli.config.as_deref()).map_err(|e| anyhow::anyhow!("failed to load config: {e}"))?;
    if let Some(addr) = &cli.addr {
        config.server.addr = addr.clone();
    }
    if let Some(dir) = &cli.audit_dir {
        config.server.audit_dir = Some(dir.display().to_string());
    }

    telemetry::init_telemetry(&config.observability)?;
    if config.observability.metrics_enabled {
        workflow_runtime_common::metrics::init_metrics()
            .map_err(|e| anyhow::anyhow!("failed to init metrics: {e}"))?;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "starting workflow runtime");

    let store = Arc::new(InMemoryRunStore::new());
    let state = Arc::new(AppState {
        store: store.clone(),
        resolver: Arc::new(DefaultDependencyResolver::new()),
        cost: Arc::new(CatalogCostCalculator::new(config.model_catalog.clone())),
        defaults: workflow_runtime_api::RunDefaults {
            max_parallelism: config.orchestrator.default_max_parallelism,
            timeout_ms: config.orchestrator.default_timeout_ms,
            currency: config.orchestrator.default_currency.clone(),
            chars_per_token: config.orchestrator.chars_per_token,
        },
        audit_dir: config.server.audit_dir.clone().map(PathBuf::from),
    });

    if let Some(dir) = &state.audit_dir {
        tokio::fs::create_dir_all(dir).await.ok();
    }

    let retention = Duration::from_secs(config.orchestrator.retention_secs);
    let prune_interval = Duration::from_secs(config.orchestrator.prune_interval_secs);
    tokio::spawn(workflow_runtime_api::run_retention_loop(
        store.clone(),
        prune_interval,
        retention,
    ));

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.addr).await?;
    info!(addr = %config.server.addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(store))
        .await?;

    info!("workflow runtime shut down");
    Ok(())
}

async fn shutdown_signal(store: Arc<InMemoryRunStore>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested, cancelling active runs");
    store.cancel_all().await;
    store.wait_all(Duration::from_secs(30)).await;
}
