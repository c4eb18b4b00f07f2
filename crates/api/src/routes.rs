//! Router assembly and shared application state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use workflow_runtime_common::types::ModelId;
use workflow_runtime_core::RunStore;
use workflow_runtime_orchestrator::{
    CatalogCostCalculator, DefaultBudgetEnforcer, DefaultContextBuilder, DefaultDependencyResolver,
    DefaultOrchestrator, DefaultParallelExecutor, DefaultScheduler, DefaultUsageTracker,
    EchoExecutor, FifoQueue, InMemoryRunStore,
};

use crate::handlers;

/// Defaults applied when a submission omits a policy field, mirroring
/// `workflow_runtime_common::config::OrchestratorConfig`.
#[derive(Debug, Clone)]
pub struct RunDefaults {
    pub max_parallelism: usize,
    pub timeout_ms: u64,
    pub currency: String,
    pub chars_per_token: u32,
}

/// Shared state reachable from every handler.
pub struct AppState {
    pub store: Arc<InMemoryRunStore>,
    pub resolver: Arc<DefaultDependencyResolver>,
    pub cost: Arc<CatalogCostCalculator>,
    pub defaults: RunDefaults,
    pub audit_dir: Option<PathBuf>,
}

impl AppState {
    /// Build the per-submission orchestrator. A fresh instance is
    /// constructed per run rather than shared, since the queue and
    /// in-flight sets are run-scoped state.
    #[must_use]
    pub fn new_orchestrator(&self, max_parallelism: usize) -> DefaultOrchestrator<DefaultContextBuilder> {
        DefaultOrchestrator::new(
            self.resolver.clone(),
            Arc::new(DefaultScheduler::new()),
            Arc::new(FifoQueue::new()),
            Arc::new(DefaultParallelExecutor::new(max_parallelism, Arc::new(EchoExecutor))),
            Arc::new(DefaultContextBuilder::new(self.defaults.chars_per_token)),
            self.cost.clone(),
            Arc::new(DefaultBudgetEnforcer::new()),
            Arc::new(DefaultUsageTracker::new()),
            Arc::new(workflow_runtime_common::metrics::DefaultMetricsCollector),
        )
    }

    #[must_use]
    pub fn resolve_role(&self, role: workflow_runtime_common::types::ModelRole) -> Option<ModelId> {
        use workflow_runtime_core::CostCalculator;
        self.cost.resolve_role(role)
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/runs", post(handlers::submit))
        .route("/api/v1/runs/{id}", get(handlers::status))
        .route("/api/v1/runs/{id}/abort", post(handlers::abort))
        .route("/api/v1/runs/{id}/tasks", post(handlers::add_task_not_implemented))
        .layer(DefaultBodyLimit::max(4 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Background loop pruning terminal runs older than `retention`, woken
/// every `interval`.
pub async fn run_retention_loop(store: Arc<InMemoryRunStore>, interval: Duration, retention: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        store.prune_completed(retention).await;
    }
}
