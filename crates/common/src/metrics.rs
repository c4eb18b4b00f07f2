//! Metrics collection and reporting.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Gauge, GaugeVec, HistogramVec, Registry,
};

/// Global metrics registry.
pub static METRICS_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Tasks completed/failed/skipped, labeled by terminal state.
pub static TASKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "workflow_runtime_tasks_total",
        "Total number of tasks reaching a terminal state",
        &["state"]
    )
    .unwrap()
});

/// Task execution duration.
pub static TASK_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "workflow_runtime_task_duration_seconds",
        "Task execution duration in seconds",
        &["model"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    )
    .unwrap()
});

/// Token usage counter.
pub static TOKEN_USAGE: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "workflow_runtime_tokens_total",
        "Total tokens estimated/used",
        &["model"]
    )
    .unwrap()
});

/// Budget rejections.
pub static BUDGET_REJECTIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "workflow_runtime_budget_rejections_total",
        "Total budget-gate rejections",
        &["run_id"]
    )
    .unwrap()
});

/// Currently active (non-terminal) runs.
pub static ACTIVE_RUNS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "workflow_runtime_active_runs",
        "Number of runs that have not yet reached a terminal state"
    )
    .unwrap()
});

/// Error counter by taxonomy code and severity.
pub static ERROR_COUNTER: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "workflow_runtime_errors",
        "Errors observed, labeled by code and severity",
        &["code", "severity"]
    )
    .unwrap()
});

/// Register every metric with the global registry. Call once at startup.
pub fn init_metrics() -> Result<()> {
    METRICS_REGISTRY
        .register(Box::new(TASKS_TOTAL.clone()))
        .map_err(|e| Error::Internal(e.to_string()))?;
    METRICS_REGISTRY
        .register(Box::new(TASK_DURATION.clone()))
        .map_err(|e| Error::Internal(e.to_string()))?;
    METRICS_REGISTRY
        .register(Box::new(TOKEN_USAGE.clone()))
        .map_err(|e| Error::Internal(e.to_string()))?;
    METRICS_REGISTRY
        .register(Box::new(BUDGET_REJECTIONS.clone()))
        .map_err(|e| Error::Internal(e.to_string()))?;
    METRICS_REGISTRY
        .register(Box::new(ACTIVE_RUNS.clone()))
        .map_err(|e| Error::Internal(e.to_string()))?;
    METRICS_REGISTRY
        .register(Box::new(ERROR_COUNTER.clone()))
        .map_err(|e| Error::Internal(e.to_string()))?;
    Ok(())
}

/// Metrics collector capability, so callers depend on a trait rather than
/// the static registry directly.
pub trait MetricsCollector: Send + Sync {
    fn record_task_terminal(&self, state: &str);
    fn record_task_duration(&self, model: &str, duration_secs: f64);
    fn record_tokens(&self, model: &str, tokens: u64);
    fn record_budget_rejection(&self, run_id: &str);
    fn set_active_runs(&self, count: i64);
    fn record_error(&self, code: &str, severity: &str);
}

/// Default collector backed by the global Prometheus registry.
#[derive(Clone, Default)]
pub struct DefaultMetricsCollector;

impl MetricsCollector for DefaultMetricsCollector {
    fn record_task_terminal(&self, state: &str) {
        TASKS_TOTAL.with_label_values(&[state]).inc();
    }

    fn record_task_duration(&self, model: &str, duration_secs: f64) {
        TASK_DURATION
            .with_label_values(&[model])
            .observe(duration_secs);
    }

    fn record_tokens(&self, model: &str, tokens: u64) {
        TOKEN_USAGE
            .with_label_values(&[model])
            .inc_by(tokens as f64);
    }

    fn record_budget_rejection(&self, run_id: &str) {
        BUDGET_REJECTIONS.with_label_values(&[run_id]).inc();
    }

    fn set_active_runs(&self, count: i64) {
        ACTIVE_RUNS.set(count as f64);
    }

    fn record_error(&self, code: &str, severity: &str) {
        ERROR_COUNTER.with_label_values(&[code, severity]).inc();
    }
}
