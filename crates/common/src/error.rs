//! Error taxonomy for the workflow runtime.
//!
//! Every variant carries a stable `code()` string. That code is what ends
//! up both in the per-task `error.code` field of the run DTO and in the
//! HTTP error body, so the taxonomy here is the single source of truth
//! for both surfaces.

use thiserror::Error;

/// Main error type shared by the orchestration engine and its callers.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // -- Input --
    #[error("invalid input: {0}")]
    InvalidInput(String),

    // -- Graph --
    #[error("dependency graph contains a cycle")]
    DagCycle,
    #[error("dependency graph is structurally invalid")]
    DagInvalid,
    #[error("dependency not found: {0}")]
    DepNotFound(String),

    // -- Lifecycle --
    #[error("run already exists: {0}")]
    RunExists(String),
    #[error("run not found: {0}")]
    RunNotFound(String),
    #[error("run already completed")]
    RunCompleted,
    #[error("run was aborted")]
    RunAborted,
    #[error("task is not ready: {0}")]
    TaskNotReady(String),
    #[error("task not found: {0}")]
    TaskNotFound(String),

    // -- Capacity --
    #[error("budget not set")]
    BudgetNotSet,
    #[error("budget exceeded")]
    BudgetExceeded,
    #[error("context too large")]
    ContextTooLarge,

    // -- Execution --
    #[error("task failed: {0}")]
    TaskFailed(String),
    #[error("task timed out")]
    TaskTimeout,
    #[error("task cancelled")]
    TaskCancelled,
    #[error("model unknown: {0}")]
    ModelUnknown(String),

    // -- Engine --
    #[error("deadlock: no ready tasks and no progress")]
    Deadlock,
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable machine-readable code, shared by the task DTO and the HTTP
    /// error mapping (see the orchestrator data model and §6/§7 of the
    /// design).
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::DagCycle => "dag_cycle",
            Error::DagInvalid => "dag_invalid",
            Error::DepNotFound(_) => "dep_not_found",
            Error::RunExists(_) => "run_exists",
            Error::RunNotFound(_) => "run_not_found",
            Error::RunCompleted => "run_completed",
            Error::RunAborted => "run_aborted",
            Error::TaskNotReady(_) | Error::TaskNotFound(_) => "invalid_input",
            Error::BudgetNotSet | Error::BudgetExceeded => "budget_exceeded",
            Error::ContextTooLarge => "context_too_large",
            Error::TaskFailed(_) => "task_failed",
            Error::TaskTimeout => "timeout",
            Error::TaskCancelled => "cancelled",
            Error::ModelUnknown(_) => "invalid_input",
            Error::Deadlock => "deadlock",
            Error::Internal(_) => "internal_error",
        }
    }

    #[must_use]
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Error::DagCycle | Error::DagInvalid | Error::Deadlock | Error::Internal(_) => {
                ErrorSeverity::Critical
            }
            Error::BudgetExceeded | Error::TaskFailed(_) => ErrorSeverity::High,
            Error::TaskTimeout | Error::TaskCancelled => ErrorSeverity::Medium,
            _ => ErrorSeverity::Low,
        }
    }
}

/// Error severity levels, used only for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
            ErrorSeverity::Critical => "critical",
        }
    }
}
