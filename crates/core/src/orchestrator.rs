//! Capability traits implemented by the orchestration engine.
//!
//! Each trait is a single-responsibility seam so tests can plug in fakes
//! without any form of runtime reflection.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use workflow_runtime_common::error::Result;
use workflow_runtime_common::types::{
    ContextBundle, ContextPolicy, Cost, Dag, ModelId, ModelRole, Run, RunId, RunPolicy, TaskError,
    TaskId, TaskResult, TaskSpec, TokenCount, Usage,
};

/// Builds and validates the dependency graph for a run.
pub trait DependencyResolver: Send + Sync {
    /// Build a DAG from the ordered task list. `ErrInvalidInput` /
    /// `ErrDepNotFound` on malformed input; an empty list yields a valid
    /// empty DAG.
    fn build_dag(&self, tasks: &[TaskSpec]) -> Result<Dag>;

    /// Validate DAG structure: three-color cycle detection over forward
    /// edges, including self-loops.
    fn validate(&self, dag: &Dag) -> Result<()>;
}

/// Computes the ready set and maintains dependency pending counts.
pub trait Scheduler: Send + Sync {
    /// Every task id whose node has `pending == 0` and whose task state is
    /// `Pending`/`Ready`, sorted lexicographically.
    fn next_ready(&self, run: &Run) -> Result<Vec<TaskId>>;

    /// Transition a task to `Completed`, store its outputs, and decrement
    /// pending on its dependents (never below zero). `ErrTaskNotReady` on
    /// an already-terminal or missing task.
    fn mark_complete(&self, run: &mut Run, task_id: &TaskId, result: TaskResult) -> Result<()>;
}

/// An unbounded FIFO of task ids awaiting execution.
pub trait Queue: Send + Sync {
    fn enqueue(&self, task_id: TaskId);
    fn dequeue(&self) -> Option<TaskId>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The injected task-execution primitive, standing in for a real LLM
/// call. Must obey the purity rule: it never mutates task state or
/// outputs, only returns a result.
#[async_trait]
pub trait TaskExecutorFn: Send + Sync {
    async fn call(&self, model: &ModelId, bundle: &ContextBundle, prompt: &str) -> Result<TaskResult>;
}

/// Bounded-concurrency invocation of the injected executor under a
/// per-task deadline and cooperative cancellation.
#[async_trait]
pub trait ParallelExecutor: Send + Sync {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        timeout_ms: u64,
        model: &ModelId,
        task_id: &TaskId,
        bundle: &ContextBundle,
        prompt: &str,
    ) -> Result<TaskResult>;
}

/// Assembles, reduces, and routes per-task context.
pub trait ContextBuilder: Send + Sync {
    /// Ordered predecessor outputs plus a copy of run memory, for
    /// dependencies whose task is Completed with a non-empty output.
    fn build(&self, run: &Run, task_id: &TaskId) -> ContextBundle;

    /// Apply the context-reduction policy, returning a deep copy.
    fn compact(&self, bundle: &ContextBundle, policy: Option<&ContextPolicy>) -> Result<ContextBundle>;

    /// Write a producer's result into a receiver's declared input map.
    fn route(&self, run: &mut Run, from: &TaskId, to: &TaskId, result: Option<&TaskResult>) -> Result<()>;
}

/// Deterministic char-count token estimation.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, prompt: &str, bundle: Option<&ContextBundle>, extra: &[&str]) -> TokenCount;
}

/// Resolves model pricing and computes estimated cost.
pub trait CostCalculator: Send + Sync {
    fn estimate_cost(&self, tokens: TokenCount, model: &ModelId) -> Result<Cost>;
    fn resolve_role(&self, role: ModelRole) -> Option<ModelId>;
}

/// Pre-execution spend gate and post-execution recorder.
pub trait BudgetEnforcer: Send + Sync {
    fn allow(&self, run: &Run, estimate: &Cost) -> Result<()>;
    fn record(&self, run: &mut Run, actual: &Cost) -> Result<()>;
}

/// Accumulates token usage only; cost is the Budget Enforcer's exclusive
/// duty, to avoid double counting.
pub trait UsageTracker: Send + Sync {
    fn add(&self, run: &mut Run, tokens: TokenCount);
}

/// Drives a single run to completion.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn run(&self, run: &mut Run, cancel: CancellationToken) -> Result<()>;
}

/// A read-optimized snapshot of a run, safe to hand to an HTTP handler
/// without racing the orchestrator's single writer.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub id: RunId,
    /// `pending | running | completed | failed | aborted | aborting`
    /// (`aborting` only ever appears here, never on the `Run` aggregate).
    pub state: String,
    pub tasks: std::collections::BTreeMap<TaskId, workflow_runtime_common::types::Task>,
    pub usage: Usage,
    /// The orchestrator's final error, carrying the same stable code
    /// taxonomy as the HTTP error mapping (e.g. `deadlock`,
    /// `task_failed`, `budget_exceeded`, `cancelled`).
    pub error: Option<TaskError>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// The concurrent registry of active runs, with shadow-state reads that
/// never race the orchestrator's writes.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create(&self, id: RunId, dag: Dag, policy: RunPolicy, tasks: Vec<TaskSpec>) -> Result<RunId>;
    async fn get_snapshot(&self, id: &RunId) -> Result<RunSnapshot>;
    async fn abort(&self, id: &RunId) -> Result<RunSnapshot>;
    async fn cancel_all(&self);
    async fn wait_all(&self, timeout: std::time::Duration);
    async fn prune_completed(&self, retention: std::time::Duration);

    /// The cancellation handle the orchestrator loop should observe for
    /// this run.
    async fn cancel_token(&self, id: &RunId) -> Result<CancellationToken>;

    /// Publish a mid-run progress snapshot into the shadow state.
    async fn sync_shadow(&self, id: &RunId, run: &Run) -> Result<()>;

    /// Final shadow sync plus recorded error; closes the completion
    /// signal exactly once. Called by the driver task after the
    /// orchestrator loop returns.
    async fn mark_done(&self, id: &RunId, run: &Run, error: Option<TaskError>) -> Result<()>;
}
