//! Core data model shared by the engine, the HTTP API, and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque run identifier (caller-supplied or server-synthesized).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

/// Opaque task identifier, unique within a run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

/// Opaque model identifier, resolved against the model catalog.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(pub String);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
impl From<String> for ModelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
impl From<&str> for ModelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Non-negative token count.
pub type TokenCount = u64;

/// A monetary amount with its currency tag. Arithmetic across mismatched
/// currencies is never attempted — a mismatch is an input error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cost {
    pub amount: f64,
    #[serde(default)]
    pub currency: String,
}

impl Cost {
    #[must_use]
    pub fn zero(currency: impl Into<String>) -> Self {
        Self {
            amount: 0.0,
            currency: currency.into(),
        }
    }

    #[must_use]
    pub fn is_unset_currency(&self) -> bool {
        self.currency.is_empty()
    }
}

/// Per-run token and cost usage, accumulated independently by the Usage
/// Tracker (tokens) and the Budget Enforcer (cost) to avoid double
/// counting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub tokens: TokenCount,
    pub cost: Cost,
}

impl Usage {
    #[must_use]
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            tokens: 0,
            cost: Cost::zero(currency),
        }
    }
}

/// One of a task's possible lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Skipped
        )
    }
}

/// A run's overall lifecycle state. The HTTP projection additionally
/// exposes a synthetic `"aborting"` label that has no counterpart here
/// (see the run store's shadow state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl RunState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Aborted
        )
    }
}

/// Context-reduction strategy applied by the Compactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionStrategy {
    None,
    Truncate,
    KeepLastN,
}

impl Default for CompactionStrategy {
    fn default() -> Self {
        CompactionStrategy::None
    }
}

/// Context reduction policy applied before a task is estimated/executed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextPolicy {
    #[serde(default)]
    pub max_tokens: u32,
    #[serde(default)]
    pub strategy: CompactionStrategy,
    #[serde(default)]
    pub keep_last_n: i64,
}

/// Per-run execution policy: concurrency, per-task timeout, budget cap,
/// and optional context reduction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPolicy {
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
    pub budget_limit: Cost,
    #[serde(default)]
    pub context_policy: Option<ContextPolicy>,
}

fn default_max_parallelism() -> usize {
    1
}

/// A task's input bundle, as declared at submission time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskInput {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// A task's output bundle, produced by the injected executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskOutputs {
    pub output: String,
}

/// A stable-coded task-level error, surfaced in the run DTO.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub code: String,
    pub message: String,
}

/// A task as declared by the submitter, before DAG construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    #[serde(default)]
    pub deps: Vec<TaskId>,
    pub model: ModelId,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// A task as tracked by the run, combining its static declaration with
/// its mutable lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub deps: Vec<TaskId>,
    pub model: ModelId,
    pub input: TaskInput,
    pub state: TaskState,
    #[serde(default)]
    pub outputs: Option<TaskOutputs>,
    #[serde(default)]
    pub error: Option<TaskError>,
}

impl Task {
    #[must_use]
    pub fn from_spec(spec: TaskSpec) -> Self {
        Self {
            id: spec.id,
            deps: spec.deps,
            model: spec.model,
            input: TaskInput {
                prompt: spec.prompt,
                inputs: spec.inputs,
                metadata: spec.metadata,
            },
            state: TaskState::Pending,
            outputs: None,
            error: None,
        }
    }
}

/// A node in the dependency DAG: the task's declared dependencies, the
/// dependents derived from the forward edges, and the live pending
/// counter maintained by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagNode {
    pub id: TaskId,
    pub dependencies: Vec<TaskId>,
    pub dependents: Vec<TaskId>,
    pub pending: u32,
}

/// The dependency graph for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dag {
    pub nodes: BTreeMap<TaskId, DagNode>,
}

/// A fully assembled, per-task execution context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextBundle {
    pub messages: Vec<String>,
    pub memory: BTreeMap<String, String>,
    pub tools: BTreeMap<String, String>,
}

/// The result of one task execution, as produced by the injected
/// executor function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub output: String,
    pub usage: Usage,
}

/// A complete, in-memory run aggregate. Owned exclusively by the
/// orchestrator loop for the duration of the run; external readers only
/// ever see the run store's shadow-state projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub state: RunState,
    pub policy: RunPolicy,
    pub dag: Dag,
    pub tasks: BTreeMap<TaskId, Task>,
    pub usage: Usage,
    pub memory: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Pricing and capability metadata for one model, as held in the model
/// catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPricing {
    pub provider: String,
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub max_context: u32,
    #[serde(default)]
    pub default_role: Option<ModelRole>,
    #[serde(default)]
    pub supports_tools: bool,
}

/// Role-based model resolution tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    Flagship,
    Balanced,
    Fast,
}
