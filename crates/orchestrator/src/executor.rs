//! Parallel executor: bounded-concurrency invocation of the injected
//! task-execution function, with per-task timeout and cancellation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};
use workflow_runtime_common::error::{Error, Result};
use workflow_runtime_common::types::{ContextBundle, ModelId, TaskId, TaskResult};
use workflow_runtime_core::{ParallelExecutor, TaskExecutorFn};

/// An echo stub standing in for a real LLM call: returns `"ok:<task_id>"`
/// with a deliberately non-trivial token usage so the budget gate has
/// something to bite on in tests. This is the default executor the
/// binary runs with when nothing else is injected.
#[derive(Debug, Default)]
pub struct EchoExecutor;

#[async_trait]
impl TaskExecutorFn for EchoExecutor {
    async fn call(&self, _model: &ModelId, _bundle: &ContextBundle, prompt: &str) -> Result<TaskResult> {
        let _ = prompt;
        Ok(TaskResult {
            output: String::new(),
            usage: workflow_runtime_common::types::Usage {
                tokens: 100,
                cost: workflow_runtime_common::types::Cost {
                    amount: 0.0075,
                    currency: "USD".to_string(),
                },
            },
        })
    }
}

/// Bounds concurrent invocations of the injected executor to
/// `max_parallelism`, races each call against its deadline and the
/// caller's cancellation, and rejects in-flight duplicates. Never
/// touches task state itself — the purity rule the orchestrator loop
/// relies on.
pub struct DefaultParallelExecutor {
    semaphore: Arc<Semaphore>,
    in_flight: Arc<DashSet<TaskId>>,
    executor: Arc<dyn TaskExecutorFn>,
}

impl DefaultParallelExecutor {
    #[must_use]
    pub fn new(max_parallelism: usize, executor: Arc<dyn TaskExecutorFn>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_parallelism.max(1))),
            in_flight: Arc::new(DashSet::new()),
            executor,
        }
    }
}

#[async_trait]
impl ParallelExecutor for DefaultParallelExecutor {
    #[instrument(skip(self, cancel, bundle, prompt))]
    async fn execute(
        &self,
        cancel: &CancellationToken,
        timeout_ms: u64,
        model: &ModelId,
        task_id: &TaskId,
        bundle: &ContextBundle,
        prompt: &str,
    ) -> Result<TaskResult> {
        if !self.in_flight.insert(task_id.clone()) {
            return Err(Error::TaskNotReady(task_id.to_string()));
        }
        let _guard = InFlightGuard {
            set: &self.in_flight,
            id: task_id,
        };

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::TaskCancelled),
            permit = self.semaphore.acquire() => permit.map_err(|e| Error::Internal(e.to_string()))?,
        };

        let call = self.executor.call(model, bundle, prompt);
        let result = if timeout_ms > 0 {
            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(Error::TaskCancelled),
                r = tokio::time::timeout(Duration::from_millis(timeout_ms), call) => match r {
                    Ok(inner) => inner.map_err(|e| Error::TaskFailed(e.to_string())),
                    Err(_) => Err(Error::TaskTimeout),
                },
            }
        } else {
            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(Error::TaskCancelled),
                inner = call => inner.map_err(|e| Error::TaskFailed(e.to_string())),
            }
        };

        drop(permit);
        if result.is_err() {
            warn!(task = %task_id, "task execution did not succeed");
        }
        result
    }
}

struct InFlightGuard<'a> {
    set: &'a DashSet<TaskId>,
    id: &'a TaskId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(self.id);
    }
}

/// Tracks ids currently queued or executing so the orchestrator loop
/// never enqueues the same task twice.
#[derive(Debug, Default)]
pub struct InProgressSet {
    inner: Mutex<HashSet<TaskId>>,
}

impl InProgressSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: TaskId) -> bool {
        self.inner.lock().insert(id)
    }

    pub fn remove(&self, id: &TaskId) {
        self.inner.lock().remove(id);
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.inner.lock().contains(id)
    }
}
