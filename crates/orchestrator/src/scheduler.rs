//! Ready-set scheduler and the FIFO task queue.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::instrument;
use workflow_runtime_common::error::{Error, Result};
use workflow_runtime_common::types::{Run, RunState, TaskId, TaskResult, TaskState};
use workflow_runtime_core::{Queue, Scheduler};

/// Computes the ready set and maintains the DAG's pending counters.
#[derive(Debug, Default)]
pub struct DefaultScheduler;

impl DefaultScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for DefaultScheduler {
    #[instrument(skip(self, run))]
    fn next_ready(&self, run: &Run) -> Result<Vec<TaskId>> {
        if run.state != RunState::Running {
            return Err(Error::RunCompleted);
        }
        let mut ready: Vec<TaskId> = run
            .dag
            .nodes
            .values()
            .filter(|node| node.pending == 0)
            .filter_map(|node| {
                let task = run.tasks.get(&node.id)?;
                matches!(task.state, TaskState::Pending | TaskState::Ready).then(|| node.id.clone())
            })
            .collect();
        ready.sort();
        Ok(ready)
    }

    #[instrument(skip(self, run, result))]
    fn mark_complete(&self, run: &mut Run, task_id: &TaskId, result: TaskResult) -> Result<()> {
        let task = run
            .tasks
            .get(task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        if task.state.is_terminal() {
            return Err(Error::TaskNotReady(task_id.to_string()));
        }

        let dependents = run
            .dag
            .nodes
            .get(task_id)
            .map(|n| n.dependents.clone())
            .unwrap_or_default();

        let task = run.tasks.get_mut(task_id).expect("checked above");
        task.state = TaskState::Completed;
        task.outputs = Some(workflow_runtime_common::types::TaskOutputs {
            output: result.output,
        });

        for dependent in dependents {
            if let Some(node) = run.dag.nodes.get_mut(&dependent) {
                node.pending = node.pending.saturating_sub(1);
            }
        }
        Ok(())
    }
}

/// Unbounded FIFO behind a plain mutex. The baseline driver is the sole
/// user, but the lock means a future multi-driver design does not need
/// to change the queue's contract.
#[derive(Debug, Default)]
pub struct FifoQueue {
    inner: Mutex<VecDeque<TaskId>>,
}

impl FifoQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Queue for FifoQueue {
    fn enqueue(&self, task_id: TaskId) {
        self.inner.lock().push_back(task_id);
    }

    fn dequeue(&self) -> Option<TaskId> {
        self.inner.lock().pop_front()
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
