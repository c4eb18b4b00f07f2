#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! The concrete orchestration engine: a `DefaultOrchestrator` that wires
//! the dependency resolver, scheduler, queue, parallel executor, context
//! builder, cost calculator, budget enforcer, and usage tracker into a
//! single per-run drive loop.

pub mod budget;
pub mod context;
pub mod dag;
pub mod executor;
pub mod scheduler;
pub mod store;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use workflow_runtime_common::error::{Error, Result};
use workflow_runtime_common::metrics::MetricsCollector;
use workflow_runtime_common::types::{Run, RunId, RunState, TaskError, TaskId, TaskState};
use workflow_runtime_core::{
    BudgetEnforcer, ContextBuilder, CostCalculator, DependencyResolver, Orchestrator,
    ParallelExecutor, Queue, RunStore, Scheduler, TokenEstimator, UsageTracker,
};

pub use budget::{CatalogCostCalculator, DefaultBudgetEnforcer, DefaultUsageTracker};
pub use context::DefaultContextBuilder;
pub use dag::DefaultDependencyResolver;
pub use executor::{DefaultParallelExecutor, EchoExecutor, InProgressSet};
pub use scheduler::{DefaultScheduler, FifoQueue};
pub use store::InMemoryRunStore;

/// Drives one run from `Running` to a terminal state, per the
/// orchestrator loop design: a "queued" set preventing double-enqueue, a
/// main loop that alternates between draining the ready queue and
/// re-filling it from the scheduler, and a per-task pipeline that builds
/// context, gates spend, executes, and routes results to dependents.
pub struct DefaultOrchestrator<CB> {
    resolver: Arc<dyn DependencyResolver>,
    scheduler: Arc<dyn Scheduler>,
    queue: Arc<dyn Queue>,
    executor: Arc<dyn ParallelExecutor>,
    context: Arc<CB>,
    cost: Arc<dyn CostCalculator>,
    budget: Arc<dyn BudgetEnforcer>,
    usage: Arc<dyn UsageTracker>,
    metrics: Arc<dyn MetricsCollector>,
    sync: Option<(Arc<dyn RunStore>, RunId)>,
}

impl<CB> DefaultOrchestrator<CB>
where
    CB: ContextBuilder + TokenEstimator,
{
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resolver: Arc<dyn DependencyResolver>,
        scheduler: Arc<dyn Scheduler>,
        queue: Arc<dyn Queue>,
        executor: Arc<dyn ParallelExecutor>,
        context: Arc<CB>,
        cost: Arc<dyn CostCalculator>,
        budget: Arc<dyn BudgetEnforcer>,
        usage: Arc<dyn UsageTracker>,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        Self {
            resolver,
            scheduler,
            queue,
            executor,
            context,
            cost,
            budget,
            usage,
            metrics,
            sync: None,
        }
    }

    /// Publish a shadow-state snapshot into `store` under `id` after
    /// every task that reaches a terminal state, so HTTP readers observe
    /// progress instead of only the pending-or-done ends of a run.
    #[must_use]
    pub fn with_shadow_sync(mut self, store: Arc<dyn RunStore>, id: RunId) -> Self {
        self.sync = Some((store, id));
        self
    }

    async fn sync_progress(&self, run: &Run) {
        if let Some((store, id)) = &self.sync {
            if let Err(err) = store.sync_shadow(id, run).await {
                tracing::warn!(run_id = %id, error = %err, "shadow sync failed");
            }
        }
    }

    /// Remove `id` from the run's queued set, build and compact its
    /// context, gate spend, execute, record usage, route to dependents,
    /// and mark it complete. Any failure here is the caller's signal to
    /// fail the run.
    async fn run_task(
        &self,
        run: &mut Run,
        cancel: &CancellationToken,
        id: &TaskId,
        in_progress: &executor::InProgressSet,
    ) -> Result<()> {
        in_progress.remove(id);

        let bundle = self.context.build(run, id);
        let policy = run.policy.context_policy.clone();
        let bundle = self.context.compact(&bundle, policy.as_ref())?;

        let task = run
            .tasks
            .get(id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
        let model = task.model.clone();
        let prompt = task.input.prompt.clone();

        let extra: Vec<&str> = task
            .input
            .inputs
            .values()
            .chain(task.input.metadata.values())
            .map(String::as_str)
            .collect();
        let tokens = self.context.estimate(&prompt, Some(&bundle), &extra);
        let estimate = self.cost.estimate_cost(tokens, &model)?;

        if let Err(err) = self.budget.allow(run, &estimate) {
            self.fail_task(run, id, "budget_exceeded", &err.to_string());
            self.metrics.record_budget_rejection(run.id.to_string().as_str());
            return Err(err);
        }

        if let Some(task) = run.tasks.get_mut(id) {
            task.state = TaskState::Running;
        }

        let result = self
            .executor
            .execute(cancel, run.policy.timeout_ms, &model, id, &bundle, &prompt)
            .await;

        let result = match result {
            Ok(result) => result,
            Err(err) => {
                let code = err.code().to_string();
                self.fail_task(run, id, &code, &err.to_string());
                return Err(Error::TaskFailed(format!("{id}: {err}")));
            }
        };

        if result.usage.tokens == 0 {
            let err = Error::Internal(format!("{id}: executor reported zero token usage"));
            self.fail_task(run, id, "task_failed", &err.to_string());
            return Err(err);
        }

        if let Err(err) = self.budget.record(run, &result.usage.cost) {
            self.fail_task(run, id, "budget_exceeded", &err.to_string());
            self.metrics.record_budget_rejection(run.id.to_string().as_str());
            return Err(err);
        }
        self.usage.add(run, result.usage.tokens);
        self.metrics.record_tokens(&model.to_string(), result.usage.tokens);

        let dependents = run
            .dag
            .nodes
            .get(id)
            .map(|n| n.dependents.clone())
            .unwrap_or_default();
        for dependent in &dependents {
            self.context.route(run, id, dependent, Some(&result))?;
        }

        self.scheduler.mark_complete(run, id, result)?;
        self.metrics.record_task_terminal("completed");
        Ok(())
    }

    fn fail_task(&self, run: &mut Run, id: &TaskId, code: &str, message: &str) {
        if let Some(task) = run.tasks.get_mut(id) {
            task.state = TaskState::Failed;
            task.error = Some(TaskError {
                code: code.to_string(),
                message: message.to_string(),
            });
        }
        self.metrics.record_task_terminal("failed");
        self.metrics.record_error(code, "high");
    }
}

#[async_trait]
impl<CB> Orchestrator for DefaultOrchestrator<CB>
where
    CB: ContextBuilder + TokenEstimator + Send + Sync,
{
    #[instrument(skip(self, run, cancel), fields(run_id = %run.id))]
    async fn run(&self, run: &mut Run, cancel: CancellationToken) -> Result<()> {
        self.resolver.validate(&run.dag)?;
        run.state = RunState::Running;

        let in_progress = executor::InProgressSet::new();
        let mut any_task_started = false;
        let mut last_progress: i64 = -1;

        loop {
            if cancel.is_cancelled() {
                if any_task_started {
                    run.state = RunState::Failed;
                    return Err(Error::TaskCancelled);
                }
                run.state = RunState::Aborted;
                return Err(Error::TaskCancelled);
            }

            let Some(id) = self.queue.dequeue() else {
                let terminal = run
                    .tasks
                    .values()
                    .filter(|t| t.state.is_terminal())
                    .count();
                let total = run.tasks.len();

                if terminal == total {
                    let any_failed = run.tasks.values().any(|t| t.state == TaskState::Failed);
                    run.state = if any_failed {
                        RunState::Failed
                    } else {
                        RunState::Completed
                    };
                    return Ok(());
                }

                let ready = self.scheduler.next_ready(run)?;
                let mut added = 0usize;
                for id in ready {
                    if in_progress.insert(id.clone()) {
                        self.queue.enqueue(id);
                        added += 1;
                    }
                }

                if added == 0 && last_progress == terminal as i64 {
                    run.state = RunState::Failed;
                    return Err(Error::Deadlock);
                }
                last_progress = terminal as i64;
                continue;
            };

            any_task_started = true;
            if let Err(err) = self.run_task(run, &cancel, &id, &in_progress).await {
                run.state = RunState::Failed;
                self.sync_progress(run).await;
                return Err(err);
            }
            self.sync_progress(run).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use workflow_runtime_common::types::{Cost, ModelRole, RunPolicy, TaskSpec};

    fn build(policy: RunPolicy, specs: Vec<TaskSpec>) -> (Run, DefaultOrchestrator<DefaultContextBuilder>) {
        let resolver = Arc::new(DefaultDependencyResolver::new());
        let dag = resolver.build_dag(&specs).unwrap();

        let mut catalog = std::collections::HashMap::new();
        catalog.insert(
            "fast-1".to_string(),
            workflow_runtime_common::types::ModelPricing {
                provider: "generic".to_string(),
                input_per_million: 1.0,
                output_per_million: 1.0,
                max_context: 1000,
                default_role: Some(ModelRole::Fast),
                supports_tools: false,
            },
        );

        let tasks = specs
            .iter()
            .cloned()
            .map(|s| (s.id.clone(), workflow_runtime_common::types::Task::from_spec(s)))
            .collect();

        let run = Run {
            id: "r1".into(),
            state: RunState::Pending,
            policy,
            dag,
            tasks,
            usage: workflow_runtime_common::types::Usage::new(""),
            memory: BTreeMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let orchestrator = DefaultOrchestrator::new(
            resolver,
            Arc::new(DefaultScheduler::new()),
            Arc::new(FifoQueue::new()),
            Arc::new(DefaultParallelExecutor::new(4, Arc::new(EchoExecutor))),
            Arc::new(DefaultContextBuilder::new(4)),
            Arc::new(CatalogCostCalculator::new(catalog)),
            Arc::new(DefaultBudgetEnforcer::new()),
            Arc::new(DefaultUsageTracker::new()),
            Arc::new(workflow_runtime_common::metrics::DefaultMetricsCollector),
        );
        (run, orchestrator)
    }

    fn spec(id: &str, deps: &[&str]) -> TaskSpec {
        TaskSpec {
            id: id.into(),
            deps: deps.iter().map(|d| TaskId::from(*d)).collect(),
            model: "fast-1".into(),
            prompt: "p".to_string(),
            inputs: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn diamond_dag_completes_successfully() {
        let (mut run, orchestrator) = build(
            RunPolicy {
                timeout_ms: 0,
                max_parallelism: 4,
                budget_limit: Cost {
                    amount: 10.0,
                    currency: "USD".to_string(),
                },
                context_policy: None,
            },
            vec![
                spec("a", &[]),
                spec("b", &["a"]),
                spec("c", &["a"]),
                spec("d", &["b", "c"]),
            ],
        );
        orchestrator.run(&mut run, CancellationToken::new()).await.unwrap();
        assert_eq!(run.state, RunState::Completed);
        assert!(run.tasks.values().all(|t| t.state == TaskState::Completed));
        assert!(run.usage.tokens > 0);
    }

    #[tokio::test]
    async fn over_budget_run_fails_and_records_task_error() {
        let (mut run, orchestrator) = build(
            RunPolicy {
                timeout_ms: 0,
                max_parallelism: 4,
                budget_limit: Cost {
                    amount: 0.0000001,
                    currency: "USD".to_string(),
                },
                context_policy: None,
            },
            vec![spec("a", &[])],
        );
        let err = orchestrator
            .run(&mut run, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "budget_exceeded");
        assert_eq!(run.state, RunState::Failed);
        assert_eq!(run.tasks[&TaskId::from("a")].error.as_ref().unwrap().code, "budget_exceeded");
    }

    #[tokio::test]
    async fn cancellation_before_any_task_starts_is_aborted() {
        let (mut run, orchestrator) = build(
            RunPolicy {
                timeout_ms: 0,
                max_parallelism: 4,
                budget_limit: Cost {
                    amount: 10.0,
                    currency: "USD".to_string(),
                },
                context_policy: None,
            },
            vec![spec("a", &[])],
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = orchestrator.run(&mut run, cancel).await.unwrap_err();
        assert_eq!(err.code(), "cancelled");
        assert_eq!(run.state, RunState::Aborted);
    }

    #[tokio::test]
    async fn unknown_model_fails_the_run() {
        let (mut run, orchestrator) = build(
            RunPolicy {
                timeout_ms: 0,
                max_parallelism: 4,
                budget_limit: Cost {
                    amount: 10.0,
                    currency: "USD".to_string(),
                },
                context_policy: None,
            },
            vec![spec("a", &[])],
        );
        run.tasks.get_mut(&TaskId::from("a")).unwrap().model = "ghost".into();
        let err = orchestrator.run(&mut run, CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code(), "invalid_input");
        assert_eq!(run.state, RunState::Failed);
    }
}
