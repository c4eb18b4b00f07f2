//! End-to-end scenarios driving the full `Orchestrator::run` entry point,
//! one per numbered case.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use workflow_runtime_common::error::{Error, Result};
use workflow_runtime_common::metrics::DefaultMetricsCollector;
use workflow_runtime_common::types::{
    ContextBundle, ContextPolicy, Cost, ModelId, ModelPricing, ModelRole, Run, RunPolicy, RunState,
    TaskError, TaskId, TaskResult, TaskSpec, TaskState, Usage,
};
use workflow_runtime_core::{DependencyResolver, Orchestrator, RunStore, TaskExecutorFn};
use workflow_runtime_orchestrator::{
    CatalogCostCalculator, DefaultBudgetEnforcer, DefaultContextBuilder, DefaultDependencyResolver,
    DefaultOrchestrator, DefaultParallelExecutor, DefaultScheduler, DefaultUsageTracker, FifoQueue,
    InMemoryRunStore,
};

/// Stands in for the injected task-execution function: echoes `"ok:<id>"`
/// (tests set each task's prompt to its own id), reports a fixed
/// tokens/cost per call, optionally fails on one id, optionally sleeps on
/// another to give a test room to race an abort against it.
struct ScenarioExecutor {
    tokens: u64,
    cost_per_task: f64,
    fail_on: Option<String>,
    delay: HashMap<String, Duration>,
}

impl ScenarioExecutor {
    fn new(tokens: u64, cost_per_task: f64) -> Self {
        Self {
            tokens,
            cost_per_task,
            fail_on: None,
            delay: HashMap::new(),
        }
    }

    fn failing_on(mut self, id: &str) -> Self {
        self.fail_on = Some(id.to_string());
        self
    }

    fn delayed(mut self, id: &str, delay: Duration) -> Self {
        self.delay.insert(id.to_string(), delay);
        self
    }
}

#[async_trait]
impl TaskExecutorFn for ScenarioExecutor {
    async fn call(&self, _model: &ModelId, _bundle: &ContextBundle, prompt: &str) -> Result<TaskResult> {
        if let Some(delay) = self.delay.get(prompt) {
            tokio::time::sleep(*delay).await;
        }
        if self.fail_on.as_deref() == Some(prompt) {
            return Err(Error::Internal(format!("scenario executor: forced failure on {prompt}")));
        }
        Ok(TaskResult {
            output: format!("ok:{prompt}"),
            usage: Usage {
                tokens: self.tokens,
                cost: Cost {
                    amount: self.cost_per_task,
                    currency: "USD".to_string(),
                },
            },
        })
    }
}

fn spec(id: &str, deps: &[&str]) -> TaskSpec {
    TaskSpec {
        id: id.into(),
        deps: deps.iter().map(|d| TaskId::from(*d)).collect(),
        model: "fast-1".into(),
        prompt: id.to_string(),
        inputs: BTreeMap::new(),
        metadata: BTreeMap::new(),
    }
}

fn catalog() -> HashMap<String, ModelPricing> {
    let mut m = HashMap::new();
    m.insert(
        "fast-1".to_string(),
        ModelPricing {
            provider: "generic".to_string(),
            input_per_million: 1.0,
            output_per_million: 1.0,
            max_context: 1_000_000,
            default_role: Some(ModelRole::Fast),
            supports_tools: false,
        },
    );
    m
}

fn policy(max_parallelism: usize, budget: f64) -> RunPolicy {
    RunPolicy {
        timeout_ms: 0,
        max_parallelism,
        budget_limit: Cost {
            amount: budget,
            currency: "USD".to_string(),
        },
        context_policy: None::<ContextPolicy>,
    }
}

fn build_run(specs: Vec<TaskSpec>, policy: RunPolicy) -> Run {
    let resolver = DefaultDependencyResolver::new();
    let dag = resolver.build_dag(&specs).unwrap();
    resolver.validate(&dag).unwrap();
    let tasks = specs
        .into_iter()
        .map(|s| (s.id.clone(), workflow_runtime_common::types::Task::from_spec(s)))
        .collect();
    let now = Utc::now();
    Run {
        id: "scenario".into(),
        state: RunState::Pending,
        policy,
        dag,
        tasks,
        usage: Usage::new(""),
        memory: BTreeMap::new(),
        created_at: now,
        updated_at: now,
    }
}

fn orchestrator(
    max_parallelism: usize,
    executor: ScenarioExecutor,
) -> DefaultOrchestrator<DefaultContextBuilder> {
    DefaultOrchestrator::new(
        Arc::new(DefaultDependencyResolver::new()),
        Arc::new(DefaultScheduler::new()),
        Arc::new(FifoQueue::new()),
        Arc::new(DefaultParallelExecutor::new(max_parallelism, Arc::new(executor))),
        Arc::new(DefaultContextBuilder::new(4)),
        Arc::new(CatalogCostCalculator::new(catalog())),
        Arc::new(DefaultBudgetEnforcer::new()),
        Arc::new(DefaultUsageTracker::new()),
        Arc::new(DefaultMetricsCollector),
    )
}

/// 1. Linear chain A -> B -> C completes in order, routing each
/// predecessor's output into its dependent's inputs.
#[tokio::test]
async fn scenario_1_linear_chain_completes_and_routes_outputs() {
    let mut run = build_run(
        vec![spec("A", &[]), spec("B", &["A"]), spec("C", &["B"])],
        policy(1, 1.0),
    );
    let orch = orchestrator(1, ScenarioExecutor::new(100, 0.000_075));
    orch.run(&mut run, CancellationToken::new()).await.unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.tasks[&TaskId::from("B")].input.inputs["A"], "ok:A");
    assert_eq!(run.tasks[&TaskId::from("C")].input.inputs["B"], "ok:B");
    assert_eq!(run.usage.tokens, 300);
}

/// 2. Two independent tasks feed a joint dependent; the dependent only
/// becomes ready once both have completed, and sees both outputs.
#[tokio::test]
async fn scenario_2_join_waits_for_both_parents() {
    let mut run = build_run(
        vec![spec("A", &[]), spec("B", &[]), spec("C", &["A", "B"])],
        policy(2, 1.0),
    );
    let orch = orchestrator(2, ScenarioExecutor::new(100, 0.000_075));
    orch.run(&mut run, CancellationToken::new()).await.unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.tasks[&TaskId::from("C")].input.inputs["A"], "ok:A");
    assert_eq!(run.tasks[&TaskId::from("C")].input.inputs["B"], "ok:B");
    assert_eq!(run.usage.tokens, 300);
}

/// 3. Diamond A -> {B,C} -> D: A runs first, D last, and D sees both of
/// its parents' outputs.
#[tokio::test]
async fn scenario_3_diamond_completes_with_both_branches_routed() {
    let mut run = build_run(
        vec![
            spec("A", &[]),
            spec("B", &["A"]),
            spec("C", &["A"]),
            spec("D", &["B", "C"]),
        ],
        policy(2, 1.0),
    );
    let orch = orchestrator(2, ScenarioExecutor::new(100, 0.000_075));
    orch.run(&mut run, CancellationToken::new()).await.unwrap();

    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.tasks[&TaskId::from("D")].input.inputs["B"], "ok:B");
    assert_eq!(run.tasks[&TaskId::from("D")].input.inputs["C"], "ok:C");
    assert_eq!(run.usage.tokens, 400);
}

/// 4. A tight budget lets A and B through but rejects C at the gate; the
/// task carries a `budget_exceeded` error and the run fails.
#[tokio::test]
async fn scenario_4_budget_gate_stops_third_task() {
    let mut run = build_run(
        vec![spec("A", &[]), spec("B", &["A"]), spec("C", &["B"])],
        policy(1, 0.000_152_1),
    );
    let orch = orchestrator(1, ScenarioExecutor::new(100, 0.000_076));
    let err = orch.run(&mut run, CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.code(), "budget_exceeded");
    assert_eq!(run.state, RunState::Failed);
    assert_eq!(run.tasks[&TaskId::from("A")].state, TaskState::Completed);
    assert_eq!(run.tasks[&TaskId::from("B")].state, TaskState::Completed);
    assert_eq!(run.tasks[&TaskId::from("C")].state, TaskState::Failed);
    assert_eq!(
        run.tasks[&TaskId::from("C")].error.as_ref().unwrap().code,
        "budget_exceeded"
    );
}

/// 5. The executor fails on B; A has already completed, C never runs
/// because B's failure strands it, and the run fails with a wrapped
/// `task_failed`.
#[tokio::test]
async fn scenario_5_mid_chain_failure_strands_downstream() {
    let mut run = build_run(
        vec![spec("A", &[]), spec("B", &["A"]), spec("C", &["B"])],
        policy(1, 10.0),
    );
    let orch = orchestrator(1, ScenarioExecutor::new(100, 0.000_075).failing_on("B"));
    let err = orch.run(&mut run, CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.code(), "task_failed");
    assert_eq!(run.state, RunState::Failed);
    assert_eq!(run.tasks[&TaskId::from("A")].state, TaskState::Completed);
    assert_eq!(run.tasks[&TaskId::from("B")].state, TaskState::Failed);
    assert_eq!(run.tasks[&TaskId::from("C")].state, TaskState::Pending);
}

/// 6. Submitting the same run id twice while the first is still
/// registered is rejected with `run_exists`, at the store layer the HTTP
/// submit handler relies on.
#[tokio::test]
async fn scenario_6_duplicate_run_id_is_rejected() {
    let store = InMemoryRunStore::new();
    let specs = vec![spec("A", &[])];
    let resolver = DefaultDependencyResolver::new();
    let dag = resolver.build_dag(&specs).unwrap();

    store
        .create("dup".into(), dag.clone(), policy(1, 1.0), specs.clone())
        .await
        .unwrap();
    let err = store
        .create("dup".into(), dag, policy(1, 1.0), specs)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "run_exists");
}

/// 7. A cyclic submission is rejected by validation before any run is
/// registered in the store.
#[tokio::test]
async fn scenario_7_cycle_is_rejected_before_registration() {
    let store = InMemoryRunStore::new();
    let specs = vec![spec("A", &["B"]), spec("B", &["A"])];
    let resolver = DefaultDependencyResolver::new();
    let dag = resolver.build_dag(&specs).unwrap();
    let err = resolver.validate(&dag).unwrap_err();
    assert_eq!(err.code(), "dag_cycle");

    // No run ever gets as far as store registration.
    assert!(matches!(
        store.get_snapshot(&"cyclic".into()).await.unwrap_err().code(),
        "run_not_found"
    ));
}

/// 8. Aborting after the first task has started surfaces as `"aborting"`
/// in the shadow snapshot while the orchestrator is still draining, then
/// settles as `Failed` with a cancellation error (mid-task cancellation
/// is never `Aborted` — that label is reserved for pre-start abort).
#[tokio::test]
async fn scenario_8_abort_after_first_task_starts() {
    let store = Arc::new(InMemoryRunStore::new());
    let specs = vec![spec("A", &[]), spec("B", &["A"])];
    let resolver = DefaultDependencyResolver::new();
    let dag = resolver.build_dag(&specs).unwrap();
    resolver.validate(&dag).unwrap();

    let id = workflow_runtime_common::types::RunId::from("abort-me");
    store
        .create(id.clone(), dag.clone(), policy(1, 10.0), specs.clone())
        .await
        .unwrap();
    let cancel = store.cancel_token(&id).await.unwrap();

    let mut run = build_run(specs, policy(1, 10.0));
    run.id = id.clone();

    let executor = ScenarioExecutor::new(100, 0.000_075).delayed("A", Duration::from_millis(150));
    let orch = orchestrator(1, executor).with_shadow_sync(store.clone() as Arc<dyn RunStore>, id.clone());

    let driver = tokio::spawn(async move {
        let result = orch.run(&mut run, cancel).await;
        (run, result)
    });

    tokio::time::sleep(Duration::from_millis(40)).await;
    let snapshot = store.abort(&id).await.unwrap();
    assert_eq!(snapshot.state, "aborting");

    let (final_run, outcome) = driver.await.unwrap();
    assert!(outcome.is_err());
    store
        .mark_done(
            &id,
            &final_run,
            outcome.err().map(|e| TaskError {
                code: e.code().to_string(),
                message: e.to_string(),
            }),
        )
        .await
        .unwrap();

    let final_snapshot = store.get_snapshot(&id).await.unwrap();
    assert_eq!(final_snapshot.state, "failed");
}
