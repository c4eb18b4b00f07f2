//! Context builder, compactor, and router.

use tracing::instrument;
use workflow_runtime_common::error::{Error, Result};
use workflow_runtime_common::types::{CompactionStrategy, ContextBundle, ContextPolicy, Run, TaskId, TaskResult, TaskState};
use workflow_runtime_core::{ContextBuilder, TokenEstimator};

#[derive(Debug, Default)]
pub struct DefaultContextBuilder {
    pub chars_per_token: u32,
}

impl DefaultContextBuilder {
    #[must_use]
    pub fn new(chars_per_token: u32) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl ContextBuilder for DefaultContextBuilder {
    #[instrument(skip(self, run))]
    fn build(&self, run: &Run, task_id: &TaskId) -> ContextBundle {
        let mut messages = Vec::new();
        if let Some(task) = run.tasks.get(task_id) {
            for dep in &task.deps {
                let Some(dep_task) = run.tasks.get(dep) else {
                    continue;
                };
                if dep_task.state != TaskState::Completed {
                    continue;
                }
                if let Some(outputs) = &dep_task.outputs {
                    if !outputs.output.is_empty() {
                        messages.push(outputs.output.clone());
                    }
                }
            }
        }
        ContextBundle {
            messages,
            memory: run.memory.clone(),
            tools: std::collections::BTreeMap::new(),
        }
    }

    #[instrument(skip(self, bundle, policy))]
    fn compact(&self, bundle: &ContextBundle, policy: Option<&ContextPolicy>) -> Result<ContextBundle> {
        let mut out = bundle.clone();
        let Some(policy) = policy else {
            return Ok(out);
        };

        match policy.strategy {
            CompactionStrategy::None => {}
            CompactionStrategy::KeepLastN => {
                let n = policy.keep_last_n;
                if n > 0 && (n as usize) < out.messages.len() {
                    let start = out.messages.len() - n as usize;
                    out.messages = out.messages.split_off(start);
                }
            }
            CompactionStrategy::Truncate => {
                if policy.max_tokens > 0 {
                    while !out.messages.is_empty()
                        && self.estimate("", Some(&out), &[]) > u64::from(policy.max_tokens)
                    {
                        out.messages.remove(0);
                    }
                }
            }
        }

        if policy.max_tokens > 0 && self.estimate("", Some(&out), &[]) > u64::from(policy.max_tokens) {
            return Err(Error::ContextTooLarge);
        }
        Ok(out)
    }

    #[instrument(skip(self, run, result))]
    fn route(&self, run: &mut Run, from: &TaskId, to: &TaskId, result: Option<&TaskResult>) -> Result<()> {
        if !run.tasks.contains_key(from) {
            return Err(Error::TaskNotFound(from.to_string()));
        }
        let output = result.map(|r| r.output.clone()).unwrap_or_default();
        let receiver = run
            .tasks
            .get_mut(to)
            .ok_or_else(|| Error::TaskNotFound(to.to_string()))?;
        receiver.input.inputs.insert(from.to_string(), output);
        Ok(())
    }
}

impl TokenEstimator for DefaultContextBuilder {
    fn estimate(&self, prompt: &str, bundle: Option<&ContextBundle>, extra: &[&str]) -> u64 {
        let mut chars = prompt.len();
        if let Some(bundle) = bundle {
            chars += bundle.messages.iter().map(String::len).sum::<usize>();
            chars += bundle.memory.values().map(String::len).sum::<usize>();
            chars += bundle.tools.values().map(String::len).sum::<usize>();
        }
        chars += extra.iter().map(|s| s.len()).sum::<usize>();

        if chars == 0 {
            return 0;
        }
        (chars as u64 / u64::from(self.chars_per_token)).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use workflow_runtime_common::types::{Cost, Dag, RunPolicy, RunState, Task, TaskOutputs, TaskSpec, Usage};

    fn base_run() -> Run {
        Run {
            id: "run-1".into(),
            state: RunState::Running,
            policy: RunPolicy {
                timeout_ms: 0,
                max_parallelism: 1,
                budget_limit: Cost::zero("USD"),
                context_policy: None,
            },
            dag: Dag::default(),
            tasks: BTreeMap::new(),
            usage: Usage::new("USD"),
            memory: BTreeMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn completed_task(id: &str, deps: &[&str], output: &str) -> Task {
        let mut task = Task::from_spec(TaskSpec {
            id: id.into(),
            deps: deps.iter().map(|d| TaskId::from(*d)).collect(),
            model: "fast-1".into(),
            prompt: String::new(),
            inputs: BTreeMap::new(),
            metadata: BTreeMap::new(),
        });
        task.state = TaskState::Completed;
        task.outputs = Some(TaskOutputs {
            output: output.to_string(),
        });
        task
    }

    #[test]
    fn build_skips_incomplete_and_empty_output_deps() {
        let mut run = base_run();
        let mut pending = Task::from_spec(TaskSpec {
            id: "b".into(),
            deps: vec![],
            model: "fast-1".into(),
            prompt: String::new(),
            inputs: BTreeMap::new(),
            metadata: BTreeMap::new(),
        });
        pending.state = TaskState::Running;
        run.tasks.insert(TaskId::from("b"), pending);
        run.tasks.insert(TaskId::from("d"), completed_task("d", &[], ""));
        run.tasks.insert(
            TaskId::from("c"),
            completed_task("c", &["b", "d"], ""),
        );

        let builder = DefaultContextBuilder::new(4);
        let bundle = builder.build(&run, &TaskId::from("c"));
        assert!(bundle.messages.is_empty());
    }

    #[test]
    fn build_preserves_dependency_declaration_order() {
        let mut run = base_run();
        run.tasks.insert(TaskId::from("a"), completed_task("a", &[], "ok:a"));
        run.tasks.insert(TaskId::from("b"), completed_task("b", &[], "ok:b"));
        run.tasks
            .insert(TaskId::from("c"), completed_task("c", &["a", "b"], ""));

        let builder = DefaultContextBuilder::new(4);
        let bundle = builder.build(&run, &TaskId::from("c"));
        assert_eq!(bundle.messages, vec!["ok:a".to_string(), "ok:b".to_string()]);
    }

    #[test]
    fn compact_none_is_identity() {
        let builder = DefaultContextBuilder::new(4);
        let bundle = ContextBundle {
            messages: vec!["a".to_string(), "b".to_string()],
            memory: BTreeMap::new(),
            tools: BTreeMap::new(),
        };
        let policy = ContextPolicy {
            max_tokens: 0,
            strategy: CompactionStrategy::None,
            keep_last_n: 0,
        };
        let out = builder.compact(&bundle, Some(&policy)).unwrap();
        assert_eq!(out.messages, bundle.messages);
    }

    #[test]
    fn keep_last_n_with_n_ge_len_preserves_all() {
        let builder = DefaultContextBuilder::new(4);
        let bundle = ContextBundle {
            messages: vec!["a".to_string(), "b".to_string()],
            memory: BTreeMap::new(),
            tools: BTreeMap::new(),
        };
        let policy = ContextPolicy {
            max_tokens: 0,
            strategy: CompactionStrategy::KeepLastN,
            keep_last_n: 5,
        };
        let out = builder.compact(&bundle, Some(&policy)).unwrap();
        assert_eq!(out.messages, bundle.messages);
    }

    #[test]
    fn keep_last_n_with_n_le_zero_preserves_all() {
        let builder = DefaultContextBuilder::new(4);
        let bundle = ContextBundle {
            messages: vec!["a".to_string(), "b".to_string()],
            memory: BTreeMap::new(),
            tools: BTreeMap::new(),
        };
        let policy = ContextPolicy {
            max_tokens: 0,
            strategy: CompactionStrategy::KeepLastN,
            keep_last_n: 0,
        };
        let out = builder.compact(&bundle, Some(&policy)).unwrap();
        assert_eq!(out.messages, bundle.messages);
    }

    #[test]
    fn truncate_with_zero_max_tokens_is_passthrough() {
        let builder = DefaultContextBuilder::new(4);
        let bundle = ContextBundle {
            messages: vec!["a".repeat(100)],
            memory: BTreeMap::new(),
            tools: BTreeMap::new(),
        };
        let policy = ContextPolicy {
            max_tokens: 0,
            strategy: CompactionStrategy::Truncate,
            keep_last_n: 0,
        };
        let out = builder.compact(&bundle, Some(&policy)).unwrap();
        assert_eq!(out.messages, bundle.messages);
    }

    #[test]
    fn truncate_drops_oldest_until_under_budget() {
        let builder = DefaultContextBuilder::new(4);
        let bundle = ContextBundle {
            messages: vec!["a".repeat(40), "b".repeat(4)],
            memory: BTreeMap::new(),
            tools: BTreeMap::new(),
        };
        let policy = ContextPolicy {
            max_tokens: 2,
            strategy: CompactionStrategy::Truncate,
            keep_last_n: 0,
        };
        let out = builder.compact(&bundle, Some(&policy)).unwrap();
        assert_eq!(out.messages, vec!["b".repeat(4)]);
    }

    #[test]
    fn still_over_budget_after_compaction_errors() {
        // Memory is never compacted, so an oversized memory map alone
        // forces ErrContextTooLarge even after every message is dropped.
        let builder = DefaultContextBuilder::new(4);
        let mut memory = BTreeMap::new();
        memory.insert("k".to_string(), "m".repeat(100));
        let bundle = ContextBundle {
            messages: vec!["a".repeat(100)],
            memory,
            tools: BTreeMap::new(),
        };
        let policy = ContextPolicy {
            max_tokens: 2,
            strategy: CompactionStrategy::Truncate,
            keep_last_n: 0,
        };
        let err = builder.compact(&bundle, Some(&policy)).unwrap_err();
        assert_eq!(err.code(), "context_too_large");
    }

    #[test]
    fn short_input_estimates_to_exactly_one_token() {
        let builder = DefaultContextBuilder::new(4);
        assert_eq!(builder.estimate("hi", None, &[]), 1);
    }

    #[test]
    fn empty_input_estimates_to_zero() {
        let builder = DefaultContextBuilder::new(4);
        assert_eq!(builder.estimate("", None, &[]), 0);
    }

    #[test]
    fn route_writes_into_receiver_inputs_and_defaults_nil_to_empty() {
        let mut run = base_run();
        run.tasks.insert(TaskId::from("a"), completed_task("a", &[], "ok:a"));
        run.tasks
            .insert(TaskId::from("b"), completed_task("b", &["a"], ""));

        let builder = DefaultContextBuilder::new(4);
        builder.route(&mut run, &TaskId::from("a"), &TaskId::from("b"), None).unwrap();
        assert_eq!(run.tasks[&TaskId::from("b")].input.inputs["a"], "");

        builder
            .route(
                &mut run,
                &TaskId::from("a"),
                &TaskId::from("b"),
                Some(&TaskResult {
                    output: "ok:a".to_string(),
                    usage: Usage::new("USD"),
                }),
            )
            .unwrap();
        assert_eq!(run.tasks[&TaskId::from("b")].input.inputs["a"], "ok:a");
    }
}
