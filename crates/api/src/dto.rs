//! JSON request/response bodies for the HTTP surface.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use workflow_runtime_common::error::Error;
use workflow_runtime_common::types::{RunPolicy, TaskSpec};
use workflow_runtime_core::RunSnapshot;

/// `POST /runs` request body.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub policy: RunPolicy,
    pub tasks: Vec<TaskSpec>,
}

/// One task's projection inside the run response.
#[derive(Debug, Serialize)]
pub struct TaskDto {
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDto>,
}

/// `{ amount, currency }`, omitted entirely when the run carries no
/// usage yet.
#[derive(Debug, Serialize)]
pub struct CostDto {
    pub amount: f64,
    pub currency: String,
}

#[derive(Debug, Serialize)]
pub struct UsageDto {
    pub tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostDto>,
}

/// `{ code, message }`, shared between the run-level error and every
/// per-task error.
#[derive(Debug, Serialize)]
pub struct ErrorDto {
    pub code: String,
    pub message: String,
}

/// The run response body returned by submit / status / abort.
#[derive(Debug, Serialize)]
pub struct RunDto {
    pub id: String,
    pub state: String,
    pub tasks: BTreeMap<String, TaskDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDto>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<RunSnapshot> for RunDto {
    fn from(snapshot: RunSnapshot) -> Self {
        let tasks = snapshot
            .tasks
            .into_iter()
            .map(|(id, task)| {
                let state = match task.state {
                    workflow_runtime_common::types::TaskState::Pending => "pending",
                    workflow_runtime_common::types::TaskState::Ready => "ready",
                    workflow_runtime_common::types::TaskState::Running => "running",
                    workflow_runtime_common::types::TaskState::Completed => "completed",
                    workflow_runtime_common::types::TaskState::Failed => "failed",
                    workflow_runtime_common::types::TaskState::Skipped => "skipped",
                };
                let dto = TaskDto {
                    state,
                    output: task.outputs.map(|o| o.output),
                    error: task.error.map(|e| ErrorDto {
                        code: e.code,
                        message: e.message,
                    }),
                };
                (id.to_string(), dto)
            })
            .collect();

        let usage = (snapshot.usage.tokens > 0 || !snapshot.usage.cost.is_unset_currency()).then(|| {
            UsageDto {
                tokens: snapshot.usage.tokens,
                cost: (snapshot.usage.cost.amount != 0.0 || !snapshot.usage.cost.is_unset_currency())
                    .then(|| CostDto {
                        amount: snapshot.usage.cost.amount,
                        currency: snapshot.usage.cost.currency,
                    }),
            }
        });

        Self {
            id: snapshot.id.to_string(),
            state: snapshot.state,
            tasks,
            usage,
            error: snapshot.error.map(|e| ErrorDto {
                code: e.code,
                message: e.message,
            }),
            created_at: snapshot.created_at.timestamp_millis(),
            updated_at: snapshot.updated_at.timestamp_millis(),
        }
    }
}

impl From<&Error> for ErrorDto {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// HTTP status for a taxonomy code, per the complete mapping table.
#[must_use]
pub fn status_for_code(code: &str) -> u16 {
    match code {
        "invalid_input" => 400,
        "dag_cycle" | "dag_invalid" | "dep_not_found" | "budget_exceeded" => 422,
        "run_not_found" => 404,
        "run_exists" | "run_completed" | "run_aborted" => 409,
        "task_failed" | "deadlock" | "internal_error" => 500,
        "cancelled" => 499,
        "timeout" => 504,
        "not_implemented" => 501,
        _ => 500,
    }
}
