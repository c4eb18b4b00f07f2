//! Route handlers: validation, run creation, and shadow-state reads.
//!
//! Every handler translates the engine's error taxonomy into an HTTP
//! status via [`crate::dto::status_for_code`] and never holds a lock or
//! the live `Run` aggregate across an await point — reads go through
//! `RunStore::get_snapshot`, writes go through `RunStore::create` /
//! `abort`, and the orchestrator drive loop itself runs detached in a
//! spawned task.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use workflow_runtime_common::error::Error;
use workflow_runtime_common::types::{Run, RunId, RunState, Task, TaskError, Usage};
use workflow_runtime_core::{DependencyResolver, Orchestrator, RunStore};

use crate::dto::{status_for_code, ErrorDto, RunDto, SubmitRequest};
use crate::routes::AppState;

fn error_response(err: &Error) -> Response {
    let dto = ErrorDto::from(err);
    let status = StatusCode::from_u16(status_for_code(&dto.code)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(dto)).into_response()
}

fn invalid(message: impl Into<String>) -> Response {
    error_response(&Error::InvalidInput(message.into()))
}

fn synthesize_run_id() -> RunId {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    RunId::from(format!("run-{nanos}"))
}

fn validate_request(request: &SubmitRequest) -> Result<(), Response> {
    if request.tasks.is_empty() {
        return Err(invalid("tasks must not be empty"));
    }
    let mut seen = BTreeSet::new();
    for task in &request.tasks {
        if !seen.insert(task.id.clone()) {
            return Err(invalid(format!("duplicate task id: {}", task.id)));
        }
        if task.prompt.trim().is_empty() {
            return Err(invalid(format!("task {} has an empty prompt", task.id)));
        }
        if task.model.0.trim().is_empty() {
            return Err(invalid(format!("task {} has no model", task.id)));
        }
    }
    if request.policy.budget_limit.amount <= 0.0 {
        return Err(invalid("policy.budget_limit.amount must be positive"));
    }
    if request.policy.max_parallelism == 0 {
        return Err(invalid("policy.max_parallelism must be positive"));
    }
    Ok(())
}

/// `POST /api/v1/runs`
///
/// Body parsing goes through a fallible extractor rather than
/// `Json<SubmitRequest>` directly so that an oversize body (rejected by
/// the router's `DefaultBodyLimit`) surfaces as the documented
/// `invalid_input` / 400 rather than axum's default 413.
pub async fn submit(State(state): State<Arc<AppState>>, body: Result<Json<SubmitRequest>, JsonRejection>) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return invalid(rejection.body_text()),
    };
    if let Err(response) = validate_request(&request) {
        return response;
    }

    let id = request
        .id
        .map(RunId::from)
        .unwrap_or_else(synthesize_run_id);

    let dag = match state.resolver.build_dag(&request.tasks) {
        Ok(dag) => dag,
        Err(err) => return error_response(&err),
    };
    if let Err(err) = state.resolver.validate(&dag) {
        return error_response(&err);
    }

    if let Err(err) = state
        .store
        .create(id.clone(), dag.clone(), request.policy.clone(), request.tasks.clone())
        .await
    {
        return error_response(&err);
    }

    let now = chrono::Utc::now();
    let tasks = request
        .tasks
        .iter()
        .cloned()
        .map(|spec| (spec.id.clone(), Task::from_spec(spec)))
        .collect();
    let run = Run {
        id: id.clone(),
        state: RunState::Pending,
        policy: request.policy.clone(),
        dag,
        tasks,
        usage: Usage::new(""),
        memory: std::collections::BTreeMap::new(),
        created_at: now,
        updated_at: now,
    };

    tokio::spawn(drive_run(state.clone(), run));

    match state.store.get_snapshot(&id).await {
        Ok(snapshot) => (StatusCode::ACCEPTED, Json(RunDto::from(snapshot))).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn drive_run(state: Arc<AppState>, mut run: Run) {
    let id = run.id.clone();
    let cancel = match state.store.cancel_token(&id).await {
        Ok(cancel) => cancel,
        Err(err) => {
            tracing::error!(run_id = %id, error = %err, "missing cancel token for freshly created run");
            return;
        }
    };

    let orchestrator = state
        .new_orchestrator(run.policy.max_parallelism)
        .with_shadow_sync(state.store.clone(), id.clone());

    let outcome = orchestrator.run(&mut run, cancel).await;
    let run_error = outcome.err().map(|err| TaskError {
        code: err.code().to_string(),
        message: err.to_string(),
    });

    if let Some(dir) = &state.audit_dir {
        write_audit_snapshot(dir, &run).await;
    }

    if let Err(err) = state.store.mark_done(&id, &run, run_error).await {
        tracing::warn!(run_id = %id, error = %err, "failed to mark run done");
    }
}

async fn write_audit_snapshot(dir: &std::path::Path, run: &Run) {
    let path = dir.join(format!("run-{}.json", run.id));
    match serde_json::to_vec_pretty(run) {
        Ok(bytes) => {
            if let Err(err) = tokio::fs::write(&path, bytes).await {
                tracing::warn!(path = %path.display(), error = %err, "failed to write audit snapshot");
            }
        }
        Err(err) => tracing::warn!(run_id = %run.id, error = %err, "failed to serialize audit snapshot"),
    }
}

/// `GET /api/v1/runs/{id}`
pub async fn status(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.store.get_snapshot(&RunId::from(id)).await {
        Ok(snapshot) => (StatusCode::OK, Json(RunDto::from(snapshot))).into_response(),
        Err(err) => error_response(&err),
    }
}

/// `POST /api/v1/runs/{id}/abort`
pub async fn abort(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.store.abort(&RunId::from(id)).await {
        Ok(snapshot) => (StatusCode::OK, Json(RunDto::from(snapshot))).into_response(),
        Err(err) => error_response(&err),
    }
}

/// `POST /api/v1/runs/{id}/tasks` — dynamic task injection into a live
/// run is not implemented; the DAG is fixed at submission time.
pub async fn add_task_not_implemented() -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Allow", HeaderValue::from_static("POST /api/v1/runs"));
    let dto = ErrorDto {
        code: "not_implemented".to_string(),
        message: "dynamic task injection is not supported; submit a new run instead".to_string(),
    };
    (StatusCode::NOT_IMPLEMENTED, headers, Json(dto)).into_response()
}
