//! Run store and shadow-state projection.
//!
//! The store-level `DashMap` guards the map itself, entry existence, and
//! the aborting flag. Each entry additionally holds its own
//! `parking_lot::RwLock` over a read-optimized shadow copy of task
//! state, run state, and usage — the orchestrator publishes into it
//! through the store APIs below, and HTTP handlers only ever read
//! through the same lock, never the live `Run` aggregate.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use workflow_runtime_common::error::{Error, Result};
use workflow_runtime_common::types::{Dag, Run, RunId, RunPolicy, RunState, Task, TaskError, TaskSpec, Usage};
use workflow_runtime_core::{RunSnapshot, RunStore};

struct ShadowState {
    tasks: BTreeMap<workflow_runtime_common::types::TaskId, Task>,
    run_state: RunState,
    usage: Usage,
}

struct Entry {
    cancel: CancellationToken,
    aborting: AtomicBool,
    done: AtomicBool,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
    error: RwLock<Option<TaskError>>,
    created_at: DateTime<Utc>,
    updated_at: RwLock<DateTime<Utc>>,
    shadow: RwLock<ShadowState>,
}

/// In-memory run store backing the HTTP control plane.
#[derive(Default)]
pub struct InMemoryRunStore {
    entries: DashMap<RunId, Arc<Entry>>,
}

impl InMemoryRunStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn label(entry: &Entry, run_state: RunState) -> String {
        if entry.aborting.load(Ordering::SeqCst) && !entry.done.load(Ordering::SeqCst) {
            "aborting".to_string()
        } else {
            match run_state {
                RunState::Pending => "pending",
                RunState::Running => "running",
                RunState::Completed => "completed",
                RunState::Failed => "failed",
                RunState::Aborted => "aborted",
            }
            .to_string()
        }
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    #[instrument(skip(self, dag, policy, tasks))]
    async fn create(&self, id: RunId, dag: Dag, policy: RunPolicy, tasks: Vec<TaskSpec>) -> Result<RunId> {
        if self.entries.contains_key(&id) {
            return Err(Error::RunExists(id.to_string()));
        }
        let _ = (&dag, &policy);
        let shadow_tasks = tasks
            .into_iter()
            .map(|spec| (spec.id.clone(), Task::from_spec(spec)))
            .collect();

        let (done_tx, done_rx) = watch::channel(false);
        let now = Utc::now();
        let entry = Arc::new(Entry {
            cancel: CancellationToken::new(),
            aborting: AtomicBool::new(false),
            done: AtomicBool::new(false),
            done_tx,
            done_rx,
            error: RwLock::new(None),
            created_at: now,
            updated_at: RwLock::new(now),
            shadow: RwLock::new(ShadowState {
                tasks: shadow_tasks,
                run_state: RunState::Pending,
                usage: Usage::new(""),
            }),
        });
        self.entries.insert(id.clone(), entry);
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn get_snapshot(&self, id: &RunId) -> Result<RunSnapshot> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| Error::RunNotFound(id.to_string()))?;
        let error = entry.error.read().clone();
        let created_at = entry.created_at;
        let updated_at = *entry.updated_at.read();

        let shadow = entry.shadow.read();
        let state = Self::label(&entry, shadow.run_state);
        Ok(RunSnapshot {
            id: id.clone(),
            state,
            tasks: shadow.tasks.clone(),
            usage: shadow.usage.clone(),
            error,
            created_at,
            updated_at,
        })
    }

    #[instrument(skip(self))]
    async fn abort(&self, id: &RunId) -> Result<RunSnapshot> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| Error::RunNotFound(id.to_string()))?;
        if entry.done.load(Ordering::SeqCst) {
            let shadow = entry.shadow.read();
            if shadow.run_state.is_terminal() {
                return Err(Error::RunCompleted);
            }
        }
        if !entry.aborting.swap(true, Ordering::SeqCst) {
            *entry.updated_at.write() = Utc::now();
            entry.cancel.cancel();
        }
        drop(entry);
        self.get_snapshot(id).await
    }

    async fn cancel_all(&self) {
        for entry in &self.entries {
            if !entry.done.load(Ordering::SeqCst) {
                entry.aborting.store(true, Ordering::SeqCst);
                entry.cancel.cancel();
            }
        }
    }

    async fn wait_all(&self, timeout: Duration) {
        let waiters: Vec<_> = self
            .entries
            .iter()
            .map(|e| {
                let mut rx = e.done_rx.clone();
                async move {
                    if *rx.borrow() {
                        return;
                    }
                    let _ = rx.changed().await;
                }
            })
            .collect();
        let _ = tokio::time::timeout(timeout, futures::future::join_all(waiters)).await;
    }

    #[instrument(skip(self))]
    async fn prune_completed(&self, retention: Duration) {
        let now = Utc::now();
        let stale: Vec<RunId> = self
            .entries
            .iter()
            .filter(|e| {
                e.done.load(Ordering::SeqCst)
                    && now.signed_duration_since(*e.updated_at.read())
                        > chrono::Duration::from_std(retention).unwrap_or_default()
            })
            .map(|e| e.key().clone())
            .collect();
        for id in stale {
            self.entries.remove(&id);
        }
    }

    async fn cancel_token(&self, id: &RunId) -> Result<CancellationToken> {
        self.entries
            .get(id)
            .map(|e| e.cancel.clone())
            .ok_or_else(|| Error::RunNotFound(id.to_string()))
    }

    #[instrument(skip(self, run))]
    async fn sync_shadow(&self, id: &RunId, run: &Run) -> Result<()> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| Error::RunNotFound(id.to_string()))?;
        let mut shadow = entry.shadow.write();
        shadow.tasks = run.tasks.clone();
        shadow.run_state = run.state;
        shadow.usage = run.usage.clone();
        drop(shadow);
        *entry.updated_at.write() = Utc::now();
        Ok(())
    }

    #[instrument(skip(self, run, error))]
    async fn mark_done(&self, id: &RunId, run: &Run, error: Option<TaskError>) -> Result<()> {
        self.sync_shadow(id, run).await?;
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| Error::RunNotFound(id.to_string()))?;
        *entry.error.write() = error;
        if !entry.done.swap(true, Ordering::SeqCst) {
            let _ = entry.done_tx.send(true);
        }
        Ok(())
    }
}
