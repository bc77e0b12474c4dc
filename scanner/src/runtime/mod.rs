//! Task runtime: submission, routing, results, and cancellation
//!
//! The runtime is the narrow waist every job passes through. `submit` writes
//! a task record into the broker and returns its id immediately; the worker
//! pool (see `worker`) pops, dispatches, and acknowledges. Callers that need
//! the outcome poll the result store through `wait_for_result`; a waiter
//! timing out never cancels the underlying task.

pub mod admin;
pub mod beat;
pub mod worker;

use anyhow::Result;
use chrono::{DateTime, Utc};
use shared::task::{
    JobPayload, QueueClass, QueueStats, TaskRecord, TaskResultEnvelope, TaskState,
};
use shared::utils::current_timestamp_millis;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::store::NewsStore;

/// Shared flag a running job checks at cooperative points.
pub type CancelFlag = Arc<AtomicBool>;

/// Task-level failure taxonomy. Workers map these onto the retry policy:
/// `NotFound` and `Validation` are terminal, `Upstream` and `Internal` retry
/// per policy, `RateLimited` reschedules at the provider-supplied delay
/// without consuming an attempt.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl JobError {
    /// Whether the failure counts against the task's retry budget.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Upstream(_) | JobError::Internal(_))
    }
}

/// How long result waiters sleep between store polls.
const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Error returned to `wait_for_result` callers whose deadline passed.
#[derive(Debug, thiserror::Error)]
#[error("timed out after {timeout:?} waiting for task {task_id}")]
pub struct WaitTimeout {
    pub task_id: String,
    pub timeout: Duration,
}

/// Submission and status API over the broker.
pub struct TaskRuntime {
    store: Arc<RwLock<NewsStore>>,
    /// Cancel flags for in-flight tasks, keyed by task id. Created when a
    /// worker picks a task up, removed when it finishes.
    cancel_flags: Mutex<HashMap<String, CancelFlag>>,
    /// Monotonic suffix that keeps ids unique within one millisecond.
    id_counter: AtomicU64,
}

impl TaskRuntime {
    pub fn new(store: Arc<RwLock<NewsStore>>) -> Self {
        Self {
            store,
            cancel_flags: Mutex::new(HashMap::new()),
            id_counter: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> Arc<RwLock<NewsStore>> {
        self.store.clone()
    }

    fn next_task_id(&self, payload: &JobPayload) -> String {
        let seq = self.id_counter.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}-{:x}-{:x}",
            payload.name().as_str().replace('_', "-"),
            current_timestamp_millis(),
            seq
        )
    }

    /// Submits a job and returns its task id immediately.
    ///
    /// `not_before` delays dispatch; the fan-out job uses it to stagger
    /// source scans and the retry path uses it for backoff.
    pub async fn submit(
        &self,
        payload: JobPayload,
        queue: QueueClass,
        priority: u8,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let id = self.next_task_id(&payload);
        let now = Utc::now();

        let record = TaskRecord {
            id: id.clone(),
            name: payload.name().as_str().to_string(),
            queue,
            priority: priority.clamp(1, 10),
            state: TaskState::Queued,
            payload: serde_json::to_value(&payload)?,
            last_error: None,
            attempt: 0,
            not_before: not_before.unwrap_or(now),
            submitted_at: now,
            completed_at: None,
        };

        let mut store = self.store.write().await;
        store.enqueue_task(&record).await?;

        debug!(
            task_id = %id,
            name = payload.name().as_str(),
            queue = queue.as_str(),
            priority,
            "Submitted task"
        );
        Ok(id)
    }

    /// Polls the result store until the task produces a terminal envelope or
    /// the timeout elapses. The task keeps running after a waiter timeout.
    pub async fn wait_for_result(
        &self,
        task_id: &str,
        timeout: Duration,
    ) -> Result<TaskResultEnvelope, WaitTimeout> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let result = {
                let store = self.store.read().await;
                store.get_task_result(task_id).await.ok().flatten()
            };
            if let Some(envelope) = result {
                return Ok(envelope);
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(WaitTimeout {
                    task_id: task_id.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(RESULT_POLL_INTERVAL).await;
        }
    }

    /// Cancels a task. Queued tasks flip to cancelled directly; a running
    /// task additionally has its cancel flag raised so the body can stop at
    /// the next cooperative point. In-flight network calls are not aborted.
    pub async fn cancel(&self, task_id: &str) -> Result<bool> {
        let cancelled = {
            let mut store = self.store.write().await;
            store.cancel_task(task_id).await?
        };

        if cancelled {
            if let Some(flag) = self.cancel_flags.lock().unwrap().get(task_id) {
                flag.store(true, Ordering::SeqCst);
            }
            info!(task_id = %task_id, "Task cancelled");
        }
        Ok(cancelled)
    }

    pub async fn get_status(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let store = self.store.read().await;
        store.get_task(task_id).await
    }

    pub async fn get_queue_stats(&self) -> Result<QueueStats> {
        let store = self.store.read().await;
        store.queue_stats().await
    }

    /// Registers a cancel flag for a task entering execution.
    pub(crate) fn register_cancel_flag(&self, task_id: &str) -> CancelFlag {
        let flag: CancelFlag = Arc::new(AtomicBool::new(false));
        self.cancel_flags
            .lock()
            .unwrap()
            .insert(task_id.to_string(), flag.clone());
        flag
    }

    pub(crate) fn clear_cancel_flag(&self, task_id: &str) {
        self.cancel_flags.lock().unwrap().remove(task_id);
    }
}
