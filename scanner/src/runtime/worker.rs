//! Worker pool: pops tasks from the broker, dispatches, and acknowledges
//!
//! Each worker holds at most one task at a time (no prefetch, so a slow scan
//! cannot hoard work) and is recycled after a fixed number of completions to
//! bound memory growth. Acknowledgement is late: the broker row stays leased
//! until the body returns, and the maintenance loop requeues expired leases
//! left behind by a crashed worker.

use chrono::Utc;
use shared::config::ScannerConfig;
use shared::task::{JobPayload, TaskRecord};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{JobError, TaskRuntime};
use crate::jobs::{JobContext, JobExecutor};

/// How long an idle worker sleeps before polling the broker again.
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Cadence of the lease reaper and result-store purge.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Fixed pool of queue workers plus one maintenance loop.
pub struct WorkerPool {
    runtime: Arc<TaskRuntime>,
    executor: Arc<JobExecutor>,
    config: Arc<ScannerConfig>,
    shutdown: Arc<AtomicBool>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
    maintenance_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        runtime: Arc<TaskRuntime>,
        executor: Arc<JobExecutor>,
        config: Arc<ScannerConfig>,
    ) -> Self {
        Self {
            runtime,
            executor,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            handles: std::sync::Mutex::new(Vec::new()),
            maintenance_handle: std::sync::Mutex::new(None),
        }
    }

    /// Spawns the worker supervisors and the maintenance loop.
    pub fn start(&self) {
        let mut handles = self.handles.lock().unwrap();

        for slot in 0..self.config.worker_count {
            let runtime = self.runtime.clone();
            let executor = self.executor.clone();
            let config = self.config.clone();
            let shutdown = self.shutdown.clone();

            // Supervisor: respawn the worker loop whenever it recycles
            // itself after worker_max_tasks_per_child completions.
            handles.push(tokio::spawn(async move {
                let mut generation: u64 = 0;
                while !shutdown.load(Ordering::SeqCst) {
                    debug!(slot, generation, "Worker starting");
                    run_worker(
                        slot,
                        runtime.clone(),
                        executor.clone(),
                        config.clone(),
                        shutdown.clone(),
                    )
                    .await;
                    generation += 1;
                }
                debug!(slot, "Worker supervisor exiting");
            }));
        }

        {
            let runtime = self.runtime.clone();
            let shutdown = self.shutdown.clone();
            *self.maintenance_handle.lock().unwrap() = Some(tokio::spawn(async move {
                maintenance_loop(runtime, shutdown).await;
            }));
        }

        info!("Worker pool started with {} workers", self.config.worker_count);
    }

    /// Signals every worker to stop after its current task and waits for the
    /// pool to drain, up to `timeout`.
    pub async fn stop(&self, timeout: Duration) {
        self.shutdown.store(true, Ordering::SeqCst);
        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();

        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("Worker pool did not drain within {:?}", timeout);
        } else {
            info!("Worker pool stopped");
        }

        // The maintenance loop sleeps between passes; no work is lost by
        // aborting it.
        if let Some(handle) = self.maintenance_handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

/// One worker generation: runs until the shutdown flag rises or the
/// completion budget is spent.
async fn run_worker(
    slot: usize,
    runtime: Arc<TaskRuntime>,
    executor: Arc<JobExecutor>,
    config: Arc<ScannerConfig>,
    shutdown: Arc<AtomicBool>,
) {
    let mut completions: usize = 0;

    while !shutdown.load(Ordering::SeqCst) {
        let popped = {
            let store = runtime.store();
            let mut store = store.write().await;
            store
                .pop_ready_task(Utc::now(), config.broker_visibility_timeout_seconds)
                .await
        };

        let record = match popped {
            Ok(Some(record)) => record,
            Ok(None) => {
                tokio::time::sleep(WORKER_POLL_INTERVAL).await;
                continue;
            }
            Err(e) => {
                error!(slot, "Failed to pop task: {:#}", e);
                tokio::time::sleep(WORKER_POLL_INTERVAL).await;
                continue;
            }
        };

        process_task(&runtime, &executor, &config, record).await;

        completions += 1;
        if completions >= config.worker_max_tasks_per_child {
            debug!(
                slot,
                completions, "Worker reached completion budget, recycling"
            );
            return;
        }
    }
}

/// Decodes, dispatches, and acknowledges a single popped task.
async fn process_task(
    runtime: &Arc<TaskRuntime>,
    executor: &Arc<JobExecutor>,
    config: &ScannerConfig,
    record: TaskRecord,
) {
    let task_id = record.id.clone();

    // The dispatch match is total over known payload variants; anything else
    // goes to the dead-letter table instead of a worker.
    let payload = match serde_json::from_value::<JobPayload>(record.payload.clone()) {
        Ok(payload) => payload,
        Err(decode_err) => {
            let store = runtime.store();
            let mut store = store.write().await;
            let reason = format!("undecodable payload: {}", decode_err);
            if let Err(e) = store.dead_letter_task(&task_id, &record.payload, &reason).await {
                error!(task_id = %task_id, "Failed to dead-letter task: {:#}", e);
            }
            let _ = store
                .ack_task_failed(&task_id, &reason, config.result_ttl_seconds)
                .await;
            return;
        }
    };

    let ctx = JobContext {
        task_id: task_id.clone(),
        cancel: runtime.register_cancel_flag(&task_id),
    };

    debug!(task_id = %task_id, name = payload.name().as_str(), attempt = record.attempt, "Dispatching task");
    let outcome = executor.execute(&ctx, payload.clone()).await;
    runtime.clear_cancel_flag(&task_id);

    let store = runtime.store();
    let mut store = store.write().await;

    let ack = match outcome {
        Ok(value) => store
            .ack_task_success(&task_id, &value, config.result_ttl_seconds)
            .await,
        Err(JobError::Cancelled) => {
            // The record was already flipped to cancelled; nothing to ack.
            debug!(task_id = %task_id, "Task observed cancellation");
            Ok(false)
        }
        Err(JobError::RateLimited { retry_after }) => {
            // Provider-directed reschedule: does not consume a retry attempt.
            let not_before = Utc::now()
                + chrono::Duration::from_std(retry_after).unwrap_or_else(|_| chrono::Duration::zero());
            info!(
                task_id = %task_id,
                "Rate limited; rescheduling for {}",
                not_before
            );
            store
                .ack_task_retry(&task_id, "rate limited", record.attempt, not_before)
                .await
        }
        Err(err) => {
            let policy = payload.name().retry_policy();
            let next_attempt = record.attempt + 1;
            if err.is_retryable() && next_attempt <= policy.max_retries {
                let delay = policy.delay_for_attempt(next_attempt);
                let not_before = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                warn!(
                    task_id = %task_id,
                    attempt = next_attempt,
                    max_retries = policy.max_retries,
                    "Task failed, retrying in {:?}: {}",
                    delay,
                    err
                );
                store
                    .ack_task_retry(&task_id, &err.to_string(), next_attempt, not_before)
                    .await
            } else {
                store
                    .ack_task_failed(&task_id, &err.to_string(), config.result_ttl_seconds)
                    .await
            }
        }
    };

    if let Err(e) = ack {
        error!(task_id = %task_id, "Failed to acknowledge task: {:#}", e);
    }
}

/// Periodically requeues expired leases and purges expired results.
async fn maintenance_loop(runtime: Arc<TaskRuntime>, shutdown: Arc<AtomicBool>) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    while !shutdown.load(Ordering::SeqCst) {
        interval.tick().await;

        let store = runtime.store();
        let mut store = store.write().await;
        if let Err(e) = store.reap_expired_leases().await {
            warn!("Lease reaper failed: {:#}", e);
        }
        if let Err(e) = store.purge_expired_results().await {
            warn!("Result purge failed: {:#}", e);
        }
    }
}
