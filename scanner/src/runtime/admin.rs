//! Admin facade over the task runtime
//!
//! The named operations the HTTP layer (out of scope here) calls into:
//! manual refresh with optional wait-for-result, fire-and-forget source
//! scans, the scheduled-scan trigger, task status/cancellation, and the
//! provider rate-limit surface. Every method returns a JSON structure ready
//! to serialize outward.

use serde_json::json;
use shared::task::{JobPayload, QueueClass};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::TaskRuntime;
use crate::provider::ProviderGateway;

/// High-level interface for submitting and monitoring tasks.
pub struct QueueManager {
    runtime: Arc<TaskRuntime>,
    gateway: Arc<ProviderGateway>,
}

impl QueueManager {
    pub fn new(runtime: Arc<TaskRuntime>, gateway: Arc<ProviderGateway>) -> Self {
        Self { runtime, gateway }
    }

    /// Queues a high-priority manual refresh. With `wait_for_result`, blocks
    /// until the task completes or `timeout` elapses. The returned structure
    /// is a snapshot: the task keeps running past a waiter timeout, and a
    /// later failure is visible only through `get_task_status`.
    pub async fn queue_manual_refresh(
        &self,
        source_id: i64,
        source_url: &str,
        wait_for_result: bool,
        timeout: Duration,
    ) -> serde_json::Value {
        info!(source = %source_url, "Queueing manual refresh");

        let submit = self
            .runtime
            .submit(
                JobPayload::ManualRefresh {
                    source_id,
                    source_url: source_url.to_string(),
                },
                QueueClass::High,
                10,
                None,
            )
            .await;

        let task_id = match submit {
            Ok(task_id) => task_id,
            Err(e) => {
                warn!(source = %source_url, "Failed to queue manual refresh: {:#}", e);
                return json!({ "success": false, "error": format!("{:#}", e) });
            }
        };

        if !wait_for_result {
            return json!({
                "success": true,
                "task_id": task_id,
                "status": "queued",
                "completed": false,
            });
        }

        match self.runtime.wait_for_result(&task_id, timeout).await {
            Ok(envelope) => json!({
                "success": envelope.error.is_none(),
                "task_id": task_id,
                "result": envelope.value,
                "error": envelope.error,
                "completed": true,
            }),
            Err(timeout_err) => {
                warn!(task_id = %task_id, "Manual refresh wait timed out");
                json!({
                    "success": false,
                    "task_id": task_id,
                    "error": timeout_err.to_string(),
                    "completed": false,
                })
            }
        }
    }

    /// Queues a normal-priority source scan, fire-and-forget.
    pub async fn queue_source_scan(&self, source_url: &str, priority: u8) -> serde_json::Value {
        match self
            .runtime
            .submit(
                JobPayload::ScanSource {
                    source_url: source_url.to_string(),
                },
                QueueClass::Normal,
                priority,
                None,
            )
            .await
        {
            Ok(task_id) => json!({
                "success": true,
                "task_id": task_id,
                "source_url": source_url,
                "priority": priority,
                "status": "queued",
            }),
            Err(e) => json!({ "success": false, "error": format!("{:#}", e) }),
        }
    }

    /// Triggers the staggered scan of all sources.
    pub async fn trigger_scheduled_scan(&self) -> serde_json::Value {
        match self
            .runtime
            .submit(JobPayload::ScanTrigger {}, QueueClass::Low, 3, None)
            .await
        {
            Ok(task_id) => json!({
                "success": true,
                "task_id": task_id,
                "status": "queued",
            }),
            Err(e) => json!({ "success": false, "error": format!("{:#}", e) }),
        }
    }

    /// Triggers an urgent daily-topics rebuild.
    pub async fn trigger_daily_topics_rebuild(&self) -> serde_json::Value {
        match self
            .runtime
            .submit(JobPayload::DailyTopicsRebuild {}, QueueClass::High, 10, None)
            .await
        {
            Ok(task_id) => json!({
                "success": true,
                "task_id": task_id,
                "status": "queued",
            }),
            Err(e) => json!({ "success": false, "error": format!("{:#}", e) }),
        }
    }

    pub async fn get_task_status(&self, task_id: &str) -> serde_json::Value {
        match self.runtime.get_status(task_id).await {
            Ok(Some(record)) => json!({
                "success": true,
                "task_id": task_id,
                "name": record.name,
                "status": record.state.as_str(),
                "completed": record.state.is_terminal(),
                "attempt": record.attempt,
                "error": record.last_error,
            }),
            Ok(None) => json!({
                "success": false,
                "task_id": task_id,
                "error": "unknown task id",
            }),
            Err(e) => json!({ "success": false, "task_id": task_id, "error": format!("{:#}", e) }),
        }
    }

    pub async fn get_queue_stats(&self) -> serde_json::Value {
        match self.runtime.get_queue_stats().await {
            Ok(stats) => json!({
                "success": true,
                "queues": {
                    "high": { "queued": stats.high_queued, "description": "Manual refresh requests" },
                    "normal": { "queued": stats.normal_queued, "description": "Scheduled source scans and analyses" },
                    "low": { "queued": stats.low_queued, "description": "Maintenance tasks" },
                },
                "running": stats.running,
                "dead_letter": stats.dead_letter,
            }),
            Err(e) => json!({ "success": false, "error": format!("{:#}", e) }),
        }
    }

    pub async fn cancel_task(&self, task_id: &str) -> serde_json::Value {
        match self.runtime.cancel(task_id).await {
            Ok(true) => json!({ "success": true, "task_id": task_id, "action": "cancelled" }),
            Ok(false) => json!({
                "success": false,
                "task_id": task_id,
                "error": "task already terminal or unknown",
            }),
            Err(e) => json!({ "success": false, "task_id": task_id, "error": format!("{:#}", e) }),
        }
    }

    /// Cooling and quota state of both text-generation providers.
    pub fn get_provider_status(&self) -> serde_json::Value {
        json!({
            "success": true,
            "providers": self.gateway.rate_limit_status(),
        })
    }

    /// Clears provider cooling and quota counters (manual intervention).
    pub fn reset_provider_rate_limits(&self) -> serde_json::Value {
        self.gateway.reset_rate_limits();
        json!({ "success": true, "action": "rate_limits_reset" })
    }
}
