//! Task queue vocabulary: queue classes, task names, payloads, and envelopes
//!
//! Every job that moves through the runtime is one of the closed set of
//! [`TaskName`] variants, and its arguments travel as the matching
//! [`JobPayload`] variant. Envelopes whose payload fails to decode are routed
//! to the dead-letter table rather than dispatched, so the worker's dispatch
//! match is total over known variants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Routing bucket for a task. Workers drain `High` before `Normal` before `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueClass {
    High,
    Normal,
    Low,
}

impl QueueClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueClass::High => "high",
            QueueClass::Normal => "normal",
            QueueClass::Low => "low",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "high" => Ok(QueueClass::High),
            "normal" => Ok(QueueClass::Normal),
            "low" => Ok(QueueClass::Low),
            _ => Err(anyhow::anyhow!("Invalid queue class: {}", s)),
        }
    }

    /// Drain order: high first.
    pub const DRAIN_ORDER: [QueueClass; 3] = [QueueClass::High, QueueClass::Normal, QueueClass::Low];
}

/// Lifecycle state of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Retrying,
    Cancelled,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Retrying => "retrying",
            TaskState::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "queued" => Ok(TaskState::Queued),
            "running" => Ok(TaskState::Running),
            "succeeded" => Ok(TaskState::Succeeded),
            "failed" => Ok(TaskState::Failed),
            "retrying" => Ok(TaskState::Retrying),
            "cancelled" => Ok(TaskState::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid task state: {}", s)),
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// Retry policy declared per task name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_secs: u64,
    pub multiplier: u32,
}

impl RetryPolicy {
    pub const NONE: RetryPolicy = RetryPolicy {
        max_retries: 0,
        initial_delay_secs: 0,
        multiplier: 1,
    };

    /// Delay before the given retry attempt (1-based):
    /// `initial * multiplier^(attempt - 1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let factor = (self.multiplier as u64).saturating_pow(exp);
        Duration::from_secs(self.initial_delay_secs.saturating_mul(factor))
    }
}

/// The closed set of job names known to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskName {
    ManualRefresh,
    ScanSource,
    ScanTrigger,
    Summarize,
    SummaryBacklogSweep,
    ContentEmbedding,
    SummaryEmbedding,
    EmbeddingBackfill,
    TopicAnalysis,
    RollingTopicPipeline,
    DailyTopicsRebuild,
}

impl TaskName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskName::ManualRefresh => "manual_refresh",
            TaskName::ScanSource => "scan_source",
            TaskName::ScanTrigger => "scan_trigger",
            TaskName::Summarize => "summarize",
            TaskName::SummaryBacklogSweep => "summary_backlog_sweep",
            TaskName::ContentEmbedding => "content_embedding",
            TaskName::SummaryEmbedding => "summary_embedding",
            TaskName::EmbeddingBackfill => "embedding_backfill",
            TaskName::TopicAnalysis => "topic_analysis",
            TaskName::RollingTopicPipeline => "rolling_topic_pipeline",
            TaskName::DailyTopicsRebuild => "daily_topics_rebuild",
        }
    }

    /// Retry policy for this task name. Fan-out and sweep jobs never retry:
    /// they are periodic and idempotent, the next tick covers a failure.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            TaskName::ManualRefresh => RetryPolicy {
                max_retries: 2,
                initial_delay_secs: 30,
                multiplier: 1,
            },
            TaskName::ScanSource => RetryPolicy {
                max_retries: 3,
                initial_delay_secs: 120,
                multiplier: 2,
            },
            TaskName::Summarize => RetryPolicy {
                max_retries: 2,
                initial_delay_secs: 60,
                multiplier: 1,
            },
            TaskName::ContentEmbedding
            | TaskName::SummaryEmbedding
            | TaskName::TopicAnalysis => RetryPolicy {
                max_retries: 2,
                initial_delay_secs: 60,
                multiplier: 1,
            },
            TaskName::ScanTrigger
            | TaskName::SummaryBacklogSweep
            | TaskName::EmbeddingBackfill
            | TaskName::RollingTopicPipeline
            | TaskName::DailyTopicsRebuild => RetryPolicy::NONE,
        }
    }
}

/// Job arguments, tagged by task name. One variant per [`TaskName`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum JobPayload {
    ManualRefresh { source_id: i64, source_url: String },
    ScanSource { source_url: String },
    ScanTrigger {},
    Summarize { article_url: String },
    SummaryBacklogSweep { batch_size: usize },
    ContentEmbedding { article_url: String },
    SummaryEmbedding { article_url: String },
    EmbeddingBackfill { batch_size: usize },
    TopicAnalysis { article_url: String },
    RollingTopicPipeline {},
    DailyTopicsRebuild {},
}

impl JobPayload {
    pub fn name(&self) -> TaskName {
        match self {
            JobPayload::ManualRefresh { .. } => TaskName::ManualRefresh,
            JobPayload::ScanSource { .. } => TaskName::ScanSource,
            JobPayload::ScanTrigger {} => TaskName::ScanTrigger,
            JobPayload::Summarize { .. } => TaskName::Summarize,
            JobPayload::SummaryBacklogSweep { .. } => TaskName::SummaryBacklogSweep,
            JobPayload::ContentEmbedding { .. } => TaskName::ContentEmbedding,
            JobPayload::SummaryEmbedding { .. } => TaskName::SummaryEmbedding,
            JobPayload::EmbeddingBackfill { .. } => TaskName::EmbeddingBackfill,
            JobPayload::TopicAnalysis { .. } => TaskName::TopicAnalysis,
            JobPayload::RollingTopicPipeline {} => TaskName::RollingTopicPipeline,
            JobPayload::DailyTopicsRebuild {} => TaskName::DailyTopicsRebuild,
        }
    }
}

/// One row in the task store: a submitted job and everything observed about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub name: String,
    pub queue: QueueClass,
    /// Priority 1-10 within the queue class; higher wins, ties FIFO.
    pub priority: u8,
    pub state: TaskState,
    /// Serialized [`JobPayload`], kept raw so undecodable payloads remain
    /// inspectable after landing in the dead-letter table.
    pub payload: serde_json::Value,
    pub last_error: Option<String>,
    pub attempt: u32,
    /// Earliest dispatch time; used for staggering and retry backoff.
    pub not_before: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Terminal result of a task, retained for `result_ttl_seconds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResultEnvelope {
    pub id: String,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Per-class queue depths plus runtime counters, for the admin API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub high_queued: usize,
    pub normal_queued: usize,
    pub low_queued: usize,
    pub running: usize,
    pub dead_letter: usize,
}

impl QueueStats {
    pub fn queued_for(&self, class: QueueClass) -> usize {
        match class {
            QueueClass::High => self.high_queued,
            QueueClass::Normal => self.normal_queued,
            QueueClass::Low => self.low_queued,
        }
    }
}
