//! Job bodies and the dispatch match
//!
//! The executor is the "what" to the runtime's "when": each popped task is
//! decoded into a payload variant and dispatched here. Job bodies return a
//! JSON result value (stored in the result store) or a classified
//! [`JobError`] the worker maps onto the retry policy. Chained submissions
//! (new article → summary + embedding + topic analysis) happen inside the
//! job bodies, never through global hooks, so the chain is visible at the
//! point of failure.

mod daily;
mod embedding;
mod scan;
mod summary;
mod topics;

use shared::config::ScannerConfig;
use shared::task::JobPayload;
use shared::utils::short_hash;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::ml::MlClient;
use crate::provider::ProviderGateway;
use crate::runtime::{CancelFlag, JobError, TaskRuntime};
use crate::scan::SourceScanner;
use crate::store::NewsStore;

/// Per-execution context handed to every job body.
pub struct JobContext {
    pub task_id: String,
    pub cancel: CancelFlag,
}

impl JobContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Cooperative cancellation point: call between sub-steps.
    pub fn check_cancelled(&self) -> Result<(), JobError> {
        if self.is_cancelled() {
            Err(JobError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Built-in system prompt used when no prompt file is configured.
const DEFAULT_SUMMARY_PROMPT: &str = "You are an expert news analyst. Create a concise 2-3 \
sentence summary of the following article that captures the key facts and main points. Be \
objective and factual.";

/// The versioned summary prompt: loaded once at startup, hashed so every
/// generated summary records which prompt produced it.
pub struct SummaryPrompt {
    pub text: String,
    pub version: String,
}

impl SummaryPrompt {
    /// Loads the prompt from the configured file, falling back to the
    /// built-in default when the file is missing or unreadable.
    pub fn load(path: Option<&str>) -> Self {
        let text = match path {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(content) => {
                    info!("Loaded summary prompt from {}", path);
                    content.trim().to_string()
                }
                Err(e) => {
                    warn!("Failed to read prompt file {}: {}; using default", path, e);
                    DEFAULT_SUMMARY_PROMPT.to_string()
                }
            },
            None => DEFAULT_SUMMARY_PROMPT.to_string(),
        };

        let version = short_hash(&text);
        Self { text, version }
    }
}

/// Dispatches decoded payloads to job bodies.
pub struct JobExecutor {
    pub(crate) store: Arc<RwLock<NewsStore>>,
    pub(crate) config: Arc<ScannerConfig>,
    pub(crate) runtime: Arc<TaskRuntime>,
    pub(crate) gateway: Arc<ProviderGateway>,
    pub(crate) ml: Arc<MlClient>,
    pub(crate) scanner: Arc<SourceScanner>,
    pub(crate) prompt: Arc<SummaryPrompt>,
}

impl JobExecutor {
    pub fn new(
        store: Arc<RwLock<NewsStore>>,
        config: Arc<ScannerConfig>,
        runtime: Arc<TaskRuntime>,
        gateway: Arc<ProviderGateway>,
        ml: Arc<MlClient>,
        scanner: Arc<SourceScanner>,
        prompt: Arc<SummaryPrompt>,
    ) -> Self {
        Self {
            store,
            config,
            runtime,
            gateway,
            ml,
            scanner,
            prompt,
        }
    }

    /// Runs one job body. Total over all payload variants; undecodable
    /// envelopes never reach this point (the worker dead-letters them).
    pub async fn execute(
        &self,
        ctx: &JobContext,
        payload: JobPayload,
    ) -> Result<serde_json::Value, JobError> {
        match payload {
            JobPayload::ManualRefresh {
                source_id,
                source_url,
            } => scan::manual_refresh(self, ctx, source_id, &source_url).await,
            JobPayload::ScanSource { source_url } => {
                scan::scan_source(self, ctx, &source_url).await
            }
            JobPayload::ScanTrigger {} => scan::scan_trigger(self, ctx).await,
            JobPayload::Summarize { article_url } => {
                summary::summarize(self, ctx, &article_url).await
            }
            JobPayload::SummaryBacklogSweep { batch_size } => {
                summary::backlog_sweep(self, ctx, batch_size).await
            }
            JobPayload::ContentEmbedding { article_url } => {
                embedding::content_embedding(self, ctx, &article_url).await
            }
            JobPayload::SummaryEmbedding { article_url } => {
                embedding::summary_embedding(self, ctx, &article_url).await
            }
            JobPayload::EmbeddingBackfill { batch_size } => {
                embedding::backfill(self, ctx, batch_size).await
            }
            JobPayload::TopicAnalysis { article_url } => {
                topics::topic_analysis(self, ctx, &article_url).await
            }
            JobPayload::RollingTopicPipeline {} => topics::rolling_pipeline(self, ctx).await,
            JobPayload::DailyTopicsRebuild {} => daily::rebuild_daily_topics(self, ctx).await,
        }
    }
}
