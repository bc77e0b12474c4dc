//! Configuration types and validation for the news scanning system
//!
//! This module defines the configuration structure loaded from `scanner.toml`,
//! including validation logic and serde defaults. Every knob has a default so
//! an empty file is a valid configuration.

use crate::defaults::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main scanner configuration loaded from scanner.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScannerConfig {
    // Scan pipeline
    /// Maximum concurrent article extractions within a single source scan
    #[serde(default = "default_max_concurrent_scans")]
    pub max_concurrent_scans: usize,
    /// Base delay between article requests within a source (milliseconds)
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    /// Timeout for feed and article fetches in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Per-article retry attempts on HTTP 5xx
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Seconds between staggered source scans queued by the fan-out job
    #[serde(default = "default_scan_stagger_seconds")]
    pub scan_stagger_seconds: u64,
    /// Normal-queue backlog depth above which the fan-out stagger doubles
    #[serde(default = "default_backlog_soft_cap")]
    pub backlog_soft_cap: usize,

    // Task runtime
    /// Number of queue workers
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Jobs a worker completes before it is recycled
    #[serde(default = "default_worker_max_tasks_per_child")]
    pub worker_max_tasks_per_child: usize,
    /// Task result retention in seconds
    #[serde(default = "default_result_ttl_seconds")]
    pub result_ttl_seconds: u64,
    /// Seconds before an unacknowledged in-flight task becomes visible again
    #[serde(default = "default_broker_visibility_timeout")]
    pub broker_visibility_timeout_seconds: u64,

    // Summaries and embeddings
    /// Batch size for the periodic summary backlog sweep
    #[serde(default = "default_summary_backlog_batch")]
    pub summary_backlog_batch: usize,
    /// Batch size for the embedding backfill job
    #[serde(default = "default_embedding_backfill_batch")]
    pub embedding_backfill_batch: usize,
    /// Optional path to the summary system prompt file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_path: Option<String>,

    // Topic grouping
    /// Cosine similarity threshold for rolling topic grouping
    #[serde(default = "default_rolling_similarity_threshold")]
    pub rolling_similarity_threshold: f64,
    /// Minimum members (anchor included) for a rolling topic group
    #[serde(default = "default_rolling_min_group_size")]
    pub rolling_min_group_size: usize,
    /// Cosine similarity threshold for daily topic grouping
    #[serde(default = "default_daily_similarity_threshold")]
    pub daily_similarity_threshold: f64,
    /// Minimum articles per daily topic group
    #[serde(default = "default_daily_min_group_size")]
    pub daily_min_group_size: usize,
    /// Cap on articles considered by the daily topic builder
    #[serde(default = "default_daily_max_articles")]
    pub daily_max_articles: usize,
    /// Trailing publication window for daily topics (days)
    #[serde(default = "default_daily_window_days")]
    pub daily_window_days: u32,

    // Provider gateway
    /// Minimum seconds between requests to a single provider
    #[serde(default = "default_provider_min_interval")]
    pub provider_min_interval_seconds: f64,
    /// Percentage of known quota at which a provider is treated as cooling
    #[serde(default = "default_provider_quota_soft_pct")]
    pub provider_quota_soft_pct: u32,
    /// Timeout for text generation requests in seconds
    #[serde(default = "default_provider_request_timeout")]
    pub provider_request_timeout_seconds: u64,
    /// Whether to fall back to the remote provider when the local one fails
    #[serde(default = "default_llm_fallback_enabled")]
    pub llm_fallback_enabled: bool,
    /// Local provider endpoint (OpenAI-compatible chat completions)
    #[serde(default = "default_local_provider_url")]
    pub local_provider_url: String,
    /// Local provider model identifier
    #[serde(default = "default_local_provider_model")]
    pub local_provider_model: String,
    /// Remote fallback provider endpoint (empty disables the fallback)
    #[serde(default)]
    pub remote_provider_url: String,
    /// Remote fallback provider model identifier
    #[serde(default)]
    pub remote_provider_model: String,
    /// API key for the remote provider
    #[serde(default)]
    pub remote_provider_api_key: String,

    // ML service
    /// ML service base URL
    #[serde(default = "default_ml_service_url")]
    pub ml_service_url: String,
    /// Timeout for ML service calls in seconds
    #[serde(default = "default_ml_request_timeout")]
    pub ml_request_timeout_seconds: u64,
    /// Timeout for the daily-topics ML call in seconds
    #[serde(default = "default_daily_topics_timeout")]
    pub daily_topics_timeout_seconds: u64,

    // Storage
    /// SQLite busy timeout in seconds
    #[serde(default = "default_database_busy_timeout")]
    pub database_busy_timeout_seconds: u64,
}

/// Feed list loaded from sources.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SourcesConfig {
    /// Feeds to register at startup; scanning picks them up on the next tick
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
}

/// One configured feed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceEntry {
    pub url: String,
    /// Human-readable name; defaults to the feed host when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SourceEntry {
    /// Display name: the configured name or the feed URL host.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| crate::utils::host_of(&self.url))
            .unwrap_or_else(|| self.url.clone())
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        // An empty TOML document yields the all-defaults configuration.
        toml::from_str("").expect("defaults must deserialize")
    }
}

impl ScannerConfig {
    /// Validates configuration invariants that serde defaults cannot express.
    pub fn validate(&self) -> crate::Result<()> {
        if self.worker_count == 0 {
            anyhow::bail!("worker_count must be at least 1");
        }
        if self.max_concurrent_scans == 0 {
            anyhow::bail!("max_concurrent_scans must be at least 1");
        }
        if self.worker_max_tasks_per_child == 0 {
            anyhow::bail!("worker_max_tasks_per_child must be at least 1");
        }
        for (name, value) in [
            (
                "rolling_similarity_threshold",
                self.rolling_similarity_threshold,
            ),
            (
                "daily_similarity_threshold",
                self.daily_similarity_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{} must be between 0.0 and 1.0, got {}", name, value);
            }
        }
        if self.provider_quota_soft_pct > 100 {
            anyhow::bail!(
                "provider_quota_soft_pct must be at most 100, got {}",
                self.provider_quota_soft_pct
            );
        }
        if self.daily_window_days == 0 {
            anyhow::bail!("daily_window_days must be at least 1");
        }
        if self.remote_provider_url.is_empty() && self.llm_fallback_enabled {
            tracing::warn!("llm_fallback_enabled is set but remote_provider_url is empty");
        }
        Ok(())
    }

    /// Timeout for feed and article fetches.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Timeout for text generation requests.
    pub fn provider_request_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_request_timeout_seconds)
    }

    /// Timeout for ML service calls.
    pub fn ml_request_timeout(&self) -> Duration {
        Duration::from_secs(self.ml_request_timeout_seconds)
    }

    /// Timeout for the long-running daily-topics ML call.
    pub fn daily_topics_timeout(&self) -> Duration {
        Duration::from_secs(self.daily_topics_timeout_seconds)
    }
}
