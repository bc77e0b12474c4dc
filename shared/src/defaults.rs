//! Default values for configuration parameters
//!
//! This module centralizes all default value functions used by the configuration
//! structures. These functions are used by serde when deserializing configuration
//! files that don't specify certain optional fields.

// Scan pipeline defaults

/// Default number of concurrent article extractions per source scan
pub fn default_max_concurrent_scans() -> usize {
    5
}

/// Default delay between article requests within a source (milliseconds)
pub fn default_request_delay_ms() -> u64 {
    100
}

/// Default timeout for feed and article fetches (30 seconds)
pub fn default_request_timeout() -> u64 {
    30
}

/// Default per-article retry attempts on server errors
pub fn default_max_retries() -> u32 {
    2
}

/// Default stagger between queued source scans (30 seconds)
pub fn default_scan_stagger_seconds() -> u64 {
    30
}

/// Default normal-queue backlog depth above which fan-out stagger doubles
pub fn default_backlog_soft_cap() -> usize {
    100
}

// Task runtime defaults

/// Default number of queue workers
pub fn default_worker_count() -> usize {
    4
}

/// Default number of jobs a worker runs before being recycled
pub fn default_worker_max_tasks_per_child() -> usize {
    50
}

/// Default task result retention (3600 seconds / 1 hour)
pub fn default_result_ttl_seconds() -> u64 {
    3600
}

/// Default broker visibility timeout for in-flight tasks (1 hour)
pub fn default_broker_visibility_timeout() -> u64 {
    3600
}

// Summary and embedding defaults

/// Default batch size for the summary backlog sweep
pub fn default_summary_backlog_batch() -> usize {
    10
}

/// Default batch size for the embedding backfill job
pub fn default_embedding_backfill_batch() -> usize {
    50
}

// Topic grouping defaults

/// Default cosine similarity threshold for rolling topic grouping
pub fn default_rolling_similarity_threshold() -> f64 {
    0.75
}

/// Default minimum group size for rolling topic grouping
pub fn default_rolling_min_group_size() -> usize {
    2
}

/// Default cosine similarity threshold for daily topic grouping.
/// Higher than the rolling threshold: the daily view trades recall for precision.
pub fn default_daily_similarity_threshold() -> f64 {
    0.80
}

/// Default minimum group size for daily topics
pub fn default_daily_min_group_size() -> usize {
    5
}

/// Default cap on articles considered by the daily topic builder
pub fn default_daily_max_articles() -> usize {
    500
}

/// Default trailing window for daily topics (days)
pub fn default_daily_window_days() -> u32 {
    7
}

// Provider gateway defaults

/// Default minimum interval between requests to a single provider (seconds)
pub fn default_provider_min_interval() -> f64 {
    1.0
}

/// Default quota soft cut: treat a provider as cooling at 90% of known quota
pub fn default_provider_quota_soft_pct() -> u32 {
    90
}

/// Default timeout for text generation requests (90 seconds)
pub fn default_provider_request_timeout() -> u64 {
    90
}

/// Default fallback-to-remote-provider flag
pub fn default_llm_fallback_enabled() -> bool {
    true
}

/// Default local provider endpoint (OpenAI-compatible chat completions)
pub fn default_local_provider_url() -> String {
    "http://localhost:1234/v1/chat/completions".to_string()
}

/// Default local provider model identifier
pub fn default_local_provider_model() -> String {
    "openai/gpt-oss-20b".to_string()
}

// ML service defaults

/// Default ML service base URL
pub fn default_ml_service_url() -> String {
    "http://ml-service:8001".to_string()
}

/// Default timeout for ML service calls (30 seconds)
pub fn default_ml_request_timeout() -> u64 {
    30
}

/// Default timeout for the daily-topics ML call (5 minutes)
pub fn default_daily_topics_timeout() -> u64 {
    300
}

// Storage defaults

/// Default SQLite database busy timeout (5 seconds)
pub fn default_database_busy_timeout() -> u64 {
    5
}
