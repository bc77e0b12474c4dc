//! Shared data structures and utilities for the news scanning system
//!
//! This crate contains common types, configuration structures, and utilities
//! used by the scanner binary: the article/source/topic data model, the task
//! queue vocabulary, scan statistics, and configuration with defaults.

pub mod config;
pub mod defaults;
pub mod model;
pub mod scan;
pub mod task;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::ScannerConfig;
pub use model::{Article, DailyTopic, Source, SummaryStatus, TopicGroup};
pub use scan::{ScanReport, ScanStats};
pub use task::{JobPayload, QueueClass, TaskName, TaskRecord, TaskState};
pub use utils::short_hash;

/// Result type alias used throughout the shared crate
pub type Result<T> = anyhow::Result<T>;

/// Common error types for the scanning system
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Job execution error: {0}")]
    JobExecution(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests;
