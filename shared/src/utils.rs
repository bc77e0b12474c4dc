//! Utility functions for the news scanning system
//!
//! Hashing, timestamps, and URL helpers used across the scanner.

use blake3::Hasher;
use std::time::{SystemTime, UNIX_EPOCH};

/// Calculate a BLAKE3 short hash of a string (8 hex characters).
///
/// Used as the prompt version recorded with each generated summary, so a
/// prompt edit is visible in the data without storing the prompt itself.
pub fn short_hash(content: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(content.as_bytes());
    hasher.finalize().to_hex()[..8].to_string()
}

/// Get current Unix timestamp in milliseconds
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Hostname of a URL, if it parses.
pub fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
}

/// Truncate a string to at most `max_chars` characters, appending an
/// ellipsis when anything was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}...", truncated)
}
