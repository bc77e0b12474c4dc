//! Scan statistics and per-source scan reports
//!
//! A scan report aggregates per-article outcomes for one execution of the
//! per-source pipeline, classifies failures, and derives a human-readable
//! diagnosis from heuristic thresholds over the failure breakdown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classified failure of a single article extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Http500,
    Http403,
    Http429,
    Timeout,
    NoContent,
    Other,
}

impl FailureKind {
    /// Classifies an HTTP status code. Timeouts and transport errors are
    /// classified by the caller, which sees the error rather than a status.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => FailureKind::Http429,
            401 | 403 => FailureKind::Http403,
            408 => FailureKind::Timeout,
            204 => FailureKind::NoContent,
            s if s >= 500 => FailureKind::Http500,
            _ => FailureKind::Other,
        }
    }
}

/// Counters for one scanning operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Articles advertised by the feed.
    pub total: usize,
    /// Articles successfully extracted, analyzed, and stored.
    pub scanned: usize,
    /// Articles that failed to process.
    pub failed: usize,

    // Failure breakdown
    pub http_500: usize,
    pub http_403: usize,
    pub http_429: usize,
    pub timeout: usize,
    pub no_content: usize,
    pub other: usize,
}

impl ScanStats {
    pub fn record_failure(&mut self, kind: FailureKind) {
        match kind {
            FailureKind::Http500 => self.http_500 += 1,
            FailureKind::Http403 => self.http_403 += 1,
            FailureKind::Http429 => self.http_429 += 1,
            FailureKind::Timeout => self.timeout += 1,
            FailureKind::NoContent => self.no_content += 1,
            FailureKind::Other => self.other += 1,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.scanned as f64 / self.total as f64) * 100.0
    }

    pub fn failure_rate(&self) -> f64 {
        100.0 - self.success_rate()
    }
}

/// Result of scanning one RSS source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub source_url: String,
    pub source_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub stats: ScanStats,
    /// Fatal error that stopped the whole scan (feed unreachable, bad URL).
    pub error: Option<String>,
    pub warnings: Vec<String>,
    /// Automated diagnosis of the failure pattern, set by `finalize`.
    pub diagnosis: Option<String>,
}

impl ScanReport {
    pub fn new(source_url: impl Into<String>, source_name: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            source_name: source_name.into(),
            started_at: Utc::now(),
            finished_at: None,
            duration_seconds: None,
            stats: ScanStats::default(),
            error: None,
            warnings: Vec::new(),
            diagnosis: None,
        }
    }

    /// Whether the scan itself ran to completion (individual article failures
    /// do not fail the scan).
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    pub fn has_high_failure_rate(&self) -> bool {
        self.stats.failure_rate() > 75.0
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Stamps the end time and derives the diagnosis string.
    pub fn finalize(&mut self) {
        let finished = Utc::now();
        self.duration_seconds = Some(
            (finished - self.started_at).num_milliseconds() as f64 / 1000.0,
        );
        self.finished_at = Some(finished);
        self.diagnosis = Some(self.generate_diagnosis());
    }

    // Heuristic thresholds tuned against observed feed pathologies: each
    // clause names the dominant failure class when it crosses its share of
    // total failures.
    fn generate_diagnosis(&self) -> String {
        let stats = &self.stats;
        if stats.failed == 0 {
            return "All articles processed successfully".to_string();
        }

        let failed = stats.failed as f64;
        let mut diagnoses: Vec<&str> = Vec::new();

        if stats.http_403 as f64 > failed * 0.5 {
            diagnoses.push("High number of 403 errors suggests bot detection.");
        }
        if stats.http_429 as f64 > failed * 0.3 {
            diagnoses.push("Rate limiting detected; consider slower request timing.");
        }
        if stats.http_500 as f64 > failed * 0.7 {
            diagnoses.push("High server error rate suggests extractor strain on this site.");
        }
        if stats.no_content as f64 > failed * 0.8 {
            diagnoses.push("High no-content rate suggests redirect/paywall protection.");
        }
        if stats.failure_rate() > 75.0 {
            diagnoses.push("High failure rate suggests anti-bot protection or content structure issues.");
        }

        if diagnoses.is_empty() {
            "Mixed failure types detected.".to_string()
        } else {
            diagnoses.join(" ")
        }
    }
}

/// Serializable job result for scan tasks, stored in the result store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub success: bool,
    pub source_url: String,
    pub source_name: String,
    pub total: usize,
    pub scanned: usize,
    pub failed: usize,
    pub failure_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ScanReport> for ScanOutcome {
    fn from(report: &ScanReport) -> Self {
        Self {
            success: report.success(),
            source_url: report.source_url.clone(),
            source_name: report.source_name.clone(),
            total: report.stats.total,
            scanned: report.stats.scanned,
            failed: report.stats.failed,
            failure_rate: report.stats.failure_rate(),
            diagnosis: report.diagnosis.clone(),
            error: report.error.clone(),
        }
    }
}
