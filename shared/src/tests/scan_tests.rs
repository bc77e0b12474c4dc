//! Tests for scan statistics and diagnosis heuristics

use crate::scan::{FailureKind, ScanOutcome, ScanReport};

#[test]
fn test_status_classification() {
    assert_eq!(FailureKind::from_status(429), FailureKind::Http429);
    assert_eq!(FailureKind::from_status(403), FailureKind::Http403);
    assert_eq!(FailureKind::from_status(401), FailureKind::Http403);
    assert_eq!(FailureKind::from_status(500), FailureKind::Http500);
    assert_eq!(FailureKind::from_status(503), FailureKind::Http500);
    assert_eq!(FailureKind::from_status(408), FailureKind::Timeout);
    assert_eq!(FailureKind::from_status(204), FailureKind::NoContent);
    assert_eq!(FailureKind::from_status(404), FailureKind::Other);
}

#[test]
fn test_empty_feed_report() {
    let mut report = ScanReport::new("https://example.com/rss", "Example");
    report.finalize();

    assert!(report.success());
    assert_eq!(report.stats.total, 0);
    assert_eq!(report.stats.scanned, 0);
    assert_eq!(report.stats.failed, 0);
    assert_eq!(
        report.diagnosis.as_deref(),
        Some("All articles processed successfully")
    );
}

#[test]
fn test_bot_detection_diagnosis() {
    let mut report = ScanReport::new("https://example.com/rss", "Example");
    report.stats.total = 10;
    report.stats.scanned = 4;
    report.stats.failed = 6;
    report.stats.http_403 = 4; // > 50% of failures
    report.stats.other = 2;
    report.finalize();

    assert!(report.diagnosis.as_deref().unwrap().contains("bot detection"));
}

#[test]
fn test_rate_limiting_diagnosis() {
    let mut report = ScanReport::new("https://example.com/rss", "Example");
    report.stats.total = 5;
    report.stats.scanned = 2;
    report.stats.failed = 3;
    report.stats.http_429 = 2; // > 30% of failures
    report.stats.timeout = 1;
    report.finalize();

    assert!(report.diagnosis.as_deref().unwrap().contains("Rate limit"));
}

#[test]
fn test_extractor_strain_diagnosis() {
    let mut report = ScanReport::new("https://example.com/rss", "Example");
    report.stats.total = 10;
    report.stats.scanned = 2;
    report.stats.failed = 8;
    report.stats.http_500 = 7; // > 70% of failures
    report.stats.other = 1;
    report.finalize();

    assert!(report
        .diagnosis
        .as_deref()
        .unwrap()
        .contains("extractor strain"));
}

#[test]
fn test_redirect_paywall_diagnosis() {
    let mut report = ScanReport::new("https://example.com/rss", "Example");
    report.stats.total = 10;
    report.stats.scanned = 0;
    report.stats.failed = 10;
    report.stats.no_content = 10;
    report.finalize();

    assert!(report
        .diagnosis
        .as_deref()
        .unwrap()
        .contains("redirect/paywall"));
}

#[test]
fn test_mixed_failures_diagnosis() {
    let mut report = ScanReport::new("https://example.com/rss", "Example");
    report.stats.total = 10;
    report.stats.scanned = 7;
    report.stats.failed = 3;
    report.stats.http_500 = 1;
    report.stats.timeout = 1;
    report.stats.other = 1;
    report.finalize();

    assert_eq!(
        report.diagnosis.as_deref(),
        Some("Mixed failure types detected.")
    );
}

#[test]
fn test_success_and_failure_rates() {
    let mut report = ScanReport::new("https://example.com/rss", "Example");
    report.stats.total = 4;
    report.stats.scanned = 3;
    report.stats.failed = 1;

    assert_eq!(report.stats.success_rate(), 75.0);
    assert_eq!(report.stats.failure_rate(), 25.0);
    assert!(!report.has_high_failure_rate());

    report.stats.scanned = 0;
    report.stats.failed = 4;
    assert!(report.has_high_failure_rate());
}

#[test]
fn test_scan_outcome_snapshot() {
    let mut report = ScanReport::new("https://example.com/rss", "Example");
    report.stats.total = 5;
    report.stats.scanned = 2;
    report.stats.failed = 3;
    report.stats.http_429 = 2;
    report.stats.timeout = 1;
    report.finalize();

    let outcome = ScanOutcome::from(&report);
    assert!(outcome.success);
    assert_eq!(outcome.total, 5);
    assert_eq!(outcome.scanned, 2);
    assert_eq!(outcome.failed, 3);
    assert!(outcome.diagnosis.unwrap().contains("Rate limit"));
}

#[test]
fn test_fatal_error_fails_scan() {
    let mut report = ScanReport::new("https://example.com/rss", "Example");
    report.error = Some("RSS parsing failed: invalid XML".to_string());
    report.finalize();

    assert!(!report.success());
    let outcome = ScanOutcome::from(&report);
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("RSS parsing failed"));
}
