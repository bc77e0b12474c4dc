//! Tests for configuration loading and validation

use crate::config::ScannerConfig;

#[test]
fn test_empty_toml_yields_defaults() {
    let config: ScannerConfig = toml::from_str("").unwrap();

    assert_eq!(config.max_concurrent_scans, 5);
    assert_eq!(config.request_delay_ms, 100);
    assert_eq!(config.request_timeout_seconds, 30);
    assert_eq!(config.max_retries, 2);
    assert_eq!(config.scan_stagger_seconds, 30);
    assert_eq!(config.worker_max_tasks_per_child, 50);
    assert_eq!(config.result_ttl_seconds, 3600);
    assert_eq!(config.broker_visibility_timeout_seconds, 3600);
    assert_eq!(config.rolling_similarity_threshold, 0.75);
    assert_eq!(config.rolling_min_group_size, 2);
    assert_eq!(config.daily_similarity_threshold, 0.80);
    assert_eq!(config.daily_min_group_size, 5);
    assert_eq!(config.daily_max_articles, 500);
    assert_eq!(config.daily_window_days, 7);
    assert_eq!(config.provider_min_interval_seconds, 1.0);
    assert_eq!(config.provider_quota_soft_pct, 90);

    config.validate().unwrap();
}

#[test]
fn test_partial_toml_overrides() {
    let config: ScannerConfig = toml::from_str(
        r#"
        max_concurrent_scans = 3
        scan_stagger_seconds = 60
        daily_similarity_threshold = 0.9
        ml_service_url = "http://localhost:8001"
        "#,
    )
    .unwrap();

    assert_eq!(config.max_concurrent_scans, 3);
    assert_eq!(config.scan_stagger_seconds, 60);
    assert_eq!(config.daily_similarity_threshold, 0.9);
    assert_eq!(config.ml_service_url, "http://localhost:8001");
    // Untouched fields keep their defaults
    assert_eq!(config.request_delay_ms, 100);

    config.validate().unwrap();
}

#[test]
fn test_validate_rejects_zero_workers() {
    let config: ScannerConfig = toml::from_str("worker_count = 0").unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_out_of_range_threshold() {
    let config: ScannerConfig = toml::from_str("rolling_similarity_threshold = 1.5").unwrap();
    assert!(config.validate().is_err());

    let config: ScannerConfig = toml::from_str("daily_similarity_threshold = -0.1").unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_quota_pct_above_100() {
    let config: ScannerConfig = toml::from_str("provider_quota_soft_pct = 120").unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_round_trip() {
    let config = ScannerConfig::default();
    let serialized = toml::to_string(&config).unwrap();
    let restored: ScannerConfig = toml::from_str(&serialized).unwrap();
    assert_eq!(config, restored);
}
