//! Configuration management for the scanner
//!
//! This module handles loading and validation of the scanner configuration
//! files (scanner.toml and sources.toml). Every knob in scanner.toml has a
//! default, so a missing file is treated as the all-defaults configuration;
//! sources.toml lists the feeds to register at startup.

use anyhow::{Context, Result};
use shared::config::{ScannerConfig, SourcesConfig};
use std::path::PathBuf;
use tracing::{info, warn};

/// Configuration file names are defined as constants to avoid magic strings.
const SCANNER_CONFIG_FILE: &str = "scanner.toml";
const SOURCES_CONFIG_FILE: &str = "sources.toml";

/// Manages scanner configuration loading and validation.
pub struct ConfigManager {
    /// Directory containing configuration files.
    pub config_dir: PathBuf,
    /// Loaded scanner configuration, wrapped in an Option to represent the
    /// unloaded state.
    pub scanner_config: Option<ScannerConfig>,
    /// Loaded source list, also optional.
    pub sources_config: Option<SourcesConfig>,
}

impl ConfigManager {
    /// Create a new configuration manager.
    /// Fails early when the configuration path does not exist or is not a
    /// directory.
    pub fn new(config_dir: PathBuf) -> Result<Self> {
        if !config_dir.exists() {
            return Err(anyhow::anyhow!(
                "Configuration directory does not exist: {}",
                config_dir.display()
            ));
        }
        if !config_dir.is_dir() {
            return Err(anyhow::anyhow!(
                "Configuration path is not a directory: {}",
                config_dir.display()
            ));
        }

        Ok(Self {
            config_dir,
            scanner_config: None,
            sources_config: None,
        })
    }

    /// Load configuration files from disk.
    ///
    /// scanner.toml may be absent (all defaults apply); sources.toml may be
    /// absent (no feeds registered at startup, the admin API can add them).
    pub async fn load_config(&mut self) -> Result<()> {
        info!(
            "Loading scanner configuration from {}",
            self.config_dir.display()
        );

        let scanner_config_path = self.config_dir.join(SCANNER_CONFIG_FILE);
        let scanner_config: ScannerConfig = if scanner_config_path.exists() {
            let content = tokio::fs::read_to_string(&scanner_config_path)
                .await
                .with_context(|| format!("Failed to read {}", scanner_config_path.display()))?;
            toml::from_str(&content).with_context(|| {
                format!(
                    "Failed to parse {} - TOML syntax error in scanner configuration file",
                    scanner_config_path.display()
                )
            })?
        } else {
            warn!(
                "{} not found, using default configuration",
                scanner_config_path.display()
            );
            ScannerConfig::default()
        };

        scanner_config.validate().with_context(|| {
            format!(
                "Validation failed for scanner configuration in {}",
                scanner_config_path.display()
            )
        })?;

        let sources_config_path = self.config_dir.join(SOURCES_CONFIG_FILE);
        let sources_config: SourcesConfig = if sources_config_path.exists() {
            let content = tokio::fs::read_to_string(&sources_config_path)
                .await
                .with_context(|| format!("Failed to read {}", sources_config_path.display()))?;
            toml::from_str(&content).with_context(|| {
                format!(
                    "Failed to parse {} - TOML syntax error in sources configuration file",
                    sources_config_path.display()
                )
            })?
        } else {
            warn!(
                "{} not found, starting with no configured sources",
                sources_config_path.display()
            );
            SourcesConfig::default()
        };

        info!(
            sources = sources_config.sources.len(),
            "Configuration loaded"
        );
        self.scanner_config = Some(scanner_config);
        self.sources_config = Some(sources_config);
        Ok(())
    }
}
