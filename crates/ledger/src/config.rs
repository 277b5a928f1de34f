//! TOML configuration for a ledger deployment.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use shonali_engine::HoardingThresholds;

/// Top-level configuration. Every section and field has a default, so an
/// empty file is a valid (local, on-disk) deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Database settings.
    pub database: DatabaseConfig,
    /// Per-role hoarding thresholds.
    pub hoarding: HoardingThresholds,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            hoarding: HoardingThresholds::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Database settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite connection URL.
    pub url: String,
    /// Pool size.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:shonali.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level: trace, debug, info, warn or error.
    pub level: String,
    /// Output format: pretty or json.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Load and validate a config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read config file: {}", path.as_ref().display())
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate TOML config contents.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            bail!("database.url must not be empty");
        }
        if self.database.max_connections == 0 {
            bail!("database.max_connections must be at least 1");
        }
        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            bail!("logging.level must be one of trace, debug, info, warn, error");
        }
        if !["pretty", "json"].contains(&self.logging.format.as_str()) {
            bail!("logging.format must be pretty or json");
        }
        let thresholds = [
            self.hoarding.farmer_secs,
            self.hoarding.transporter_secs,
            self.hoarding.wholesaler_secs,
            self.hoarding.retailer_secs,
        ];
        if thresholds.contains(&0) {
            bail!("hoarding thresholds must be positive");
        }
        Ok(())
    }
}
