//! Configuration management for the exposure-scan service.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest page size the scanning provider accepts.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Upper bounds accepted by [`AppConfig::validate`].
pub const MAX_ATTEMPTS_LIMIT: u32 = 10_000;
/// Longest accepted tick interval (one hour).
pub const MAX_TICK_INTERVAL_MS: u64 = 3_600_000;
/// Most extra tries accepted for the results write.
pub const MAX_PERSIST_RETRIES: u32 = 10;
/// Longest accepted base delay between results-write tries (one minute).
pub const MAX_PERSIST_RETRY_DELAY_MS: u64 = 60_000;

/// Time past the polling budget before an unmarked job counts as abandoned.
const ABANDON_GRACE: Duration = Duration::from_secs(60);

/// Main application configuration.
///
/// This is loaded from `~/.config/exposure/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Scanning provider connection settings
    pub provider: ProviderConfig,
    /// Polling cadence and budget
    pub polling: PollingConfig,
    /// Local database settings
    pub database: DatabaseConfig,
    /// Free-scan eligibility settings
    pub eligibility: EligibilityConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, falling back to defaults if
    /// the file does not exist.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            tracing::debug!("Loading config from {}", path.display());
            let contents = fs::read_to_string(path)?;
            let config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `EXPOSURE_PROVIDER_URL`: Override the provider base URL
    /// - `EXPOSURE_PROVIDER_API_KEY`: Provider API key (never read from the file)
    /// - `EXPOSURE_MAX_ATTEMPTS`: Override the polling budget
    /// - `EXPOSURE_TICK_INTERVAL_MS`: Override the polling interval
    /// - `EXPOSURE_DATABASE_PATH`: Override the database file
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to this configuration.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("EXPOSURE_PROVIDER_URL") {
            tracing::debug!("Override provider.base_url from env: {}", url);
            self.provider.base_url = url;
        }

        if let Ok(key) = std::env::var("EXPOSURE_PROVIDER_API_KEY") {
            self.provider.api_key = Some(key);
        }

        if let Ok(val) = std::env::var("EXPOSURE_MAX_ATTEMPTS") {
            if let Ok(attempts) = val.parse() {
                self.polling.max_attempts = attempts;
                tracing::debug!("Override polling.max_attempts from env: {}", attempts);
            }
        }

        if let Ok(val) = std::env::var("EXPOSURE_TICK_INTERVAL_MS") {
            if let Ok(ms) = val.parse() {
                self.polling.tick_interval_ms = ms;
                tracing::debug!("Override polling.tick_interval_ms from env: {}", ms);
            }
        }

        if let Ok(path) = std::env::var("EXPOSURE_DATABASE_PATH") {
            tracing::debug!("Override database.path from env: {}", path);
            self.database.path = Some(PathBuf::from(path));
        }
    }

    /// Check values the orchestrator relies on.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.polling.max_attempts == 0 || self.polling.max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(invalid(
                "polling.max_attempts",
                &format!("must be between 1 and {MAX_ATTEMPTS_LIMIT}"),
            ));
        }
        if self.polling.tick_interval_ms == 0 || self.polling.tick_interval_ms > MAX_TICK_INTERVAL_MS {
            return Err(invalid(
                "polling.tick_interval_ms",
                &format!("must be between 1 and {MAX_TICK_INTERVAL_MS}"),
            ));
        }
        if self.polling.persist_retries > MAX_PERSIST_RETRIES {
            return Err(invalid(
                "polling.persist_retries",
                &format!("must be at most {MAX_PERSIST_RETRIES}"),
            ));
        }
        if self.polling.persist_retry_delay_ms > MAX_PERSIST_RETRY_DELAY_MS {
            return Err(invalid(
                "polling.persist_retry_delay_ms",
                &format!("must be at most {MAX_PERSIST_RETRY_DELAY_MS}"),
            ));
        }
        if self.polling.page_size == 0 || self.polling.page_size > MAX_PAGE_SIZE {
            return Err(invalid(
                "polling.page_size",
                &format!("must be between 1 and {MAX_PAGE_SIZE}"),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(invalid("database.max_connections", "must be at least 1"));
        }
        Ok(())
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| invalid("config_path", "no parent directory"))?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/exposure/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("org", "exposure", "exposure").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/exposure`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("org", "exposure", "exposure").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Database file to open: the configured path, or `exposure.db` in the data directory.
    pub fn database_path(&self) -> ConfigResult<PathBuf> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("exposure.db")),
        }
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Scanning provider connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the provider API
    pub base_url: String,
    /// API key (supplied through the environment, never written to disk)
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.onerep.com".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// Polling cadence, attempt budget and result paging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Fixed wait between status checks, in milliseconds
    pub tick_interval_ms: u64,
    /// Status checks allowed before giving up
    pub max_attempts: u32,
    /// Records requested per result page
    pub page_size: u32,
    /// Extra attempts for the final results write
    pub persist_retries: u32,
    /// Base delay between results-write attempts, in milliseconds
    pub persist_retry_delay_ms: u64,
}

impl PollingConfig {
    /// Tick interval as a `Duration`.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Results-write retry delay as a `Duration`.
    #[must_use]
    pub fn persist_retry_delay(&self) -> Duration {
        Duration::from_millis(self.persist_retry_delay_ms)
    }

    /// Wall-clock budget: `max_attempts` ticks.
    #[must_use]
    pub fn wall_clock_budget(&self) -> Duration {
        self.tick_interval().saturating_mul(self.max_attempts)
    }

    /// Age after which a job never marked abandoned is treated as abandoned
    /// anyway. Covers the polling budget plus the results-write retry
    /// delays, with a minute of grace on top.
    #[must_use]
    pub fn abandon_after(&self) -> Duration {
        let retries = (1..=self.persist_retries)
            .fold(Duration::ZERO, |total, n| {
                total.saturating_add(self.persist_retry_delay().saturating_mul(n))
            });
        self.wall_clock_budget()
            .saturating_add(retries)
            .saturating_add(ABANDON_GRACE)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            max_attempts: 15,
            page_size: MAX_PAGE_SIZE,
            persist_retries: 3,
            persist_retry_delay_ms: 500,
        }
    }
}

/// Local database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file (defaults to the data directory)
    pub path: Option<PathBuf>,
    /// Connection pool size
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 5,
        }
    }
}

/// Free-scan eligibility settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EligibilityConfig {
    /// Feature flag gating the free scan
    pub free_scan_flag: String,
    /// Whether the flag must be enabled for a subject to be eligible
    pub enforce_flag: bool,
}

impl Default for EligibilityConfig {
    fn default() -> Self {
        Self {
            free_scan_flag: "FreeBrokerScan".to_string(),
            enforce_flag: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.polling.max_attempts, 15);
        assert_eq!(config.polling.tick_interval_ms, 1000);
        assert_eq!(config.polling.page_size, 100);
        assert_eq!(config.database.max_connections, 5);
        assert!(config.provider.api_key.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_wall_clock_budget() {
        let polling = PollingConfig::default();
        assert_eq!(polling.wall_clock_budget(), Duration::from_secs(15));
    }

    #[test]
    fn test_config_serialization_skips_api_key() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("secret-key".to_string()); // pragma: allowlist secret
        let toml_str = toml::to_string_pretty(&config).expect("serialize config");
        assert!(toml_str.contains("[polling]"));
        assert!(toml_str.contains("[provider]"));
        assert!(!toml_str.contains("secret-key"));

        let parsed: AppConfig = toml::from_str(&toml_str).expect("parse serialized config");
        assert_eq!(parsed.polling.max_attempts, config.polling.max_attempts);
        assert!(parsed.provider.api_key.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let tmp = TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("config.toml");

        let mut config = AppConfig::default();
        config.polling.max_attempts = 30;
        config.eligibility.enforce_flag = true;
        let contents = toml::to_string_pretty(&config).expect("serialize config");
        fs::write(&config_path, contents).expect("write config file");

        let loaded = AppConfig::load_from(&config_path).expect("load config");
        assert_eq!(loaded.polling.max_attempts, 30);
        assert!(loaded.eligibility.enforce_flag);
    }

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        let tmp = TempDir::new().expect("create temp dir");
        let loaded = AppConfig::load_from(&tmp.path().join("absent.toml")).expect("load config");
        assert_eq!(loaded.polling.max_attempts, 15);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[polling]
max_attempts = 5

[provider]
base_url = "http://localhost:9000"
"#;

        let config: AppConfig = toml::from_str(toml_str).expect("parse partial config");
        assert_eq!(config.polling.max_attempts, 5);
        assert_eq!(config.provider.base_url, "http://localhost:9000");
        assert_eq!(config.polling.page_size, 100);
        assert_eq!(config.eligibility.free_scan_flag, "FreeBrokerScan");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.polling.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "polling.max_attempts"
        ));

        let mut config = AppConfig::default();
        config.polling.page_size = 101;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.polling.tick_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_values() {
        let mut config = AppConfig::default();
        config.polling.max_attempts = u32::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "polling.max_attempts"
        ));

        let mut config = AppConfig::default();
        config.polling.persist_retries = u32::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "polling.persist_retries"
        ));

        let mut config = AppConfig::default();
        config.polling.persist_retry_delay_ms = u64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "polling.persist_retry_delay_ms"
        ));

        let mut config = AppConfig::default();
        config.polling.tick_interval_ms = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_budgets_saturate_instead_of_overflowing() {
        let polling = PollingConfig {
            tick_interval_ms: u64::MAX,
            max_attempts: u32::MAX,
            persist_retries: 3,
            persist_retry_delay_ms: u64::MAX,
            ..PollingConfig::default()
        };
        assert_eq!(polling.wall_clock_budget(), Duration::MAX);
        assert_eq!(polling.abandon_after(), Duration::MAX);
    }

    #[test]
    fn test_abandon_after_default() {
        // 15 s of polling, 0.5 + 1 + 1.5 s of write retries, 60 s grace
        assert_eq!(
            PollingConfig::default().abandon_after(),
            Duration::from_millis(78_000)
        );
    }

    #[test]
    fn test_database_path_prefers_configured() {
        let mut config = AppConfig::default();
        config.database.path = Some(PathBuf::from("/tmp/exposure-test.db"));
        assert_eq!(
            config.database_path().expect("database path"),
            PathBuf::from("/tmp/exposure-test.db")
        );
    }
}
