//! # Configuration
//!
//! Runtime settings for the maintenance core.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     CMMS_DB_PATH=/srv/cmms/plant.db                                    │
//! │     CMMS_DUE_SOON_DAYS=14                                              │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/plantwise-cmms/cmms.toml (Linux)                         │
//! │     ~/Library/Application Support/com.plantwise.cmms/cmms.toml (macOS) │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "/srv/cmms/plant.db"
//! max_connections = 5
//! busy_timeout_secs = 5
//!
//! [scheduling]
//! due_soon_days = 7
//! health_window_days = 365
//!
//! [export]
//! page_size = 100
//!
//! [logging]
//! filter = "info,cmms=debug,sqlx=warn"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use cmms_core::{DEFAULT_DUE_SOON_DAYS, DEFAULT_HEALTH_WINDOW_DAYS, MAX_CADENCE_DAYS};

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Sections
// =============================================================================

/// Where and how the SQLite store connects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits on a locked database before giving up.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout() -> u64 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
            busy_timeout_secs: default_busy_timeout(),
        }
    }
}

/// PM due-status and health-scoring windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulingSettings {
    #[serde(default = "default_due_soon_days")]
    pub due_soon_days: i64,

    #[serde(default = "default_health_window_days")]
    pub health_window_days: i64,
}

fn default_due_soon_days() -> i64 {
    DEFAULT_DUE_SOON_DAYS
}

fn default_health_window_days() -> i64 {
    DEFAULT_HEALTH_WINDOW_DAYS
}

impl Default for SchedulingSettings {
    fn default() -> Self {
        SchedulingSettings {
            due_soon_days: default_due_soon_days(),
            health_window_days: default_health_window_days(),
        }
    }
}

/// Paging of the due list and the audit/ledger export feeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSettings {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    100
}

impl Default for ExportSettings {
    fn default() -> Self {
        ExportSettings {
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "info,cmms=debug,sqlx=warn".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            filter: default_log_filter(),
        }
    }
}

// =============================================================================
// Root Configuration
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CmmsConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub scheduling: SchedulingSettings,

    #[serde(default)]
    pub export: ExportSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl CmmsConfig {
    /// Loads configuration: file (explicit path or platform default), then
    /// environment overrides, then validation.
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                config = Self::from_file(&path)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns defaults if loading fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Writes the configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        info!(?path, "Config saved");
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }
        if self.scheduling.due_soon_days < 0 {
            return Err(ConfigError::Invalid(
                "scheduling.due_soon_days cannot be negative".into(),
            ));
        }
        if self.scheduling.due_soon_days > MAX_CADENCE_DAYS {
            return Err(ConfigError::Invalid(format!(
                "scheduling.due_soon_days must be at most {}",
                MAX_CADENCE_DAYS
            )));
        }
        if self.scheduling.health_window_days <= 0 {
            return Err(ConfigError::Invalid(
                "scheduling.health_window_days must be greater than 0".into(),
            ));
        }
        if self.scheduling.health_window_days > MAX_CADENCE_DAYS {
            return Err(ConfigError::Invalid(format!(
                "scheduling.health_window_days must be at most {}",
                MAX_CADENCE_DAYS
            )));
        }
        if self.export.page_size == 0 {
            return Err(ConfigError::Invalid(
                "export.page_size must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `CMMS_*` overrides from `lookup`. Unparseable values are
    /// logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("CMMS_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        override_parsed(&lookup, "CMMS_DB_MAX_CONNECTIONS", &mut self.database.max_connections);
        override_parsed(&lookup, "CMMS_DB_BUSY_TIMEOUT_SECS", &mut self.database.busy_timeout_secs);
        override_parsed(&lookup, "CMMS_DUE_SOON_DAYS", &mut self.scheduling.due_soon_days);
        override_parsed(
            &lookup,
            "CMMS_HEALTH_WINDOW_DAYS",
            &mut self.scheduling.health_window_days,
        );
        override_parsed(&lookup, "CMMS_EXPORT_PAGE_SIZE", &mut self.export.page_size);

        if let Some(filter) = lookup("CMMS_LOG") {
            self.logging.filter = filter;
        }
    }

    /// Platform config file location.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "plantwise", "cmms")
            .map(|dirs| dirs.config_dir().join("cmms.toml"))
    }

    /// Configured database path, or `cmms.db` in the platform data directory.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database.path.clone().or_else(|| {
            directories::ProjectDirs::from("com", "plantwise", "cmms")
                .map(|dirs| dirs.data_dir().join("cmms.db"))
        })
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.parse() {
            Ok(value) => {
                debug!(key, value = %raw, "Overriding setting from environment");
                *target = value;
            }
            Err(_) => warn!(key, value = %raw, "Ignoring unparseable environment override"),
        }
    }
}

// =============================================================================
// Service Settings
// =============================================================================

/// The subset of configuration the orchestrator runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSettings {
    pub due_soon_days: i64,
    pub health_window_days: i64,
    pub page_size: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        ServiceSettings::from(&CmmsConfig::default())
    }
}

impl From<&CmmsConfig> for ServiceSettings {
    fn from(config: &CmmsConfig) -> Self {
        ServiceSettings {
            due_soon_days: config.scheduling.due_soon_days,
            health_window_days: config.scheduling.health_window_days,
            page_size: config.export.page_size,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = CmmsConfig::default();
        assert_eq!(config.scheduling.due_soon_days, 7);
        assert_eq!(config.scheduling.health_window_days, 365);
        assert_eq!(config.export.page_size, 100);
        assert_eq!(config.database.max_connections, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: CmmsConfig = toml::from_str(
            r#"
            [scheduling]
            due_soon_days = 14
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduling.due_soon_days, 14);
        assert_eq!(config.scheduling.health_window_days, 365);
        assert_eq!(config.export.page_size, 100);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cmms.toml");

        let mut config = CmmsConfig::default();
        config.database.path = Some(PathBuf::from("/srv/cmms/plant.db"));
        config.export.page_size = 25;
        config.save(&path).unwrap();

        let loaded = CmmsConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("CMMS_DB_PATH", "/tmp/override.db"),
            ("CMMS_DUE_SOON_DAYS", "3"),
            ("CMMS_EXPORT_PAGE_SIZE", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = CmmsConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.database.path, Some(PathBuf::from("/tmp/override.db")));
        assert_eq!(config.scheduling.due_soon_days, 3);
        // Unparseable override left the default in place
        assert_eq!(config.export.page_size, 100);
    }

    #[test]
    fn test_validation_rejects_zero_page_size() {
        let mut config = CmmsConfig::default();
        config.export.page_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validation_bounds_day_windows() {
        let env: HashMap<&str, &str> = [
            ("CMMS_DUE_SOON_DAYS", "9223372036854775807"),
            ("CMMS_HEALTH_WINDOW_DAYS", "100000000"),
        ]
        .into_iter()
        .collect();
        let mut config = CmmsConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.scheduling.due_soon_days = MAX_CADENCE_DAYS;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.scheduling.health_window_days = MAX_CADENCE_DAYS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmms.toml");
        std::fs::write(&path, "[scheduling\nbroken").unwrap();
        assert!(matches!(
            CmmsConfig::from_file(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
