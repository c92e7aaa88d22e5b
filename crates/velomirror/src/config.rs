//! Configuration management for velomirror.
//!
//! Loaded with figment from defaults, an optional TOML file and
//! `VELOMIRROR_`-prefixed environment variables. Variables name the section
//! first, e.g. `VELOMIRROR_ADVISOR_HEALTH_THRESHOLD_PERCENT`.

use std::path::PathBuf;

use chrono::Duration;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "velomirror";

/// Default database file name for the local document store.
const DATABASE_FILE_NAME: &str = "documents.db";

/// Prefix of environment overrides.
const ENV_PREFIX: &str = "VELOMIRROR_";

/// Top-level config tables, matched against environment keys.
const SECTIONS: [&str; 3] = ["store", "advisor", "defaults"];

/// Engine configuration.
///
/// Precedence, highest first:
/// 1. Environment variables (prefixed with `VELOMIRROR_`)
/// 2. TOML config file at `~/.config/velomirror/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Document store configuration.
    pub store: StoreConfig,
    /// Maintenance advisor thresholds.
    pub advisor: AdvisorConfig,
    /// Defaults for newly created fleet data.
    pub defaults: DefaultsConfig,
}

/// Which document store backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// In-process store; nothing survives the process.
    #[default]
    Memory,
    /// `SQLite` file acting as a local document store.
    Sqlite,
}

/// Document store configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend selection.
    pub backend: StoreBackend,
    /// Path to the `SQLite` database file.
    /// Defaults to `~/.local/share/velomirror/documents.db`
    pub database_path: Option<PathBuf>,
}

/// Maintenance advisor thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    /// Components strictly below this health percentage are advised.
    pub health_threshold_percent: i64,
    /// How long a qualifying maintenance record suppresses advice, in hours.
    pub recent_window_hours: u32,
    /// Minimum restored percentage for a record to suppress advice.
    pub min_restored_percent: f64,
}

/// Defaults applied to new fleet data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Lifespan given to components whose type is not in the catalog.
    pub component_lifespan: f64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            health_threshold_percent: 20,
            recent_window_hours: 24,
            min_restored_percent: 50.0,
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            component_lifespan: 5000.0,
        }
    }
}

impl AdvisorConfig {
    /// The suppression window as a chrono duration.
    #[must_use]
    pub fn recent_window(&self) -> Duration {
        Duration::hours(i64::from(self.recent_window_hours))
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).map(|key| env_key(key.as_str()).into()));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are out of range.
    pub fn validate(&self) -> Result<()> {
        if !(0..=100).contains(&self.advisor.health_threshold_percent) {
            return Err(Error::ConfigValidation {
                message: format!(
                    "health_threshold_percent ({}) must be between 0 and 100",
                    self.advisor.health_threshold_percent
                ),
            });
        }

        if !(0.0..=100.0).contains(&self.advisor.min_restored_percent) {
            return Err(Error::ConfigValidation {
                message: format!(
                    "min_restored_percent ({}) must be between 0 and 100",
                    self.advisor.min_restored_percent
                ),
            });
        }

        if self.defaults.component_lifespan <= 0.0 {
            return Err(Error::ConfigValidation {
                message: "component_lifespan must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.store
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }
}

/// Map an unprefixed environment key to a dotted config path.
///
/// Only the first underscore after a known section separates it from the
/// field, so `ADVISOR_HEALTH_THRESHOLD_PERCENT` becomes
/// `advisor.health_threshold_percent`.
fn env_key(key: &str) -> String {
    let key = key.to_ascii_lowercase();
    for section in SECTIONS {
        if let Some(field) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return format!("{section}.{field}");
        }
    }
    key
}
