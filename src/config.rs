//! Configuration file structures for the alert scheduler.
//!
//! The configuration is read from a YAML file and can be overridden with
//! environment variables prefixed by `ALERT_SCHEDULER_`, using `__` to reach
//! nested keys. Every field has a default, so an empty file is valid.
//!
//! # Configuration File Format
//!
//! ```yaml
//! # SQLite database holding the alerts
//! storage:
//!   path: "./data/alerts.db"
//!
//! scheduler:
//!   # How late an alert may still be played, in seconds
//!   past_due_time_limit: 1800
//!   # Whether timers are armed as soon as the alerts are loaded
//!   start_on_initialization: true
//!
//! settings:
//!   alarm_volume_ramp: false
//!
//! # Demo renderer of the binary
//! renderer:
//!   simulated_duration: 30
//! ```
//!
//! # Environment Variable Overrides
//!
//! ```bash
//! export ALERT_SCHEDULER_STORAGE__PATH="/var/lib/alerts/alerts.db"
//! export ALERT_SCHEDULER_SCHEDULER__PAST_DUE_TIME_LIMIT=600
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::Deserialize;

/// Prefix of the environment variables overriding the configuration file.
pub const ENV_PREFIX: &str = "ALERT_SCHEDULER_";

/// Root configuration structure.
///
/// # Examples
///
/// ```no_run
/// use alert_scheduler::config::Config;
///
/// # fn main() -> Result<(), figment::Error> {
/// let config = Config::load("config.yaml")?;
/// println!("alerts are stored in {}", config.storage.path.display());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Alert database settings
    pub storage: StorageConfig,
    /// Scheduling behavior
    pub scheduler: SchedulerConfig,
    /// Device settings applied to the loaded alerts
    pub settings: SettingsConfig,
    /// Demo renderer settings
    pub renderer: RendererConfig,
}

/// Alert database settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the SQLite database file.
    ///
    /// Missing parent directories are created with the database.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            path: PathBuf::from("./data/alerts.db"),
        }
    }
}

/// Scheduling behavior.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How late an alert may still be played, in seconds.
    ///
    /// Alerts further behind the clock are reported past due and erased
    /// when the alerts are reloaded.
    pub past_due_time_limit: u64,

    /// Whether timers are armed as soon as the alerts are loaded.
    pub start_on_initialization: bool,
}

impl SchedulerConfig {
    pub fn past_due_time_limit(&self) -> Duration {
        Duration::from_secs(self.past_due_time_limit)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            past_due_time_limit: 30 * 60,
            start_on_initialization: true,
        }
    }
}

/// Device settings applied to the loaded alerts.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Whether alarms start quietly and get louder.
    pub alarm_volume_ramp: bool,
}

/// Demo renderer settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// How long one loop of the simulated sound lasts, in seconds.
    pub simulated_duration: u64,
}

impl RendererConfig {
    pub fn simulated_duration(&self) -> Duration {
        Duration::from_secs(self.simulated_duration)
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        RendererConfig {
            simulated_duration: 30,
        }
    }
}

impl Config {
    /// Loads the configuration from a YAML file and the environment.
    ///
    /// Environment variables take precedence over the file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path of the YAML configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the file is not valid YAML or a value has the
    /// wrong type.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, figment::Error> {
        Figment::new()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }
}
