//! Alert scheduler daemon.
//!
//! Runs the alert scheduling engine against a SQLite database with a
//! simulated audio renderer. Stored alarms, timers and reminders are reloaded
//! at start-up: past-due ones are dropped, alerts interrupted while ringing
//! are rescheduled, and the rest wait for their time.
//!
//! # Configuration
//!
//! Create a `config.yaml` file with your settings (every field is optional):
//!
//! ```yaml
//! storage:
//!   path: "./data/alerts.db"
//!
//! scheduler:
//!   past_due_time_limit: 1800
//!   start_on_initialization: true
//!
//! settings:
//!   alarm_volume_ramp: false
//!
//! renderer:
//!   simulated_duration: 30
//! ```
//!
//! # Environment Variable Overrides
//!
//! Override any configuration value using environment variables with the
//! `ALERT_SCHEDULER_` prefix:
//!
//! ```bash
//! export ALERT_SCHEDULER_STORAGE__PATH="/var/lib/alerts/alerts.db"
//! export ALERT_SCHEDULER_SCHEDULER__PAST_DUE_TIME_LIMIT=600
//! ```
//!
//! # Usage
//!
//! ```bash
//! alert-scheduler --config config.yaml --data ./data
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG` - Controls logging level (default: `info`)
//!   - Set to `debug` for verbose output, metrics included

use std::path::PathBuf;

use alert_scheduler::config::Config;
use clap::Parser;
use env_logger::Env;
use log::{error, info};

use crate::daemon::Daemon;

mod daemon;

/// Command-line arguments of the daemon.
///
/// # Examples
///
/// ```bash
/// alert-scheduler --config config.yaml --data ./data
/// ```
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to the YAML configuration file.
    ///
    /// See the [`alert_scheduler::config`] module for the expected format.
    #[arg(short, long)]
    config: PathBuf,

    /// Directory holding the alert database.
    ///
    /// Overrides `storage.path` of the configuration; the database is
    /// `alerts.db` inside this directory.
    #[arg(short, long)]
    data: Option<PathBuf>,
}

/// Main entry point of the daemon.
///
/// 1. **Logging Setup**: `info` level by default, overridden by `RUST_LOG`
/// 2. **Argument Parsing**: with `clap`
/// 3. **Configuration Loading**: YAML file merged with environment overrides
/// 4. **Daemon Initialization**: opens the database and reloads the alerts
/// 5. **Daemon Execution**: runs until Ctrl-C
///
/// Configuration and initialization errors are logged and end the process.
#[tokio::main]
async fn main() {
    // Put logger at info level by default
    let env = Env::default().filter_or("RUST_LOG", "info");
    env_logger::init_from_env(env);

    info!("Starting alert-scheduler {}...", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load config file: {}", e);
            return;
        }
    };

    let daemon = match Daemon::new(config, args).await {
        Ok(d) => d,
        Err(e) => {
            error!("Failed to initialize alert scheduler: {}", e);
            return;
        }
    };
    daemon.start().await;
}
