//! Daemon wiring the alert scheduler to its collaborators.
//!
//! The [`Daemon`] opens the SQLite storage, builds the [`AlertScheduler`]
//! with a [`SimulatedRenderer`], and plays the part of the focus manager:
//! focus is granted when an alert becomes `READY` and released once it
//! stops, completes, snoozes or fails.
//!
//! # Example
//!
//! ```no_run
//! # async fn run(config: Config, args: Args) -> Result<(), anyhow::Error> {
//! let daemon = Daemon::new(config, args).await?;
//! daemon.start().await; // Runs until Ctrl-C
//! # Ok(())
//! # }
//! ```

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Weak},
};

use alert_scheduler::{
    alerts::{AlertInfo, AlertObserver, AlertScheduler, ObserverState},
    config::Config,
    focus::{FocusState, MixingBehavior},
    metrics::LogMetricRecorder,
    renderer::SimulatedRenderer,
    settings::DeviceSettings,
    storage::SqliteAlertStorage,
    time::SystemTimeSource,
};
use log::{debug, error, info};
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::Args;

/// File name of the database inside the data directory.
const DATABASE_FILE_NAME: &str = "alerts.db";

/// Focus to hand to the scheduler.
type FocusChange = (FocusState, MixingBehavior);

/// Observer logging every notification and driving the audio focus.
///
/// Focus changes go through a single worker so they reach the scheduler in
/// the order the notifications were received.
struct FocusObserver {
    focus_changes: UnboundedSender<FocusChange>,
}

impl FocusObserver {
    fn new(scheduler: Weak<AlertScheduler>) -> Self {
        FocusObserver {
            focus_changes: spawn_focus_worker(scheduler),
        }
    }
}

/// Spawns the task applying focus changes one at a time.
fn spawn_focus_worker(scheduler: Weak<AlertScheduler>) -> UnboundedSender<FocusChange> {
    let (sender, mut receiver) = mpsc::unbounded_channel::<FocusChange>();
    tokio::spawn(async move {
        while let Some((focus_state, mixing_behavior)) = receiver.recv().await {
            let Some(scheduler) = scheduler.upgrade() else {
                break;
            };
            scheduler.update_focus(focus_state, mixing_behavior).await;
        }
        debug!("focus worker stopped");
    });
    sender
}

impl AlertObserver for FocusObserver {
    fn on_alert_state_change(&self, alert_info: AlertInfo) {
        info!(
            "alert {} ({}) is {} at {}{}",
            alert_info.token,
            alert_info.alert_type,
            alert_info.state,
            alert_info.scheduled_time,
            if alert_info.reason.is_empty() {
                String::new()
            } else {
                format!(": {}", alert_info.reason)
            }
        );

        let Some(focus_change) = focus_for(alert_info.state) else {
            return;
        };
        if self.focus_changes.send(focus_change).is_err() {
            error!("focus worker is gone, dropping {:?}", focus_change);
        }
    }
}

/// Focus to apply after an alert reported `state`, if any.
fn focus_for(state: ObserverState) -> Option<FocusChange> {
    match state {
        ObserverState::Ready => Some((FocusState::Foreground, MixingBehavior::Primary)),
        ObserverState::Stopped
        | ObserverState::Completed
        | ObserverState::Snoozed
        | ObserverState::Error => Some((FocusState::None, MixingBehavior::Undefined)),
        _ => None,
    }
}

/// Database location, the data directory taking precedence over the configuration.
///
/// # Arguments
///
/// * `config` - Loaded configuration
/// * `data_dir` - Optional data directory given on the command line
fn database_path(config: &Config, data_dir: Option<&Path>) -> PathBuf {
    match data_dir {
        Some(dir) => dir.join(DATABASE_FILE_NAME),
        None => config.storage.path.clone(),
    }
}

/// Alert scheduler daemon.
pub struct Daemon {
    scheduler: Arc<AlertScheduler>,
}

impl Daemon {
    /// Creates the scheduler and loads the stored alerts.
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration loaded from file and environment
    /// * `args` - Command line arguments, for the data directory
    ///
    /// # Errors
    ///
    /// Returns an error if the database can neither be opened nor created,
    /// or if the clock cannot be read while loading the alerts.
    pub async fn new(config: Config, args: Args) -> Result<Self, anyhow::Error> {
        let path = database_path(&config, args.data.as_deref());
        info!("using alert database {}", path.display());

        let scheduler = Arc::new(AlertScheduler::new(
            Arc::new(SqliteAlertStorage::new(path)),
            Arc::new(SimulatedRenderer::new(config.renderer.simulated_duration())),
            Arc::new(SystemTimeSource),
            config.scheduler.past_due_time_limit(),
            Some(Arc::new(LogMetricRecorder)),
        ));

        let observer = Arc::new(FocusObserver::new(Arc::downgrade(&scheduler)));
        let settings = Arc::new(DeviceSettings::new(config.settings.alarm_volume_ramp));
        scheduler
            .initialize(observer, settings, config.scheduler.start_on_initialization)
            .await?;

        Ok(Daemon { scheduler })
    }

    /// Runs until Ctrl-C, then shuts the scheduler down.
    pub async fn start(self) {
        let context = self.scheduler.get_context_info().await;
        info!(
            "{} alert(s) loaded, {} active",
            context.scheduled_alerts.len(),
            context.active_alerts.len()
        );
        match self.scheduler.get_offline_stopped_alerts().await {
            Ok(offline) if !offline.is_empty() => {
                info!("{} alert(s) were stopped while offline", offline.len());
            }
            Ok(_) => {}
            Err(e) => error!("cannot read offline alerts: {}", e),
        }

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for ctrl-c: {}", e);
        }
        info!("stopping...");
        self.scheduler.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use alert_scheduler::{
        alerts::{Alert, AlertType},
        time::{ScheduledTime, TimeSource},
    };

    /// Polls until the active alert is `token`.
    async fn wait_for_active(scheduler: &AlertScheduler, token: &str) -> bool {
        for _ in 0..500 {
            if scheduler
                .get_active_alert()
                .await
                .is_some_and(|active| active.token() == token)
            {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_next_due_alert_plays_after_stop() {
        for _ in 0..10 {
            let scheduler = Arc::new(AlertScheduler::new(
                Arc::new(SqliteAlertStorage::in_memory()),
                Arc::new(SimulatedRenderer::new(Duration::from_secs(3600))),
                Arc::new(SystemTimeSource),
                Duration::from_secs(1800),
                None,
            ));
            let observer = Arc::new(FocusObserver::new(Arc::downgrade(&scheduler)));
            scheduler
                .initialize(observer, Arc::new(DeviceSettings::default()), true)
                .await
                .unwrap();

            let now = SystemTimeSource.current_unix_time().unwrap();
            for token in ["a", "b"] {
                let time = ScheduledTime::from_unix(now).unwrap();
                scheduler
                    .schedule_alert(Arc::new(Alert::new(token, AlertType::Alarm, time)))
                    .await
                    .unwrap();
            }
            assert!(wait_for_active(&scheduler, "a").await);

            scheduler.delete_alert("a").await.unwrap();
            assert!(wait_for_active(&scheduler, "b").await);
            assert_eq!(scheduler.get_focus_state().await, FocusState::Foreground);

            scheduler.shutdown().await;
        }
    }

    #[test]
    fn test_focus_for_lifecycle_states() {
        assert_eq!(
            focus_for(ObserverState::Ready),
            Some((FocusState::Foreground, MixingBehavior::Primary))
        );
        for state in [
            ObserverState::Stopped,
            ObserverState::Completed,
            ObserverState::Snoozed,
            ObserverState::Error,
        ] {
            assert_eq!(focus_for(state), Some((FocusState::None, MixingBehavior::Undefined)));
        }
        assert_eq!(focus_for(ObserverState::Started), None);
        assert_eq!(focus_for(ObserverState::Deleted), None);
    }

    #[test]
    fn test_database_path() {
        let config = Config::default();
        assert_eq!(database_path(&config, None), config.storage.path);

        let path = database_path(&config, Some(Path::new("/var/data")));
        assert_eq!(path, PathBuf::from("/var/data").join("alerts.db"));
    }
}
