//! Alert scheduling engine for voice-assistant devices.
//!
//! This crate persists, times, activates and reconciles timed events (alarms,
//! timers and reminders). It is the device-side core that sits between a
//! directive layer deciding *what* should be scheduled and the audio stack
//! that actually plays the alert sound.
//!
//! # Overview
//!
//! - [`alerts::AlertScheduler`] owns the working set of alerts, a single
//!   one-shot timer for the soonest alert, the audio focus state and the
//!   reconciliation logic run at start-up.
//! - [`alerts::Alert`] is a single schedulable unit with its own activation
//!   state machine, driven by a [`renderer::Renderer`].
//! - [`storage::AlertStorage`] is the durable store; [`storage::SqliteAlertStorage`]
//!   is the default implementation.
//! - [`alerts::AlertObserver`] receives every lifecycle notification so it can
//!   be relayed upstream.
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use alert_scheduler::{
//!     alerts::{Alert, AlertInfo, AlertObserver, AlertScheduler, AlertType},
//!     renderer::SimulatedRenderer,
//!     settings::DeviceSettings,
//!     storage::SqliteAlertStorage,
//!     time::{ScheduledTime, SystemTimeSource},
//! };
//!
//! struct Printer;
//!
//! impl AlertObserver for Printer {
//!     fn on_alert_state_change(&self, alert_info: AlertInfo) {
//!         println!("{} -> {:?}", alert_info.token, alert_info.state);
//!     }
//! }
//!
//! # async fn example() -> anyhow::Result<()> {
//! let scheduler = AlertScheduler::new(
//!     Arc::new(SqliteAlertStorage::new("alerts.db")),
//!     Arc::new(SimulatedRenderer::new(Duration::from_secs(30))),
//!     Arc::new(SystemTimeSource),
//!     Duration::from_secs(30 * 60),
//!     None,
//! );
//! scheduler
//!     .initialize(Arc::new(Printer), Arc::new(DeviceSettings::default()), true)
//!     .await?;
//!
//! let wake_up = ScheduledTime::parse("2030-01-01T07:00:00+0000")?;
//! scheduler
//!     .schedule_alert(Arc::new(Alert::new("wake-up", AlertType::Alarm, wake_up)))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod config;
pub mod focus;
pub mod metrics;
pub mod renderer;
pub mod settings;
pub mod storage;
pub mod time;

#[cfg(test)]
pub(crate) mod test_support;
