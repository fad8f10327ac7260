//! Alerts and their scheduler.
//!
//! - [`Alert`]: a single alarm, timer or reminder with its own activation
//!   state machine
//! - [`AlertScheduler`]: owns every alert, arms the timer for the soonest one
//!   and activates alerts when audio focus is granted
//! - [`AlertObserver`]: receives every lifecycle notification as an [`AlertInfo`]
//!
//! # Lifecycle
//!
//! An alert is scheduled, reported `READY` when its time comes, activated
//! once focus is granted, then ends `STOPPED`, `COMPLETED`, `SNOOZED` or in
//! `ERROR`. Erased alerts are reported `DELETED`. Alerts found more than the
//! past-due limit behind the clock at start-up are reported `PAST_DUE` and
//! erased.
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use alert_scheduler::{
//!     alerts::{Alert, AlertScheduler, AlertType, Asset, AssetConfiguration, StopReason},
//!     time::ScheduledTime,
//! };
//!
//! # async fn example(scheduler: AlertScheduler) -> anyhow::Result<()> {
//! let mut assets = AssetConfiguration::default();
//! assets.assets.insert("bell".to_string(), Asset::new("bell", "file:///bell.mp3"));
//! assets.play_order.push("bell".to_string());
//!
//! let alert = Alert::new(
//!     "pizza",
//!     AlertType::Timer,
//!     ScheduledTime::parse("2030-01-01T19:30:00+0000")?,
//! )
//! .with_asset_configuration(assets)
//! .with_label("pizza");
//! scheduler.schedule_alert(Arc::new(alert)).await?;
//!
//! // Later, remove it
//! scheduler.delete_alert("pizza").await?;
//!
//! // Or forget everything on log out
//! scheduler.clear_data(StopReason::LogOut).await;
//! # Ok(())
//! # }
//! ```

mod alert;
mod assets;
mod error;
mod executor;
mod observer;
mod scheduled_alerts;
mod scheduler;
mod timer;

pub use crate::alerts::{
    alert::{
        Alert, AlertContext, AlertError, AlertState, DEFAULT_LOOP_COUNT, MAXIMUM_RENDERING_TIME,
        StopReason,
    },
    assets::{Asset, AssetConfiguration},
    error::SchedulerError,
    observer::{AlertInfo, AlertObserver, AlertType, ObserverState},
    scheduler::{AlertScheduler, AlertsContextInfo},
};
