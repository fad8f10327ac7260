//! Counters emitted by the scheduler.
//!
//! Metrics are purely observational: a missing recorder or a failing one
//! never changes scheduling behavior.

use std::sync::Arc;

use log::debug;
use mockall::automock;

/// Prefix of every activity name emitted by the alerts engine.
pub const ALERT_METRIC_PREFIX: &str = "ALERT-";

/// Reload could not read the clock.
pub const ALERT_SCHEDULING_FAILED: &str = "alertSchedulingFailed";
/// Number of alerts found past-due while reloading.
pub const ALERT_PAST_DUE_DURING_SCHEDULING: &str = "alertPastDueWhileScheduling";
/// Number of alerts found in the active state while reloading.
pub const ACTIVE_ALERT_RELOADED_DURING_SCHEDULING: &str = "activeAlertReloadedDuringScheduling";

/// Sink for counter metrics.
#[automock]
pub trait MetricRecorder: Send + Sync {
    /// Records `count` occurrences of `counter` under `activity`.
    fn record_counter(&self, activity: &str, counter: &str, count: u64);
}

/// [`MetricRecorder`] that writes counters to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMetricRecorder;

impl MetricRecorder for LogMetricRecorder {
    fn record_counter(&self, activity: &str, counter: &str, count: u64) {
        debug!("metric {} {}={}", activity, counter, count);
    }
}

/// Submits `count` for `counter` to the optional recorder.
pub(crate) fn submit_metric(recorder: Option<&Arc<dyn MetricRecorder>>, counter: &str, count: u64) {
    let Some(recorder) = recorder else {
        return;
    };
    let activity = format!("{}{}", ALERT_METRIC_PREFIX, counter);
    recorder.record_counter(&activity, counter, count);
}
