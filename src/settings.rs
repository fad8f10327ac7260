//! Device settings read by alerts at render time.

use std::sync::atomic::{AtomicBool, Ordering};

/// User-facing device settings that influence how alerts are rendered.
///
/// Values are read when rendering starts, so a change made while an alert is
/// scheduled is honored the next time it plays.
#[derive(Debug, Default)]
pub struct DeviceSettings {
    alarm_volume_ramp: AtomicBool,
}

impl DeviceSettings {
    /// Creates settings with the given alarm volume ramp flag.
    pub fn new(alarm_volume_ramp: bool) -> Self {
        DeviceSettings {
            alarm_volume_ramp: AtomicBool::new(alarm_volume_ramp),
        }
    }

    /// Whether alarms should fade in instead of starting at full volume.
    pub fn alarm_volume_ramp(&self) -> bool {
        self.alarm_volume_ramp.load(Ordering::Relaxed)
    }

    pub fn set_alarm_volume_ramp(&self, enabled: bool) {
        self.alarm_volume_ramp.store(enabled, Ordering::Relaxed);
    }
}
