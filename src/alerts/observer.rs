use std::fmt;

use chrono::{DateTime, Utc};

/// Kind of alert, as known to the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertType {
    Alarm,
    Timer,
    Reminder,
}

impl AlertType {
    /// Name of the type as persisted and reported upstream.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Alarm => "ALARM",
            AlertType::Timer => "TIMER",
            AlertType::Reminder => "REMINDER",
        }
    }

    /// Parses a persisted type name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ALARM" => Some(AlertType::Alarm),
            "TIMER" => Some(AlertType::Timer),
            "REMINDER" => Some(AlertType::Reminder),
            _ => None,
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle notification kinds sent to an [`AlertObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObserverState {
    /// The alert reached its scheduled time and waits for focus.
    Ready,
    /// Rendering started.
    Started,
    /// Rendering stopped on request.
    Stopped,
    /// The alert was snoozed to a later time.
    Snoozed,
    /// The alert played to the end or reached its maximum rendering time.
    Completed,
    /// The alert was found too late to be played.
    PastDue,
    /// The active alert plays in the foreground.
    FocusEnteredForeground,
    /// The active alert plays in the background.
    FocusEnteredBackground,
    /// The alert could not be played.
    Error,
    /// The alert was removed from storage.
    Deleted,
    /// The alert was found active at start-up and rescheduled.
    ScheduledForLater,
}

impl ObserverState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObserverState::Ready => "READY",
            ObserverState::Started => "STARTED",
            ObserverState::Stopped => "STOPPED",
            ObserverState::Snoozed => "SNOOZED",
            ObserverState::Completed => "COMPLETED",
            ObserverState::PastDue => "PAST_DUE",
            ObserverState::FocusEnteredForeground => "FOCUS_ENTERED_FOREGROUND",
            ObserverState::FocusEnteredBackground => "FOCUS_ENTERED_BACKGROUND",
            ObserverState::Error => "ERROR",
            ObserverState::Deleted => "DELETED",
            ObserverState::ScheduledForLater => "SCHEDULED_FOR_LATER",
        }
    }
}

impl fmt::Display for ObserverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of an alert attached to a lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertInfo {
    pub token: String,
    pub alert_type: AlertType,
    pub state: ObserverState,
    pub scheduled_time: DateTime<Utc>,
    /// Time originally requested by the user, if the alert carried one.
    pub original_time: Option<String>,
    pub label: Option<String>,
    /// Free-form reason, empty when the transition has none.
    pub reason: String,
}

impl AlertInfo {
    /// Same alert, different notification.
    pub fn with_state(&self, state: ObserverState) -> AlertInfo {
        AlertInfo {
            state,
            reason: String::new(),
            ..self.clone()
        }
    }
}

/// Receives alert lifecycle notifications.
///
/// Notifications are delivered one at a time, in order, from the scheduler's
/// executor. Implementations must not block for long.
pub trait AlertObserver: Send + Sync {
    fn on_alert_state_change(&self, alert_info: AlertInfo);
}
