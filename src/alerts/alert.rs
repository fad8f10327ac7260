//! A single schedulable alert and its activation state machine.
//!
//! An [`Alert`] starts [`AlertState::Set`], becomes [`AlertState::Ready`] when
//! its time arrives, then goes through activation while a [`Renderer`] plays
//! it. Every transition worth reporting is sent to the attached
//! [`AlertObserver`], which in practice is the scheduler.

use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::{runtime::Handle, task::JoinHandle, time};

use crate::{
    alerts::{
        assets::AssetConfiguration,
        observer::{AlertInfo, AlertObserver, AlertType, ObserverState},
    },
    focus::{FocusState, MixingBehavior},
    renderer::{DefaultAudio, RenderRequest, Renderer, RendererObserver},
    settings::DeviceSettings,
    time::{ScheduledTime, TimeError, TimeSource},
};

/// Longest time an alert may render, counted from its scheduled time.
pub const MAXIMUM_RENDERING_TIME: Duration = Duration::from_secs(60 * 60);

/// Pause between loops while rendering in the background.
const BACKGROUND_LOOP_PAUSE: Duration = Duration::from_secs(10);

/// Loop count of an alert that does not specify one.
pub const DEFAULT_LOOP_COUNT: i32 = i32::MAX;

/// Activation state of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertState {
    Unset,
    /// Scheduled and waiting for its time.
    Set,
    /// Its time arrived, waiting for audio focus.
    Ready,
    /// Rendering was requested.
    Activating,
    /// Rendering.
    Active,
    /// A stop was requested.
    Stopping,
    Stopped,
    /// A snooze was requested.
    Snoozing,
    Snoozed,
    Completed,
}

impl AlertState {
    /// Name of the state as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Unset => "UNSET",
            AlertState::Set => "SET",
            AlertState::Ready => "READY",
            AlertState::Activating => "ACTIVATING",
            AlertState::Active => "ACTIVE",
            AlertState::Stopping => "STOPPING",
            AlertState::Stopped => "STOPPED",
            AlertState::Snoozing => "SNOOZING",
            AlertState::Snoozed => "SNOOZED",
            AlertState::Completed => "COMPLETED",
        }
    }

    /// Parses a persisted state name.
    pub fn from_name(name: &str) -> Option<Self> {
        let state = match name {
            "UNSET" => AlertState::Unset,
            "SET" => AlertState::Set,
            "READY" => AlertState::Ready,
            "ACTIVATING" => AlertState::Activating,
            "ACTIVE" => AlertState::Active,
            "STOPPING" => AlertState::Stopping,
            "STOPPED" => AlertState::Stopped,
            "SNOOZING" => AlertState::Snoozing,
            "SNOOZED" => AlertState::Snoozed,
            "COMPLETED" => AlertState::Completed,
            _ => return None,
        };
        Some(state)
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an alert was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    Unset,
    /// The cloud asked for the stop.
    AvsStop,
    /// The user stopped it on the device.
    LocalStop,
    Shutdown,
    LogOut,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Unset => "UNSET",
            StopReason::AvsStop => "AVS_STOP",
            StopReason::LocalStop => "LOCAL_STOP",
            StopReason::Shutdown => "SHUTDOWN",
            StopReason::LogOut => "LOG_OUT",
        }
    }
}

/// Errors raised when changing an alert.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlertError {
    /// The alert is in a state that forbids the change.
    #[error("alert cannot be changed while {0}")]
    InvalidState(AlertState),
    #[error(transparent)]
    Time(#[from] TimeError),
}

/// Minimal description of an alert reported as device context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertContext {
    pub token: String,
    pub alert_type: AlertType,
    pub scheduled_time: String,
}

/// Renderer invocation prepared under the lock, run after it is released.
struct RenderCommand {
    renderer: Arc<dyn Renderer>,
    observer: Weak<dyn RendererObserver>,
    request: RenderRequest,
}

impl RenderCommand {
    fn run(self) {
        self.renderer.start(self.observer, self.request);
    }
}

/// Side effects of a transition, applied once the alert lock is released.
#[derive(Default)]
struct Effects {
    notification: Option<(Arc<dyn AlertObserver>, AlertInfo)>,
    stop: Option<Arc<dyn Renderer>>,
    start: Option<RenderCommand>,
}

impl Effects {
    fn apply(self) {
        if let Some((observer, info)) = self.notification {
            observer.on_alert_state_change(info);
        }
        if let Some(renderer) = self.stop {
            renderer.stop();
        }
        if let Some(command) = self.start {
            command.run();
        }
    }
}

struct AlertInner {
    scheduled_time: ScheduledTime,
    assets: AssetConfiguration,
    loop_count: i32,
    label: Option<String>,
    original_time: Option<String>,
    state: AlertState,
    stop_reason: StopReason,
    focus_state: FocusState,
    mixing_behavior: MixingBehavior,
    has_rendering_failed: bool,
    has_timer_expired: bool,
    focus_changed_during_activation: bool,
    restart_after_full_stop: bool,
    renderer: Option<Arc<dyn Renderer>>,
    renderer_observer: Option<Weak<dyn RendererObserver>>,
    observer: Option<Weak<dyn AlertObserver>>,
    time_source: Option<Arc<dyn TimeSource>>,
    settings: Option<Arc<DeviceSettings>>,
    max_length_timer: Option<JoinHandle<()>>,
}

impl AlertInner {
    fn is_paused(&self) -> bool {
        self.focus_state == FocusState::Background
            && self.mixing_behavior == MixingBehavior::MustPause
    }

    fn can_retry_with_fallback(&self) -> bool {
        !self.assets.play_order.is_empty() && !self.has_rendering_failed
    }

    fn cancel_max_length_timer(&mut self) {
        if let Some(timer) = self.max_length_timer.take() {
            timer.abort();
        }
    }
}

/// A timed event (alarm, timer or reminder) owned by the scheduler.
///
/// The token and type never change; everything else is guarded by an internal
/// lock. The alert never calls its renderer or its observer while holding that
/// lock.
///
/// # Examples
///
/// ```
/// use alert_scheduler::{
///     alerts::{Alert, AlertState, AlertType},
///     time::ScheduledTime,
/// };
///
/// let time = ScheduledTime::parse("2030-01-01T07:00:00+0000").unwrap();
/// let alert = Alert::new("token-1", AlertType::Alarm, time)
///     .with_label("wake up")
///     .with_loop_count(3);
///
/// assert_eq!(alert.state(), AlertState::Set);
/// assert_eq!(alert.label().as_deref(), Some("wake up"));
/// ```
pub struct Alert {
    token: String,
    alert_type: AlertType,
    inner: Mutex<AlertInner>,
}

impl fmt::Debug for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Alert")
            .field("token", &self.token)
            .field("type", &self.alert_type)
            .field("state", &inner.state)
            .field("scheduled_time", &inner.scheduled_time)
            .finish()
    }
}

impl Alert {
    /// Creates an alert in the [`AlertState::Set`] state with default assets.
    pub fn new(token: impl Into<String>, alert_type: AlertType, scheduled_time: ScheduledTime) -> Self {
        Alert {
            token: token.into(),
            alert_type,
            inner: Mutex::new(AlertInner {
                scheduled_time,
                assets: AssetConfiguration::default(),
                loop_count: DEFAULT_LOOP_COUNT,
                label: None,
                original_time: None,
                state: AlertState::Set,
                stop_reason: StopReason::Unset,
                focus_state: FocusState::None,
                mixing_behavior: MixingBehavior::Undefined,
                has_rendering_failed: false,
                has_timer_expired: false,
                focus_changed_during_activation: false,
                restart_after_full_stop: false,
                renderer: None,
                renderer_observer: None,
                observer: None,
                time_source: None,
                settings: None,
                max_length_timer: None,
            }),
        }
    }

    /// Sets custom assets. An invalid configuration is ignored so the alert
    /// still plays its default sound.
    pub fn with_asset_configuration(self, assets: AssetConfiguration) -> Self {
        if assets.is_valid() {
            self.inner.lock().assets = assets;
        } else {
            warn!("ignoring invalid assets of alert {}", self.token);
        }
        self
    }

    /// Sets how many times the assets are played. Negative counts are ignored.
    pub fn with_loop_count(self, loop_count: i32) -> Self {
        if loop_count < 0 {
            warn!("ignoring negative loop count {} of alert {}", loop_count, self.token);
        } else {
            self.inner.lock().loop_count = loop_count;
        }
        self
    }

    pub fn with_label(self, label: impl Into<String>) -> Self {
        self.inner.lock().label = Some(label.into());
        self
    }

    /// Sets the time originally requested by the user, as `HH:MM:SS.mmm`.
    /// Malformed values are ignored.
    pub fn with_original_time(self, original_time: impl Into<String>) -> Self {
        let original_time = original_time.into();
        if is_valid_original_time(&original_time) {
            self.inner.lock().original_time = Some(original_time);
        } else {
            warn!("ignoring invalid original time {:?} of alert {}", original_time, self.token);
        }
        self
    }

    /// Sets the settings read when rendering starts.
    pub fn with_settings(self, settings: Arc<DeviceSettings>) -> Self {
        self.inner.lock().settings = Some(settings);
        self
    }

    /// Restores a persisted state.
    pub fn with_state(self, state: AlertState) -> Self {
        self.inner.lock().state = state;
        self
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn alert_type(&self) -> AlertType {
        self.alert_type
    }

    pub fn state(&self) -> AlertState {
        self.inner.lock().state
    }

    pub fn scheduled_time(&self) -> ScheduledTime {
        self.inner.lock().scheduled_time.clone()
    }

    pub fn scheduled_time_unix(&self) -> i64 {
        self.inner.lock().scheduled_time.unix()
    }

    pub fn scheduled_time_iso_8601(&self) -> String {
        self.inner.lock().scheduled_time.as_iso_8601().to_owned()
    }

    pub fn asset_configuration(&self) -> AssetConfiguration {
        self.inner.lock().assets.clone()
    }

    pub fn loop_count(&self) -> i32 {
        self.inner.lock().loop_count
    }

    pub fn label(&self) -> Option<String> {
        self.inner.lock().label.clone()
    }

    pub fn original_time(&self) -> Option<String> {
        self.inner.lock().original_time.clone()
    }

    pub fn stop_reason(&self) -> StopReason {
        self.inner.lock().stop_reason
    }

    pub fn focus_state(&self) -> FocusState {
        self.inner.lock().focus_state
    }

    pub fn settings(&self) -> Option<Arc<DeviceSettings>> {
        self.inner.lock().settings.clone()
    }

    /// Whether the alert is more than `limit` behind `now`.
    ///
    /// # Arguments
    ///
    /// * `now` - Current unix time, in seconds
    /// * `limit` - How late an alert may still be played
    pub fn is_past_due(&self, now: i64, limit: Duration) -> bool {
        let cutoff = now - limit.as_secs() as i64;
        self.scheduled_time_unix() < cutoff
    }

    pub fn context(&self) -> AlertContext {
        AlertContext {
            token: self.token.clone(),
            alert_type: self.alert_type,
            scheduled_time: self.scheduled_time_iso_8601(),
        }
    }

    /// Builds the notification payload for this alert.
    pub fn create_alert_info(&self, state: ObserverState, reason: &str) -> AlertInfo {
        let inner = self.inner.lock();
        self.alert_info_locked(&inner, state, reason)
    }

    fn alert_info_locked(&self, inner: &AlertInner, state: ObserverState, reason: &str) -> AlertInfo {
        AlertInfo {
            token: self.token.clone(),
            alert_type: self.alert_type,
            state,
            scheduled_time: inner.scheduled_time.utc(),
            original_time: inner.original_time.clone(),
            label: inner.label.clone(),
            reason: reason.to_owned(),
        }
    }

    fn notification_locked(
        &self,
        inner: &AlertInner,
        state: ObserverState,
        reason: &str,
    ) -> Option<(Arc<dyn AlertObserver>, AlertInfo)> {
        let Some(observer) = inner.observer.as_ref().and_then(Weak::upgrade) else {
            warn!("alert {} has no observer for {}", self.token, state);
            return None;
        };
        Some((observer, self.alert_info_locked(inner, state, reason)))
    }

    /// Connects the alert to what it needs to render and report.
    ///
    /// A renderer that is already attached is kept; the observer and time
    /// source are replaced.
    pub(crate) fn attach(
        &self,
        renderer: Arc<dyn Renderer>,
        observer: Weak<dyn AlertObserver>,
        time_source: Arc<dyn TimeSource>,
    ) {
        let mut inner = self.inner.lock();
        if inner.renderer.is_some() {
            debug!("alert {} already has a renderer", self.token);
        } else {
            inner.renderer = Some(renderer);
        }
        inner.observer = Some(observer);
        inner.time_source = Some(time_source);
    }

    /// Drops the renderer so the alert can no longer play.
    pub(crate) fn detach_renderer(&self) {
        self.inner.lock().renderer = None;
    }

    /// Moves a scheduled alert to a new time.
    ///
    /// Fails while the alert is being rendered or stopped.
    pub fn update_scheduled_time(&self, scheduled_time: ScheduledTime) -> Result<(), AlertError> {
        let mut inner = self.inner.lock();
        match inner.state {
            AlertState::Active
            | AlertState::Activating
            | AlertState::Stopping
            | AlertState::Snoozing => {
                error!("cannot update alert {} while {}", self.token, inner.state);
                return Err(AlertError::InvalidState(inner.state));
            }
            _ => {}
        }
        inner.scheduled_time = scheduled_time;
        inner.state = AlertState::Set;
        Ok(())
    }

    /// Replaces the assets. Refused when the configuration is invalid.
    pub(crate) fn set_asset_configuration(&self, assets: AssetConfiguration) -> bool {
        if !assets.is_valid() {
            return false;
        }
        self.inner.lock().assets = assets;
        true
    }

    /// Moves the alert back to [`AlertState::Set`] and forgets how it was stopped.
    pub(crate) fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = AlertState::Set;
        inner.stop_reason = StopReason::Unset;
        inner.has_rendering_failed = false;
        inner.has_timer_expired = false;
    }

    /// Marks a waiting alert as due. Alerts already activating are left alone.
    pub(crate) fn set_state_ready(&self) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, AlertState::Unset | AlertState::Set | AlertState::Snoozed) {
            inner.state = AlertState::Ready;
        }
    }

    pub(crate) fn set_state_active(&self) {
        let mut inner = self.inner.lock();
        if inner.state != AlertState::Activating {
            error!("alert {} set active while {}", self.token, inner.state);
            return;
        }
        inner.state = AlertState::Active;
    }

    /// Starts rendering the alert.
    pub fn activate(self: &Arc<Self>) {
        debug!("activating alert {}", self.token);
        let mut inner = self.inner.lock();
        if matches!(inner.state, AlertState::Activating | AlertState::Active) {
            error!("alert {} is already {}", self.token, inner.state);
            return;
        }
        inner.state = AlertState::Activating;
        let renderer_observer: Weak<dyn RendererObserver> = Arc::downgrade(self) as _;
        inner.renderer_observer = Some(renderer_observer);

        if inner.max_length_timer.is_none() {
            match self.remaining_rendering_time(&inner) {
                Ok(Some(remaining)) => {
                    inner.max_length_timer = self.spawn_max_length_timer(remaining);
                }
                Ok(None) => {
                    error!("alert {} is past its maximum rendering time", self.token);
                    let notification = self.notification_locked(
                        &inner,
                        ObserverState::Error,
                        "alert is past its maximum rendering time",
                    );
                    drop(inner);
                    Effects {
                        notification,
                        ..Effects::default()
                    }
                    .apply();
                    return;
                }
                Err(e) => {
                    error!("no rendering limit for alert {}: {}", self.token, e);
                }
            }
        }

        let start = self.render_command_locked(&inner);
        drop(inner);
        if let Some(command) = start {
            command.run();
        }
    }

    /// Stops rendering the alert.
    pub fn deactivate(&self, reason: StopReason) {
        debug!("deactivating alert {} ({})", self.token, reason.as_str());
        let mut inner = self.inner.lock();
        inner.state = AlertState::Stopping;
        inner.stop_reason = reason;
        inner.cancel_max_length_timer();

        let mut effects = Effects::default();
        if inner.is_paused() {
            inner.state = AlertState::Stopped;
            effects.notification = self.notification_locked(&inner, ObserverState::Stopped, reason.as_str());
        }
        effects.stop = inner.renderer.clone();
        drop(inner);
        effects.apply();
    }

    /// Stops rendering and moves the alert to `scheduled_time`, as an ISO-8601 string.
    pub fn snooze(&self, scheduled_time: &str) -> Result<(), AlertError> {
        let scheduled_time = ScheduledTime::parse(scheduled_time).inspect_err(|e| {
            error!("cannot snooze alert {}: {}", self.token, e);
        })?;

        let mut inner = self.inner.lock();
        inner.scheduled_time = scheduled_time;
        inner.state = AlertState::Snoozing;
        inner.cancel_max_length_timer();

        let mut effects = Effects::default();
        if inner.is_paused() {
            inner.state = AlertState::Snoozed;
            effects.notification = self.notification_locked(&inner, ObserverState::Snoozed, "");
        }
        effects.stop = inner.renderer.clone();
        drop(inner);
        effects.apply();
        Ok(())
    }

    /// Records the focus granted to the alert and adapts rendering to it.
    pub fn set_focus_state(&self, focus_state: FocusState, mixing_behavior: MixingBehavior) {
        let mut inner = self.inner.lock();
        if inner.focus_state == focus_state {
            return;
        }
        debug!("alert {} focus {:?} ({:?})", self.token, focus_state, mixing_behavior);
        let previous_behavior = inner.mixing_behavior;
        inner.focus_state = focus_state;
        inner.mixing_behavior = mixing_behavior;
        let resume_from_pause =
            focus_state == FocusState::Foreground && previous_behavior == MixingBehavior::MustPause;

        let mut effects = Effects::default();
        match inner.state {
            AlertState::Activating => {
                if resume_from_pause {
                    effects.start = self.render_command_locked(&inner);
                } else {
                    inner.focus_changed_during_activation = true;
                }
            }
            AlertState::Active => {
                if resume_from_pause {
                    effects.start = self.render_command_locked(&inner);
                } else {
                    // Rendering restarts once the renderer reports the stop
                    inner.restart_after_full_stop = true;
                    effects.stop = inner.renderer.clone();
                }
            }
            _ => {}
        }
        drop(inner);
        effects.apply();
    }

    fn remaining_rendering_time(&self, inner: &AlertInner) -> Result<Option<Duration>, TimeError> {
        let Some(time_source) = inner.time_source.as_ref() else {
            return Err(TimeError::Clock);
        };
        let now = time_source.current_unix_time()?;
        let remaining =
            inner.scheduled_time.unix() + MAXIMUM_RENDERING_TIME.as_secs() as i64 - now;
        if remaining <= 0 {
            return Ok(None);
        }
        Ok(Some(Duration::from_secs(remaining as u64)))
    }

    fn spawn_max_length_timer(self: &Arc<Self>, duration: Duration) -> Option<JoinHandle<()>> {
        let Ok(handle) = Handle::try_current() else {
            warn!("no async runtime for the rendering limit of alert {}", self.token);
            return None;
        };
        let alert = Arc::downgrade(self);
        Some(handle.spawn(async move {
            time::sleep(duration).await;
            if let Some(alert) = alert.upgrade() {
                alert.on_max_timer_expiration();
            }
        }))
    }

    fn on_max_timer_expiration(&self) {
        info!("alert {} reached its maximum rendering time", self.token);
        let mut inner = self.inner.lock();
        inner.state = AlertState::Stopping;
        inner.has_timer_expired = true;
        inner.max_length_timer = None;

        let mut effects = Effects::default();
        if inner.is_paused() {
            inner.state = AlertState::Stopped;
            effects.notification = self.notification_locked(&inner, ObserverState::Stopped, "");
        }
        effects.stop = inner.renderer.clone();
        drop(inner);
        effects.apply();
    }

    /// Prepares the renderer call matching the current focus.
    fn render_command_locked(&self, inner: &AlertInner) -> Option<RenderCommand> {
        if inner.is_paused() {
            info!("alert {} is paused, not rendering", self.token);
            return None;
        }
        let Some(renderer) = inner.renderer.clone() else {
            error!("alert {} has no renderer", self.token);
            return None;
        };
        let observer = inner.renderer_observer.clone()?;

        let volume_ramp = self.alert_type == AlertType::Alarm
            && inner
                .settings
                .as_ref()
                .is_some_and(|settings| settings.alarm_volume_ramp());

        let mut request = RenderRequest {
            audio: DefaultAudio::Full,
            volume_ramp,
            urls: Vec::new(),
            loop_count: inner.loop_count,
            loop_pause: inner.assets.loop_pause,
            start_with_pause: false,
        };

        if inner.focus_state == FocusState::Background {
            request.audio = DefaultAudio::Short;
            if !inner.has_rendering_failed {
                if let Some(url) = inner.assets.background_url() {
                    request.urls.push(url.to_owned());
                }
            }
            request.loop_count = DEFAULT_LOOP_COUNT;
            request.loop_pause = BACKGROUND_LOOP_PAUSE;
            // Coming back from the foreground, leave a gap before the chime
            request.start_with_pause = inner.state != AlertState::Activating;
        } else if !inner.assets.is_empty() && !inner.has_rendering_failed {
            request.urls = inner.assets.play_order_urls();
        }

        Some(RenderCommand {
            renderer,
            observer,
            request,
        })
    }
}

impl RendererObserver for Alert {
    fn on_renderer_started(&self) {
        let mut inner = self.inner.lock();
        let mut effects = Effects::default();
        match inner.state {
            AlertState::Stopped => {
                // Started after a stop was already reported
                error!("alert {} renderer started while stopped", self.token);
                effects.stop = inner.renderer.clone();
            }
            AlertState::Activating => {
                if inner.focus_changed_during_activation {
                    inner.focus_changed_during_activation = false;
                    effects.start = self.render_command_locked(&inner);
                } else {
                    effects.notification = self.notification_locked(&inner, ObserverState::Started, "");
                }
            }
            _ => {}
        }
        drop(inner);
        effects.apply();
    }

    fn on_renderer_stopped(&self, reason: &str) {
        let mut inner = self.inner.lock();
        let mut effects = Effects::default();
        if inner.has_timer_expired {
            inner.state = AlertState::Completed;
            effects.notification = self.notification_locked(&inner, ObserverState::Completed, "");
        } else {
            match inner.state {
                AlertState::Stopping => {
                    inner.state = AlertState::Stopped;
                    let stop_reason = inner.stop_reason.as_str();
                    effects.notification =
                        self.notification_locked(&inner, ObserverState::Stopped, stop_reason);
                }
                AlertState::Snoozing => {
                    inner.state = AlertState::Snoozed;
                    effects.notification = self.notification_locked(&inner, ObserverState::Snoozed, "");
                }
                _ if inner.restart_after_full_stop => {
                    inner.restart_after_full_stop = false;
                    effects.start = self.render_command_locked(&inner);
                }
                _ if inner.can_retry_with_fallback() => {
                    warn!("alert {} stopped unexpectedly, retrying with default audio", self.token);
                    inner.has_rendering_failed = true;
                    effects.start = self.render_command_locked(&inner);
                }
                _ => {
                    effects.notification = self.notification_locked(&inner, ObserverState::Error, reason);
                }
            }
        }
        drop(inner);
        effects.apply();
    }

    fn on_renderer_completed(&self) {
        let mut inner = self.inner.lock();
        inner.state = AlertState::Completed;
        inner.cancel_max_length_timer();
        let notification = self.notification_locked(&inner, ObserverState::Completed, "");
        drop(inner);
        Effects {
            notification,
            ..Effects::default()
        }
        .apply();
    }

    fn on_renderer_error(&self, reason: &str) {
        let mut inner = self.inner.lock();
        let mut effects = Effects::default();
        if matches!(inner.state, AlertState::Stopping | AlertState::Stopped) {
            info!("alert {} renderer error while stopping: {}", self.token, reason);
        } else if inner.can_retry_with_fallback() {
            warn!("alert {} failed to render ({}), retrying with default audio", self.token, reason);
            inner.has_rendering_failed = true;
            effects.start = self.render_command_locked(&inner);
        } else {
            effects.notification = self.notification_locked(&inner, ObserverState::Error, reason);
        }
        drop(inner);
        effects.apply();
    }
}

impl Drop for Alert {
    fn drop(&mut self) {
        self.inner.get_mut().cancel_max_length_timer();
    }
}

/// Checks the `HH:MM:SS.mmm` form of an original time.
fn is_valid_original_time(value: &str) -> bool {
    chrono::NaiveTime::parse_from_str(value, "%H:%M:%S%.3f").is_ok() && value.len() == 12
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        alerts::assets::Asset,
        test_support::{ChannelObserver, FakeRenderer, ManualTimeSource, NOW, next_info},
    };
    use std::collections::HashMap;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn assets() -> AssetConfiguration {
        let mut assets = HashMap::new();
        assets.insert("song".to_string(), Asset::new("song", "file:///song.mp3"));
        assets.insert("chime".to_string(), Asset::new("chime", "file:///chime.mp3"));
        AssetConfiguration {
            assets,
            play_order: vec!["song".to_string()],
            background_asset_id: Some("chime".to_string()),
            loop_pause: Duration::from_secs(2),
        }
    }

    struct Fixture {
        alert: Arc<Alert>,
        renderer: Arc<FakeRenderer>,
        clock: Arc<ManualTimeSource>,
        events: UnboundedReceiver<AlertInfo>,
        // Keeps the observer alive, the alert only holds a weak handle
        _observer: Arc<ChannelObserver>,
    }

    fn fixture(alert: Alert) -> Fixture {
        let alert = Arc::new(alert);
        let renderer = Arc::new(FakeRenderer::default());
        let clock = Arc::new(ManualTimeSource::new(NOW));
        let (observer, events) = ChannelObserver::new();
        let weak: Weak<dyn AlertObserver> = Arc::downgrade(&observer) as _;
        alert.attach(renderer.clone(), weak, clock.clone());
        Fixture {
            alert,
            renderer,
            clock,
            events,
            _observer: observer,
        }
    }

    fn alarm_at(unix: i64) -> Alert {
        Alert::new("token", AlertType::Alarm, ScheduledTime::from_unix(unix).unwrap())
    }

    #[tokio::test]
    async fn test_activate_renders_play_order_in_foreground() {
        let fixture = fixture(alarm_at(NOW).with_asset_configuration(assets()).with_loop_count(2));
        fixture.alert.set_focus_state(FocusState::Foreground, MixingBehavior::Primary);
        fixture.alert.activate();

        assert_eq!(fixture.alert.state(), AlertState::Activating);
        let requests = fixture.renderer.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].audio, DefaultAudio::Full);
        assert_eq!(requests[0].urls, vec!["file:///song.mp3"]);
        assert_eq!(requests[0].loop_count, 2);
        assert_eq!(requests[0].loop_pause, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_activate_in_background_renders_background_asset() {
        let fixture = fixture(alarm_at(NOW).with_asset_configuration(assets()));
        fixture.alert.set_focus_state(FocusState::Background, MixingBehavior::MayDuck);
        fixture.alert.activate();

        let requests = fixture.renderer.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].audio, DefaultAudio::Short);
        assert_eq!(requests[0].urls, vec!["file:///chime.mp3"]);
        assert_eq!(requests[0].loop_pause, BACKGROUND_LOOP_PAUSE);
        assert!(!requests[0].start_with_pause);
    }

    #[tokio::test]
    async fn test_activate_twice_renders_once() {
        let fixture = fixture(alarm_at(NOW));
        fixture.alert.activate();
        fixture.alert.activate();
        assert_eq!(fixture.renderer.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_activate_past_rendering_limit_reports_error() {
        let mut fixture = fixture(alarm_at(NOW - MAXIMUM_RENDERING_TIME.as_secs() as i64 - 1));
        fixture.alert.activate();

        let info = next_info(&mut fixture.events).await;
        assert_eq!(info.state, ObserverState::Error);
        assert!(fixture.renderer.requests().is_empty());
    }

    #[tokio::test]
    async fn test_started_is_reported_while_activating() {
        let mut fixture = fixture(alarm_at(NOW));
        fixture.alert.activate();
        fixture.renderer.observer().unwrap().on_renderer_started();

        let info = next_info(&mut fixture.events).await;
        assert_eq!(info.state, ObserverState::Started);
        assert_eq!(info.token, "token");
    }

    #[tokio::test]
    async fn test_focus_change_during_activation_restarts_rendering() {
        let mut fixture = fixture(alarm_at(NOW));
        fixture.alert.set_focus_state(FocusState::Foreground, MixingBehavior::Primary);
        fixture.alert.activate();
        fixture.alert.set_focus_state(FocusState::Background, MixingBehavior::MayDuck);
        fixture.renderer.observer().unwrap().on_renderer_started();

        let requests = fixture.renderer.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].audio, DefaultAudio::Short);
        assert!(fixture.events.try_recv().is_err());

        // The restarted rendering reports normally
        fixture.renderer.observer().unwrap().on_renderer_started();
        assert_eq!(next_info(&mut fixture.events).await.state, ObserverState::Started);
    }

    #[tokio::test]
    async fn test_focus_change_while_active_restarts_after_stop() {
        let fixture = fixture(alarm_at(NOW));
        fixture.alert.set_focus_state(FocusState::Foreground, MixingBehavior::Primary);
        fixture.alert.activate();
        fixture.alert.set_state_active();

        fixture.alert.set_focus_state(FocusState::Background, MixingBehavior::MayDuck);
        assert_eq!(fixture.renderer.stop_count(), 1);
        fixture.renderer.observer().unwrap().on_renderer_stopped("");

        let requests = fixture.renderer.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].start_with_pause);
    }

    #[tokio::test]
    async fn test_deactivate_reports_stop_reason() {
        let mut fixture = fixture(alarm_at(NOW));
        fixture.alert.activate();
        fixture.alert.set_state_active();
        fixture.alert.deactivate(StopReason::AvsStop);

        assert_eq!(fixture.alert.state(), AlertState::Stopping);
        assert_eq!(fixture.renderer.stop_count(), 1);
        fixture.renderer.observer().unwrap().on_renderer_stopped("");

        let info = next_info(&mut fixture.events).await;
        assert_eq!(info.state, ObserverState::Stopped);
        assert_eq!(info.reason, "AVS_STOP");
        assert_eq!(fixture.alert.state(), AlertState::Stopped);
    }

    #[tokio::test]
    async fn test_deactivate_while_paused_stops_immediately() {
        let mut fixture = fixture(alarm_at(NOW));
        fixture.alert.set_focus_state(FocusState::Background, MixingBehavior::MustPause);
        fixture.alert.activate();
        assert!(fixture.renderer.requests().is_empty());

        fixture.alert.deactivate(StopReason::LocalStop);
        assert_eq!(fixture.alert.state(), AlertState::Stopped);
        assert_eq!(next_info(&mut fixture.events).await.state, ObserverState::Stopped);
    }

    #[tokio::test]
    async fn test_resume_from_pause_renders() {
        let fixture = fixture(alarm_at(NOW));
        fixture.alert.set_focus_state(FocusState::Background, MixingBehavior::MustPause);
        fixture.alert.activate();
        fixture.alert.set_focus_state(FocusState::Foreground, MixingBehavior::Primary);

        let requests = fixture.renderer.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].audio, DefaultAudio::Full);
    }

    #[tokio::test]
    async fn test_snooze_moves_time_and_reports_snoozed() {
        let mut fixture = fixture(alarm_at(NOW));
        fixture.alert.activate();
        fixture.alert.set_state_active();

        let later = ScheduledTime::from_unix(NOW + 600).unwrap();
        fixture.alert.snooze(later.as_iso_8601()).unwrap();
        assert_eq!(fixture.alert.state(), AlertState::Snoozing);
        assert_eq!(fixture.alert.scheduled_time_unix(), NOW + 600);

        fixture.renderer.observer().unwrap().on_renderer_stopped("");
        assert_eq!(next_info(&mut fixture.events).await.state, ObserverState::Snoozed);
        assert_eq!(fixture.alert.state(), AlertState::Snoozed);
    }

    #[tokio::test]
    async fn test_snooze_rejects_invalid_time() {
        let fixture = fixture(alarm_at(NOW));
        fixture.alert.activate();

        assert!(matches!(
            fixture.alert.snooze("not a time"),
            Err(AlertError::Time(TimeError::InvalidIso8601(_)))
        ));
        assert_eq!(fixture.alert.scheduled_time_unix(), NOW);
        assert_eq!(fixture.alert.state(), AlertState::Activating);
    }

    #[tokio::test]
    async fn test_renderer_error_retries_with_default_audio() {
        let mut fixture = fixture(alarm_at(NOW).with_asset_configuration(assets()));
        fixture.alert.activate();

        fixture.renderer.observer().unwrap().on_renderer_error("404");
        let requests = fixture.renderer.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].urls.is_empty());
        assert!(fixture.events.try_recv().is_err());

        fixture.renderer.observer().unwrap().on_renderer_error("no audio device");
        let info = next_info(&mut fixture.events).await;
        assert_eq!(info.state, ObserverState::Error);
        assert_eq!(info.reason, "no audio device");
    }

    #[tokio::test]
    async fn test_unexpected_stop_without_assets_reports_error() {
        let mut fixture = fixture(alarm_at(NOW));
        fixture.alert.activate();
        fixture.alert.set_state_active();
        fixture.renderer.observer().unwrap().on_renderer_stopped("device busy");

        let info = next_info(&mut fixture.events).await;
        assert_eq!(info.state, ObserverState::Error);
        assert_eq!(info.reason, "device busy");
    }

    #[tokio::test]
    async fn test_renderer_completed() {
        let mut fixture = fixture(alarm_at(NOW));
        fixture.alert.activate();
        fixture.renderer.observer().unwrap().on_renderer_completed();

        assert_eq!(next_info(&mut fixture.events).await.state, ObserverState::Completed);
        assert_eq!(fixture.alert.state(), AlertState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_rendering_time_completes_alert() {
        let mut fixture = fixture(alarm_at(NOW));
        // Ten minutes late leaves fifty minutes of rendering
        fixture.clock.set(NOW + 600);
        fixture.alert.activate();
        fixture.alert.set_state_active();

        time::sleep(Duration::from_secs(49 * 60)).await;
        assert_eq!(fixture.renderer.stop_count(), 0);
        time::sleep(Duration::from_secs(2 * 60)).await;
        assert_eq!(fixture.renderer.stop_count(), 1);
        assert_eq!(fixture.alert.state(), AlertState::Stopping);

        fixture.renderer.observer().unwrap().on_renderer_stopped("");
        assert_eq!(next_info(&mut fixture.events).await.state, ObserverState::Completed);
    }

    #[tokio::test]
    async fn test_volume_ramp_only_for_alarms() {
        let settings = Arc::new(DeviceSettings::new(true));

        let alarm = fixture(alarm_at(NOW).with_settings(settings.clone()));
        alarm.alert.activate();
        assert!(alarm.renderer.requests()[0].volume_ramp);

        let timer = fixture(
            Alert::new("timer", AlertType::Timer, ScheduledTime::from_unix(NOW).unwrap())
                .with_settings(settings),
        );
        timer.alert.activate();
        assert!(!timer.renderer.requests()[0].volume_ramp);
    }

    #[test]
    fn test_update_scheduled_time_rejected_while_active() {
        let alert = alarm_at(NOW).with_state(AlertState::Active);
        let later = ScheduledTime::from_unix(NOW + 60).unwrap();
        assert_eq!(
            alert.update_scheduled_time(later),
            Err(AlertError::InvalidState(AlertState::Active))
        );
        assert_eq!(alert.scheduled_time_unix(), NOW);
    }

    #[test]
    fn test_update_scheduled_time_resets_state() {
        let alert = alarm_at(NOW).with_state(AlertState::Snoozed);
        alert
            .update_scheduled_time(ScheduledTime::from_unix(NOW + 60).unwrap())
            .unwrap();
        assert_eq!(alert.state(), AlertState::Set);
        assert_eq!(alert.scheduled_time_unix(), NOW + 60);
    }

    #[test]
    fn test_is_past_due_boundary() {
        let alert = alarm_at(NOW);
        let limit = Duration::from_secs(1800);
        assert!(!alert.is_past_due(NOW + 1800, limit));
        assert!(alert.is_past_due(NOW + 1801, limit));
    }

    #[test]
    fn test_original_time_validation() {
        assert_eq!(
            alarm_at(NOW).with_original_time("07:30:00.000").original_time().as_deref(),
            Some("07:30:00.000")
        );
        assert_eq!(alarm_at(NOW).with_original_time("7:30").original_time(), None);
    }

    #[test]
    fn test_invalid_assets_are_ignored() {
        let mut invalid = assets();
        invalid.play_order.push("missing".to_string());
        let alert = alarm_at(NOW).with_asset_configuration(invalid);
        assert!(alert.asset_configuration().is_empty());
    }

    #[test]
    fn test_state_names_round_trip() {
        for state in [
            AlertState::Unset,
            AlertState::Set,
            AlertState::Ready,
            AlertState::Activating,
            AlertState::Active,
            AlertState::Stopping,
            AlertState::Stopped,
            AlertState::Snoozing,
            AlertState::Snoozed,
            AlertState::Completed,
        ] {
            assert_eq!(AlertState::from_name(state.as_str()), Some(state));
        }
        assert_eq!(AlertState::from_name("PLAYING"), None);
    }
}
