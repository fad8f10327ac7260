//! Scheduling of alerts.
//!
//! The [`AlertScheduler`] owns every known alert. Scheduled alerts wait in a
//! set ordered by time; one timer is armed for the soonest. When it fires the
//! observer is told the alert is `READY`, and the alert is activated once the
//! caller grants audio focus through [`AlertScheduler::update_focus`]. At most
//! one alert is active at a time.
//!
//! Alerts report their transitions back to the scheduler. Those reports and
//! every observer notification run one at a time on a single executor task,
//! in the order they were submitted.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use log::{debug, error, info, warn};
use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::{
    alerts::{
        alert::{Alert, AlertContext, AlertState, StopReason},
        assets::AssetConfiguration,
        error::SchedulerError,
        executor::Executor,
        observer::{AlertInfo, AlertObserver, ObserverState},
        scheduled_alerts::ScheduledAlerts,
        timer::OneShotTimer,
    },
    focus::{FocusState, MixingBehavior},
    metrics::{
        ACTIVE_ALERT_RELOADED_DURING_SCHEDULING, ALERT_PAST_DUE_DURING_SCHEDULING,
        ALERT_SCHEDULING_FAILED, MetricRecorder, submit_metric,
    },
    renderer::Renderer,
    settings::DeviceSettings,
    storage::{AlertStorage, OfflineAlert},
    time::{ScheduledTime, TimeSource},
};

/// Alerts reported as device context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertsContextInfo {
    /// Every known alert, the active one included.
    pub scheduled_alerts: Vec<AlertContext>,
    /// The active alert, if any.
    pub active_alerts: Vec<AlertContext>,
}

struct SchedulerState {
    storage: Option<Arc<dyn AlertStorage>>,
    renderer: Option<Arc<dyn Renderer>>,
    scheduled_alerts: ScheduledAlerts,
    active_alert: Option<Arc<Alert>>,
    focus_state: FocusState,
    mixing_behavior: MixingBehavior,
    should_schedule_alerts: bool,
    timer: OneShotTimer,
}

impl SchedulerState {
    fn storage(&self) -> Result<Arc<dyn AlertStorage>, SchedulerError> {
        self.storage.clone().ok_or(SchedulerError::ShutDown)
    }

    fn is_active(&self, token: &str) -> bool {
        self.active_alert
            .as_ref()
            .is_some_and(|active| active.token() == token)
    }
}

struct SchedulerInner {
    state: Mutex<SchedulerState>,
    observer: RwLock<Option<Arc<dyn AlertObserver>>>,
    executor: Executor,
    time_source: Arc<dyn TimeSource>,
    past_due_time_limit: Duration,
    metric_recorder: Option<Arc<dyn MetricRecorder>>,
    self_handle: Weak<SchedulerInner>,
}

/// Schedules, activates and reconciles alerts.
///
/// # Examples
///
/// ```no_run
/// use std::{sync::Arc, time::Duration};
///
/// use alert_scheduler::{
///     alerts::{AlertInfo, AlertObserver, AlertScheduler},
///     focus::{FocusState, MixingBehavior},
///     renderer::SimulatedRenderer,
///     settings::DeviceSettings,
///     storage::SqliteAlertStorage,
///     time::SystemTimeSource,
/// };
///
/// struct Logger;
///
/// impl AlertObserver for Logger {
///     fn on_alert_state_change(&self, alert_info: AlertInfo) {
///         println!("{} is {}", alert_info.token, alert_info.state);
///     }
/// }
///
/// # async fn example() -> anyhow::Result<()> {
/// let scheduler = AlertScheduler::new(
///     Arc::new(SqliteAlertStorage::new("alerts.db")),
///     Arc::new(SimulatedRenderer::new(Duration::from_secs(30))),
///     Arc::new(SystemTimeSource),
///     Duration::from_secs(1800),
///     None,
/// );
/// scheduler
///     .initialize(Arc::new(Logger), Arc::new(DeviceSettings::default()), true)
///     .await?;
///
/// // Later, once an alert is READY and the audio channel is ours
/// scheduler.update_focus(FocusState::Foreground, MixingBehavior::Primary).await;
/// # Ok(())
/// # }
/// ```
pub struct AlertScheduler {
    inner: Arc<SchedulerInner>,
}

impl AlertScheduler {
    /// Creates a scheduler.
    ///
    /// Must be called from within a tokio runtime, the executor task is
    /// spawned right away.
    ///
    /// # Arguments
    ///
    /// * `storage` - Durable store of the alerts
    /// * `renderer` - Renderer given to every alert
    /// * `time_source` - Clock used for timers and past-due checks
    /// * `past_due_time_limit` - How late an alert may still be played
    /// * `metric_recorder` - Optional counter sink
    pub fn new(
        storage: Arc<dyn AlertStorage>,
        renderer: Arc<dyn Renderer>,
        time_source: Arc<dyn TimeSource>,
        past_due_time_limit: Duration,
        metric_recorder: Option<Arc<dyn MetricRecorder>>,
    ) -> Self {
        let inner = Arc::new_cyclic(|self_handle| SchedulerInner {
            state: Mutex::new(SchedulerState {
                storage: Some(storage),
                renderer: Some(renderer),
                scheduled_alerts: ScheduledAlerts::default(),
                active_alert: None,
                focus_state: FocusState::None,
                mixing_behavior: MixingBehavior::Undefined,
                should_schedule_alerts: false,
                timer: OneShotTimer::default(),
            }),
            observer: RwLock::new(None),
            executor: Executor::new(),
            time_source,
            past_due_time_limit,
            metric_recorder,
            self_handle: self_handle.clone(),
        });
        AlertScheduler { inner }
    }

    /// Opens the storage, creating it if needed, and loads the stored alerts.
    ///
    /// # Arguments
    ///
    /// * `observer` - Receives every lifecycle notification
    /// * `settings` - Settings attached to the loaded alerts
    /// * `start_alert_scheduling_on_initialization` - Whether timers are armed
    ///   right away. When false, alerts are loaded but nothing is scheduled
    ///   until [`AlertScheduler::reload_alerts_from_database`] is called with
    ///   scheduling enabled.
    pub async fn initialize(
        &self,
        observer: Arc<dyn AlertObserver>,
        settings: Arc<DeviceSettings>,
        start_alert_scheduling_on_initialization: bool,
    ) -> Result<(), SchedulerError> {
        {
            let mut current = self.inner.observer.write();
            if current.is_some() {
                error!("alert scheduler is already initialized");
                return Err(SchedulerError::AlreadyInitialized);
            }
            *current = Some(observer);
        }

        {
            let state = self.inner.state.lock().await;
            let storage = state.storage()?;
            if let Err(e) = storage.open() {
                info!("cannot open alert database ({}), creating it", e);
                storage
                    .create_database()
                    .inspect_err(|e| error!("cannot create alert database: {}", e))?;
            }
        }

        self.reload_alerts_from_database(settings, start_alert_scheduling_on_initialization)
            .await
    }

    /// Schedules a new alert, or updates the scheduled alert with the same token.
    ///
    /// The alert is stored before it is scheduled. Past-due alerts and alerts
    /// whose token is currently active are refused.
    pub async fn schedule_alert(&self, alert: Arc<Alert>) -> Result<(), SchedulerError> {
        debug!("scheduling alert {}", alert.token());
        let now = self
            .inner
            .time_source
            .current_unix_time()
            .inspect_err(|e| error!("cannot schedule alert {}: {}", alert.token(), e))?;

        let mut state = self.inner.state.lock().await;
        let storage = state.storage()?;

        if alert.is_past_due(now, self.inner.past_due_time_limit) {
            error!("cannot schedule alert {}, it is past due", alert.token());
            return Err(SchedulerError::PastDue(alert.token().to_owned()));
        }

        if state.is_active(alert.token()) {
            error!("cannot schedule alert {}, it is active", alert.token());
            return Err(SchedulerError::AlertActive(alert.token().to_owned()));
        }

        if state.scheduled_alerts.get(alert.token()).is_some() {
            info!("alert {} is already scheduled, updating it", alert.token());
            return self.inner.update_alert_locked(
                &mut state,
                alert.token(),
                alert.scheduled_time(),
                alert.asset_configuration(),
            );
        }

        storage
            .store(&alert)
            .inspect_err(|e| error!("cannot store alert {}: {}", alert.token(), e))?;

        info!("scheduled alert {} at {}", alert.token(), alert.scheduled_time());
        self.inner.attach_alert_locked(&state, &alert);
        state.scheduled_alerts.insert(alert);
        if state.active_alert.is_none() {
            self.inner.set_timer_for_next_alert_locked(&mut state);
        }
        Ok(())
    }

    /// Deletes an alert.
    ///
    /// The active alert is stopped and erased once the renderer reports it
    /// stopped. Deleting an unknown token succeeds.
    pub async fn delete_alert(&self, token: &str) -> Result<(), SchedulerError> {
        debug!("deleting alert {}", token);
        let mut state = self.inner.state.lock().await;
        state.storage()?;

        if let Some(active) = state.active_alert.as_ref().filter(|active| active.token() == token) {
            active.deactivate(StopReason::AvsStop);
            return Ok(());
        }

        let Some(alert) = state.scheduled_alerts.remove(token) else {
            warn!("alert {} is not known, nothing to delete", token);
            return Ok(());
        };
        self.inner.erase_alert_locked(&state, &alert);
        self.inner.set_timer_for_next_alert_locked(&mut state);
        Ok(())
    }

    /// Deletes several alerts at once.
    ///
    /// Either every known alert is erased from storage or none is. Unknown
    /// tokens are skipped.
    pub async fn delete_alerts(&self, tokens: &[String]) -> Result<(), SchedulerError> {
        debug!("deleting {} alerts", tokens.len());
        let mut state = self.inner.state.lock().await;
        let storage = state.storage()?;

        let mut alerts_to_erase = Vec::new();
        let mut deactivate_active = false;
        for token in tokens {
            if let Some(active) = state.active_alert.as_ref().filter(|active| active.token() == token) {
                alerts_to_erase.push(active.clone());
                deactivate_active = true;
                continue;
            }
            match state.scheduled_alerts.get(token) {
                Some(alert) => alerts_to_erase.push(alert),
                None => debug!("alert {} is not known, skipping", token),
            }
        }

        storage
            .bulk_erase(&alerts_to_erase)
            .inspect_err(|e| error!("cannot erase alerts: {}", e))?;

        if deactivate_active {
            if let Some(active) = state.active_alert.take() {
                active.deactivate(StopReason::AvsStop);
            }
        }
        for alert in &alerts_to_erase {
            state.scheduled_alerts.remove(alert.token());
            self.inner
                .notify_observer(alert.create_alert_info(ObserverState::Deleted, ""));
        }

        self.inner.set_timer_for_next_alert_locked(&mut state);
        Ok(())
    }

    /// Snoozes the active alert until `updated_time`, an ISO-8601 string.
    pub async fn snooze_alert(&self, token: &str, updated_time: &str) -> Result<(), SchedulerError> {
        let state = self.inner.state.lock().await;
        let Some(active) = state.active_alert.as_ref().filter(|active| active.token() == token) else {
            error!("cannot snooze alert {}, it is not active", token);
            return Err(SchedulerError::NotActive(token.to_owned()));
        };
        active.snooze(updated_time)?;
        Ok(())
    }

    /// Reloads every stored alert and reconciles it with the clock.
    ///
    /// With scheduling enabled, past-due alerts are reported and erased,
    /// alerts interrupted while active are reset, and the rest are reported
    /// as scheduled for later. The active alert is never touched.
    pub async fn reload_alerts_from_database(
        &self,
        settings: Arc<DeviceSettings>,
        should_schedule_alerts: bool,
    ) -> Result<(), SchedulerError> {
        let mut state = self.inner.state.lock().await;
        state.should_schedule_alerts = should_schedule_alerts;
        let storage = state.storage()?;
        let recorder = self.inner.metric_recorder.as_ref();

        let now = match self.inner.time_source.current_unix_time() {
            Ok(now) => {
                submit_metric(recorder, ALERT_SCHEDULING_FAILED, 0);
                now
            }
            Err(e) => {
                error!("cannot reload alerts: {}", e);
                submit_metric(recorder, ALERT_SCHEDULING_FAILED, 1);
                return Err(e.into());
            }
        };

        state.timer.stop();
        state.scheduled_alerts.clear();
        let alerts = storage
            .load(&settings)
            .inspect_err(|e| error!("cannot load alerts: {}", e))?;

        if !should_schedule_alerts {
            for alert in alerts {
                if state.is_active(alert.token()) {
                    continue;
                }
                self.inner.attach_alert_locked(&state, &alert);
                state.scheduled_alerts.insert(alert);
            }
            info!("loaded {} alerts without scheduling", state.scheduled_alerts.len());
            return Ok(());
        }

        let mut past_due_count = 0;
        let mut active_reloaded_count = 0;
        for alert in alerts {
            if state.is_active(alert.token()) {
                continue;
            }
            if alert.is_past_due(now, self.inner.past_due_time_limit) {
                info!("alert {} is past due", alert.token());
                self.inner
                    .notify_observer(alert.create_alert_info(ObserverState::PastDue, ""));
                self.inner.erase_alert_locked(&state, &alert);
                past_due_count += 1;
                continue;
            }

            if alert.state() == AlertState::Active {
                info!("alert {} was active on shutdown, resetting it", alert.token());
                alert.reset();
                if let Err(e) = storage.modify(&alert) {
                    error!("cannot reset alert {}: {}", alert.token(), e);
                }
                active_reloaded_count += 1;
            }

            self.inner.attach_alert_locked(&state, &alert);
            self.inner
                .notify_observer(alert.create_alert_info(ObserverState::ScheduledForLater, ""));
            state.scheduled_alerts.insert(alert);
        }

        if state.active_alert.is_none() {
            self.inner.set_timer_for_next_alert_locked(&mut state);
        }
        submit_metric(recorder, ALERT_PAST_DUE_DURING_SCHEDULING, past_due_count);
        submit_metric(recorder, ACTIVE_ALERT_RELOADED_DURING_SCHEDULING, active_reloaded_count);
        Ok(())
    }

    /// Applies the focus granted to the alerts channel.
    ///
    /// Gaining focus without an active alert activates the soonest scheduled
    /// alert. Losing it stops the active alert.
    pub async fn update_focus(&self, focus_state: FocusState, mixing_behavior: MixingBehavior) {
        let mut state = self.inner.state.lock().await;
        if state.focus_state == focus_state {
            debug!("focus is already {:?}", focus_state);
            return;
        }
        info!("focus changed to {:?} ({:?})", focus_state, mixing_behavior);
        state.focus_state = focus_state;
        state.mixing_behavior = mixing_behavior;

        match focus_state {
            FocusState::Foreground | FocusState::Background => {
                if let Some(active) = state.active_alert.clone() {
                    active.set_focus_state(focus_state, mixing_behavior);
                    let observer_state = if focus_state == FocusState::Foreground {
                        ObserverState::FocusEnteredForeground
                    } else {
                        ObserverState::FocusEnteredBackground
                    };
                    self.inner
                        .notify_observer(active.create_alert_info(observer_state, ""));
                } else {
                    self.inner.activate_next_alert_locked(&mut state);
                }
            }
            FocusState::None => {
                if let Some(active) = &state.active_alert {
                    active.deactivate(StopReason::LocalStop);
                }
            }
        }
    }

    /// Stops the active alert on a local user request.
    pub async fn on_local_stop(&self) {
        debug!("local stop");
        let state = self.inner.state.lock().await;
        if let Some(active) = &state.active_alert {
            active.deactivate(StopReason::LocalStop);
        }
    }

    pub async fn get_focus_state(&self) -> FocusState {
        self.inner.state.lock().await.focus_state
    }

    /// Every known alert, scheduled ones first then the active one.
    pub async fn get_all_alerts(&self) -> Vec<Arc<Alert>> {
        let state = self.inner.state.lock().await;
        state
            .scheduled_alerts
            .iter()
            .cloned()
            .chain(state.active_alert.clone())
            .collect()
    }

    pub async fn get_active_alert(&self) -> Option<Arc<Alert>> {
        self.inner.state.lock().await.active_alert.clone()
    }

    /// Whether `alert` is the active alert and is being rendered.
    pub async fn is_alert_active(&self, alert: &Alert) -> bool {
        let state = self.inner.state.lock().await;
        state.is_active(alert.token())
            && matches!(alert.state(), AlertState::Activating | AlertState::Active)
    }

    pub async fn get_context_info(&self) -> AlertsContextInfo {
        let state = self.inner.state.lock().await;
        let mut context = AlertsContextInfo::default();
        for alert in state.scheduled_alerts.iter() {
            context.scheduled_alerts.push(alert.context());
        }
        if let Some(active) = &state.active_alert {
            context.scheduled_alerts.push(active.context());
            context.active_alerts.push(active.context());
        }
        context
    }

    /// Stops the active alert and forgets every alert, in memory and in storage.
    pub async fn clear_data(&self, reason: StopReason) {
        info!("clearing alert data ({})", reason.as_str());
        let mut state = self.inner.state.lock().await;
        if let Some(active) = &state.active_alert {
            active.deactivate(reason);
        }
        state.timer.stop();

        for alert in state.scheduled_alerts.iter() {
            self.inner
                .notify_observer(alert.create_alert_info(ObserverState::Deleted, ""));
        }
        state.scheduled_alerts.clear();

        if let Some(storage) = &state.storage {
            if let Err(e) = storage.clear_database() {
                error!("cannot clear alert database: {}", e);
            }
        }
    }

    /// Stops all background work and releases every collaborator.
    ///
    /// Later calls that need storage fail with [`SchedulerError::ShutDown`].
    pub async fn shutdown(&self) {
        info!("shutting down alert scheduler");
        self.inner.executor.shutdown();
        let mut state = self.inner.state.lock().await;
        state.timer.stop();
        self.inner.observer.write().take();
        state.storage = None;
        state.renderer = None;
        state.active_alert = None;
        for alert in state.scheduled_alerts.iter() {
            alert.detach_renderer();
        }
        state.scheduled_alerts.clear();
    }

    /// Records an alert that was stopped while the device was offline.
    pub async fn save_offline_stopped_alert(
        &self,
        token: &str,
        scheduled_time: &str,
        event_time: &str,
    ) -> Result<(), SchedulerError> {
        let state = self.inner.state.lock().await;
        state
            .storage()?
            .store_offline_alert(token, scheduled_time, event_time)
            .inspect_err(|e| error!("cannot save offline alert {}: {}", token, e))?;
        Ok(())
    }

    pub async fn get_offline_stopped_alerts(&self) -> Result<Vec<OfflineAlert>, SchedulerError> {
        let state = self.inner.state.lock().await;
        let alerts = state
            .storage()?
            .load_offline_alerts()
            .inspect_err(|e| error!("cannot load offline alerts: {}", e))?;
        Ok(alerts)
    }

    pub async fn delete_offline_stopped_alert(&self, token: &str, id: i64) -> Result<(), SchedulerError> {
        let state = self.inner.state.lock().await;
        state
            .storage()?
            .erase_offline(token, id)
            .inspect_err(|e| error!("cannot delete offline alert {}: {}", token, e))?;
        Ok(())
    }
}

impl AlertObserver for AlertScheduler {
    fn on_alert_state_change(&self, alert_info: AlertInfo) {
        self.inner.on_alert_state_change(alert_info);
    }
}

impl AlertObserver for SchedulerInner {
    fn on_alert_state_change(&self, alert_info: AlertInfo) {
        debug!("alert {} reported {}", alert_info.token, alert_info.state);
        let inner = self.self_handle.clone();
        self.executor.execute(async move {
            if let Some(inner) = inner.upgrade() {
                inner.execute_on_alert_state_change(alert_info).await;
            }
        });
    }
}

impl SchedulerInner {
    async fn execute_on_alert_state_change(&self, alert_info: AlertInfo) {
        let mut state = self.state.lock().await;
        match alert_info.state {
            ObserverState::Ready => self.notify_observer(alert_info),
            ObserverState::Started => {
                let Some(active) = state
                    .active_alert
                    .clone()
                    .filter(|active| active.state() == AlertState::Activating)
                else {
                    debug!("alert {} started but is not activating", alert_info.token);
                    return;
                };
                active.set_state_active();
                if let Some(storage) = &state.storage {
                    if let Err(e) = storage.modify(&active) {
                        error!("cannot persist active alert {}: {}", active.token(), e);
                    }
                }
                let focus_info = alert_info.with_state(if state.focus_state == FocusState::Foreground {
                    ObserverState::FocusEnteredForeground
                } else {
                    ObserverState::FocusEnteredBackground
                });
                self.notify_observer(alert_info);
                self.notify_observer(focus_info);
            }
            ObserverState::Stopped => {
                self.notify_observer(alert_info.clone());
                if state.is_active(&alert_info.token) {
                    if let Some(active) = state.active_alert.take() {
                        self.erase_alert_locked(&state, &active);
                    }
                } else if let Some(alert) = state.scheduled_alerts.remove(&alert_info.token) {
                    self.erase_alert_locked(&state, &alert);
                }
                self.set_timer_for_next_alert_locked(&mut state);
            }
            ObserverState::Completed => {
                if let Some(active) = state.active_alert.take() {
                    self.notify_observer(alert_info);
                    self.erase_alert_locked(&state, &active);
                } else {
                    warn!("alert {} completed but nothing is active", alert_info.token);
                }
                self.set_timer_for_next_alert_locked(&mut state);
            }
            ObserverState::Snoozed => {
                if let Some(active) = state.active_alert.take() {
                    if let Some(storage) = &state.storage {
                        if let Err(e) = storage.modify(&active) {
                            error!("cannot persist snoozed alert {}: {}", active.token(), e);
                        }
                    }
                    state.scheduled_alerts.insert(active);
                }
                self.notify_observer(alert_info);
                self.set_timer_for_next_alert_locked(&mut state);
            }
            ObserverState::Error => {
                if state.is_active(&alert_info.token) {
                    if let Some(active) = state.active_alert.take() {
                        self.erase_alert_locked(&state, &active);
                    }
                    self.set_timer_for_next_alert_locked(&mut state);
                } else if let Some(alert) = state.scheduled_alerts.remove(&alert_info.token) {
                    self.erase_alert_locked(&state, &alert);
                    self.set_timer_for_next_alert_locked(&mut state);
                }
                self.notify_observer(alert_info);
            }
            ObserverState::PastDue
            | ObserverState::FocusEnteredForeground
            | ObserverState::FocusEnteredBackground
            | ObserverState::ScheduledForLater
            | ObserverState::Deleted => {
                debug!(
                    "alert {} reported {}, which only the scheduler emits",
                    alert_info.token, alert_info.state
                );
            }
        }
    }

    /// Queues a notification for the observer.
    fn notify_observer(&self, alert_info: AlertInfo) {
        debug!("notifying alert {} {}", alert_info.token, alert_info.state);
        let inner = self.self_handle.clone();
        self.executor.execute(async move {
            if let Some(inner) = inner.upgrade() {
                inner.execute_notify_observer(alert_info);
            }
        });
    }

    fn execute_notify_observer(&self, alert_info: AlertInfo) {
        let observer = self.observer.read().clone();
        match observer {
            Some(observer) => observer.on_alert_state_change(alert_info),
            None => warn!("no observer for alert {} {}", alert_info.token, alert_info.state),
        }
    }

    fn attach_alert_locked(&self, state: &SchedulerState, alert: &Alert) {
        let Some(renderer) = state.renderer.clone() else {
            warn!("no renderer for alert {}", alert.token());
            return;
        };
        let observer: Weak<dyn AlertObserver> = self.self_handle.clone();
        alert.attach(renderer, observer, self.time_source.clone());
    }

    /// Erases `alert` from storage and reports it deleted.
    fn erase_alert_locked(&self, state: &SchedulerState, alert: &Alert) {
        let Some(storage) = &state.storage else {
            error!("cannot erase alert {}, no storage", alert.token());
            return;
        };
        if let Err(e) = storage.erase(alert) {
            error!("cannot erase alert {}: {}", alert.token(), e);
            return;
        }
        self.notify_observer(alert.create_alert_info(ObserverState::Deleted, ""));
    }

    /// Moves the scheduled alert `token` to a new time and replaces its assets.
    ///
    /// On failure the previous time and assets are restored. The alert stays
    /// scheduled either way. The active alert and unknown tokens are refused
    /// without touching the set.
    fn update_alert_locked(
        &self,
        state: &mut SchedulerState,
        token: &str,
        new_scheduled_time: ScheduledTime,
        new_asset_configuration: AssetConfiguration,
    ) -> Result<(), SchedulerError> {
        let storage = state.storage()?;
        if state.is_active(token) {
            error!("cannot update alert {}, it is active", token);
            return Err(SchedulerError::AlertActive(token.to_owned()));
        }

        // The set is keyed by time, so the alert leaves it while it changes
        let Some(alert) = state.scheduled_alerts.remove(token) else {
            error!("cannot update alert {}, it is not scheduled", token);
            return Err(SchedulerError::NotScheduled(token.to_owned()));
        };
        let result =
            Self::apply_update(storage.as_ref(), &alert, new_scheduled_time, new_asset_configuration);
        state.scheduled_alerts.insert(alert);
        if state.active_alert.is_none() {
            self.set_timer_for_next_alert_locked(state);
        }
        result
    }

    fn apply_update(
        storage: &dyn AlertStorage,
        alert: &Alert,
        new_scheduled_time: ScheduledTime,
        new_asset_configuration: AssetConfiguration,
    ) -> Result<(), SchedulerError> {
        let old_scheduled_time = alert.scheduled_time();
        let old_asset_configuration = alert.asset_configuration();

        alert.update_scheduled_time(new_scheduled_time)?;

        if !alert.set_asset_configuration(new_asset_configuration) {
            error!("cannot update alert {}, invalid assets", alert.token());
            Self::restore_scheduled_time(alert, old_scheduled_time);
            return Err(SchedulerError::InvalidAssets(alert.token().to_owned()));
        }

        if let Err(e) = storage.modify(alert) {
            error!("cannot persist updated alert {}: {}", alert.token(), e);
            Self::restore_scheduled_time(alert, old_scheduled_time);
            alert.set_asset_configuration(old_asset_configuration);
            return Err(e.into());
        }

        info!("updated alert {} to {}", alert.token(), alert.scheduled_time());
        Ok(())
    }

    fn restore_scheduled_time(alert: &Alert, scheduled_time: ScheduledTime) {
        if let Err(e) = alert.update_scheduled_time(scheduled_time) {
            error!("cannot restore time of alert {}: {}", alert.token(), e);
        }
    }

    fn activate_next_alert_locked(&self, state: &mut SchedulerState) {
        if state.active_alert.is_some() {
            error!("cannot activate next alert, an alert is already active");
            return;
        }
        let Some(alert) = state.scheduled_alerts.pop_first() else {
            debug!("no alert to activate");
            return;
        };

        info!("activating alert {}", alert.token());
        state.timer.stop();
        alert.set_focus_state(state.focus_state, state.mixing_behavior);
        alert.activate();
        state.active_alert = Some(alert);
    }

    /// Arms the timer for the soonest scheduled alert.
    fn set_timer_for_next_alert_locked(&self, state: &mut SchedulerState) {
        if !state.should_schedule_alerts {
            debug!("alert scheduling is disabled");
            return;
        }
        state.timer.stop();

        if state.active_alert.is_some() {
            debug!("an alert is active, not arming the timer");
            return;
        }
        let Some(alert) = state.scheduled_alerts.first() else {
            debug!("no alert to schedule");
            return;
        };

        let now = match self.time_source.current_unix_time() {
            Ok(now) => now,
            Err(e) => {
                error!("cannot arm timer for alert {}: {}", alert.token(), e);
                return;
            }
        };

        let wait = (alert.scheduled_time_unix() - now).max(0);
        info!("next alert {} is due in {}s", alert.token(), wait);
        if wait == 0 {
            self.on_alert_ready(&alert);
            return;
        }

        let inner = self.self_handle.clone();
        state.timer.start(Duration::from_secs(wait as u64), move || {
            if let Some(inner) = inner.upgrade() {
                inner.on_alert_ready(&alert);
            }
        });
    }

    fn on_alert_ready(&self, alert: &Alert) {
        debug!("alert {} is ready", alert.token());
        alert.set_state_ready();
        self.notify_observer(alert.create_alert_info(ObserverState::Ready, ""));
    }
}
