//! Doubles shared by the unit tests.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicI64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::timeout,
};

use crate::{
    alerts::{AlertInfo, AlertObserver, ObserverState},
    renderer::{RenderRequest, Renderer, RendererObserver},
    time::{TimeError, TimeSource},
};

/// Arbitrary "now" used by the tests, in unix seconds.
pub const NOW: i64 = 1_800_000_000;

/// Clock moved by hand.
pub struct ManualTimeSource {
    now: AtomicI64,
}

impl ManualTimeSource {
    pub fn new(now: i64) -> Self {
        ManualTimeSource {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn current_unix_time(&self) -> Result<i64, TimeError> {
        Ok(self.now.load(Ordering::SeqCst))
    }
}

/// Observer forwarding every notification to a channel.
pub struct ChannelObserver {
    sender: UnboundedSender<AlertInfo>,
}

impl ChannelObserver {
    pub fn new() -> (Arc<Self>, UnboundedReceiver<AlertInfo>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(ChannelObserver { sender }), receiver)
    }
}

impl AlertObserver for ChannelObserver {
    fn on_alert_state_change(&self, alert_info: AlertInfo) {
        let _ = self.sender.send(alert_info);
    }
}

/// Renderer recording calls without ever reporting on its own.
#[derive(Default)]
pub struct FakeRenderer {
    requests: Mutex<Vec<RenderRequest>>,
    observer: Mutex<Option<Weak<dyn RendererObserver>>>,
    stops: AtomicUsize,
}

impl FakeRenderer {
    pub fn requests(&self) -> Vec<RenderRequest> {
        self.requests.lock().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Observer of the last start, to report progress by hand.
    pub fn observer(&self) -> Option<Arc<dyn RendererObserver>> {
        self.observer.lock().as_ref().and_then(Weak::upgrade)
    }
}

impl Renderer for FakeRenderer {
    fn start(&self, observer: Weak<dyn RendererObserver>, request: RenderRequest) {
        self.requests.lock().push(request);
        *self.observer.lock() = Some(observer);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Next notification, failing the test if none arrives.
pub async fn next_info(events: &mut UnboundedReceiver<AlertInfo>) -> AlertInfo {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no notification received")
        .expect("observer channel closed")
}

/// Skips notifications until one with `state` arrives.
pub async fn wait_for_state(events: &mut UnboundedReceiver<AlertInfo>, state: ObserverState) -> AlertInfo {
    loop {
        let info = events.recv().await.expect("observer channel closed");
        if info.state == state {
            return info;
        }
    }
}

/// Whether a notification with `state` arrives within `within`.
pub async fn receives_state(
    events: &mut UnboundedReceiver<AlertInfo>,
    state: ObserverState,
    within: Duration,
) -> bool {
    timeout(within, wait_for_state(events, state)).await.is_ok()
}
