//! Audio rendering interface used by alerts.
//!
//! A [`Renderer`] plays the sound of an active alert and reports progress to a
//! [`RendererObserver`]. The observer is handed over as a weak reference so the
//! renderer never keeps an alert alive on its own.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::{runtime::Handle, task::JoinHandle, time};

/// Built-in sound used when no asset can be played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAudio {
    /// The full alert sound, used while the alert owns the foreground.
    Full,
    /// A short chime, used while the alert plays in the background.
    Short,
}

/// Everything a renderer needs to play one alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    /// Sound to play when `urls` is empty or playing them fails.
    pub audio: DefaultAudio,
    /// Fade the volume in instead of starting at full volume.
    pub volume_ramp: bool,
    /// Asset urls, in play order.
    pub urls: Vec<String>,
    /// Number of times the urls are played.
    pub loop_count: i32,
    /// Pause between two loops.
    pub loop_pause: Duration,
    /// Wait `loop_pause` before the first loop.
    pub start_with_pause: bool,
}

/// Receives rendering progress.
pub trait RendererObserver: Send + Sync {
    /// Audio output started.
    fn on_renderer_started(&self);

    /// Audio output stopped before completing, either on request or unexpectedly.
    fn on_renderer_stopped(&self, reason: &str);

    /// Every loop was played.
    fn on_renderer_completed(&self);

    /// Audio could not be played.
    fn on_renderer_error(&self, reason: &str);
}

/// Plays alert audio.
///
/// Calling [`Renderer::start`] while a previous request is still rendering
/// replaces it without a stopped notification. [`Renderer::stop`] reports
/// [`RendererObserver::on_renderer_stopped`] only if something was rendering.
pub trait Renderer: Send + Sync {
    /// Starts rendering `request`, reporting progress to `observer`.
    fn start(&self, observer: Weak<dyn RendererObserver>, request: RenderRequest);

    /// Stops the current rendering.
    fn stop(&self);
}

struct Playback {
    observer: Weak<dyn RendererObserver>,
    task: JoinHandle<()>,
}

/// [`Renderer`] that pretends to play audio for a fixed duration.
///
/// Used by the daemon and for manual testing on machines without an audio
/// stack. Each loop lasts the configured duration; it reports start right
/// away and completion when every loop has elapsed.
pub struct SimulatedRenderer {
    loop_duration: Duration,
    playback: Arc<Mutex<Option<Playback>>>,
}

impl SimulatedRenderer {
    /// Creates a renderer whose loops last `loop_duration`.
    pub fn new(loop_duration: Duration) -> Self {
        SimulatedRenderer {
            loop_duration,
            playback: Arc::new(Mutex::new(None)),
        }
    }

    /// Whether a request is being rendered.
    pub fn is_rendering(&self) -> bool {
        self.playback
            .lock()
            .as_ref()
            .is_some_and(|playback| !playback.task.is_finished())
    }

    fn total_duration(&self, request: &RenderRequest) -> Duration {
        // Cap unbounded loop counts, the alert's own rendering limit ends it anyway
        let loops = request.loop_count.clamp(1, 60) as u32;
        let mut total = self.loop_duration * loops + request.loop_pause * (loops - 1);
        if request.start_with_pause {
            total += request.loop_pause;
        }
        total
    }
}

impl Renderer for SimulatedRenderer {
    fn start(&self, observer: Weak<dyn RendererObserver>, request: RenderRequest) {
        let Ok(handle) = Handle::try_current() else {
            warn!("no async runtime to render alert audio");
            if let Some(observer) = observer.upgrade() {
                observer.on_renderer_error("no async runtime");
            }
            return;
        };

        let total = self.total_duration(&request);
        info!(
            "rendering {} url(s) ({:?} audio) for {:?}",
            request.urls.len(),
            request.audio,
            total
        );

        let task_observer = observer.clone();
        let playback = Arc::downgrade(&self.playback);
        let task = handle.spawn(async move {
            if let Some(observer) = task_observer.upgrade() {
                observer.on_renderer_started();
            }
            time::sleep(total).await;

            // Forget the playback before reporting so a restart from the callback is clean
            if let Some(playback) = playback.upgrade() {
                playback.lock().take();
            }
            if let Some(observer) = task_observer.upgrade() {
                observer.on_renderer_completed();
            }
        });

        let previous = self.playback.lock().replace(Playback { observer, task });
        if let Some(previous) = previous {
            debug!("replacing current rendering");
            previous.task.abort();
        }
    }

    fn stop(&self) {
        let Some(playback) = self.playback.lock().take() else {
            debug!("nothing to stop");
            return;
        };
        playback.task.abort();

        if let Some(observer) = playback.observer.upgrade() {
            observer.on_renderer_stopped("stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingObserver {
        events: StdMutex<Vec<String>>,
    }

    impl RendererObserver for RecordingObserver {
        fn on_renderer_started(&self) {
            self.events.lock().unwrap().push("started".to_string());
        }

        fn on_renderer_stopped(&self, reason: &str) {
            self.events.lock().unwrap().push(format!("stopped:{}", reason));
        }

        fn on_renderer_completed(&self) {
            self.events.lock().unwrap().push("completed".to_string());
        }

        fn on_renderer_error(&self, reason: &str) {
            self.events.lock().unwrap().push(format!("error:{}", reason));
        }
    }

    fn request(loop_count: i32) -> RenderRequest {
        RenderRequest {
            audio: DefaultAudio::Full,
            volume_ramp: false,
            urls: vec![],
            loop_count,
            loop_pause: Duration::from_secs(1),
            start_with_pause: false,
        }
    }

    fn events(observer: &RecordingObserver) -> Vec<String> {
        observer.events.lock().unwrap().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_renderer_completes() {
        let renderer = SimulatedRenderer::new(Duration::from_secs(5));
        let observer = Arc::new(RecordingObserver::default());
        let weak: Weak<dyn RendererObserver> = Arc::downgrade(&observer) as _;

        renderer.start(weak, request(2));
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(events(&observer), vec!["started"]);
        assert!(renderer.is_rendering());

        // Two loops of 5s with a 1s pause in between
        time::sleep(Duration::from_secs(11)).await;
        assert_eq!(events(&observer), vec!["started", "completed"]);
        assert!(!renderer.is_rendering());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_renderer_stop() {
        let renderer = SimulatedRenderer::new(Duration::from_secs(5));
        let observer = Arc::new(RecordingObserver::default());
        let weak: Weak<dyn RendererObserver> = Arc::downgrade(&observer) as _;

        renderer.start(weak, request(1));
        time::sleep(Duration::from_secs(1)).await;
        renderer.stop();
        time::sleep(Duration::from_secs(10)).await;

        assert_eq!(events(&observer), vec!["started", "stopped:stopped"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_renderer_stop_when_idle_is_silent() {
        let renderer = SimulatedRenderer::new(Duration::from_secs(5));
        renderer.stop();
        assert!(!renderer.is_rendering());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_renderer_restart_replaces_playback() {
        let renderer = SimulatedRenderer::new(Duration::from_secs(5));
        let observer = Arc::new(RecordingObserver::default());
        let weak: Weak<dyn RendererObserver> = Arc::downgrade(&observer) as _;

        renderer.start(weak.clone(), request(1));
        time::sleep(Duration::from_secs(1)).await;
        renderer.start(weak, request(1));
        time::sleep(Duration::from_secs(10)).await;

        assert_eq!(events(&observer), vec!["started", "started", "completed"]);
    }
}
