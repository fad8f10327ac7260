use std::time::Duration;

use tokio::{task::JoinHandle, time};

/// Single-shot timer. Starting it again cancels the pending expiration.
#[derive(Default)]
pub(crate) struct OneShotTimer {
    handle: Option<JoinHandle<()>>,
}

impl OneShotTimer {
    /// Runs `on_expiration` after `delay`, replacing any pending expiration.
    pub(crate) fn start<F>(&mut self, delay: Duration, on_expiration: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.stop();
        self.handle = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            on_expiration();
        }));
    }

    pub(crate) fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for OneShotTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let mut timer = OneShotTimer::default();
        timer.start(Duration::from_secs(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_cancels_previous_expiration() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = OneShotTimer::default();

        let counter = fired.clone();
        timer.start(Duration::from_secs(2), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = fired.clone();
        timer.start(Duration::from_secs(10), move || {
            counter.fetch_add(10, Ordering::SeqCst);
        });

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);

        timer.stop();
        time::sleep(Duration::from_secs(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }
}
