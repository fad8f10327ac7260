use std::{future::Future, pin::Pin};

use log::{debug, warn};
use parking_lot::Mutex;
use tokio::{
    sync::mpsc::{self, UnboundedSender},
    task::JoinHandle,
};

type Task = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Runs submitted tasks one at a time, in submission order, on a single
/// background task.
///
/// Must be created from within a tokio runtime.
pub(crate) struct Executor {
    sender: Mutex<Option<UnboundedSender<Task>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Executor {
    pub(crate) fn new() -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Task>();
        let worker = tokio::spawn(async move {
            while let Some(task) = receiver.recv().await {
                task.await;
            }
            debug!("executor stopped");
        });

        Executor {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queues `task` behind every task submitted before it.
    pub(crate) fn execute<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            warn!("executor is shut down, dropping task");
            return;
        };
        if sender.send(Box::pin(task)).is_err() {
            warn!("executor worker is gone, dropping task");
        }
    }

    /// Drops pending tasks and stops the worker.
    pub(crate) fn shutdown(&self) {
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
