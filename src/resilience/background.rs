//! Owned, cancellable periodic tasks.
//!
//! Each task is a `select!` loop between an interval sleep and a shutdown
//! [`Notify`]. Dropping the handle signals shutdown; [`BackgroundTask::shutdown`]
//! additionally waits for the loop to exit.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct BackgroundTask {
    name: String,
    shutdown_notify: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Run `tick` every `interval` until cancelled
    ///
    /// Returns `None` when called outside a tokio runtime.
    pub fn spawn_periodic<F, Fut>(name: impl Into<String>, interval: Duration, mut tick: F) -> Option<Self>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(task = %name, "No tokio runtime available, background task not started");
                return None;
            }
        };

        let shutdown_notify = Arc::new(Notify::new());
        let loop_shutdown = shutdown_notify.clone();
        let loop_name = name.clone();

        let handle = runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        tick().await;
                    }
                    _ = loop_shutdown.notified() => {
                        debug!(task = %loop_name, "Background task shutting down");
                        break;
                    }
                }
            }
        });

        debug!(task = %name, interval_ms = interval.as_millis() as u64, "Background task started");

        Some(Self {
            name,
            shutdown_notify,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |handle| handle.is_finished())
    }

    /// Signal the loop to stop without waiting for it
    pub fn cancel(&self) {
        // notify_one stores a permit, so a loop mid-tick still sees it
        self.shutdown_notify.notify_one();
    }

    /// Signal the loop to stop and wait for it to exit
    pub async fn shutdown(mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(task = %self.name, error = %e, "Background task ended abnormally");
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
