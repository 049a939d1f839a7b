use std::{future::Future, panic::AssertUnwindSafe};

use futures::FutureExt;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

/// Fire-and-forget jobs that shutdown waits for.
///
/// A job's error or panic is logged and goes no further.
#[derive(Clone)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
        }
    }

    pub fn spawn<F>(&self, name: &'static str, job: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.tracker.spawn(async move {
            match AssertUnwindSafe(job).catch_unwind().await {
                Ok(Ok(())) => debug!(task = name, "background task finished"),
                Ok(Err(e)) => error!(task = name, error = %e, "background task failed"),
                Err(panic) => {
                    let detail = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".into());
                    error!(task = name, panic = %detail, "background task panicked");
                }
            }
        });
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Waits for every spawned job, with no upper bound.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
