//! Periodic cleanup of finished queue jobs

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::queue::{JobQueue, JobState};

/// Janitor worker options
#[derive(Debug, Clone)]
pub struct Options {
    pub interval: Duration,

    /// Completed jobs older than this are removed
    pub completed_retention: Duration,

    /// Failed jobs older than this are removed
    pub failed_retention: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            completed_retention: Duration::from_secs(24 * 3600),
            failed_retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Run the janitor worker
pub async fn run<Q, S, F>(
    options: &Options,
    queue: &Q,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    Q: JobQueue + ?Sized,
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Janitor worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Janitor worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        for (state, retention) in [
            (JobState::Completed, options.completed_retention),
            (JobState::Failed, options.failed_retention),
        ] {
            match queue.clean(retention, state).await {
                Ok(0) => {}
                Ok(removed) => debug!("Removed {} {} jobs", removed, state),
                Err(e) => error!(operation = "clean", state = %state, "Failed to clean jobs: {}", e),
            }
        }
    }
}
