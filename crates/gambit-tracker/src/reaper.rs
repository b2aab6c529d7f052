use std::time::Duration;

use gambit_common::{assignment::TaskAssignment, UnixNanos};
use tokio::time::MissedTickBehavior;

use crate::{store::TrackerStore, store_error, Error};

/// Options for the stale assignment sweep.
#[derive(Debug, Clone)]
pub struct ReaperOptions {
    /// Assignments without a heartbeat for this long are cancelled.
    ///
    /// Always make sure that clients report progress more
    /// often than this.
    pub heartbeat_timeout: Duration,
    /// Time between sweeps.
    pub sweep_interval: Duration,
}

impl Default for ReaperOptions {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Cancels assignments of clients that stopped reporting, so that
/// their tasks can be handed out again.
#[derive(Debug, Clone)]
pub struct Reaper<S> {
    store: S,
    options: ReaperOptions,
}

impl<S> Reaper<S>
where
    S: TrackerStore,
{
    /// Create a new reaper with the given backing store.
    pub fn new(store: S, options: ReaperOptions) -> Self {
        Self { store, options }
    }

    /// Cancel stale assignments once.
    ///
    /// # Errors
    ///
    /// Fails if the store fails.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn sweep(&self) -> Result<Vec<TaskAssignment>, Error> {
        let now = UnixNanos::now();
        let cutoff = now.saturating_sub(self.options.heartbeat_timeout);

        let reaped = self
            .store
            .reap_stale_assignments(cutoff, now)
            .await
            .map_err(store_error)?;

        for assignment in &reaped {
            tracing::info!(
                assignment_id = %assignment.id,
                task_id = %assignment.task_id,
                token_id = %assignment.token_id,
                external_id = %assignment.external_id,
                "stale assignment reaped"
            );
        }

        Ok(reaped)
    }

    /// Sweep periodically, forever.
    ///
    /// Store errors are logged and the next sweep is attempted
    /// as usual.
    pub async fn run(self) {
        let mut interval =
            tokio::time::interval(self.options.sweep_interval.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if let Err(error) = self.sweep().await {
                tracing::error!(%error, "failed to reap stale assignments");
            }
        }
    }
}
