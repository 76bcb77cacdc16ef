//! Periodic change checks.

use crate::core::ReloadableService;
use std::any::Any;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Runs [`ReloadableService::check_and_reload`] at a fixed interval.
///
/// Checks run on the blocking pool, one at a time; a slow reload delays the
/// next tick instead of piling up. The scheduler ends when the service is
/// stopped and is cancelled when dropped.
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_context::prelude::*;
/// use hotswap_context::watch::ReloadScheduler;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example(service: Arc<ReloadableService<String>>) {
/// let scheduler = ReloadScheduler::spawn(Arc::clone(&service), Duration::from_secs(5));
/// // ...
/// drop(scheduler);
/// # }
/// ```
pub struct ReloadScheduler {
    interval: Duration,
    task: JoinHandle<()>,
}

impl ReloadScheduler {
    /// Start checking `service` every `interval`.
    ///
    /// Must be called from within a Tokio runtime. The first check happens
    /// one interval after spawning.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero.
    pub fn spawn<T>(service: Arc<ReloadableService<T>>, interval: Duration) -> Self
    where
        T: Any + Send + Sync,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(service = %service.id(), ?interval, "Starting reload scheduler");

        let task = tokio::spawn(async move {
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let ControlFlow::Break(()) = super::run_check(&service).await {
                    break;
                }
            }
        });

        Self { interval, task }
    }

    /// Interval between checks.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the scheduler has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ReloadScheduler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl<T: Any + Send + Sync> ReloadableService<T> {
    /// Spawn a [`ReloadScheduler`] using the configured check interval.
    ///
    /// Returns `None` if no interval was configured.
    pub fn spawn_scheduler(self: &Arc<Self>) -> Option<ReloadScheduler> {
        self.check_interval()
            .map(|interval| ReloadScheduler::spawn(Arc::clone(self), interval))
    }
}
