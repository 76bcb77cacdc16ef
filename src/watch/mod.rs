//! Reload triggers and notifications.
//!
//! Subscribers are always available. With the `file-watch` feature a
//! [`ResourceWatcher`] turns file system events into change checks, and with
//! the `scheduler` feature a [`ReloadScheduler`] runs them periodically.

pub mod subscriber;

#[cfg(feature = "file-watch")]
pub mod watcher;

#[cfg(feature = "scheduler")]
pub mod scheduler;

pub use subscriber::{ReloadEvent, SubscriberRegistry, SubscriptionHandle};

#[cfg(feature = "file-watch")]
pub use watcher::{ResourceWatcher, WatchTask};

#[cfg(feature = "scheduler")]
pub use scheduler::ReloadScheduler;

#[cfg(any(feature = "file-watch", feature = "scheduler"))]
use crate::{core::ReloadableService, error::ServiceError};
#[cfg(any(feature = "file-watch", feature = "scheduler"))]
use std::{any::Any, ops::ControlFlow, sync::Arc};

/// Run one change check on the blocking pool.
///
/// Breaks once the service is stopped or the check could not run at all.
#[cfg(any(feature = "file-watch", feature = "scheduler"))]
pub(crate) async fn run_check<T>(service: &Arc<ReloadableService<T>>) -> ControlFlow<()>
where
    T: Any + Send + Sync,
{
    let task_service = Arc::clone(service);
    match tokio::task::spawn_blocking(move || task_service.check_and_reload()).await {
        Ok(Ok(true)) => {
            tracing::debug!(service = %service.id(), "Change check published a new component");
            ControlFlow::Continue(())
        }
        Ok(Ok(false)) => ControlFlow::Continue(()),
        Ok(Err(ServiceError::Stopped(_))) => {
            tracing::debug!(service = %service.id(), "Service stopped, ending change checks");
            ControlFlow::Break(())
        }
        Ok(Err(ServiceError::NotStarted(_))) => {
            tracing::trace!(service = %service.id(), "Service not started yet, skipping check");
            ControlFlow::Continue(())
        }
        Ok(Err(e)) => {
            tracing::warn!(service = %service.id(), error = %e, "Change check failed");
            ControlFlow::Continue(())
        }
        Err(e) => {
            tracing::error!(service = %service.id(), error = %e, "Change check task failed");
            ControlFlow::Break(())
        }
    }
}
