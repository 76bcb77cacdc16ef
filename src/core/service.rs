//! The reloadable service: decide, rebuild, validate, publish, drain.

use crate::container::{
    BuildRequest, ComponentPostProcessor, Container, ContainerBuilder, ConversionService,
    DefinitionPostProcessor,
};
use crate::core::decision::WatchSet;
use crate::core::handle::{BuildOutcome, ComponentHandle, PinnedHandle};
use crate::error::{Result, ServiceError, ValidationError};
use crate::resource::Resource;
use crate::watch::{ReloadEvent, SubscriberRegistry, SubscriptionHandle};
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "metrics")]
use crate::metrics::ReloadMetrics;

/// Type alias for validator functions.
pub(crate) type Validator<T> =
    Arc<dyn Fn(&T) -> std::result::Result<(), ValidationError> + Send + Sync>;

/// Externally visible lifecycle state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Not started yet.
    Uninitialized,
    /// Started, but no component has ever been published.
    NoComponentYet,
    /// The last reload attempt published a component.
    Healthy,
    /// The last reload attempt failed; the previous component (if any) is still served.
    Degraded,
    /// Stopped; the last component has been unloaded.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    Stopped,
}

#[derive(Debug)]
struct Status {
    phase: Phase,
    last_failed: bool,
    last_attempt: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    failure: Option<String>,
}

/// Inputs of a service, assembled by [`crate::core::ReloadableServiceBuilder`].
pub(crate) struct ServiceParts<T> {
    pub(crate) id: String,
    pub(crate) builder: Arc<dyn ContainerBuilder>,
    pub(crate) resources: Vec<Arc<dyn Resource>>,
    pub(crate) parent: Option<Arc<dyn Container>>,
    pub(crate) definition_processors: Vec<Arc<dyn DefinitionPostProcessor>>,
    pub(crate) component_processors: Vec<Arc<dyn ComponentPostProcessor>>,
    pub(crate) profiles: Vec<String>,
    pub(crate) conversion: Option<Arc<dyn ConversionService>>,
    pub(crate) component_name: Option<String>,
    pub(crate) validator: Option<Validator<T>>,
    pub(crate) fail_fast: bool,
    pub(crate) check_interval: Option<Duration>,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: Option<ReloadMetrics>,
}

/// A typed component drawn from a child container that is rebuilt and
/// hot-swapped whenever its configuration resources change.
///
/// Readers call [`get_handle`](Self::get_handle) and hold the returned
/// [`PinnedHandle`] while they use the component. Reloads never block
/// readers: a new component is published atomically, and the previous
/// container is closed once its last pin is released. A failed reload keeps
/// the previous component published.
///
/// Reloads are serialized. A thread that holds a pin must not trigger a
/// reload, since unloading the previous handle waits for that very pin.
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_context::prelude::*;
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize)]
/// struct Greeter {
///     message: String,
/// }
///
/// # fn example() -> Result<()> {
/// let builder = ConfigContainerBuilder::new()
///     .with_factory("greeter", |ctx| ctx.settings::<Greeter>());
///
/// let service = ReloadableService::builder("greeter")
///     .with_file("config/greeter.yaml")
///     .build::<Greeter>(builder);
/// service.start()?;
///
/// if let Some(greeter) = service.get_handle() {
///     println!("{}", greeter.message);
/// }
///
/// // Later, from a timer or a file watcher:
/// service.check_and_reload()?;
/// # Ok(())
/// # }
/// ```
pub struct ReloadableService<T> {
    id: String,
    builder: Arc<dyn ContainerBuilder>,
    parent: Option<Arc<dyn Container>>,
    definition_processors: Vec<Arc<dyn DefinitionPostProcessor>>,
    component_processors: Vec<Arc<dyn ComponentPostProcessor>>,
    profiles: Vec<String>,
    conversion: Option<Arc<dyn ConversionService>>,
    component_name: Option<String>,
    validator: Option<Validator<T>>,
    fail_fast: bool,
    check_interval: Option<Duration>,
    /// Held for the whole of a reload; owns the fingerprints.
    reload: Mutex<WatchSet>,
    status: RwLock<Status>,
    published: ArcSwapOption<ComponentHandle<T>>,
    subscribers: SubscriberRegistry,
    #[cfg(feature = "metrics")]
    metrics: Option<ReloadMetrics>,
}

impl<T: Any + Send + Sync> ReloadableService<T> {
    pub(crate) fn from_parts(parts: ServiceParts<T>) -> Self {
        Self {
            id: parts.id,
            builder: parts.builder,
            parent: parts.parent,
            definition_processors: parts.definition_processors,
            component_processors: parts.component_processors,
            profiles: parts.profiles,
            conversion: parts.conversion,
            component_name: parts.component_name,
            validator: parts.validator,
            fail_fast: parts.fail_fast,
            check_interval: parts.check_interval,
            reload: Mutex::new(WatchSet::new(parts.resources)),
            status: RwLock::new(Status {
                phase: Phase::Created,
                last_failed: false,
                last_attempt: None,
                last_success: None,
                failure: None,
            }),
            published: ArcSwapOption::empty(),
            subscribers: SubscriberRegistry::new(),
            #[cfg(feature = "metrics")]
            metrics: parts.metrics,
        }
    }

    /// Start the service and perform the initial load.
    ///
    /// The initial load runs regardless of the change detector. If it fails
    /// the service still starts, in the degraded state, unless `fail_fast`
    /// was requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the service was already started or stopped, or if
    /// the initial load fails with `fail_fast` enabled (the service can then
    /// be started again).
    pub fn start(&self) -> Result<()> {
        let mut watched = self.reload.lock();
        match self.status.read().phase {
            Phase::Created => {}
            Phase::Running => return Err(ServiceError::AlreadyStarted(self.id.clone())),
            Phase::Stopped => return Err(ServiceError::Stopped(self.id.clone())),
        }
        self.status.write().phase = Phase::Running;

        tracing::info!(
            service = %self.id,
            resources = watched.len(),
            "Starting reloadable service"
        );

        watched.scan();
        let outcome = self.do_reload(&watched);
        if outcome.is_err() && self.fail_fast {
            self.status.write().phase = Phase::Created;
        }
        drop(watched);

        match self.finish(outcome) {
            Err(e) if self.fail_fast => Err(e),
            _ => Ok(()),
        }
    }

    /// Stop the service and unload the published component.
    ///
    /// Waits for an in-flight reload, then for every outstanding pin on the
    /// last published handle. Stopping twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the last container fails to close.
    pub fn stop(&self) -> Result<()> {
        let watched = self.reload.lock();
        {
            let mut status = self.status.write();
            if status.phase == Phase::Stopped {
                return Ok(());
            }
            status.phase = Phase::Stopped;
        }
        let last = self.published.swap(None);
        drop(watched);

        tracing::info!(service = %self.id, "Stopping reloadable service");

        match last {
            Some(handle) => handle.unload().map_err(ServiceError::from),
            None => Ok(()),
        }
    }

    /// Pin and return the published component, or `None` if none was ever loaded.
    ///
    /// Never waits on a reload or on a draining handle. The caller releases
    /// the pin with [`PinnedHandle::unpin`] or by dropping it.
    pub fn get_handle(&self) -> Option<PinnedHandle<T>> {
        loop {
            let current = self.published.load_full()?;
            if let Some(pinned) = current.try_pin() {
                if pinned.is_live() {
                    return Some(pinned);
                }
            }

            // The loaded handle is being unloaded, which only happens once a
            // successor is published. A handle unloaded while still
            // published was torn down from outside the service.
            let still_published = self
                .published
                .load_full()
                .is_some_and(|published| Arc::ptr_eq(&published, &current));
            if still_published {
                tracing::warn!(
                    service = %self.id,
                    handle = current.id(),
                    "Published handle was unloaded externally"
                );
                return None;
            }
            std::thread::yield_now();
        }
    }

    /// Report whether a reload is warranted, without acting on it.
    ///
    /// Recorded fingerprints are left untouched, so a following
    /// [`check_and_reload`](Self::check_and_reload) still sees the change.
    /// Always `false` unless the service is running.
    pub fn should_reload(&self) -> bool {
        let watched = self.reload.lock();
        let status = self.status.read();
        if status.phase != Phase::Running {
            return false;
        }
        let last_failed = status.last_failed;
        drop(status);
        watched.peek(last_failed)
    }

    /// Reload if any resource changed (or the last attempt failed).
    ///
    /// Returns `Ok(true)` if a new component was published and `Ok(false)` if
    /// nothing needed reloading.
    ///
    /// # Errors
    ///
    /// Returns the reload failure (the previous component stays published),
    /// or an error if the service is not running.
    pub fn check_and_reload(&self) -> Result<bool> {
        let mut watched = self.reload.lock();
        self.ensure_running()?;

        let last_failed = self.status.read().last_failed;
        if !watched.should_reload(last_failed) {
            tracing::trace!(service = %self.id, "No change detected");
            #[cfg(feature = "metrics")]
            if let Some(metrics) = &self.metrics {
                metrics.update_component_age();
            }
            return Ok(false);
        }

        let outcome = self.do_reload(&watched);
        drop(watched);
        self.finish(outcome).map(|()| true)
    }

    /// Rebuild unconditionally.
    ///
    /// # Errors
    ///
    /// Returns the reload failure (the previous component stays published),
    /// or an error if the service is not running.
    pub fn reload(&self) -> Result<()> {
        let mut watched = self.reload.lock();
        self.ensure_running()?;

        watched.scan();
        let outcome = self.do_reload(&watched);
        drop(watched);
        self.finish(outcome)
    }

    fn ensure_running(&self) -> Result<()> {
        match self.status.read().phase {
            Phase::Running => Ok(()),
            Phase::Created => Err(ServiceError::NotStarted(self.id.clone())),
            Phase::Stopped => Err(ServiceError::Stopped(self.id.clone())),
        }
    }

    /// Build, validate and publish. Runs under the reload lock and returns
    /// the handle it replaced, which the caller unloads after releasing it.
    fn do_reload(&self, watched: &WatchSet) -> Result<Option<Arc<ComponentHandle<T>>>> {
        self.status.write().last_attempt = Some(Utc::now());
        tracing::debug!(service = %self.id, "Rebuilding container");

        #[cfg(feature = "metrics")]
        let timer = self.metrics.as_ref().map(ReloadMetrics::start_reload);

        let built = self.build_handle(watched);

        #[cfg(feature = "metrics")]
        if let (Some(metrics), Some(timer)) = (&self.metrics, timer) {
            match &built {
                Ok(_) => metrics.record_reload_success(timer),
                Err(e) => {
                    match e {
                        ServiceError::WrongType { .. } => metrics.record_type_mismatch(),
                        ServiceError::Validation(_) => metrics.record_validation_failure(),
                        _ => {}
                    }
                    metrics.record_reload_failure(timer);
                }
            }
        }

        let handle = match built {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(
                    service = %self.id,
                    error = %e,
                    "Reload failed, keeping the previous component"
                );
                let mut status = self.status.write();
                status.last_failed = true;
                status.failure = Some(e.to_string());
                return Err(e);
            }
        };

        // Held across the swap so the new container cannot be torn down
        // before it is reachable through the published reference.
        let transient = handle.pin();
        let previous = self.published.swap(Some(Arc::clone(&handle)));
        transient.unpin();

        {
            let mut status = self.status.write();
            status.last_failed = false;
            status.failure = None;
            status.last_success = Some(Utc::now());
        }

        tracing::info!(
            service = %self.id,
            handle = handle.id(),
            container = %handle.container_id(),
            "Published new component"
        );
        Ok(previous)
    }

    fn build_handle(&self, watched: &WatchSet) -> Result<Arc<ComponentHandle<T>>> {
        let request = BuildRequest {
            resources: watched.resources(),
            parent: self.parent.as_ref(),
            definition_processors: &self.definition_processors,
            component_processors: &self.component_processors,
            profiles: &self.profiles,
            conversion: self.conversion.as_ref(),
        };

        let outcome = match self.builder.build(&request) {
            Ok(container) => ComponentHandle::<T>::from_container(container, self.component_name.as_deref()),
            Err(e) => BuildOutcome::Failed(e),
        };
        let handle = outcome.into_result()?;

        if let Some(validator) = &self.validator {
            let pinned = handle.pin();
            let verdict = validator(pinned.component());
            pinned.unpin();

            if let Err(e) = verdict {
                if let Err(close) = handle.unload() {
                    tracing::warn!(service = %self.id, error = %close, "Failed to close rejected container");
                }
                return Err(e.into());
            }
        }

        Ok(handle)
    }

    /// Unload what a reload replaced and notify subscribers. Runs without
    /// the reload lock.
    fn finish(&self, outcome: Result<Option<Arc<ComponentHandle<T>>>>) -> Result<()> {
        match outcome {
            Ok(previous) => {
                if let Some(previous) = previous {
                    tracing::debug!(
                        service = %self.id,
                        handle = previous.id(),
                        "Draining previous component"
                    );
                    if let Err(e) = previous.unload() {
                        tracing::error!(service = %self.id, error = %e, "Failed to unload previous component");
                    }
                }

                if let Some(current) = self.published.load_full() {
                    self.subscribers.notify_all(&ReloadEvent::Published {
                        service: self.id.clone(),
                        handle: current.id(),
                        container: current.container_id().to_string(),
                    });
                }
                Ok(())
            }
            Err(e) => {
                self.subscribers.notify_all(&ReloadEvent::Failed {
                    service: self.id.clone(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }
}

impl<T> ReloadableService<T> {
    /// Service identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServiceState {
        let status = self.status.read();
        match status.phase {
            Phase::Created => ServiceState::Uninitialized,
            Phase::Stopped => ServiceState::Stopped,
            Phase::Running if status.last_failed => ServiceState::Degraded,
            Phase::Running if self.published.load().is_none() => ServiceState::NoComponentYet,
            Phase::Running => ServiceState::Healthy,
        }
    }

    /// When a component was last published.
    pub fn last_successful_reload(&self) -> Option<DateTime<Utc>> {
        self.status.read().last_success
    }

    /// When a reload was last attempted.
    pub fn last_reload_attempt(&self) -> Option<DateTime<Utc>> {
        self.status.read().last_attempt
    }

    /// Why the last reload failed, if it did.
    pub fn reload_failure(&self) -> Option<String> {
        self.status.read().failure.clone()
    }

    /// Configured interval between periodic checks, if any.
    pub fn check_interval(&self) -> Option<Duration> {
        self.check_interval
    }

    /// The configured resources, in merge order.
    pub fn resources(&self) -> Vec<Arc<dyn Resource>> {
        self.reload.lock().resources().to_vec()
    }

    /// Register a callback invoked after every reload attempt.
    ///
    /// Drop the returned handle to unsubscribe.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&ReloadEvent) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }
}
