//! Reference-counted handles over built containers.
//!
//! A [`ComponentHandle`] owns one container and exposes one typed component
//! from it. Readers pin the handle (shared lock) for as long as they use the
//! component; [`ComponentHandle::unload`] takes the lock exclusively, so the
//! container is only closed once every pin has been released.

use crate::container::{ComponentRef, Container};
use crate::error::{BuildError, CloseError, ServiceError};
use parking_lot::lock_api::ArcRwLockReadGuard;
use parking_lot::{RawRwLock, RwLock};
use std::any::{Any, type_name};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

type Slot = Option<Box<dyn Container>>;

/// Result of turning a freshly built container into a handle.
pub enum BuildOutcome<T> {
    /// The component exists and has the expected type.
    Built(Arc<ComponentHandle<T>>),
    /// The component exists but has another type. The container was closed.
    WrongType {
        /// Component name
        component: String,
        /// Type the service expects
        expected: &'static str,
        /// Type found in the container
        found: &'static str,
    },
    /// The build failed or the component is missing.
    Failed(BuildError),
}

impl<T> BuildOutcome<T> {
    /// Convert into a `Result`, mapping each failure to its service error.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::WrongType`] or [`ServiceError::Build`].
    pub fn into_result(self) -> Result<Arc<ComponentHandle<T>>, ServiceError> {
        match self {
            Self::Built(handle) => Ok(handle),
            Self::WrongType {
                component,
                expected,
                found,
            } => Err(ServiceError::WrongType {
                component,
                expected,
                found,
            }),
            Self::Failed(e) => Err(e.into()),
        }
    }
}

/// A built container plus the typed component drawn from it.
pub struct ComponentHandle<T> {
    id: u64,
    container_id: String,
    component_name: String,
    component: Arc<T>,
    source: ComponentRef,
    slot: Arc<RwLock<Slot>>,
}

impl<T: Any + Send + Sync> ComponentHandle<T> {
    /// Wrap a fully built container.
    ///
    /// The exposed component is `name` when given, otherwise the container's
    /// primary component. On any failure the container is closed before
    /// returning, so nothing half-built escapes.
    pub fn from_container(mut container: Box<dyn Container>, name: Option<&str>) -> BuildOutcome<T> {
        let resolved = name
            .map(str::to_owned)
            .or_else(|| container.primary_name().map(str::to_owned));

        let Some(component_name) = resolved else {
            close_rejected(container.as_mut());
            return BuildOutcome::Failed(BuildError::NoComponent("<primary>".to_string()));
        };

        let Some(source) = container.component(&component_name) else {
            close_rejected(container.as_mut());
            return BuildOutcome::Failed(BuildError::NoComponent(component_name));
        };

        let Some(component) = source.downcast::<T>() else {
            let found = source.type_name();
            drop(source);
            close_rejected(container.as_mut());
            return BuildOutcome::WrongType {
                component: component_name,
                expected: type_name::<T>(),
                found,
            };
        };

        BuildOutcome::Built(Arc::new(Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            container_id: container.id().to_string(),
            component_name,
            component,
            source,
            slot: Arc::new(RwLock::new(Some(container))),
        }))
    }
}

impl<T> ComponentHandle<T> {
    /// Unique identifier of this handle.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Identifier of the owned container.
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Name of the exposed component inside the container.
    pub fn component_name(&self) -> &str {
        &self.component_name
    }

    /// Pin the handle, keeping its container open until the pin is released.
    ///
    /// Blocks only while an unload of this handle is draining. The pin lock
    /// is not reentrant: a thread that already holds a pin on this handle
    /// deadlocks here once an unload is queued behind that pin. Readers go
    /// through `ReloadableService::get_handle`, which never blocks.
    pub(crate) fn pin(self: &Arc<Self>) -> PinnedHandle<T> {
        PinnedHandle {
            pin: self.slot.read_arc(),
            handle: Arc::clone(self),
        }
    }

    /// Pin without waiting; fails while an unload is draining.
    pub(crate) fn try_pin(self: &Arc<Self>) -> Option<PinnedHandle<T>> {
        self.slot.try_read_arc().map(|pin| PinnedHandle {
            pin,
            handle: Arc::clone(self),
        })
    }

    /// Whether the container is still attached.
    ///
    /// Reports `false` while an unload is in progress.
    pub fn is_loaded(&self) -> bool {
        self.slot.try_read().is_some_and(|slot| slot.is_some())
    }

    /// Tear the handle down.
    ///
    /// Waits for every outstanding pin, detaches the container, then closes
    /// it outside the lock and finally invokes the component's destroy
    /// contract. Calling it again is a no-op.
    ///
    /// Must not be called by a thread that holds a pin on this handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the container fails to close.
    pub fn unload(&self) -> Result<(), CloseError> {
        let detached = self.slot.write().take();
        let Some(mut container) = detached else {
            return Ok(());
        };

        tracing::debug!(
            handle = self.id,
            container = %self.container_id,
            "Pins drained, closing container"
        );

        let closed = container.close();
        drop(container);
        self.source.destroy();
        closed
    }
}

impl<T> Drop for ComponentHandle<T> {
    fn drop(&mut self) {
        // No pin can outlive the handle, so this never waits.
        if let Err(e) = self.unload() {
            tracing::error!(handle = self.id, error = %e, "Failed to close container on drop");
        }
    }
}

impl<T> fmt::Debug for ComponentHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentHandle")
            .field("id", &self.id)
            .field("container_id", &self.container_id)
            .field("component_name", &self.component_name)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

fn close_rejected(container: &mut dyn Container) {
    if let Err(e) = container.close() {
        tracing::warn!(container = %container.id(), error = %e, "Failed to close rejected container");
    }
}

/// A pinned handle: the component stays valid until this is unpinned or dropped.
///
/// # Examples
///
/// ```rust,no_run
/// # use hotswap_context::core::ReloadableService;
/// # fn example(service: &ReloadableService<String>) {
/// if let Some(pinned) = service.get_handle() {
///     println!("component: {}", *pinned);
///     pinned.unpin();
/// }
/// # }
/// ```
pub struct PinnedHandle<T> {
    // Declared first so the pin is released before the handle reference:
    // dropping the last handle reference unloads it, which needs the lock.
    pin: ArcRwLockReadGuard<RawRwLock, Slot>,
    handle: Arc<ComponentHandle<T>>,
}

impl<T> PinnedHandle<T> {
    /// The typed component.
    pub fn component(&self) -> &T {
        &self.handle.component
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Arc<ComponentHandle<T>> {
        &self.handle
    }

    /// Identifier of the underlying handle.
    pub fn id(&self) -> u64 {
        self.handle.id
    }

    /// Whether the pinned handle still owns its container.
    pub(crate) fn is_live(&self) -> bool {
        self.pin.is_some()
    }

    /// Release the pin.
    pub fn unpin(self) {
        drop(self);
    }
}

impl<T> Deref for PinnedHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.handle.component
    }
}

impl<T> fmt::Debug for PinnedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedHandle")
            .field("id", &self.handle.id)
            .field("container_id", &self.handle.container_id)
            .finish()
    }
}
