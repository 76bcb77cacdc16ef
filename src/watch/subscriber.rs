//! Subscriber-based notifications for reload outcomes.

use parking_lot::RwLock;
use std::sync::{Arc, Weak};

/// What happened during a reload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadEvent {
    /// A new component was published.
    Published {
        /// Service identifier
        service: String,
        /// Identifier of the newly published handle
        handle: u64,
        /// Identifier of the container backing it
        container: String,
    },
    /// The reload failed; the previous component is still published.
    Failed {
        /// Service identifier
        service: String,
        /// Why the reload failed
        reason: String,
    },
}

type Callback = Arc<dyn Fn(&ReloadEvent) + Send + Sync>;

/// Internal subscriber registry state.
struct SubscriberRegistryInner {
    subscribers: Vec<(usize, Callback)>,
    next_id: usize,
}

/// Handle for a subscription that can be dropped to unsubscribe.
///
/// When the handle is dropped, the subscription is removed.
pub struct SubscriptionHandle {
    id: usize,
    registry: Weak<RwLock<SubscriberRegistryInner>>,
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let id = self.id;
            registry
                .write()
                .subscribers
                .retain(|(sub_id, _)| *sub_id != id);
        }
    }
}

/// Registry of callbacks invoked after every reload attempt.
///
/// # Examples
///
/// ```rust
/// use hotswap_context::watch::{ReloadEvent, SubscriberRegistry};
///
/// let registry = SubscriberRegistry::new();
/// let handle = registry.subscribe(|event| {
///     if let ReloadEvent::Failed { reason, .. } = event {
///         eprintln!("reload failed: {}", reason);
///     }
/// });
///
/// assert_eq!(registry.subscriber_count(), 1);
/// drop(handle);
/// assert_eq!(registry.subscriber_count(), 0);
/// ```
#[derive(Clone)]
pub struct SubscriberRegistry {
    inner: Arc<RwLock<SubscriberRegistryInner>>,
}

impl SubscriberRegistry {
    /// Create a new subscriber registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(SubscriberRegistryInner {
                subscribers: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Register a callback. Drop the returned handle to unsubscribe.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&ReloadEvent) + Send + Sync + 'static,
    {
        let mut inner = self.inner.write();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, Arc::new(callback)));

        SubscriptionHandle {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Invoke every callback, in subscription order.
    ///
    /// Callbacks run without the registry lock held, so they may subscribe
    /// or unsubscribe themselves.
    pub fn notify_all(&self, event: &ReloadEvent) {
        let callbacks: Vec<Callback> = self
            .inner
            .read()
            .subscribers
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in callbacks {
            callback(event);
        }
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.read().subscribers.len()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn failed() -> ReloadEvent {
        ReloadEvent::Failed {
            service: "svc".to_string(),
            reason: "boom".to_string(),
        }
    }

    #[test]
    fn test_subscribe_and_notify() {
        let registry = SubscriberRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let counter_clone = Arc::clone(&counter);
        let _handle = registry.subscribe(move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify_all(&failed());
        registry.notify_all(&failed());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_event_is_delivered() {
        let registry = SubscriberRegistry::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let seen_clone = Arc::clone(&seen);
        let _handle = registry.subscribe(move |event| seen_clone.lock().push(event.clone()));

        registry.notify_all(&failed());
        assert_eq!(*seen.lock(), vec![failed()]);
    }

    #[test]
    fn test_unsubscribe_on_drop() {
        let registry = SubscriberRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let counter_clone = Arc::clone(&counter);
        let handle = registry.subscribe(move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify_all(&failed());
        drop(handle);
        registry.notify_all(&failed());

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn test_callback_may_subscribe() {
        let registry = SubscriberRegistry::new();
        let nested = registry.clone();
        let handles = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let handles_clone = Arc::clone(&handles);
        let _handle = registry.subscribe(move |_| {
            handles_clone.lock().push(nested.subscribe(|_| {}));
        });

        registry.notify_all(&failed());
        assert_eq!(registry.subscriber_count(), 2);
    }

    #[test]
    fn test_handle_outlives_registry() {
        let registry = SubscriberRegistry::new();
        let handle = registry.subscribe(|_| {});
        drop(registry);
        drop(handle);
    }
}
