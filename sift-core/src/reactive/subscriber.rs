//! Subscriber registry.
//!
//! A publisher fans notifications out through a [`SubscriberRegistry`]: an
//! ordered list of zero-argument callbacks. Every registration gets its own
//! [`SubscriberId`], so removing one subscription never touches another even
//! when both wrap the same closure.
//!
//! Notification iterates over a snapshot of the list taken when the fan-out
//! starts. Callbacks may therefore subscribe or unsubscribe while being
//! notified. A subscriber removed mid fan-out is skipped if its turn has not
//! come yet; one added mid fan-out is first called on the next fan-out.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

/// Callback stored in the registry.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Unique identifier for a subscription.
///
/// Uses an atomic counter so ids stay unique across all registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

struct Entry {
    id: SubscriberId,
    /// Cleared on removal so an in-flight snapshot skips the entry.
    active: AtomicBool,
    notify: Callback,
}

#[derive(Default)]
struct RegistryInner {
    entries: Mutex<Vec<Arc<Entry>>>,
}

impl RegistryInner {
    fn remove(&self, id: SubscriberId) -> bool {
        let removed = {
            let mut entries = self.entries.lock();
            entries
                .iter()
                .position(|entry| entry.id == id)
                .map(|index| entries.remove(index))
        };
        // The entry is dropped after the lock is released: its callback may
        // own subscriptions to this same registry.
        match removed {
            Some(entry) => {
                entry.active.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}

/// Ordered collection of notification callbacks.
///
/// Cloning yields another handle to the same list.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriberRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` at the end of the list.
    ///
    /// The returned handle removes exactly this registration.
    pub fn add(&self, callback: Callback) -> Subscription {
        let id = SubscriberId::new();
        self.inner.entries.lock().push(Arc::new(Entry {
            id,
            active: AtomicBool::new(true),
            notify: callback,
        }));
        debug!(subscriber = ?id, "subscriber added");

        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
            released: AtomicBool::new(false),
        }
    }

    /// Remove the registration with `id`.
    ///
    /// Returns `false` when it was already gone.
    pub fn remove(&self, id: SubscriberId) -> bool {
        let removed = self.inner.remove(id);
        if removed {
            debug!(subscriber = ?id, "subscriber removed");
        }
        removed
    }

    /// Call every registered callback in registration order.
    ///
    /// Returns how many callbacks ran.
    pub fn notify_all(&self) -> usize {
        // No lock is held while callbacks run.
        let snapshot: Vec<Arc<Entry>> = self.inner.entries.lock().clone();

        let mut notified = 0;
        for entry in snapshot {
            if entry.active.load(Ordering::SeqCst) {
                (entry.notify)();
                notified += 1;
            }
        }
        notified
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Whether no registrations are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the registration with `id` is still present.
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.inner.entries.lock().iter().any(|entry| entry.id == id)
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("len", &self.len())
            .finish()
    }
}

/// Handle to one registration.
///
/// Unsubscribing is idempotent. Dropping the handle unsubscribes as well.
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription {
    id: SubscriberId,
    registry: Weak<RegistryInner>,
    released: AtomicBool,
}

impl Subscription {
    /// A handle that is not attached to any registry.
    pub fn detached() -> Self {
        Self {
            id: SubscriberId::new(),
            registry: Weak::new(),
            released: AtomicBool::new(true),
        }
    }

    /// ID of the registration this handle controls.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether this handle still holds a live registration.
    pub fn is_active(&self) -> bool {
        !self.released.load(Ordering::SeqCst) && self.registry.strong_count() > 0
    }

    /// Remove the registration. Calling this again does nothing.
    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            if registry.remove(self.id) {
                debug!(subscriber = ?self.id, "unsubscribed");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    fn counter() -> (Arc<AtomicI32>, Callback) {
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        let callback: Callback = Arc::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn notifies_in_registration_order() {
        let registry = SubscriberRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut subs = Vec::new();
        for tag in 0..3 {
            let order = order.clone();
            subs.push(registry.add(Arc::new(move || order.lock().push(tag))));
        }

        assert_eq!(registry.notify_all(), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn same_callback_registered_twice_is_removed_once() {
        let registry = SubscriberRegistry::new();
        let (count, callback) = counter();

        let first = registry.add(callback.clone());
        let _second = registry.add(callback);

        first.unsubscribe();
        assert_eq!(registry.len(), 1);

        registry.notify_all();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn double_unsubscribe_is_noop() {
        let registry = SubscriberRegistry::new();
        let (_count, callback) = counter();
        let sub = registry.add(callback);
        let (_other_count, other) = counter();
        let _other = registry.add(other);

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert_eq!(registry.len(), 1);
        assert!(!registry.remove(sub.id()));
    }

    #[test]
    fn drop_unsubscribes() {
        let registry = SubscriberRegistry::new();
        let (count, callback) = counter();
        {
            let _sub = registry.add(callback);
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
        registry.notify_all();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn removal_during_fanout_skips_pending_entry() {
        let registry = SubscriberRegistry::new();
        let (count, callback) = counter();

        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let victim_clone = victim.clone();
        let _remover = registry.add(Arc::new(move || {
            if let Some(sub) = victim_clone.lock().take() {
                sub.unsubscribe();
            }
        }));
        *victim.lock() = Some(registry.add(callback));
        let (tail_count, tail) = counter();
        let _tail = registry.add(tail);

        assert_eq!(registry.notify_all(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(tail_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn addition_during_fanout_waits_for_next_round() {
        let registry = SubscriberRegistry::new();
        let (count, callback) = counter();

        let added: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));
        let added_clone = added.clone();
        let registry_clone = registry.clone();
        let _adder = registry.add(Arc::new(move || {
            let mut added = added_clone.lock();
            if added.is_empty() {
                added.push(registry_clone.add(callback.clone()));
            }
        }));

        registry.notify_all();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        registry.notify_all();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn detached_subscription_is_inert() {
        let sub = Subscription::detached();
        assert!(!sub.is_active());
        sub.unsubscribe();
    }
}
