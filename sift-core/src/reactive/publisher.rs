//! Publisher Implementation
//!
//! A Publisher is the single writer of a shared value. It pairs a
//! [`VersionedCell`] with a [`SubscriberRegistry`] and hands notification
//! timing to a [`Scheduler`].
//!
//! # How Publishers Work
//!
//! 1. `publish` replaces the value and bumps the version under a write lock.
//!
//! 2. The publisher commits itself to its scheduler. Nothing is notified yet.
//!
//! 3. When the scheduler flushes, the publisher compares its version with the
//!    one seen at its previous flush and, if it moved, calls every subscriber
//!    once. Subscribers read the value themselves through [`Source::meta`].
//!
//! # Sources
//!
//! Observers do not depend on `Publisher` directly but on the [`Source`]
//! trait. [`Detached`] is the fallback source for observers that were wired
//! up without a real publisher.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{trace, warn};

use super::subscriber::{Callback, SubscriberRegistry, Subscription};
use super::version::{Meta, Version, VersionedCell};
use crate::error::Result;
use crate::schedule::{Flush, FlushReport, PublisherId, Scheduler};

/// Read side of a shared value, as seen by observers.
pub trait Source<T>: Send + Sync {
    /// Register `callback` to run on every flush that follows a change.
    fn subscribe_callback(&self, callback: Callback) -> Subscription;

    /// The current `(version, value)` pair.
    fn meta(&self) -> Meta<T>;
}

struct PublisherInner<T> {
    id: PublisherId,
    cell: RwLock<VersionedCell<T>>,
    registry: SubscriberRegistry,
    /// Version seen by the previous flush.
    flushed: Mutex<Version>,
}

impl<T> Flush for PublisherInner<T>
where
    T: Send + Sync + 'static,
{
    fn flush(&self) -> usize {
        let version = self.cell.read().version();
        {
            let mut flushed = self.flushed.lock();
            if *flushed == version {
                return 0;
            }
            *flushed = version;
        }

        trace!(publisher = ?self.id, %version, "notifying subscribers");
        self.registry.notify_all()
    }
}

/// Holder of a versioned value that notifies subscribers once per flush.
///
/// Cloning yields another handle to the same value, version and
/// subscribers.
///
/// # Example
///
/// ```rust
/// use sift_core::reactive::Publisher;
///
/// let publisher = Publisher::new(0);
/// let _sub = publisher.subscribe(|| println!("changed"));
///
/// publisher.publish(4);
/// publisher.publish(5);
/// publisher.flush().unwrap(); // prints "changed" once
/// assert_eq!(publisher.get(), 5);
/// ```
pub struct Publisher<T> {
    inner: Arc<PublisherInner<T>>,
    scheduler: Scheduler,
}

impl<T> Publisher<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a publisher with its own deferred scheduler.
    ///
    /// Publishes coalesce until [`Publisher::flush`] (or a flush of
    /// [`Publisher::scheduler`]) ends the turn. Use [`Scheduler::immediate`]
    /// with [`Scheduler::publisher`] to notify on every publish instead.
    pub fn new(initial: T) -> Self {
        Self::with_scheduler(&Scheduler::default(), initial)
    }

    /// Create a publisher that flushes through `scheduler`.
    pub fn with_scheduler(scheduler: &Scheduler, initial: T) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                id: PublisherId::new(),
                cell: RwLock::new(VersionedCell::new(initial)),
                registry: SubscriberRegistry::new(),
                flushed: Mutex::new(Version::UNSET),
            }),
            scheduler: scheduler.clone(),
        }
    }

    /// Key of this publisher in its scheduler's pending queue.
    pub fn id(&self) -> PublisherId {
        self.inner.id
    }

    /// The scheduler this publisher commits to.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// End the turn: flush this publisher's scheduler.
    ///
    /// Every publisher sharing the scheduler is flushed, not just this one.
    pub fn flush(&self) -> Result<FlushReport> {
        self.scheduler.flush()
    }

    /// Replace the value and schedule a flush.
    pub fn publish(&self, value: T) {
        let version = self.inner.cell.write().replace(value);
        trace!(publisher = ?self.inner.id, %version, "published");

        let source: Weak<dyn Flush> = Arc::downgrade(&self.inner) as Weak<dyn Flush>;
        self.scheduler.commit(self.inner.id, source);
    }

    /// Publish a value computed from the current one.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        // `f` runs unlocked so it may read this publisher.
        let current = self.get();
        self.publish(f(&current));
    }

    /// Register `callback`; dropping or releasing the handle removes it.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.registry.add(Arc::new(callback))
    }

    /// The current `(version, value)` pair.
    pub fn meta(&self) -> Meta<T> {
        self.inner.cell.read().meta()
    }

    /// Clone of the current value.
    pub fn get(&self) -> T {
        self.inner.cell.read().value().clone()
    }

    /// Version of the current value; [`Version::UNSET`] before any publish.
    pub fn version(&self) -> Version {
        self.inner.cell.read().version()
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.len()
    }
}

impl<T> Source<T> for Publisher<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn subscribe_callback(&self, callback: Callback) -> Subscription {
        self.inner.registry.add(callback)
    }

    fn meta(&self) -> Meta<T> {
        Publisher::meta(self)
    }
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Publisher<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cell = self.inner.cell.read();
        f.debug_struct("Publisher")
            .field("id", &self.inner.id)
            .field("version", &cell.version())
            .field("value", cell.value())
            .field("subscriber_count", &self.inner.registry.len())
            .finish()
    }
}

/// Create a publisher with its own deferred scheduler.
///
/// Same as [`Publisher::new`]: notifications wait for the host to flush.
pub fn create_publisher<T>(initial: T) -> Publisher<T>
where
    T: Clone + Send + Sync + 'static,
{
    Publisher::new(initial)
}

impl Scheduler {
    /// Create a publisher that flushes through this scheduler.
    pub fn publisher<T>(&self, initial: T) -> Publisher<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        Publisher::with_scheduler(self, initial)
    }
}

/// Fallback source for observers that were never connected to a publisher.
///
/// It serves a fixed value at a fixed version and never notifies. Each
/// subscription attempt logs a warning so the wiring mistake is visible.
#[derive(Debug, Clone)]
pub struct Detached<T> {
    value: T,
}

impl<T> Detached<T> {
    /// Version reported by every detached source.
    pub const VERSION: Version = Version::new(1);

    /// A detached source serving `value`.
    pub fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> Source<T> for Detached<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn subscribe_callback(&self, _callback: Callback) -> Subscription {
        warn!("observer subscribed to a detached source; no publisher was provided");
        Subscription::detached()
    }

    fn meta(&self) -> Meta<T> {
        Meta {
            version: Self::VERSION,
            value: self.value.clone(),
        }
    }
}
