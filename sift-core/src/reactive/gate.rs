//! Observer Gate
//!
//! A gate sits between a [`Source`] and one observer. The source notifies
//! every subscriber on every flush; the gate filters those notifications down
//! to the ones that matter to its observer.
//!
//! # Decision Rule
//!
//! The observer supplies a fingerprint function: a pure function from the
//! value to the few keys it depends on. On each notification the gate:
//!
//! 1. reads the current `(version, value)` from the source,
//! 2. derives the new fingerprint,
//! 3. compares it positionally with the previous one (a length change counts
//!    as a change),
//! 4. checks whether the version moved,
//! 5. records the new version and fingerprint, whatever the outcome,
//! 6. runs the react callback only if both the version and the fingerprint
//!    changed.
//!
//! Keys are compared with `PartialEq`, so a key that is not equal to itself
//! (a float NaN) always reads as changed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use tracing::trace;

use super::publisher::Source;
use super::subscriber::Subscription;
use super::version::{Meta, Version};

/// Positionally compared summary of the parts of a value an observer uses.
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint<K>(SmallVec<[K; 4]>);

impl<K> Fingerprint<K> {
    /// An empty fingerprint.
    pub fn new() -> Self {
        Self(SmallVec::new())
    }

    /// Append a key.
    pub fn push(&mut self, key: K) {
        self.0.push(key);
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no keys.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The keys in order.
    pub fn as_slice(&self) -> &[K] {
        &self.0
    }

    /// Iterate over the keys in order.
    pub fn iter(&self) -> std::slice::Iter<'_, K> {
        self.0.iter()
    }
}

impl<K: PartialEq> Fingerprint<K> {
    /// Whether `self` differs from `previous` in length or at any position.
    pub fn differs_from(&self, previous: &Self) -> bool {
        self.len() != previous.len()
            || self
                .iter()
                .zip(previous.iter())
                .any(|(current, previous)| current != previous)
    }
}

impl<K> Default for Fingerprint<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> From<Vec<K>> for Fingerprint<K> {
    fn from(keys: Vec<K>) -> Self {
        Self(SmallVec::from_vec(keys))
    }
}

impl<K, const N: usize> From<[K; N]> for Fingerprint<K> {
    fn from(keys: [K; N]) -> Self {
        keys.into_iter().collect()
    }
}

impl<K> FromIterator<K> for Fingerprint<K> {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<K> Extend<K> for Fingerprint<K> {
    fn extend<I: IntoIterator<Item = K>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl<'a, K> IntoIterator for &'a Fingerprint<K> {
    type Item = &'a K;
    type IntoIter = std::slice::Iter<'a, K>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

type DeriveFn<T, K> = Arc<dyn Fn(&T) -> Fingerprint<K> + Send + Sync>;
type ReactFn = Arc<dyn Fn() + Send + Sync>;

struct GateState<K> {
    last_version: Version,
    last_fingerprint: Fingerprint<K>,
}

struct GateShared<T, K> {
    source: Arc<dyn Source<T>>,
    derive: RwLock<DeriveFn<T, K>>,
    react: RwLock<ReactFn>,
    state: Mutex<GateState<K>>,
    reactions: AtomicU64,
}

impl<T, K> GateShared<T, K>
where
    K: PartialEq,
{
    /// Apply the decision rule to the current source state.
    ///
    /// Returns whether the observer was told to react.
    fn on_notify(&self) -> bool {
        let Meta { version, value } = self.source.meta();
        let derive = self.derive.read().clone();
        let fingerprint = derive(&value);

        let (version_changed, fingerprint_changed) = {
            let mut state = self.state.lock();
            let fingerprint_changed = fingerprint.differs_from(&state.last_fingerprint);
            let version_changed = version != state.last_version;
            state.last_version = version;
            state.last_fingerprint = fingerprint;
            (version_changed, fingerprint_changed)
        };

        let should_react = version_changed && fingerprint_changed;
        trace!(
            %version,
            version_changed,
            fingerprint_changed,
            should_react,
            "gate decision"
        );

        if should_react {
            self.reactions.fetch_add(1, Ordering::SeqCst);
            let react = self.react.read().clone();
            react();
        }
        should_react
    }

    /// Record the current source state without deciding anything.
    fn resync(&self) -> Meta<T> {
        let meta = self.source.meta();
        let derive = self.derive.read().clone();
        let fingerprint = derive(&meta.value);

        let mut state = self.state.lock();
        state.last_version = meta.version;
        state.last_fingerprint = fingerprint;
        meta
    }
}

/// Per-observer filter that turns source notifications into reactions.
///
/// The gate owns exactly one subscription to its source. Closing or dropping
/// the gate releases it; releasing twice does nothing.
pub struct ObserverGate<T, K> {
    shared: Arc<GateShared<T, K>>,
    subscription: Subscription,
}

impl<T, K> ObserverGate<T, K>
where
    T: 'static,
    K: PartialEq + Send + Sync + 'static,
{
    /// Create a gate on `source`.
    ///
    /// The initial version and fingerprint are captured before subscribing.
    pub fn new<S, D, R>(source: S, derive: D, react: R) -> Self
    where
        S: Source<T> + 'static,
        D: Fn(&T) -> Fingerprint<K> + Send + Sync + 'static,
        R: Fn() + Send + Sync + 'static,
    {
        let source: Arc<dyn Source<T>> = Arc::new(source);
        let derive: DeriveFn<T, K> = Arc::new(derive);

        let Meta { version, value } = source.meta();
        let last_fingerprint = derive(&value);

        let shared = Arc::new(GateShared {
            source: Arc::clone(&source),
            derive: RwLock::new(derive),
            react: RwLock::new(Arc::new(react)),
            state: Mutex::new(GateState {
                last_version: version,
                last_fingerprint,
            }),
            reactions: AtomicU64::new(0),
        });

        // The registry only holds a weak reference, so the source and the
        // gate do not keep each other alive.
        let weak = Arc::downgrade(&shared);
        let subscription = source.subscribe_callback(Arc::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.on_notify();
            }
        }));

        Self {
            shared,
            subscription,
        }
    }

    /// The freshest value of the source, whether or not the gate reacted to it.
    pub fn value(&self) -> T {
        self.shared.source.meta().value
    }

    /// The source's current `(version, value)` pair.
    pub fn meta(&self) -> Meta<T> {
        self.shared.source.meta()
    }

    /// Version recorded by the last notification or resync.
    pub fn last_version(&self) -> Version {
        self.shared.state.lock().last_version
    }

    /// Fingerprint recorded by the last notification or resync.
    pub fn last_fingerprint(&self) -> Fingerprint<K>
    where
        K: Clone,
    {
        self.shared.state.lock().last_fingerprint.clone()
    }

    /// How many times the react callback has run.
    pub fn reactions(&self) -> u64 {
        self.shared.reactions.load(Ordering::SeqCst)
    }

    /// Swap in a new fingerprint function for future notifications.
    pub fn set_derive<D>(&self, derive: D)
    where
        D: Fn(&T) -> Fingerprint<K> + Send + Sync + 'static,
    {
        *self.shared.derive.write() = Arc::new(derive);
    }

    /// Swap in a new react callback.
    pub fn set_react<R>(&self, react: R)
    where
        R: Fn() + Send + Sync + 'static,
    {
        *self.shared.react.write() = Arc::new(react);
    }

    /// Record the source's current version and fingerprint as seen.
    ///
    /// Used when the observer has just re-run on its own: it has already
    /// consumed the current value and must not be forced to react to it.
    pub fn resync(&self) -> Meta<T> {
        self.shared.resync()
    }

    /// Run the decision rule now, as if the source had notified.
    pub fn check(&self) -> bool {
        self.shared.on_notify()
    }

    /// Whether the gate still receives notifications.
    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_active()
    }

    /// Release the subscription. Later calls do nothing.
    pub fn close(&self) {
        if self.subscription.is_active() {
            trace!(subscriber = ?self.subscription.id(), "closing observer gate");
        }
        self.subscription.unsubscribe();
    }
}

impl<T, K> std::fmt::Debug for ObserverGate<T, K>
where
    K: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ObserverGate")
            .field("last_version", &state.last_version)
            .field("last_fingerprint", &state.last_fingerprint)
            .field("reactions", &self.shared.reactions.load(Ordering::SeqCst))
            .field("subscription", &self.subscription)
            .finish()
    }
}
