//! Observer entry point.
//!
//! [`Observer`] is the storage an observer keeps between its runs. The first
//! call to [`use_observer_gate`] builds the observer's [`ObserverGate`]; every
//! later call reuses it, refreshes its callbacks and returns the current
//! value.
//!
//! The host owns the `Observer` and passes the source in explicitly on every
//! run. Dropping the `Observer` (or calling [`Observer::teardown`]) releases
//! the subscription.

use super::gate::{Fingerprint, ObserverGate};
use super::publisher::Source;

/// Per-observer slot holding at most one gate.
pub struct Observer<T, K> {
    gate: Option<ObserverGate<T, K>>,
}

impl<T, K> Observer<T, K>
where
    T: 'static,
    K: PartialEq + Send + Sync + 'static,
{
    /// An empty slot; the first observation mounts a gate.
    pub fn new() -> Self {
        Self { gate: None }
    }

    /// Run one observation. See [`use_observer_gate`].
    pub fn observe<S, D, R>(&mut self, source: &S, derive: D, force_update: R) -> T
    where
        S: Source<T> + Clone + 'static,
        D: Fn(&T) -> Fingerprint<K> + Send + Sync + 'static,
        R: Fn() + Send + Sync + 'static,
    {
        match &self.gate {
            Some(gate) => {
                gate.set_derive(derive);
                gate.set_react(force_update);
                gate.resync().value
            }
            None => {
                let gate = ObserverGate::new(source.clone(), derive, force_update);
                let value = gate.value();
                self.gate = Some(gate);
                value
            }
        }
    }

    /// The mounted gate, if any.
    pub fn gate(&self) -> Option<&ObserverGate<T, K>> {
        self.gate.as_ref()
    }

    /// Whether a gate has been built and not torn down.
    pub fn is_mounted(&self) -> bool {
        self.gate.is_some()
    }

    /// Release the gate and its subscription.
    ///
    /// Returns `false` if there was nothing to release.
    pub fn teardown(&mut self) -> bool {
        match self.gate.take() {
            Some(gate) => {
                gate.close();
                true
            }
            None => false,
        }
    }
}

impl<T, K> Default for Observer<T, K>
where
    T: 'static,
    K: PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, K> std::fmt::Debug for Observer<T, K>
where
    K: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer").field("gate", &self.gate).finish()
    }
}

/// Observe `source` through the gate stored in `observer`.
///
/// On the first call this builds the gate, subscribing once. Later calls
/// replace the fingerprint function and `force_update` with the ones given,
/// record the current version and fingerprint as already seen, and keep the
/// original subscription; `source` is only consulted on the first call.
///
/// Always returns the freshest value of the source. `force_update` runs
/// whenever a flush moves both the version and the fingerprint.
pub fn use_observer_gate<T, K, S, D, R>(
    observer: &mut Observer<T, K>,
    source: &S,
    derive: D,
    force_update: R,
) -> T
where
    T: 'static,
    K: PartialEq + Send + Sync + 'static,
    S: Source<T> + Clone + 'static,
    D: Fn(&T) -> Fingerprint<K> + Send + Sync + 'static,
    R: Fn() + Send + Sync + 'static,
{
    observer.observe(source, derive, force_update)
}
