//! Flush Scheduler
//!
//! The scheduler decides when publishers notify their subscribers. Writes
//! and notifications are separated: `publish` only updates the cell and
//! commits the publisher to the pending queue; subscribers run later, in a
//! flush.
//!
//! # Algorithm
//!
//! 1. `publish` commits its publisher. A publisher is queued at most once,
//!    at the position of its first commit since the last flush.
//! 2. A flush takes the whole queue and flushes each publisher in order.
//!    A publisher whose version did not move since its previous flush stays
//!    silent.
//! 3. Publishes made by subscribers during step 2 land in a fresh queue and
//!    are drained by the next pass of the same flush.
//! 4. Passes are bounded by `SchedulerConfig::max_passes`.
//!
//! Because all writes of a batch settle before step 2, subscribers only ever
//! observe the final value of the batch.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use super::config::{FlushMode, SchedulerConfig};
use crate::error::{Error, Result};

/// Unique identifier for a publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublisherId(u64);

impl PublisherId {
    /// Generate a new unique publisher ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for PublisherId {
    fn default() -> Self {
        Self::new()
    }
}

/// Something the scheduler can flush.
pub(crate) trait Flush: Send + Sync {
    /// Notify subscribers if the version moved since the previous flush.
    ///
    /// Returns how many callbacks ran.
    fn flush(&self) -> usize;
}

/// Summary of one [`Scheduler::flush`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Drain passes run.
    pub passes: usize,
    /// Publishers flushed, counted once per pass.
    pub publishers: usize,
    /// Subscriber callbacks invoked.
    pub notified: usize,
}

impl FlushReport {
    /// Whether the flush found nothing to do.
    pub fn is_empty(&self) -> bool {
        self.passes == 0
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    pending: Mutex<IndexMap<PublisherId, Weak<dyn Flush>>>,
    batch_depth: AtomicUsize,
    flushing: AtomicBool,
    /// Failure of the last flush that nobody returned to a caller.
    last_error: Mutex<Option<Error>>,
}

/// Shared handle that coalesces publishes into flushes.
///
/// Inject one scheduler into every publisher that belongs to the same host
/// turn. Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Create a scheduler. A `max_passes` of zero is raised to one.
    pub fn new(mut config: SchedulerConfig) -> Self {
        config.max_passes = config.max_passes.max(1);
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                pending: Mutex::new(IndexMap::new()),
                batch_depth: AtomicUsize::new(0),
                flushing: AtomicBool::new(false),
                last_error: Mutex::new(None),
            }),
        }
    }

    /// Create a scheduler, rejecting invalid configuration.
    pub fn try_new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// A scheduler that only flushes on batch exit or explicit `flush`.
    pub fn deferred() -> Self {
        Self::new(SchedulerConfig::deferred())
    }

    /// A scheduler that flushes after every publish made outside a batch.
    pub fn immediate() -> Self {
        Self::new(SchedulerConfig::immediate())
    }

    /// The configuration this scheduler was built with.
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Whether a batch is open.
    pub fn in_batch(&self) -> bool {
        self.inner.batch_depth.load(Ordering::SeqCst) > 0
    }

    /// Whether a flush is running.
    pub fn is_flushing(&self) -> bool {
        self.inner.flushing.load(Ordering::SeqCst)
    }

    /// Number of publishers waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Run `f` as one synchronous turn.
    ///
    /// Publishes inside `f` are coalesced. Batches nest; the outermost one
    /// flushes when it returns.
    ///
    /// A failed flush is kept for [`Scheduler::take_error`]; use
    /// [`Scheduler::try_batch`] to receive it directly.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let result = self.run_batch(f);
        if !self.in_batch() {
            let flushed = self.flush();
            self.record(flushed);
        }
        result
    }

    /// Like [`Scheduler::batch`], but returns the flush failure of the
    /// outermost batch instead of storing it.
    pub fn try_batch<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let result = self.run_batch(f);
        if !self.in_batch() {
            self.flush()?;
        }
        Ok(result)
    }

    /// Take the failure of the last flush that ran on the scheduler's own
    /// initiative (an immediate-mode publish or a `batch` exit).
    pub fn take_error(&self) -> Option<Error> {
        self.inner.last_error.lock().take()
    }

    fn run_batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = BatchGuard::enter(&self.inner);
        f()
    }

    fn record(&self, flushed: Result<FlushReport>) {
        if let Err(err) = flushed {
            *self.inner.last_error.lock() = Some(err);
        }
    }

    /// Queue `source` for the next flush.
    pub(crate) fn commit(&self, id: PublisherId, source: Weak<dyn Flush>) {
        self.inner.pending.lock().entry(id).or_insert(source);
        trace!(publisher = ?id, "publisher committed");

        if self.inner.config.mode == FlushMode::Immediate && !self.in_batch() {
            let flushed = self.flush();
            self.record(flushed);
        }
    }

    /// Drain the pending queue, notifying subscribers.
    ///
    /// A flush started from inside a running flush returns an empty report;
    /// the running flush picks up whatever was queued.
    pub fn flush(&self) -> Result<FlushReport> {
        let Some(_guard) = FlushGuard::acquire(&self.inner) else {
            return Ok(FlushReport::default());
        };

        let mut report = FlushReport::default();
        loop {
            let pending = std::mem::take(&mut *self.inner.pending.lock());
            if pending.is_empty() {
                break;
            }

            if report.passes == self.inner.config.max_passes {
                let dropped = pending.len();
                error!(
                    passes = report.passes,
                    dropped, "flush did not settle, dropping pending publishers"
                );
                return Err(Error::FlushLimitExceeded {
                    passes: report.passes,
                    dropped,
                });
            }
            report.passes += 1;

            for (id, source) in pending {
                match source.upgrade() {
                    Some(source) => {
                        report.publishers += 1;
                        report.notified += source.flush();
                    }
                    None => trace!(publisher = ?id, "publisher dropped before flush"),
                }
            }
        }

        if !report.is_empty() {
            debug!(
                passes = report.passes,
                publishers = report.publishers,
                notified = report.notified,
                "flush complete"
            );
        }
        Ok(report)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .field("pending", &self.pending())
            .field("in_batch", &self.in_batch())
            .finish()
    }
}

/// Keeps the batch depth balanced even if the batch body panics.
struct BatchGuard<'a> {
    inner: &'a SchedulerInner,
}

impl<'a> BatchGuard<'a> {
    fn enter(inner: &'a SchedulerInner) -> Self {
        inner.batch_depth.fetch_add(1, Ordering::SeqCst);
        Self { inner }
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.inner.batch_depth.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FlushGuard<'a> {
    inner: &'a SchedulerInner,
}

impl<'a> FlushGuard<'a> {
    fn acquire(inner: &'a SchedulerInner) -> Option<Self> {
        inner
            .flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { inner })
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.inner.flushing.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flush target that counts its flushes and can re-commit itself.
    struct MockSource {
        id: PublisherId,
        flushes: AtomicUsize,
        recommit: AtomicUsize,
        scheduler: Scheduler,
        this: Mutex<Weak<MockSource>>,
    }

    impl MockSource {
        fn new(scheduler: &Scheduler, recommit: usize) -> Arc<Self> {
            let source = Arc::new(Self {
                id: PublisherId::new(),
                flushes: AtomicUsize::new(0),
                recommit: AtomicUsize::new(recommit),
                scheduler: scheduler.clone(),
                this: Mutex::new(Weak::new()),
            });
            *source.this.lock() = Arc::downgrade(&source);
            source
        }

        fn commit(&self) {
            let this: Weak<dyn Flush> = self.this.lock().clone();
            self.scheduler.commit(self.id, this);
        }

        fn flushes(&self) -> usize {
            self.flushes.load(Ordering::SeqCst)
        }
    }

    impl Flush for MockSource {
        fn flush(&self) -> usize {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            let remaining = self.recommit.load(Ordering::SeqCst);
            if remaining > 0 {
                self.recommit.store(remaining - 1, Ordering::SeqCst);
                self.commit();
            }
            1
        }
    }

    #[test]
    fn immediate_mode_flushes_on_commit() {
        let scheduler = Scheduler::immediate();
        let source = MockSource::new(&scheduler, 0);

        source.commit();
        assert_eq!(source.flushes(), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn default_scheduler_defers() {
        let scheduler = Scheduler::default();
        let source = MockSource::new(&scheduler, 0);

        source.commit();
        source.commit();
        assert_eq!(source.flushes(), 0);
        assert_eq!(scheduler.flush().unwrap().publishers, 1);
        assert_eq!(source.flushes(), 1);
    }

    #[test]
    fn deferred_mode_waits_for_flush() {
        let scheduler = Scheduler::deferred();
        let source = MockSource::new(&scheduler, 0);

        source.commit();
        source.commit();
        assert_eq!(source.flushes(), 0);
        assert_eq!(scheduler.pending(), 1);

        let report = scheduler.flush().unwrap();
        assert_eq!(source.flushes(), 1);
        assert_eq!(
            report,
            FlushReport {
                passes: 1,
                publishers: 1,
                notified: 1
            }
        );
    }

    #[test]
    fn batch_coalesces_commits() {
        let scheduler = Scheduler::default();
        let source = MockSource::new(&scheduler, 0);

        scheduler.batch(|| {
            source.commit();
            source.commit();
            assert!(scheduler.in_batch());
            assert_eq!(source.flushes(), 0);
        });

        assert!(!scheduler.in_batch());
        assert_eq!(source.flushes(), 1);
    }

    #[test]
    fn nested_batches_flush_once_at_root() {
        let scheduler = Scheduler::default();
        let source = MockSource::new(&scheduler, 0);

        scheduler.batch(|| {
            scheduler.batch(|| source.commit());
            assert_eq!(source.flushes(), 0);
            source.commit();
        });

        assert_eq!(source.flushes(), 1);
    }

    #[test]
    fn commits_during_flush_run_in_later_pass() {
        let scheduler = Scheduler::deferred();
        let source = MockSource::new(&scheduler, 2);

        source.commit();
        let report = scheduler.flush().unwrap();
        assert_eq!(source.flushes(), 3);
        assert_eq!(report.passes, 3);
    }

    #[test]
    fn runaway_flush_is_bounded() {
        let scheduler = Scheduler::new(SchedulerConfig {
            mode: FlushMode::Deferred,
            max_passes: 4,
        });
        let source = MockSource::new(&scheduler, usize::MAX);

        source.commit();
        let err = scheduler.flush().unwrap_err();
        assert!(matches!(
            err,
            Error::FlushLimitExceeded {
                passes: 4,
                dropped: 1
            }
        ));
        assert_eq!(scheduler.pending(), 0);
        assert!(!scheduler.is_flushing());
    }

    #[test]
    fn batch_keeps_flush_failure_for_the_host() {
        let scheduler = Scheduler::new(SchedulerConfig {
            mode: FlushMode::Deferred,
            max_passes: 2,
        });
        let source = MockSource::new(&scheduler, usize::MAX);

        let value = scheduler.batch(|| {
            source.commit();
            7
        });
        assert_eq!(value, 7);
        assert!(matches!(
            scheduler.take_error(),
            Some(Error::FlushLimitExceeded { passes: 2, .. })
        ));
        assert!(scheduler.take_error().is_none());
    }

    #[test]
    fn immediate_commit_keeps_flush_failure() {
        let scheduler = Scheduler::new(SchedulerConfig {
            mode: FlushMode::Immediate,
            max_passes: 3,
        });
        let source = MockSource::new(&scheduler, usize::MAX);

        source.commit();
        assert!(matches!(
            scheduler.take_error(),
            Some(Error::FlushLimitExceeded { passes: 3, dropped: 1 })
        ));
    }

    #[test]
    fn try_batch_returns_flush_failure() {
        let scheduler = Scheduler::new(SchedulerConfig {
            mode: FlushMode::Deferred,
            max_passes: 2,
        });
        let source = MockSource::new(&scheduler, usize::MAX);

        let err = scheduler.try_batch(|| source.commit()).unwrap_err();
        assert!(matches!(err, Error::FlushLimitExceeded { passes: 2, .. }));
        assert!(scheduler.take_error().is_none());

        let quiet = MockSource::new(&scheduler, 0);
        let value = scheduler.try_batch(|| {
            quiet.commit();
            1
        });
        assert_eq!(value.unwrap(), 1);
        assert_eq!(quiet.flushes(), 1);
    }

    #[test]
    fn dropped_sources_are_skipped() {
        let scheduler = Scheduler::deferred();
        let source = MockSource::new(&scheduler, 0);
        source.commit();
        drop(source);

        let report = scheduler.flush().unwrap();
        assert_eq!(report.publishers, 0);
    }

    #[test]
    fn publisher_order_follows_first_commit() {
        let scheduler = Scheduler::deferred();
        let first = MockSource::new(&scheduler, 0);
        let second = MockSource::new(&scheduler, 0);

        first.commit();
        second.commit();
        first.commit();

        let order: Vec<PublisherId> = scheduler.inner.pending.lock().keys().copied().collect();
        assert_eq!(order, vec![first.id, second.id]);
    }

    #[test]
    fn try_new_rejects_zero_passes() {
        let config = SchedulerConfig {
            mode: FlushMode::Immediate,
            max_passes: 0,
        };
        assert!(Scheduler::try_new(config.clone()).is_err());
        assert_eq!(Scheduler::new(config).config().max_passes, 1);
    }
}
