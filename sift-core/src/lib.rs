//! Sift Core
//!
//! Selective notification for shared values. A value changes once, and only
//! the observers whose derived interest actually changed are woken.
//!
//! - `reactive`: publishers, subscriber registries and observer gates
//! - `schedule`: coalescing of publishes into flushes
//! - `error`: error types for scheduling and configuration
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! use sift_core::reactive::{Fingerprint, ObserverGate, Publisher};
//!
//! #[derive(Clone)]
//! struct Doc {
//!     title: String,
//!     words: usize,
//! }
//!
//! let doc = Publisher::new(Doc { title: "draft".into(), words: 0 });
//!
//! let redraws = Arc::new(AtomicUsize::new(0));
//! let counter = redraws.clone();
//! let title_bar = ObserverGate::new(
//!     doc.clone(),
//!     |d: &Doc| Fingerprint::from([d.title.clone()]),
//!     move || {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!     },
//! );
//!
//! // Word count changes do not concern the title bar.
//! doc.update(|d| Doc { words: 10, ..d.clone() });
//! doc.flush().unwrap();
//! assert_eq!(redraws.load(Ordering::SeqCst), 0);
//!
//! // Publishes coalesce until the turn ends.
//! doc.update(|d| Doc { title: "final".into(), ..d.clone() });
//! doc.update(|d| Doc { words: 12, ..d.clone() });
//! assert_eq!(redraws.load(Ordering::SeqCst), 0);
//! doc.flush().unwrap();
//! assert_eq!(redraws.load(Ordering::SeqCst), 1);
//! assert_eq!(title_bar.value().title, "final");
//! ```

pub mod error;
pub mod reactive;
pub mod schedule;

pub use error::{Error, Result};
pub use reactive::{
    create_publisher, use_observer_gate, Detached, Fingerprint, Meta, Observer, ObserverGate,
    Publisher, Source, Subscription, Version,
};
pub use schedule::{FlushMode, FlushReport, Scheduler, SchedulerConfig};
