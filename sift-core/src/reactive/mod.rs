//! Selective Notification
//!
//! This module implements the publish/observe protocol: one versioned value,
//! many observers, and a per-observer gate that decides which changes are
//! worth reacting to.
//!
//! # Concepts
//!
//! ## Publishers
//!
//! A Publisher holds the current value and a version that moves forward by
//! one on every publish. It is the only writer. When its scheduler flushes,
//! it notifies every subscriber once, however many publishes the flush
//! covers.
//!
//! ## Fingerprints
//!
//! A Fingerprint is the short list of keys an observer derives from the value:
//! the parts it actually depends on. Two fingerprints are equal when they
//! have the same length and equal keys at every position.
//!
//! ## Gates
//!
//! An ObserverGate subscribes on behalf of one observer. On each notification
//! it re-derives the fingerprint and tells the observer to react only when
//! both the version and the fingerprint moved.
//!
//! # Implementation Notes
//!
//! Sources are passed to observers explicitly; there is no ambient lookup.
//! Subscriber callbacks run without any lock held, so they can publish,
//! subscribe and unsubscribe while being notified.

mod gate;
mod observer;
mod publisher;
mod subscriber;
mod version;

pub use gate::{Fingerprint, ObserverGate};
pub use observer::{use_observer_gate, Observer};
pub use publisher::{create_publisher, Detached, Publisher, Source};
pub use subscriber::{Callback, SubscriberId, SubscriberRegistry, Subscription};
pub use version::{Meta, Version, VersionedCell};
