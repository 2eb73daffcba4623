//! Error types for the scheduling and configuration layer.
//!
//! The gating core itself never fails: unsubscribing twice, fingerprint
//! arity changes and detached sources are all handled locally. Errors only
//! surface where the host has to act on them.

use thiserror::Error;

/// Errors reported by `sift_core`.
#[derive(Debug, Error)]
pub enum Error {
    /// Subscriber callbacks kept publishing and the flush never settled.
    #[error("flush did not settle after {passes} passes ({dropped} publishers dropped)")]
    FlushLimitExceeded {
        /// Passes run before giving up.
        passes: usize,
        /// Pending publishers discarded when the limit was hit.
        dropped: usize,
    },

    /// A configuration value is out of range.
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    /// A configuration document could not be parsed.
    #[error("failed to parse scheduler configuration")]
    ConfigParse(#[from] serde_json::Error),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
