//! Versioned Cell
//!
//! The cell is the storage half of a publisher: the current value plus a
//! counter that moves forward by exactly one on every replacement.
//!
//! # Versions
//!
//! A fresh cell sits at [`Version::UNSET`]. The first replacement yields
//! version 0, the next 1, and so on. Values are never compared: storing the
//! same value twice still produces two versions.

use std::fmt;

/// Monotonic version tag of a published value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(i64);

impl Version {
    /// Version of a cell that has never been published to.
    pub const UNSET: Version = Version(-1);

    /// Wrap a raw counter value.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// The raw counter value.
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Whether this version comes from an actual publish.
    pub const fn is_set(self) -> bool {
        self.0 != Self::UNSET.0
    }

    /// The version that follows this one.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::UNSET
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_set() {
            write!(f, "v{}", self.0)
        } else {
            f.write_str("unset")
        }
    }
}

/// A `(version, value)` snapshot read from a source in one step.
#[derive(Debug, Clone, PartialEq)]
pub struct Meta<T> {
    pub version: Version,
    pub value: T,
}

/// The current value of a publisher together with its version.
#[derive(Debug)]
pub struct VersionedCell<T> {
    value: T,
    version: Version,
}

impl<T> VersionedCell<T> {
    /// Create a cell holding `value` at [`Version::UNSET`].
    pub fn new(value: T) -> Self {
        Self {
            value,
            version: Version::UNSET,
        }
    }

    /// Replace the stored value and advance the version by one.
    ///
    /// Returns the new version.
    pub fn replace(&mut self, value: T) -> Version {
        self.value = value;
        self.version = self.version.next();
        self.version
    }

    /// Version of the held value.
    pub fn version(&self) -> Version {
        self.version
    }

    /// The held value.
    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T: Clone> VersionedCell<T> {
    /// Snapshot the current `(version, value)` pair.
    pub fn meta(&self) -> Meta<T> {
        Meta {
            version: self.version,
            value: self.value.clone(),
        }
    }
}
