//! Scheduler configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// When publishes made outside a batch are flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Flush as soon as the publish returns.
    Immediate,
    /// Wait for the host to call `Scheduler::flush` at the end of its turn.
    #[default]
    Deferred,
}

/// Tunables for a [`Scheduler`](super::Scheduler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Defaults to [`FlushMode::Deferred`], so publishes coalesce until the
    /// host ends its turn.
    pub mode: FlushMode,

    /// Upper bound on drain passes in one flush. Each pass handles the
    /// publishes made by subscribers during the previous one.
    pub max_passes: usize,
}

impl SchedulerConfig {
    /// Pass limit used when the configuration does not set one.
    pub const DEFAULT_MAX_PASSES: usize = 64;

    /// Parse and validate a JSON document.
    ///
    /// Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.max_passes == 0 {
            return Err(Error::InvalidConfig(
                "max_passes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Default configuration with deferred flushing.
    pub fn deferred() -> Self {
        Self {
            mode: FlushMode::Deferred,
            ..Self::default()
        }
    }

    /// Opt into flushing after every publish made outside a batch.
    pub fn immediate() -> Self {
        Self {
            mode: FlushMode::Immediate,
            ..Self::default()
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mode: FlushMode::Deferred,
            max_passes: Self::DEFAULT_MAX_PASSES,
        }
    }
}
