//! Flush Scheduling
//!
//! Publishers never call their subscribers directly. They commit to a
//! [`Scheduler`], which turns any number of publishes made during one host
//! turn into a single flush per publisher.
//!
//! The scheduler is passed to publishers explicitly. Publishers that share a
//! scheduler share its batches; publishers on different schedulers flush
//! independently.

mod config;
mod scheduler;

pub use config::{FlushMode, SchedulerConfig};
pub(crate) use scheduler::Flush;
pub use scheduler::{FlushReport, PublisherId, Scheduler};
