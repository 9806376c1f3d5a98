//! Metric collection for the hostprobe agent.
//!
//! Each [`Collector`] implementation samples one kind of host state (CPU,
//! memory, disks, services, sessions, login failures, listening ports,
//! static system info) and returns it as a vector of [`Sample`]s. The
//! [`scheduler`] module drives each enabled collector on its own interval.

pub mod cpu;
pub mod disk;
pub mod login;
pub mod memory;
pub mod port;
pub mod scheduler;
pub mod service;
pub mod system_info;
pub mod users;

use anyhow::Result;
use hostprobe_common::types::Sample;

/// A host metric collector.
///
/// Every collector instance is owned by exactly one scheduler task, so
/// implementations may keep mutable state between polls (previous counters,
/// file offsets).
pub trait Collector: Send {
    /// Collector name (e.g. `"cpu"`, `"disk"`), used for logging.
    fn name(&self) -> &str;

    /// Takes one sample of the current host state.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system facility is unavailable.
    fn collect(&mut self) -> Result<Vec<Sample>>;
}

pub(crate) fn percent(part: u64, total: u64) -> f64 {
    if total > 0 {
        (part as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::percent;

    #[test]
    fn percent_of_zero_total_is_zero() {
        assert_eq!(percent(5, 0), 0.0);
        assert_eq!(percent(25, 100), 25.0);
    }
}
