//! Health check logic

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Tracks whether the delivery pipeline can take traffic
///
/// The queue flag is raised once by the controller after the queue has been
/// restored from the spool. Scheduler state and queue size are refreshed from
/// the live service by the readiness probe itself.
#[derive(Debug)]
pub struct HealthChecker {
    /// Whether the queue has been restored from durable storage
    queue_ready: AtomicBool,

    /// Whether the scheduler loop is running
    scheduler_ready: AtomicBool,

    /// Current number of items in the queue
    queue_size: AtomicU64,

    /// Maximum queue size threshold for readiness
    max_queue_size: u64,
}

impl HealthChecker {
    #[must_use]
    pub const fn new(max_queue_size: u64) -> Self {
        Self {
            queue_ready: AtomicBool::new(false),
            scheduler_ready: AtomicBool::new(false),
            queue_size: AtomicU64::new(0),
            max_queue_size,
        }
    }

    /// Mark the queue as restored
    pub fn set_queue_ready(&self, ready: bool) {
        self.queue_ready.store(ready, Ordering::Relaxed);
        tracing::debug!(ready, "Queue readiness updated");
    }

    pub fn set_scheduler_ready(&self, ready: bool) {
        self.scheduler_ready.store(ready, Ordering::Relaxed);
    }

    pub fn set_queue_size(&self, size: u64) {
        self.queue_size.store(size, Ordering::Relaxed);
    }

    /// Answering at all is proof of life
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        true
    }

    /// True when the queue is restored, the scheduler runs and the queue is below its threshold
    #[must_use]
    pub fn is_ready(&self) -> bool {
        let queue_ok = self.queue_ready.load(Ordering::Relaxed);
        let scheduler_ok = self.scheduler_ready.load(Ordering::Relaxed);
        let current_queue = self.queue_size.load(Ordering::Relaxed);
        let size_ok = current_queue < self.max_queue_size;

        let ready = queue_ok && scheduler_ok && size_ok;

        if !ready {
            tracing::debug!(
                queue_ready = queue_ok,
                scheduler_ready = scheduler_ok,
                queue_size = current_queue,
                max_queue_size = self.max_queue_size,
                "Readiness check failed"
            );
        }

        ready
    }

    #[must_use]
    pub fn get_status(&self) -> HealthStatus {
        HealthStatus {
            alive: self.is_alive(),
            ready: self.is_ready(),
            queue_ready: self.queue_ready.load(Ordering::Relaxed),
            scheduler_ready: self.scheduler_ready.load(Ordering::Relaxed),
            queue_size: self.queue_size.load(Ordering::Relaxed),
            max_queue_size: self.max_queue_size,
        }
    }
}

/// Detailed health status, returned by a failing readiness probe
#[derive(Debug, Clone, serde::Serialize)]
#[allow(
    clippy::struct_excessive_bools,
    reason = "Each flag is reported separately to probes"
)]
pub struct HealthStatus {
    pub alive: bool,
    pub ready: bool,
    pub queue_ready: bool,
    pub scheduler_ready: bool,
    pub queue_size: u64,
    pub max_queue_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_requires_every_component() {
        let checker = HealthChecker::new(100);
        assert!(checker.is_alive());
        assert!(!checker.is_ready());

        checker.set_queue_ready(true);
        assert!(!checker.is_ready());

        checker.set_scheduler_ready(true);
        assert!(checker.is_ready());

        checker.set_queue_size(100);
        assert!(!checker.is_ready());

        let status = checker.get_status();
        assert!(status.queue_ready && status.scheduler_ready && !status.ready);
        assert_eq!(status.queue_size, 100);
    }
}
