//! Atomic counters for runtime observability.
//!
//! All counters use relaxed ordering: they are advisory/diagnostic,
//! not synchronization primitives.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global detector counters.
pub struct RtsanMetrics {
    /// Contexts allocated by per-thread storage.
    pub contexts_created: AtomicU64,
    /// Contexts released by the thread-exit destructor.
    pub contexts_released: AtomicU64,
    /// Checks made inside a real-time region but suppressed by a bypass.
    pub bypassed_checks: AtomicU64,
    /// Violations reported.
    pub violations: AtomicU64,
    /// Pops issued at depth zero.
    pub unbalanced_pops: AtomicU64,
}

impl RtsanMetrics {
    /// Create a new zeroed metrics instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            contexts_created: AtomicU64::new(0),
            contexts_released: AtomicU64::new(0),
            bypassed_checks: AtomicU64::new(0),
            violations: AtomicU64::new(0),
            unbalanced_pops: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    #[inline]
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a counter value.
    #[inline]
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_unbalanced_pops(&self) {
        Self::inc(&self.unbalanced_pops);
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            contexts_created: Self::get(&self.contexts_created),
            contexts_released: Self::get(&self.contexts_released),
            bypassed_checks: Self::get(&self.bypassed_checks),
            violations: Self::get(&self.violations),
            unbalanced_pops: Self::get(&self.unbalanced_pops),
        }
    }
}

impl Default for RtsanMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of all counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub contexts_created: u64,
    pub contexts_released: u64,
    pub bypassed_checks: u64,
    pub violations: u64,
    pub unbalanced_pops: u64,
}

impl MetricsSnapshot {
    /// Contexts currently owned by live threads.
    #[must_use]
    pub fn live_contexts(&self) -> u64 {
        self.contexts_created.saturating_sub(self.contexts_released)
    }
}

static GLOBAL_METRICS: RtsanMetrics = RtsanMetrics::new();

/// Access the global metrics instance.
#[must_use]
pub fn global_metrics() -> &'static RtsanMetrics {
    &GLOBAL_METRICS
}
