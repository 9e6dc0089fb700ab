//! Translation job metrics.
//!
//! Counters are owned by a scheduler instance and shared with its submitters,
//! so independent schedulers (and tests) never see each other's numbers.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Lifecycle counters for background translation jobs.
#[derive(Debug, Default)]
pub struct JobMetrics {
    /// Jobs accepted onto the queue
    submitted: AtomicUsize,

    /// Jobs rejected because the queue was full or closed
    dropped: AtomicUsize,

    /// Jobs picked up by a worker
    started: AtomicUsize,

    /// Jobs that stored a translation
    completed: AtomicUsize,

    /// Jobs whose task disappeared before or during execution
    skipped: AtomicUsize,

    /// Jobs that ended with a provider or store error
    failed: AtomicUsize,
}

impl JobMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    /// Snapshot of the counters.
    ///
    /// The success rate is taken over jobs that reached a terminal state,
    /// counting skipped jobs as successful.
    pub fn report(&self) -> MetricsReport {
        let completed = self.completed();
        let skipped = self.skipped();
        let failed = self.failed();
        let finished = completed + skipped + failed;
        let success_rate = if finished > 0 {
            ((completed + skipped) as f64 / finished as f64) * 100.0
        } else {
            0.0
        };

        MetricsReport {
            submitted: self.submitted(),
            dropped: self.dropped(),
            started: self.started(),
            completed,
            skipped,
            failed,
            success_rate,
        }
    }
}

/// Point-in-time view of [`JobMetrics`], served by the admin endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub submitted: usize,
    pub dropped: usize,
    pub started: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,

    /// Percentage (0-100) of finished jobs that did not fail
    pub success_rate: f64,
}
