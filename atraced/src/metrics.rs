//! Process-local counters for the daemon's own operation, independent of
//! anything tracked in the control region.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    pub events_streamed: AtomicU64,
    pub events_dropped: AtomicU64,
    pub run_sessions_started: AtomicU64,
    pub run_sessions_completed: AtomicU64,
    pub poll_cycles: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_streamed(&self, n: u64) {
        self.events_streamed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, n: u64) {
        self.events_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_poll_cycle(&self) {
        self.poll_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn start_run_session(&self) {
        self.run_sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn complete_run_session(&self) {
        self.run_sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_streamed: self.events_streamed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            run_sessions_started: self.run_sessions_started.load(Ordering::Relaxed),
            run_sessions_completed: self.run_sessions_completed.load(Ordering::Relaxed),
            poll_cycles: self.poll_cycles.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_streamed: u64,
    pub events_dropped: u64,
    pub run_sessions_started: u64,
    pub run_sessions_completed: u64,
    pub poll_cycles: u64,
}
