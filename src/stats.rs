//! Statistics for queries sent to the upstream resolver.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic query counters, shared by every concurrent lookup of a run.
pub struct Stats {
    pub queries: AtomicU64,
    pub failures: AtomicU64,
    pub tcp_fallbacks: AtomicU64,
    /// Cumulative response time in microseconds for averaging.
    total_response_time_us: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            queries: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            tcp_fallbacks: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
        }
    }

    pub fn record_answered(&self, response_time_ms: f64) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us
            .fetch_add((response_time_ms * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn record_failed(&self, response_time_ms: f64) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us
            .fetch_add((response_time_ms * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn record_tcp_fallback(&self) {
        self.tcp_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let queries = self.queries.load(Ordering::Relaxed);
        let total_us = self.total_response_time_us.load(Ordering::Relaxed);

        let avg_response_ms = if queries > 0 {
            (total_us as f64 / queries as f64) / 1000.0
        } else {
            0.0
        };

        StatsSnapshot {
            queries,
            failures: self.failures.load(Ordering::Relaxed),
            tcp_fallbacks: self.tcp_fallbacks.load(Ordering::Relaxed),
            avg_response_ms,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub queries: u64,
    pub failures: u64,
    pub tcp_fallbacks: u64,
    pub avg_response_ms: f64,
}
