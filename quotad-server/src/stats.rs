//! # Server Statistics
//!
//! Provide lightweight counters shared by the supervisor and its workers.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Use atomic counters to aggregate events cheaply.
//! 2. **No Shared Mutation Without Sync**: Workers only touch atomics.
//! 3. **Zero-Cost Access**: Expose snapshots as plain structs without heap work.
//!
//! ## Notes
//! - `peak_inflight` is what the concurrency bound is checked against.

use std::sync::atomic::{AtomicU64, Ordering};

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A numeric answer was sent.
    Answered,
    /// The refusal sentinel was sent.
    Refused,
    /// The connection was closed without a response.
    Dropped,
}

/// Snapshot of all server counters at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Total number of connections admitted to a worker.
    pub connections_total: u64,
    /// Connections answered with a number.
    pub answered_total: u64,
    /// Connections answered with the refusal sentinel.
    pub refused_total: u64,
    /// Connections closed without a response.
    pub dropped_total: u64,
    /// Workers currently running.
    pub inflight: u64,
    /// Highest number of workers observed running at once.
    pub peak_inflight: u64,
}

/// Thread-safe counters for the server.
///
/// `Ordering::Relaxed` is sufficient for the totals; `inflight` and the peak
/// are updated with read-modify-write operations so the peak never misses a
/// concurrent increment.
#[derive(Debug, Default)]
pub struct ServerStats {
    connections_total: AtomicU64,
    answered_total: AtomicU64,
    refused_total: AtomicU64,
    dropped_total: AtomicU64,
    inflight: AtomicU64,
    peak_inflight: AtomicU64,
}

impl ServerStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a worker starting on a connection.
    pub fn record_start(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        let now = self.inflight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_inflight.fetch_max(now, Ordering::AcqRel);
    }

    /// Records a worker finishing with the given outcome.
    pub fn record_end(&self, disposition: Disposition) {
        let counter = match disposition {
            Disposition::Answered => &self.answered_total,
            Disposition::Refused => &self.refused_total,
            Disposition::Dropped => &self.dropped_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.inflight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            answered_total: self.answered_total.load(Ordering::Relaxed),
            refused_total: self.refused_total.load(Ordering::Relaxed),
            dropped_total: self.dropped_total.load(Ordering::Relaxed),
            inflight: self.inflight.load(Ordering::Acquire),
            peak_inflight: self.peak_inflight.load(Ordering::Acquire),
        }
    }
}
