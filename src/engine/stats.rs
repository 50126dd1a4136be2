//! Engine counters, shared between the coalescer task and the HTTP surface.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::flusher::FlushReport;

/// Running totals since startup
#[derive(Debug, Default)]
pub struct EngineStats {
    received: AtomicU64,
    rejected: AtomicU64,
    pending: AtomicU64,
    cycles: AtomicU64,
    aborted_cycles: AtomicU64,
    persisted: AtomicU64,
    skipped: AtomicU64,
    lost: AtomicU64,
    last_cycle_ms: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Notifications accepted into the queue
    pub received: u64,
    /// Notifications dropped because the queue stayed full or the engine stopped
    pub rejected: u64,
    /// Distinct keys waiting for the next cycle
    pub pending: u64,
    pub cycles: u64,
    pub aborted_cycles: u64,
    pub persisted: u64,
    pub skipped: u64,
    /// Keys abandoned by aborted cycles
    pub lost: u64,
    pub last_cycle_ms: u64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self, count: u64) {
        self.rejected.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn set_pending(&self, pending: usize) {
        self.pending.store(pending as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_cycle(&self, report: &FlushReport) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        if report.aborted {
            self.aborted_cycles.fetch_add(1, Ordering::Relaxed);
        }
        self.persisted
            .fetch_add(report.persisted as u64, Ordering::Relaxed);
        self.skipped.fetch_add(report.skipped() as u64, Ordering::Relaxed);
        self.lost.fetch_add(report.lost as u64, Ordering::Relaxed);
        self.last_cycle_ms
            .store(report.duration_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            aborted_cycles: self.aborted_cycles.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            last_cycle_ms: self.last_cycle_ms.load(Ordering::Relaxed),
        }
    }
}
