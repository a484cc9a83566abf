//! Store telemetry.
//!
//! [`StoreMetrics`] is handed to the store explicitly (usually behind an
//! `Arc`) so that several stores in one process never share hidden counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters incremented by every store operation.
#[derive(Debug, Default)]
pub struct StoreMetrics {
    connections_created: AtomicU64,
    connections_closed: AtomicU64,
    queries_executed: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_rolled_back: AtomicU64,
    errors: AtomicU64,
}

/// A point-in-time copy of [`StoreMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounters {
    /// Physical connections opened by the pool.
    pub connections_created: u64,
    /// Physical connections released by closing a pool.
    pub connections_closed: u64,
    /// Statements executed, including failed ones.
    pub queries_executed: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
    /// Transactions rolled back.
    pub transactions_rolled_back: u64,
    /// Failed statements, acquisitions and transactions.
    pub errors: u64,
}

impl StoreMetrics {
    /// Create a zeroed collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn connection_opened(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connections_released(&self, count: u64) {
        self.connections_closed.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn query(&self) {
        self.queries_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rollback(&self) {
        self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters.
    #[must_use]
    pub fn snapshot(&self) -> StoreCounters {
        StoreCounters {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_rolled_back: self.transactions_rolled_back.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter, returning the values held just before.
    pub fn reset(&self) -> StoreCounters {
        StoreCounters {
            connections_created: self.connections_created.swap(0, Ordering::Relaxed),
            connections_closed: self.connections_closed.swap(0, Ordering::Relaxed),
            queries_executed: self.queries_executed.swap(0, Ordering::Relaxed),
            transactions_committed: self.transactions_committed.swap(0, Ordering::Relaxed),
            transactions_rolled_back: self.transactions_rolled_back.swap(0, Ordering::Relaxed),
            errors: self.errors.swap(0, Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let metrics = StoreMetrics::new();
        metrics.query();
        metrics.query();
        metrics.commit();
        metrics.error();
        metrics.connections_released(3);

        let snap = metrics.snapshot();
        assert_eq!(snap.queries_executed, 2);
        assert_eq!(snap.transactions_committed, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.connections_closed, 3);
    }

    #[test]
    fn reset_returns_previous_values() {
        let metrics = StoreMetrics::new();
        metrics.rollback();
        metrics.connection_opened();

        let before = metrics.reset();
        assert_eq!(before.transactions_rolled_back, 1);
        assert_eq!(before.connections_created, 1);
        assert_eq!(metrics.snapshot(), StoreCounters::default());
    }
}
