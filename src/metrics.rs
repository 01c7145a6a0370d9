//! Store Metrics
//!
//! Counters for store lifecycle and eviction activity.

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector
#[derive(Debug, Default)]
pub struct StoreMetrics {
    stores_created: AtomicU64,
    stores_disposed: AtomicU64,
    entries_evicted: AtomicU64,
    eviction_passes: AtomicU64,
    failed_passes: AtomicU64,
    skipped_passes: AtomicU64,
}

impl StoreMetrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_store_created(&self) {
        self.stores_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_disposed(&self) {
        self.stores_disposed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed eviction pass
    pub fn record_pass(&self, removed: usize) {
        self.eviction_passes.fetch_add(1, Ordering::Relaxed);
        self.entries_evicted
            .fetch_add(removed as u64, Ordering::Relaxed);
    }

    pub fn record_failed_pass(&self) {
        self.failed_passes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a pass skipped because this node is not primary
    pub fn record_skipped_pass(&self) {
        self.skipped_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stores_created(&self) -> u64 {
        self.stores_created.load(Ordering::Relaxed)
    }

    pub fn stores_disposed(&self) -> u64 {
        self.stores_disposed.load(Ordering::Relaxed)
    }

    /// Live stores (created minus disposed)
    pub fn live_stores(&self) -> u64 {
        self.stores_created()
            .saturating_sub(self.stores_disposed())
    }

    pub fn entries_evicted(&self) -> u64 {
        self.entries_evicted.load(Ordering::Relaxed)
    }

    pub fn eviction_passes(&self) -> u64 {
        self.eviction_passes.load(Ordering::Relaxed)
    }

    pub fn failed_passes(&self) -> u64 {
        self.failed_passes.load(Ordering::Relaxed)
    }

    pub fn skipped_passes(&self) -> u64 {
        self.skipped_passes.load(Ordering::Relaxed)
    }

    /// Get a summary of metrics
    pub fn summary(&self) -> String {
        format!(
            "Stores: {} live | Eviction: passes={}, evicted={}, failed={}, skipped={}",
            self.live_stores(),
            self.eviction_passes(),
            self.entries_evicted(),
            self.failed_passes(),
            self.skipped_passes()
        )
    }
}
