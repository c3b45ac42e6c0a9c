//! Lightweight store counters.
//!
//! Cheap relaxed counters surfaced for tests and operators; notably the
//! coherence-retry count, which is the observable face of the dynamic
//! remote-read validation loop.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the store's hot paths.
#[derive(Debug, Default)]
pub struct StoreMetrics {
    /// Remote vertex walks issued (cache misses included).
    pub remote_reads: AtomicU64,
    /// Remote vertex cache hits.
    pub cache_hits: AtomicU64,
    /// Size-tag mismatches that forced a cache invalidation and retry.
    pub coherence_retries: AtomicU64,
    /// Blocks currently parked on the deferred-free queue.
    pub pending_frees: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub remote_reads: u64,
    pub cache_hits: u64,
    pub coherence_retries: u64,
    pub pending_frees: u64,
}

impl StoreMetrics {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            remote_reads: self.remote_reads.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            coherence_retries: self.coherence_retries.load(Ordering::Relaxed),
            pending_frees: self.pending_frees.load(Ordering::Relaxed),
        }
    }
}
