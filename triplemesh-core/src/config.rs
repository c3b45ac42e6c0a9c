//! Store configuration.
//!
//! One immutable value threaded through construction of every subsystem;
//! toggles are branched on at call sites, never re-read from globals. The
//! `versatile` flag flips the key schema itself and must therefore be
//! fixed for the lifetime of a store.

use serde::Deserialize;

/// Slot bits per key (the slot is two 64-bit words).
const SLOT_BITS: u64 = 128;
/// Bits of one sid; the edge heap stores roughly three sids per key.
const SID_BITS: u64 = 32;

/// Cluster-wide store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Engage the one-sided fabric; otherwise every transport falls back
    /// to the TCP implementation of the same capability.
    pub use_rdma: bool,
    /// Enable the remote vertex cache.
    pub enable_caching: bool,
    /// Shard count. Subject/object partitioning is `vid % num_servers`.
    pub num_servers: usize,
    /// Worker threads per shard; governs scratch buffer and ring counts.
    pub num_engines: usize,
    /// Total key/value region in bytes, split between index and edge heap
    /// by the header ratio rule.
    pub kvstore_size: u64,
    /// Slots per bucket; the last slot of each bucket is the chain link.
    pub associativity: u64,
    /// Percent of buckets placed in the main region (the rest form the
    /// indirect chain-overflow region).
    pub main_header_ratio: u64,
    /// Enable online inserts, the buddy allocator, and cache leases.
    pub dynamic_gstore: bool,
    /// Materialize the versatile index families (all-local sets and
    /// per-vertex predicate lists).
    pub versatile: bool,
    /// Lease on cache entries and deferred frees, in microseconds.
    pub cache_lease_us: u64,
    /// Bytes per ring (one ring per reader thread per writer shard).
    pub ring_size: u64,
    /// Bytes of per-thread staging scratch.
    pub scratch_size: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            use_rdma: true,
            enable_caching: true,
            num_servers: 1,
            num_engines: 2,
            kvstore_size: 64 * 1024 * 1024,
            associativity: 8,
            main_header_ratio: 80,
            dynamic_gstore: false,
            versatile: false,
            cache_lease_us: 120_000_000,
            ring_size: 64 * 1024,
            scratch_size: 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Fraction of `kvstore_size` given to the index region, in percent.
    ///
    /// One slot is 128 bits per key; the heap averages three sids per key,
    /// so the split is `128 / (128 + 3 * sid_bits)`.
    pub fn header_ratio(&self) -> u64 {
        SLOT_BITS * 100 / (SLOT_BITS + 3 * SID_BITS)
    }

    /// Validate the configuration at startup.
    pub fn validate(&self) -> Result<(), String> {
        if self.num_servers == 0 {
            return Err("num_servers must be > 0".to_string());
        }
        if self.num_engines == 0 {
            return Err("num_engines must be > 0".to_string());
        }
        if self.associativity < 2 {
            return Err("associativity must be >= 2 (one data slot + chain link)".to_string());
        }
        if self.main_header_ratio == 0 || self.main_header_ratio >= 100 {
            return Err("main_header_ratio must be in (0, 100)".to_string());
        }
        let slots = self.kvstore_size * self.header_ratio() / 100 / 16;
        if slots / self.associativity < 2 {
            return Err("kvstore_size too small for even two buckets".to_string());
        }
        if self.ring_size == 0 || self.ring_size % 8 != 0 {
            return Err("ring_size must be a positive multiple of 8".to_string());
        }
        if self.scratch_size < self.ring_size || self.scratch_size % 8 != 0 {
            return Err(
                "scratch_size must be a multiple of 8 holding at least one full ring frame"
                    .to_string(),
            );
        }
        Ok(())
    }
}
