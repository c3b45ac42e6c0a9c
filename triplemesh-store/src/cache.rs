//! Remote vertex cache.
//!
//! A small direct-mapped table of resolved peer slots, saving one remote
//! bucket walk per hit. Collisions simply overwrite: the table is a cache,
//! not an index. In dynamic stores every entry carries a lease; the edge
//! size-tag check is what actually keeps cached pointers honest, the lease
//! only bounds how stale the slot itself may get.

use crate::clock::now_us;
use parking_lot::Mutex;
use triplemesh_core::{EdgeKey, Slot};

/// Default entry count, sized so the table stays a few megabytes.
pub const DEFAULT_ENTRIES: usize = 100_000;

#[derive(Default)]
struct Entry {
    slot: Slot,
    expire_at: u64,
}

/// Direct-mapped cache of remote slots, striped by per-entry locks.
pub struct VertexCache {
    entries: Vec<Mutex<Entry>>,
    lease_us: u64,
    enabled: bool,
    dynamic: bool,
}

impl VertexCache {
    /// Build with the default capacity.
    pub fn new(enabled: bool, dynamic: bool, lease_us: u64) -> Self {
        Self::with_capacity(DEFAULT_ENTRIES, enabled, dynamic, lease_us)
    }

    /// Build with an explicit capacity (tests use tiny tables to force
    /// collisions).
    pub fn with_capacity(capacity: usize, enabled: bool, dynamic: bool, lease_us: u64) -> Self {
        Self {
            entries: (0..capacity).map(|_| Mutex::new(Entry::default())).collect(),
            lease_us,
            enabled,
            dynamic,
        }
    }

    #[inline]
    fn index(&self, key: EdgeKey) -> usize {
        (key.hash() % self.entries.len() as u64) as usize
    }

    /// Cached slot for `key`, if present and (in dynamic mode) unexpired.
    pub fn lookup(&self, key: EdgeKey) -> Option<Slot> {
        if !self.enabled {
            return None;
        }
        let entry = self.entries[self.index(key)].lock();
        if entry.slot.key != key {
            return None;
        }
        if self.dynamic && now_us() >= entry.expire_at {
            return None;
        }
        Some(entry.slot)
    }

    /// Insert a freshly resolved slot, overwriting whatever maps there.
    pub fn insert(&self, slot: Slot) {
        if !self.enabled {
            return;
        }
        let mut entry = self.entries[self.index(slot.key)].lock();
        entry.expire_at = now_us() + self.lease_us;
        entry.slot = slot;
    }

    /// Drop the entry for `key` if it is the one cached.
    pub fn invalidate(&self, key: EdgeKey) {
        if !self.enabled {
            return;
        }
        let mut entry = self.entries[self.index(key)].lock();
        if entry.slot.key == key {
            entry.slot = Slot::EMPTY;
        }
    }
}
