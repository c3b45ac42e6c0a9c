//! Edge-heap allocators.
//!
//! The edge heap is a flat array of 32-bit entries; allocators hand out
//! offsets in *edge units*. Two modes:
//!
//! - [`BumpAlloc`] (static stores): a single cursor. No free, no size
//!   classes, no tag reservation — bulk load writes each list once.
//! - [`BuddyAlloc`] (dynamic stores): power-of-two classes with buddy
//!   coalescing. Shared per-level free sets plus per-thread caches that
//!   absorb split remainders; `merge_freelists` drains the caches back
//!   into the shared sets (called once after bulk load). The store asks
//!   for `n + 1` units per list so the trailing size tag always fits.
//!
//! Out-of-heap is fatal for the store: the region cannot grow because
//! peers compute offsets from the advertised layout.

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use triplemesh_core::{Error, Result};

/// Smallest buddy class, in edge units (one edge plus its tag).
const MIN_UNITS: u64 = 2;
/// Largest buddy class: 2^29 units covers the maximum list (2^28) plus tag.
const MAX_LEVEL: u32 = 29;

/// Allocator over the edge heap, shared by every worker thread.
pub trait EdgeAlloc: Send + Sync {
    /// Allocate `n` edge units; returns the heap offset.
    fn malloc(&self, n: u64, tid: usize) -> Result<u64>;

    /// Return a block to the allocator.
    fn free(&self, off: u64);

    /// Capacity class actually backing a request of `n` units.
    fn block_units(&self, n: u64) -> u64;

    /// Merge per-thread free lists into the shared lists.
    fn merge_freelists(&self) {}

    /// Units currently handed out (usage reporting).
    fn used_units(&self) -> u64;

    /// Reset to the freshly-initialized state (`refresh`).
    fn reset(&self);
}

// ============================================================================
// Static mode: bump cursor
// ============================================================================

/// Bump allocator for static stores: one cursor, one lock, no free.
pub struct BumpAlloc {
    num_entries: u64,
    next: Mutex<u64>,
}

impl BumpAlloc {
    pub fn new(num_entries: u64) -> Self {
        Self {
            num_entries,
            next: Mutex::new(0),
        }
    }
}

impl EdgeAlloc for BumpAlloc {
    fn malloc(&self, n: u64, _tid: usize) -> Result<u64> {
        let mut next = self.next.lock();
        if *next + n > self.num_entries {
            return Err(Error::capacity(format!(
                "edge heap full: {} + {n} > {}",
                *next, self.num_entries
            )));
        }
        let off = *next;
        *next += n;
        Ok(off)
    }

    fn free(&self, _off: u64) {
        // Static stores never free; the cursor only moves forward.
    }

    fn block_units(&self, n: u64) -> u64 {
        n
    }

    fn used_units(&self) -> u64 {
        *self.next.lock()
    }

    fn reset(&self) {
        *self.next.lock() = 0;
    }
}

// ============================================================================
// Dynamic mode: buddy with per-thread caches
// ============================================================================

/// Shared buddy state: one free-offset set per level, plus the level of
/// every outstanding block (needed because `free` takes only the offset).
struct BuddyShared {
    free: Vec<FxHashSet<u64>>,
    live: FxHashMap<u64, u32>,
}

/// Power-of-two buddy allocator over the edge heap.
pub struct BuddyAlloc {
    num_entries: u64,
    shared: Mutex<BuddyShared>,
    /// Split remainders cached per thread, per level.
    tcache: Vec<Mutex<Vec<Vec<u64>>>>,
    used: AtomicU64,
}

impl BuddyAlloc {
    pub fn new(num_entries: u64, num_threads: usize) -> Self {
        let alloc = Self {
            num_entries,
            shared: Mutex::new(BuddyShared {
                free: vec![FxHashSet::default(); (MAX_LEVEL + 1) as usize],
                live: FxHashMap::default(),
            }),
            tcache: (0..num_threads)
                .map(|_| Mutex::new(vec![Vec::new(); (MAX_LEVEL + 1) as usize]))
                .collect(),
            used: AtomicU64::new(0),
        };
        alloc.seed();
        alloc
    }

    /// Decompose the heap into aligned power-of-two blocks.
    fn seed(&self) {
        let mut shared = self.shared.lock();
        let mut off = 0u64;
        while self.num_entries - off >= MIN_UNITS {
            let rem = self.num_entries - off;
            let align_level = if off == 0 {
                MAX_LEVEL
            } else {
                off.trailing_zeros().min(MAX_LEVEL)
            };
            let size_level = (63 - rem.leading_zeros()).min(align_level).min(MAX_LEVEL);
            shared.free[size_level as usize].insert(off);
            off += 1 << size_level;
        }
    }

    fn level_for(&self, n: u64) -> u32 {
        let units = n.max(MIN_UNITS).next_power_of_two();
        units.trailing_zeros()
    }
}

impl EdgeAlloc for BuddyAlloc {
    fn malloc(&self, n: u64, tid: usize) -> Result<u64> {
        let level = self.level_for(n);
        if level > MAX_LEVEL {
            return Err(Error::capacity(format!("{n} units exceeds the largest class")));
        }

        // Thread-local cache at the exact class.
        if let Some(off) = self.tcache[tid].lock()[level as usize].pop() {
            self.shared.lock().live.insert(off, level);
            self.used.fetch_add(1 << level, Ordering::Relaxed);
            return Ok(off);
        }

        // Shared lists, then this thread's larger cached blocks; split the
        // winner down, remainders staying in this thread's cache.
        let (off, from) = {
            let mut shared = self.shared.lock();
            match (level..=MAX_LEVEL).find(|&l| !shared.free[l as usize].is_empty()) {
                Some(from) => {
                    let off = *shared.free[from as usize].iter().next().unwrap();
                    shared.free[from as usize].remove(&off);
                    (off, from)
                }
                None => {
                    drop(shared);
                    let mut tcache = self.tcache[tid].lock();
                    let Some(from) =
                        ((level + 1)..=MAX_LEVEL).find(|&l| !tcache[l as usize].is_empty())
                    else {
                        return Err(Error::capacity(format!(
                            "edge heap full: no free block of {} units",
                            1u64 << level
                        )));
                    };
                    let off = tcache[from as usize].pop().unwrap();
                    (off, from)
                }
            }
        };
        if from > level {
            let mut tcache = self.tcache[tid].lock();
            for l in (level..from).rev() {
                tcache[l as usize].push(off + (1 << l));
            }
        }
        let mut shared = self.shared.lock();
        shared.live.insert(off, level);
        self.used.fetch_add(1 << level, Ordering::Relaxed);
        Ok(off)
    }

    fn free(&self, off: u64) {
        let mut shared = self.shared.lock();
        let Some(mut level) = shared.live.remove(&off) else {
            debug_assert!(false, "free of unallocated offset {off}");
            return;
        };
        self.used.fetch_sub(1 << level, Ordering::Relaxed);

        // Coalesce with free buddies as far as possible.
        let mut off = off;
        while level < MAX_LEVEL {
            let buddy = off ^ (1 << level);
            if !shared.free[level as usize].remove(&buddy) {
                break;
            }
            off = off.min(buddy);
            level += 1;
        }
        shared.free[level as usize].insert(off);
    }

    fn block_units(&self, n: u64) -> u64 {
        n.max(MIN_UNITS).next_power_of_two()
    }

    fn merge_freelists(&self) {
        let mut shared = self.shared.lock();
        for cache in &self.tcache {
            let mut cache = cache.lock();
            for (level, offs) in cache.iter_mut().enumerate() {
                for off in offs.drain(..) {
                    // Same coalescing walk as `free`.
                    let mut off = off;
                    let mut level = level as u32;
                    while level < MAX_LEVEL {
                        let buddy = off ^ (1 << level);
                        if !shared.free[level as usize].remove(&buddy) {
                            break;
                        }
                        off = off.min(buddy);
                        level += 1;
                    }
                    shared.free[level as usize].insert(off);
                }
            }
        }
    }

    fn used_units(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        {
            let mut shared = self.shared.lock();
            for set in &mut shared.free {
                set.clear();
            }
            shared.live.clear();
            for cache in &self.tcache {
                for list in cache.lock().iter_mut() {
                    list.clear();
                }
            }
        }
        self.used.store(0, Ordering::Relaxed);
        self.seed();
    }
}
