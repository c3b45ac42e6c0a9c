//! Shard memory region and layout.
//!
//! Each shard registers one contiguous address space that peers read and
//! write with one-sided operations. Both sides compute the same
//! [`MemLayout`] from the shared configuration, so a remote offset means
//! the same thing everywhere. Region order:
//!
//! ```text
//! [index slots]   num_slots * 16 bytes        (main + indirect buckets)
//! [edge heap]     num_entries * 4 bytes
//! [scratch]       num_engines * scratch_size  (reserved, never addressed)
//! [rings]         num_engines * num_servers * ring_size
//! [head mirrors]  num_engines * num_servers * 8
//! ```
//!
//! Rings are indexed `(reader thread, writer shard)`; head mirrors are
//! indexed `(reader thread, reader shard)` and live on the *writer's*
//! shard, where its overflow check consults them.
//!
//! ## Why atomic words
//!
//! The region is concurrently touched by local workers, by local writers
//! publishing slots, and by the fabric applying peer reads/writes. Backing
//! it with `AtomicU64`/`AtomicU32` words makes every access tear-free at
//! word granularity in safe Rust; the coherence protocol (key published
//! last, ring footer written last, edge size tags) handles anything wider
//! than a word.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use triplemesh_core::hash::prime_below;
use triplemesh_core::slot::SLOT_BYTES;
use triplemesh_core::{EdgeKey, EdgePtr, Error, Result, Slot, StoreConfig};

/// Bytes per edge-heap entry.
pub const EDGE_BYTES: u64 = 4;

/// Byte layout of one shard's registered region.
#[derive(Debug, Clone)]
pub struct MemLayout {
    /// Total slots in the index region (main + indirect buckets).
    pub num_slots: u64,
    /// Main-region bucket count (prime).
    pub num_buckets: u64,
    /// Indirect-region bucket count.
    pub num_buckets_ext: u64,
    /// Edge-heap entries.
    pub num_entries: u64,
    /// Slots per bucket.
    pub associativity: u64,
    /// Worker threads on this shard.
    pub num_engines: usize,
    /// Shards in the cluster.
    pub num_servers: usize,
    /// Bytes per ring.
    pub ring_size: u64,
    /// Bytes of per-thread scratch.
    pub scratch_size: u64,

    edges_off: u64,
    scratch_off: u64,
    rings_off: u64,
    heads_off: u64,
    total: u64,
}

impl MemLayout {
    /// Compute the layout for one shard from the cluster configuration.
    pub fn new(cfg: &StoreConfig) -> Self {
        let header_bytes = cfg.kvstore_size * cfg.header_ratio() / 100;
        let num_slots = header_bytes / SLOT_BYTES;
        let total_buckets = num_slots / cfg.associativity;
        let num_buckets = prime_below(total_buckets * cfg.main_header_ratio / 100);
        let num_buckets_ext = total_buckets - num_buckets;
        // Even entry count keeps every later region 8-byte aligned.
        let num_entries = ((cfg.kvstore_size - num_slots * SLOT_BYTES) / EDGE_BYTES) & !1;

        let edges_off = num_slots * SLOT_BYTES;
        let scratch_off = edges_off + num_entries * EDGE_BYTES;
        let rings_off = scratch_off + cfg.num_engines as u64 * cfg.scratch_size;
        let rings_bytes = cfg.num_engines as u64 * cfg.num_servers as u64 * cfg.ring_size;
        let heads_off = rings_off + rings_bytes;
        let heads_bytes = cfg.num_engines as u64 * cfg.num_servers as u64 * 8;

        Self {
            num_slots,
            num_buckets,
            num_buckets_ext,
            num_entries,
            associativity: cfg.associativity,
            num_engines: cfg.num_engines,
            num_servers: cfg.num_servers,
            ring_size: cfg.ring_size,
            scratch_size: cfg.scratch_size,
            edges_off,
            scratch_off,
            rings_off,
            heads_off,
            total: heads_off + heads_bytes,
        }
    }

    /// Total registered bytes.
    #[inline]
    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    /// Byte offset of edge-heap entry `idx`.
    #[inline]
    pub fn edge_offset(&self, idx: u64) -> u64 {
        self.edges_off + idx * EDGE_BYTES
    }

    /// Byte offset of the slot array entry `slot_id`.
    #[inline]
    pub fn slot_offset(&self, slot_id: u64) -> u64 {
        slot_id * SLOT_BYTES
    }

    /// Byte offset of the ring read by `tid` from writers on `src_sid`.
    #[inline]
    pub fn ring_offset(&self, tid: usize, src_sid: usize) -> u64 {
        self.rings_off + (tid * self.num_servers + src_sid) as u64 * self.ring_size
    }

    /// Byte offset of the head mirror for reader `(tid, reader_sid)`.
    #[inline]
    pub fn head_offset(&self, tid: usize, reader_sid: usize) -> u64 {
        self.heads_off + (tid * self.num_servers + reader_sid) as u64 * 8
    }
}

/// One shard's registered memory.
pub struct ShardMem {
    layout: MemLayout,
    slots: Box<[AtomicU64]>,
    edges: Box<[AtomicU32]>,
    rings: Box<[AtomicU64]>,
    heads: Box<[AtomicU64]>,
}

fn zeroed_u64(n: usize) -> Box<[AtomicU64]> {
    (0..n).map(|_| AtomicU64::new(0)).collect()
}

fn zeroed_u32(n: usize) -> Box<[AtomicU32]> {
    (0..n).map(|_| AtomicU32::new(0)).collect()
}

impl ShardMem {
    /// Allocate and zero one shard's region.
    pub fn new(cfg: &StoreConfig) -> Self {
        let layout = MemLayout::new(cfg);
        let rings_words =
            layout.num_engines * layout.num_servers * (layout.ring_size / 8) as usize;
        let heads_words = layout.num_engines * layout.num_servers;
        tracing::info!(
            total_bytes = layout.total_bytes(),
            num_slots = layout.num_slots,
            num_buckets = layout.num_buckets,
            num_buckets_ext = layout.num_buckets_ext,
            num_entries = layout.num_entries,
            "shard region sized"
        );
        Self {
            slots: zeroed_u64(layout.num_slots as usize * 2),
            edges: zeroed_u32(layout.num_entries as usize),
            rings: zeroed_u64(rings_words),
            heads: zeroed_u64(heads_words),
            layout,
        }
    }

    /// The region layout.
    #[inline]
    pub fn layout(&self) -> &MemLayout {
        &self.layout
    }

    // ------------------------------------------------------------------
    // Index slots
    // ------------------------------------------------------------------

    /// Key word of a slot (acquire: pairs with the release publish).
    #[inline]
    pub fn slot_key(&self, slot_id: u64) -> EdgeKey {
        EdgeKey::from_raw(self.slots[slot_id as usize * 2].load(Ordering::Acquire))
    }

    /// Value word of a slot.
    #[inline]
    pub fn slot_ptr(&self, slot_id: u64) -> EdgePtr {
        EdgePtr::from_raw(self.slots[slot_id as usize * 2 + 1].load(Ordering::Acquire))
    }

    /// Whole slot (key read last so a concurrently published slot is seen
    /// with its pointer no newer than its key).
    #[inline]
    pub fn load_slot(&self, slot_id: u64) -> Slot {
        let ptr = self.slot_ptr(slot_id);
        let key = self.slot_key(slot_id);
        Slot { key, ptr }
    }

    /// Publish a slot key. Must be the *last* store of an insert; local
    /// readers take no lock and rely on it.
    #[inline]
    pub fn store_slot_key(&self, slot_id: u64, key: EdgeKey) {
        self.slots[slot_id as usize * 2].store(key.raw(), Ordering::Release);
    }

    /// Store a slot's value pointer.
    #[inline]
    pub fn store_slot_ptr(&self, slot_id: u64, ptr: EdgePtr) {
        self.slots[slot_id as usize * 2 + 1].store(ptr.raw(), Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Edge heap
    // ------------------------------------------------------------------

    /// Load one edge word (acquire: pairs with size-tag publication).
    #[inline]
    pub fn edge(&self, idx: u64) -> u32 {
        self.edges[idx as usize].load(Ordering::Acquire)
    }

    /// Store one edge word.
    #[inline]
    pub fn set_edge(&self, idx: u64, val: u32) {
        self.edges[idx as usize].store(val, Ordering::Release);
    }

    /// Number of edge-heap entries.
    #[inline]
    pub fn num_entries(&self) -> u64 {
        self.layout.num_entries
    }

    // ------------------------------------------------------------------
    // Rings and head mirrors
    // ------------------------------------------------------------------

    /// Load the ring word at byte offset `off` (8-aligned, `< ring_size`)
    /// within ring `(tid, src_sid)`.
    #[inline]
    pub fn ring_load(&self, tid: usize, src_sid: usize, off: u64) -> u64 {
        debug_assert_eq!(off % 8, 0);
        let base = (self.layout.ring_offset(tid, src_sid) - self.layout.rings_off) / 8;
        self.rings[(base + off / 8) as usize].load(Ordering::Acquire)
    }

    /// Store the ring word at byte offset `off` within ring `(tid, src_sid)`.
    #[inline]
    pub fn ring_store(&self, tid: usize, src_sid: usize, off: u64, val: u64) {
        debug_assert_eq!(off % 8, 0);
        let base = (self.layout.ring_offset(tid, src_sid) - self.layout.rings_off) / 8;
        self.rings[(base + off / 8) as usize].store(val, Ordering::Release);
    }

    /// Published head of reader `(tid, reader_sid)`, as seen by writers on
    /// this shard.
    #[inline]
    pub fn head_load(&self, tid: usize, reader_sid: usize) -> u64 {
        self.heads[tid * self.layout.num_servers + reader_sid].load(Ordering::Acquire)
    }

    /// Update a head mirror (local-reader fast path).
    #[inline]
    pub fn head_store(&self, tid: usize, reader_sid: usize, head: u64) {
        self.heads[tid * self.layout.num_servers + reader_sid].store(head, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Byte-exact access (the fabric's view)
    // ------------------------------------------------------------------

    /// Read `buf.len()` bytes at region offset `off`, little-endian.
    ///
    /// Alignment follows the region granularity: 4 bytes inside the edge
    /// heap, 8 bytes elsewhere. The scratch range is reserved address
    /// space and is rejected, as are misaligned or out-of-range requests.
    pub fn read_at(&self, off: u64, buf: &mut [u8]) -> Result<()> {
        let len = buf.len() as u64;
        self.check_range(off, len)?;
        if off >= self.layout.edges_off && off < self.layout.scratch_off {
            let start = (off - self.layout.edges_off) / 4;
            for (i, chunk) in buf.chunks_exact_mut(4).enumerate() {
                let word = self.edges[(start + i as u64) as usize].load(Ordering::Acquire);
                chunk.copy_from_slice(&word.to_le_bytes());
            }
        } else {
            let (words, start) = self.words_for(off);
            for (i, chunk) in buf.chunks_exact_mut(8).enumerate() {
                let word = words[(start + i as u64) as usize].load(Ordering::Acquire);
                chunk.copy_from_slice(&word.to_le_bytes());
            }
        }
        Ok(())
    }

    /// Write `buf` at region offset `off`, ascending word order.
    ///
    /// Ascending order is load-bearing: the ring protocol places the frame
    /// footer last, and readers treat its arrival as the completion
    /// witness.
    pub fn write_at(&self, off: u64, buf: &[u8]) -> Result<()> {
        let len = buf.len() as u64;
        self.check_range(off, len)?;
        if off >= self.layout.edges_off && off < self.layout.scratch_off {
            let start = (off - self.layout.edges_off) / 4;
            for (i, chunk) in buf.chunks_exact(4).enumerate() {
                let word = u32::from_le_bytes(chunk.try_into().unwrap());
                self.edges[(start + i as u64) as usize].store(word, Ordering::Release);
            }
        } else {
            let (words, start) = self.words_for(off);
            for (i, chunk) in buf.chunks_exact(8).enumerate() {
                let word = u64::from_le_bytes(chunk.try_into().unwrap());
                words[(start + i as u64) as usize].store(word, Ordering::Release);
            }
        }
        Ok(())
    }

    /// Word array and starting word index for an 8-granular region offset.
    fn words_for(&self, off: u64) -> (&[AtomicU64], u64) {
        if off < self.layout.edges_off {
            (&self.slots, off / 8)
        } else if off >= self.layout.heads_off {
            (&self.heads, (off - self.layout.heads_off) / 8)
        } else {
            (&self.rings, (off - self.layout.rings_off) / 8)
        }
    }

    /// Reject requests that cross region boundaries, hit the scratch
    /// range, or are misaligned for their region.
    fn check_range(&self, off: u64, len: u64) -> Result<()> {
        let end = off
            .checked_add(len)
            .ok_or_else(|| protocol_err("offset overflow"))?;
        if end > self.layout.total {
            return Err(protocol_err("access past end of region"));
        }
        let bounds = [
            (0, self.layout.edges_off, 8),
            (self.layout.edges_off, self.layout.scratch_off, 4),
            (self.layout.rings_off, self.layout.heads_off, 8),
            (self.layout.heads_off, self.layout.total, 8),
        ];
        for (lo, hi, align) in bounds {
            if off >= lo && off < hi {
                if end > hi {
                    return Err(protocol_err("access crosses region boundary"));
                }
                if off % align != 0 || len % align != 0 {
                    return Err(protocol_err("misaligned access"));
                }
                return Ok(());
            }
        }
        // Only the scratch range falls through.
        Err(protocol_err("scratch region is not remotely addressable"))
    }
}

fn protocol_err(msg: &str) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_cfg() -> StoreConfig {
        StoreConfig {
            num_servers: 2,
            num_engines: 2,
            kvstore_size: 1024 * 1024,
            ring_size: 1024,
            scratch_size: 4096,
            ..Default::default()
        }
    }

    #[test]
    fn test_layout_regions_are_contiguous() {
        let cfg = tiny_cfg();
        let l = MemLayout::new(&cfg);
        assert_eq!(l.edge_offset(0), l.num_slots * SLOT_BYTES);
        assert!(l.ring_offset(0, 0) > l.edge_offset(l.num_entries - 1));
        assert_eq!(
            l.ring_offset(0, 1) - l.ring_offset(0, 0),
            cfg.ring_size,
            "rings are laid out shard-major within a thread"
        );
        assert_eq!(l.head_offset(1, 1) + 8, l.total_bytes());
    }

    #[test]
    fn test_bucket_split() {
        let l = MemLayout::new(&tiny_cfg());
        assert_eq!(
            l.num_buckets + l.num_buckets_ext,
            l.num_slots / l.associativity
        );
        assert!(l.num_buckets_ext > 0);
    }

    #[test]
    fn test_slot_round_trip_via_bytes() {
        use triplemesh_core::{Dir, VID_MIN};
        let mem = ShardMem::new(&tiny_cfg());
        let slot = Slot {
            key: EdgeKey::new(VID_MIN + 3, 7, Dir::Out),
            ptr: EdgePtr::new(2, 64),
        };
        mem.store_slot_ptr(5, slot.ptr);
        mem.store_slot_key(5, slot.key);

        let mut buf = [0u8; 16];
        mem.read_at(mem.layout().slot_offset(5), &mut buf).unwrap();
        assert_eq!(Slot::from_bytes(&buf), slot);
    }

    #[test]
    fn test_edge_round_trip_via_bytes() {
        let mem = ShardMem::new(&tiny_cfg());
        mem.set_edge(3, 0xdead_beef);
        let mut buf = [0u8; 4];
        mem.read_at(mem.layout().edge_offset(3), &mut buf).unwrap();
        assert_eq!(u32::from_le_bytes(buf), 0xdead_beef);
    }

    #[test]
    fn test_write_at_reaches_ring_words() {
        let mem = ShardMem::new(&tiny_cfg());
        let off = mem.layout().ring_offset(1, 0) + 16;
        mem.write_at(off, &0x0123_4567_89ab_cdefu64.to_le_bytes())
            .unwrap();
        assert_eq!(mem.ring_load(1, 0, 16), 0x0123_4567_89ab_cdef);
    }

    #[test]
    fn test_scratch_rejected() {
        let mem = ShardMem::new(&tiny_cfg());
        let l = mem.layout().clone();
        let mut buf = [0u8; 8];
        assert!(mem.read_at(l.scratch_off, &mut buf).is_err());
    }

    #[test]
    fn test_misaligned_rejected() {
        let mem = ShardMem::new(&tiny_cfg());
        let mut buf = [0u8; 8];
        assert!(mem.read_at(4, &mut buf).is_err());
        assert!(mem.read_at(0, &mut [0u8; 7]).is_err());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mem = ShardMem::new(&tiny_cfg());
        let mut buf = [0u8; 8];
        assert!(mem.read_at(mem.layout().total_bytes(), &mut buf).is_err());
    }
}
