//! The sharded graph key/value store.
//!
//! Maps the graph model (vertices, edges, indexes) onto the flat key/value
//! schema:
//!
//! ```text
//! INDEX key/value pairs (vid = 0)
//!   (0,           pid, OUT)  subjects having pid        predicate-index
//!   (0,           pid, IN)   objects having pid         predicate-index
//!   (0,           tid, IN)   vertices of type tid       type-index
//!   (0,       TYPE_ID, IN)   every local subject/object      (versatile)
//!   (0,       TYPE_ID, OUT)  every local type                (versatile)
//!   (0,  PREDICATE_ID, OUT)  every local predicate           (versatile)
//! NORMAL key/value pairs
//!   (vid,         pid, OUT)  objects of vid's pid-edges
//!   (vid,         pid, IN)   subjects of vid's pid-edges
//!   (vid,     TYPE_ID, OUT)  vid's types
//!   (vid, PREDICATE_ID, d)   pids used at vid in direction d (versatile)
//! ```
//!
//! Type triples are index-only: `(s, TYPE_ID, t)` yields `(s, TYPE_ID,
//! OUT)` and `(0, t, IN)` but never `(t, TYPE_ID, IN)`.
//!
//! ## Index structure
//!
//! Cluster-chained hashing: the slot array divides into buckets of
//! `associativity` slots; the last slot of each bucket is a chain link
//! whose vid field names the next bucket in the reserved indirect region.
//! Bucket locks are virtualized over [`NUM_LOCKS`] mutexes. Local readers
//! take no lock: writers publish the key word last (release), so a slot a
//! reader can see is always whole.
//!
//! ## Remote reads
//!
//! A vertex on a peer shard resolves with one-sided reads only: walk the
//! peer's bucket chain one bucket per read, then fetch the edge block. In
//! dynamic stores the block's trailing size tag must equal the slot's
//! size; a mismatch means the block moved under us, so invalidate the
//! cache entry and restart the walk.

use crate::alloc::{BumpAlloc, BuddyAlloc, EdgeAlloc};
use crate::cache::VertexCache;
use crate::clock::now_us;
use crate::metrics::StoreMetrics;
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use triplemesh_core::{
    is_tpid, partition, AttrTriple, AttrType, AttrValue, Dir, EdgeKey, EdgePtr, Error, Result,
    Sid, Slot, StoreConfig, Triple, INVALID_EDGES, PREDICATE_ID, TYPE_ID,
};
use triplemesh_fabric::{RemoteMemory, ShardMem};

/// Bucket-lock virtualization factor.
pub const NUM_LOCKS: usize = 1024;

/// A retired edge block waiting out its lease.
struct FreeBlock {
    off: u64,
    expire_at: u64,
}

/// Occupancy numbers reported by [`GraphStore::usage_report`].
#[derive(Debug, Clone, Copy)]
pub struct UsageReport {
    pub main_slots_used: u64,
    pub indirect_buckets_used: u64,
    pub indirect_slots_used: u64,
    pub entries_used: u64,
}

/// One shard of the graph store.
pub struct GraphStore {
    sid: usize,
    cfg: Arc<StoreConfig>,
    mem: Arc<ShardMem>,
    fabric: Arc<dyn RemoteMemory>,
    alloc: Box<dyn EdgeAlloc>,
    cache: VertexCache,
    bucket_locks: Vec<CachePadded<Mutex<()>>>,
    ext_lock: Mutex<()>,
    last_ext: Mutex<u64>,
    free_queue: Mutex<VecDeque<FreeBlock>>,
    metrics: StoreMetrics,
}

impl GraphStore {
    /// Build shard `sid` over its region and a fabric reaching peers.
    pub fn new(
        sid: usize,
        cfg: Arc<StoreConfig>,
        mem: Arc<ShardMem>,
        fabric: Arc<dyn RemoteMemory>,
    ) -> Self {
        let layout = mem.layout();
        let alloc: Box<dyn EdgeAlloc> = if cfg.dynamic_gstore {
            Box::new(BuddyAlloc::new(layout.num_entries, cfg.num_engines))
        } else {
            Box::new(BumpAlloc::new(layout.num_entries))
        };
        tracing::info!(
            sid,
            num_slots = layout.num_slots,
            main_buckets = layout.num_buckets,
            indirect_buckets = layout.num_buckets_ext,
            num_entries = layout.num_entries,
            dynamic = cfg.dynamic_gstore,
            versatile = cfg.versatile,
            "graph store up"
        );
        Self {
            sid,
            cache: VertexCache::new(cfg.enable_caching, cfg.dynamic_gstore, cfg.cache_lease_us),
            alloc,
            bucket_locks: (0..NUM_LOCKS)
                .map(|_| CachePadded::new(Mutex::new(())))
                .collect(),
            ext_lock: Mutex::new(()),
            last_ext: Mutex::new(0),
            free_queue: Mutex::new(VecDeque::new()),
            metrics: StoreMetrics::default(),
            cfg,
            mem,
            fabric,
        }
    }

    /// This shard's id.
    pub fn sid(&self) -> usize {
        self.sid
    }

    /// The cluster configuration this store was built with.
    pub fn config(&self) -> &StoreConfig {
        &self.cfg
    }

    /// Whether the versatile index families are materialized.
    pub fn versatile(&self) -> bool {
        self.cfg.versatile
    }

    /// The shard's memory region (layout, raw slot access for tools).
    pub fn mem(&self) -> &Arc<ShardMem> {
        &self.mem
    }

    /// Store counters.
    pub fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }

    /// Indirect buckets handed out so far.
    pub fn indirect_used(&self) -> u64 {
        *self.last_ext.lock()
    }

    /// Blocks currently parked on the deferred-free queue.
    pub fn free_queue_len(&self) -> usize {
        self.free_queue.lock().len()
    }

    // ======================================================================
    // Local hash index
    // ======================================================================

    #[inline]
    fn num_buckets(&self) -> u64 {
        self.mem.layout().num_buckets
    }

    #[inline]
    fn assoc(&self) -> u64 {
        self.mem.layout().associativity
    }

    /// Find or create the slot for `key`.
    ///
    /// With `check_dup`, an existing key is a mapper logic error. Without
    /// it the existing slot id is returned. Runs under the key's bucket
    /// lock; allocates an indirect bucket when the chain is full.
    pub fn insert_key(&self, key: EdgeKey, check_dup: bool) -> Result<u64> {
        let assoc = self.assoc();
        let root_bucket = key.bucket_of(self.num_buckets());
        let _guard = self.bucket_locks[(root_bucket as usize) % NUM_LOCKS].lock();

        let mut bucket = root_bucket;
        loop {
            let base = bucket * assoc;
            for slot_id in base..base + assoc - 1 {
                let existing = self.mem.slot_key(slot_id);
                if existing == key {
                    if check_dup {
                        return Err(Error::duplicate(format!(
                            "key {key:?} already at slot {slot_id}"
                        )));
                    }
                    return Ok(slot_id);
                }
                if existing.is_empty() {
                    self.mem.store_slot_key(slot_id, key);
                    return Ok(slot_id);
                }
            }

            let link_id = base + assoc - 1;
            let link = self.mem.slot_key(link_id);
            if !link.is_empty() {
                bucket = link.chain_target();
                continue;
            }

            // Chain full: take a fresh indirect bucket and link it in.
            let ext = {
                let _ext_guard = self.ext_lock.lock();
                let mut last_ext = self.last_ext.lock();
                if *last_ext >= self.mem.layout().num_buckets_ext {
                    return Err(Error::capacity(format!(
                        "out of indirect buckets ({})",
                        self.mem.layout().num_buckets_ext
                    )));
                }
                let ext = *last_ext;
                *last_ext += 1;
                ext
            };
            let next_bucket = self.num_buckets() + ext;
            self.mem.store_slot_key(link_id, EdgeKey::chain_link(next_bucket));

            let slot_id = next_bucket * assoc;
            self.mem.store_slot_key(slot_id, key);
            return Ok(slot_id);
        }
    }

    /// Lock-free local lookup.
    pub fn lookup_local(&self, key: EdgeKey) -> Option<Slot> {
        let assoc = self.assoc();
        let mut bucket = key.bucket_of(self.num_buckets());
        loop {
            let base = bucket * assoc;
            for slot_id in base..base + assoc - 1 {
                let existing = self.mem.slot_key(slot_id);
                if existing == key {
                    return Some(Slot {
                        key: existing,
                        ptr: self.mem.slot_ptr(slot_id),
                    });
                }
                if existing.is_empty() {
                    return None;
                }
            }
            let link = self.mem.slot_key(base + assoc - 1);
            if link.is_empty() {
                return None;
            }
            bucket = link.chain_target();
        }
    }

    /// Does `key` exist locally? Used to probe buddy index keys during
    /// online inserts. Falls through to `false` past the end of a chain.
    pub fn check_key_exist(&self, key: EdgeKey) -> bool {
        self.lookup_local(key).is_some()
    }

    /// Visit every occupied slot (index build, verifier, reports).
    ///
    /// Slots fill front-to-back within a bucket, so the walk stops at the
    /// first empty data slot of each bucket.
    pub fn scan_slots(&self, mut f: impl FnMut(u64, Slot)) {
        let assoc = self.assoc();
        let buckets = self.num_buckets() + self.indirect_used();
        for bucket in 0..buckets {
            let base = bucket * assoc;
            for slot_id in base..base + assoc - 1 {
                let slot = self.mem.load_slot(slot_id);
                if slot.is_empty() {
                    break;
                }
                f(slot_id, slot);
            }
        }
    }

    // ======================================================================
    // Edge allocation
    // ======================================================================

    /// Block capacity class for `n` requested edges.
    #[inline]
    fn block_units(&self, n: u64) -> u64 {
        self.alloc.block_units(n)
    }

    /// Allocate heap space for `n` edges.
    ///
    /// Dynamic stores sweep the expired deferred frees first, reserve one
    /// extra unit, and stamp the size tag at the end of the buddy class.
    fn alloc_edges(&self, n: u64, tid: usize) -> Result<u64> {
        if self.cfg.dynamic_gstore {
            self.sweep_free();
            let off = self.alloc.malloc(n + 1, tid)?;
            self.write_size_tag(off, n, n as u32);
            Ok(off)
        } else {
            self.alloc.malloc(n, tid)
        }
    }

    /// Stamp a block's trailing tag: `flag` at the last unit of the class
    /// backing `size` edges.
    fn write_size_tag(&self, off: u64, size: u64, flag: u32) {
        let cap = self.block_units(size + 1);
        self.mem.set_edge(off + cap - 1, flag);
    }

    /// Park a retired block until its lease expires.
    fn pending_free(&self, ptr: EdgePtr) {
        let block = FreeBlock {
            off: ptr.off(),
            expire_at: now_us() + self.cfg.cache_lease_us,
        };
        self.free_queue.lock().push_back(block);
        self.metrics.pending_frees.fetch_add(1, Ordering::Relaxed);
    }

    /// Return every expired parked block to the allocator.
    fn sweep_free(&self) {
        let mut queue = self.free_queue.lock();
        while let Some(front) = queue.front() {
            if now_us() < front.expire_at {
                break;
            }
            let block = queue.pop_front().unwrap();
            self.alloc.free(block.off);
            self.metrics.pending_frees.fetch_sub(1, Ordering::Relaxed);
        }
    }

    // ======================================================================
    // Bulk mapper
    // ======================================================================

    /// Allocate, insert, and fill one key's value list.
    fn insert_run(
        &self,
        key: EdgeKey,
        vals: impl ExactSizeIterator<Item = Sid>,
        tid: usize,
    ) -> Result<()> {
        let n = vals.len() as u64;
        let off = self.alloc_edges(n, tid)?;
        let slot_id = self.insert_key(key, true)?;
        for (i, v) in vals.enumerate() {
            self.mem.set_edge(off + i as u64, v);
        }
        self.mem.store_slot_ptr(slot_id, EdgePtr::new(n, off));
        Ok(())
    }

    /// Ingest this shard's partition of the sorted triple streams.
    ///
    /// `spo` is sorted by `(s, p, o)`; `ops` by `(o, p, s)`, which clusters
    /// every type triple at the front (type objects are t/pids). Type
    /// triples are skipped on the `ops` side — they become index entries in
    /// [`build_index`], never IN-edges.
    pub fn load_normal(&self, spo: &[Triple], ops: &[Triple], tid: usize) -> Result<()> {
        let type_triples = ops.iter().take_while(|t| is_tpid(t.o)).count();

        // Per-vertex predicate lists flushed at each subject boundary.
        let mut predicates: Vec<Sid> = Vec::new();

        let mut s = 0;
        while s < spo.len() {
            let mut e = s + 1;
            while e < spo.len() && spo[e].s == spo[s].s && spo[e].p == spo[s].p {
                e += 1;
            }
            let key = EdgeKey::new(spo[s].s, spo[s].p, Dir::Out);
            self.insert_run(key, spo[s..e].iter().map(|t| t.o), tid)?;

            if self.cfg.versatile {
                predicates.push(spo[s].p);
                if e >= spo.len() || spo[e].s != spo[s].s {
                    let key = EdgeKey::new(spo[s].s, PREDICATE_ID, Dir::Out);
                    self.insert_run(key, predicates.drain(..), tid)?;
                }
            }
            s = e;
        }

        let mut s = type_triples;
        while s < ops.len() {
            let mut e = s + 1;
            while e < ops.len() && ops[e].o == ops[s].o && ops[e].p == ops[s].p {
                e += 1;
            }
            let key = EdgeKey::new(ops[s].o, ops[s].p, Dir::In);
            self.insert_run(key, ops[s..e].iter().map(|t| t.s), tid)?;

            if self.cfg.versatile {
                predicates.push(ops[s].p);
                if e >= ops.len() || ops[e].o != ops[s].o {
                    let key = EdgeKey::new(ops[s].o, PREDICATE_ID, Dir::In);
                    self.insert_run(key, predicates.drain(..), tid)?;
                }
            }
            s = e;
        }
        Ok(())
    }

    /// Ingest attribute triples: one typed value list per `(s, a)`.
    pub fn load_attrs(&self, attrs: &[AttrTriple], tid: usize) -> Result<()> {
        for attr in attrs {
            let n = attr.v.payload_slots();
            let off = self.alloc_edges(n, tid)?;
            let slot_id = self.insert_key(EdgeKey::new(attr.s, attr.a, Dir::Out), true)?;
            for (i, word) in attr.v.to_words().into_iter().enumerate() {
                self.mem.set_edge(off + i as u64, word);
            }
            self.mem
                .store_slot_ptr(slot_id, EdgePtr::typed(n, off, attr.v.attr_type()));
        }
        Ok(())
    }

    /// Scan the normal data and materialize every derived index family.
    ///
    /// The scan runs in parallel over buckets; the single key/value pair
    /// per map entry is inserted sequentially afterwards. Call exactly
    /// once, after every `load_normal`/`load_attrs` partition is in.
    pub fn build_index(&self) -> Result<()> {
        let t_start = now_us();
        self.alloc.merge_freelists();

        let assoc = self.assoc();
        let buckets = self.num_buckets() + self.indirect_used();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.cfg.num_engines)
            .build()
            .map_err(|e| Error::config(format!("index scan pool: {e}")))?;

        let agg = pool.install(|| {
            (0..buckets)
                .into_par_iter()
                .fold(IndexAgg::default, |mut agg, bucket| {
                    let base = bucket * assoc;
                    for slot_id in base..base + assoc - 1 {
                        let slot = self.mem.load_slot(slot_id);
                        if slot.is_empty() {
                            break;
                        }
                        self.scan_for_index(&slot, &mut agg);
                    }
                    agg
                })
                .reduce(IndexAgg::default, IndexAgg::merge)
        });
        let t_scan = now_us();
        tracing::debug!(
            elapsed_ms = (t_scan - t_start) / 1000,
            "index info prepared in parallel"
        );

        for (tid_, vids) in &agg.tidx {
            self.insert_run(EdgeKey::new(0, *tid_, Dir::In), vids.iter().copied(), 0)?;
        }
        for (pid, vids) in &agg.pidx_in {
            self.insert_run(EdgeKey::new(0, *pid, Dir::In), vids.iter().copied(), 0)?;
        }
        for (pid, vids) in &agg.pidx_out {
            self.insert_run(EdgeKey::new(0, *pid, Dir::Out), vids.iter().copied(), 0)?;
        }
        if self.cfg.versatile {
            self.insert_run(
                EdgeKey::new(0, TYPE_ID, Dir::In),
                agg.vset.iter().copied(),
                0,
            )?;
            self.insert_run(
                EdgeKey::new(0, TYPE_ID, Dir::Out),
                agg.tset.iter().copied(),
                0,
            )?;
            self.insert_run(
                EdgeKey::new(0, PREDICATE_ID, Dir::Out),
                agg.pset.iter().copied(),
                0,
            )?;
        }
        tracing::debug!(
            elapsed_ms = (now_us() - t_scan) / 1000,
            "index data inserted"
        );
        Ok(())
    }

    /// Classify one normal slot for the index scan.
    fn scan_for_index(&self, slot: &Slot, agg: &mut IndexAgg) {
        let key = slot.key;
        // Index keys (vid = 0) and attribute literals never feed the
        // derived indexes.
        if key.vid() == 0 || slot.ptr.attr_type() != AttrType::Sid {
            return;
        }
        let vid = key.vid();
        let pid = key.pid();
        let (size, off) = (slot.ptr.size(), slot.ptr.off());

        match (key.dir(), pid) {
            (_, PREDICATE_ID) => {
                if self.cfg.versatile {
                    agg.vset.insert(vid);
                    for i in 0..size {
                        agg.pset.insert(self.mem.edge(off + i));
                    }
                }
            }
            (Dir::Out, TYPE_ID) => {
                if self.cfg.versatile {
                    agg.vset.insert(vid);
                }
                for i in 0..size {
                    let t = self.mem.edge(off + i);
                    agg.tidx.entry(t).or_default().push(vid);
                    if self.cfg.versatile {
                        agg.tset.insert(t);
                    }
                }
            }
            (Dir::In, TYPE_ID) => {
                // Type triples are index-only; an IN-direction type key
                // cannot have been inserted.
                debug_assert!(false, "unexpected (vid, TYPE_ID, IN) key");
            }
            (Dir::Out, pid) => {
                agg.pidx_out.entry(pid).or_default().push(vid);
            }
            (Dir::In, pid) => {
                agg.pidx_in.entry(pid).or_default().push(vid);
            }
        }
    }

    /// Clear every slot and reset the allocator; the region is ready for a
    /// fresh load.
    pub fn refresh(&self) {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.cfg.num_engines)
            .build();
        let clear = |slot_id: u64| {
            self.mem.store_slot_ptr(slot_id, EdgePtr::NULL);
            self.mem.store_slot_key(slot_id, EdgeKey::EMPTY);
        };
        match pool {
            Ok(pool) => pool.install(|| {
                (0..self.mem.layout().num_slots).into_par_iter().for_each(clear);
            }),
            Err(_) => (0..self.mem.layout().num_slots).for_each(clear),
        }
        *self.last_ext.lock() = 0;
        self.free_queue.lock().clear();
        self.metrics.pending_frees.store(0, Ordering::Relaxed);
        self.alloc.reset();
    }

    // ======================================================================
    // Online inserts (dynamic stores)
    // ======================================================================

    /// Append `value` to `key`'s list, creating the key if absent.
    ///
    /// Returns `(fresh_key, was_dup)`: whether the key did not exist
    /// before, and whether `dedup` found `value` already present (in which
    /// case nothing changed).
    fn insert_vertex_edge(
        &self,
        key: EdgeKey,
        value: Sid,
        dedup: bool,
        tid: usize,
    ) -> Result<(bool, bool)> {
        let root_bucket = key.bucket_of(self.num_buckets());
        let slot_id = self.insert_key(key, false)?;
        let _guard = self.bucket_locks[(root_bucket as usize) % NUM_LOCKS].lock();

        let ptr = self.mem.slot_ptr(slot_id);
        if ptr.size() == 0 {
            let off = self.alloc_edges(1, tid)?;
            self.mem.set_edge(off, value);
            self.mem.store_slot_ptr(slot_id, EdgePtr::new(1, off));
            return Ok((true, false));
        }

        if dedup && self.value_present(ptr, value) {
            return Ok((false, true));
        }

        let need = ptr.size() + 1;
        if self.block_units(ptr.size() + 1) - 1 < need {
            // Outgrew the class: copy into a fresh block, retire the old
            // one behind its lease.
            let off = self.alloc_edges(need, tid)?;
            for i in 0..ptr.size() {
                self.mem.set_edge(off + i, self.mem.edge(ptr.off() + i));
            }
            self.mem.set_edge(off + ptr.size(), value);
            self.write_size_tag(ptr.off(), ptr.size(), INVALID_EDGES);
            self.mem.store_slot_ptr(slot_id, EdgePtr::new(need, off));
            self.pending_free(ptr);
        } else {
            // Same class: append, restamp the tag, then publish the size.
            self.mem.set_edge(ptr.off() + ptr.size(), value);
            self.write_size_tag(ptr.off(), need, need as u32);
            self.mem.store_slot_ptr(slot_id, EdgePtr::new(need, ptr.off()));
        }
        Ok((false, false))
    }

    fn value_present(&self, ptr: EdgePtr, value: Sid) -> bool {
        (0..ptr.size()).any(|i| self.mem.edge(ptr.off() + i) == value)
    }

    /// Insert one triple's OUT side (and its derived index entries).
    pub fn insert_triple_out(&self, tid: usize, triple: Triple, check_dup: bool) -> Result<()> {
        if !self.cfg.dynamic_gstore {
            return Err(Error::config("online inserts require dynamic_gstore"));
        }

        if triple.p == TYPE_ID {
            // Type triples always dedup: a vertex lists each type once.
            let key = EdgeKey::new(triple.s, TYPE_ID, Dir::Out);
            let (fresh, was_dup) = self.insert_vertex_edge(key, triple.o, true, tid)?;
            if fresh && self.cfg.versatile {
                let key = EdgeKey::new(triple.s, PREDICATE_ID, Dir::Out);
                let buddy = EdgeKey::new(triple.s, PREDICATE_ID, Dir::In);
                let (f, _) = self.insert_vertex_edge(key, TYPE_ID, false, tid)?;
                if f && !self.check_key_exist(buddy) {
                    let key = EdgeKey::new(0, TYPE_ID, Dir::In);
                    self.insert_vertex_edge(key, triple.s, false, tid)?;
                }
                // TYPE_ID itself is a pid in use; the all-predicates set
                // must agree with what a bulk load would materialize.
                let key = EdgeKey::new(0, PREDICATE_ID, Dir::Out);
                self.insert_vertex_edge(key, TYPE_ID, true, tid)?;
            }
            if !was_dup {
                let key = EdgeKey::new(0, triple.o, Dir::In);
                let (f, _) = self.insert_vertex_edge(key, triple.s, false, tid)?;
                if f && self.cfg.versatile {
                    let key = EdgeKey::new(0, TYPE_ID, Dir::Out);
                    self.insert_vertex_edge(key, triple.o, false, tid)?;
                }
            }
            return Ok(());
        }

        let key = EdgeKey::new(triple.s, triple.p, Dir::Out);
        let (fresh, _) = self.insert_vertex_edge(key, triple.o, check_dup, tid)?;
        if fresh {
            // First p-edge at s: record s in the predicate-index. The
            // buddy key tells whether p itself is already known.
            let key = EdgeKey::new(0, triple.p, Dir::Out);
            let buddy = EdgeKey::new(0, triple.p, Dir::In);
            let (f, _) = self.insert_vertex_edge(key, triple.s, false, tid)?;
            if f && !self.check_key_exist(buddy) && self.cfg.versatile {
                let key = EdgeKey::new(0, PREDICATE_ID, Dir::Out);
                self.insert_vertex_edge(key, triple.p, false, tid)?;
            }
            if self.cfg.versatile {
                let key = EdgeKey::new(triple.s, PREDICATE_ID, Dir::Out);
                let buddy = EdgeKey::new(triple.s, PREDICATE_ID, Dir::In);
                let (f, _) = self.insert_vertex_edge(key, triple.p, false, tid)?;
                if f && !self.check_key_exist(buddy) {
                    let key = EdgeKey::new(0, TYPE_ID, Dir::In);
                    self.insert_vertex_edge(key, triple.s, false, tid)?;
                }
            }
        }
        Ok(())
    }

    /// Insert one triple's IN side. Type triples have no IN side.
    pub fn insert_triple_in(&self, tid: usize, triple: Triple, check_dup: bool) -> Result<()> {
        if !self.cfg.dynamic_gstore {
            return Err(Error::config("online inserts require dynamic_gstore"));
        }
        if triple.p == TYPE_ID {
            return Ok(());
        }

        let key = EdgeKey::new(triple.o, triple.p, Dir::In);
        let (fresh, _) = self.insert_vertex_edge(key, triple.s, check_dup, tid)?;
        if fresh {
            let key = EdgeKey::new(0, triple.p, Dir::In);
            let buddy = EdgeKey::new(0, triple.p, Dir::Out);
            let (f, _) = self.insert_vertex_edge(key, triple.o, false, tid)?;
            if f && !self.check_key_exist(buddy) && self.cfg.versatile {
                let key = EdgeKey::new(0, PREDICATE_ID, Dir::Out);
                self.insert_vertex_edge(key, triple.p, false, tid)?;
            }
            if self.cfg.versatile {
                let key = EdgeKey::new(triple.o, PREDICATE_ID, Dir::In);
                let buddy = EdgeKey::new(triple.o, PREDICATE_ID, Dir::Out);
                let (f, _) = self.insert_vertex_edge(key, triple.p, false, tid)?;
                if f && !self.check_key_exist(buddy) {
                    let key = EdgeKey::new(0, TYPE_ID, Dir::In);
                    self.insert_vertex_edge(key, triple.o, false, tid)?;
                }
            }
        }
        Ok(())
    }

    // ======================================================================
    // Reads
    // ======================================================================

    /// Local value list for `(vid, pid, dir)`; `None` when the key is
    /// absent.
    pub fn edges_local(&self, vid: Sid, pid: Sid, dir: Dir) -> Option<Vec<Sid>> {
        let slot = self.lookup_local(EdgeKey::new(vid, pid, dir))?;
        let (size, off) = (slot.ptr.size(), slot.ptr.off());
        Some((0..size).map(|i| self.mem.edge(off + i)).collect())
    }

    /// Index-key convenience: value list of `(0, pid, dir)`.
    pub fn index_edges_local(&self, pid: Sid, dir: Dir) -> Option<Vec<Sid>> {
        self.edges_local(0, pid, dir)
    }

    /// Value list for `(vid, pid, dir)` wherever the vertex lives.
    pub fn edges(&self, tid: usize, vid: Sid, pid: Sid, dir: Dir) -> Result<Option<Vec<Sid>>> {
        if partition(vid, self.cfg.num_servers) == self.sid {
            Ok(self.edges_local(vid, pid, dir))
        } else {
            self.edges_remote(tid, vid, pid, dir)
        }
    }

    /// Resolve a key on a peer using only one-sided reads.
    fn vertex_remote(&self, tid: usize, peer: usize, key: EdgeKey) -> Result<Option<Slot>> {
        if let Some(slot) = self.cache.lookup(key) {
            StoreMetrics::bump(&self.metrics.cache_hits);
            return Ok(Some(slot));
        }
        StoreMetrics::bump(&self.metrics.remote_reads);

        let assoc = self.assoc();
        let layout = self.mem.layout();
        let mut buf = vec![0u8; (assoc * 16) as usize];
        let mut bucket = key.bucket_of(self.num_buckets());
        loop {
            self.fabric
                .read(tid, peer, &mut buf, layout.slot_offset(bucket * assoc))?;
            for i in 0..assoc as usize {
                let slot = Slot::from_bytes(&buf[i * 16..(i + 1) * 16]);
                if (i as u64) < assoc - 1 {
                    if slot.key == key {
                        self.cache.insert(slot);
                        return Ok(Some(slot));
                    }
                    if slot.key.is_empty() {
                        return Ok(None);
                    }
                } else {
                    if slot.key.is_empty() {
                        return Ok(None);
                    }
                    bucket = slot.key.chain_target();
                }
            }
        }
    }

    /// Fetch a slot's edge block from `peer`. Dynamic stores read the
    /// whole buddy class so the trailing tag comes along.
    fn read_remote_block(&self, tid: usize, peer: usize, ptr: EdgePtr) -> Result<Vec<u32>> {
        let units = if self.cfg.dynamic_gstore {
            self.block_units(ptr.size() + 1)
        } else {
            ptr.size()
        };
        let mut buf = vec![0u8; (units * 4) as usize];
        self.fabric
            .read(tid, peer, &mut buf, self.mem.layout().edge_offset(ptr.off()))?;
        Ok(buf
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect())
    }

    /// Remote value list with the dynamic coherence loop: retry with a
    /// fresh slot until the block's tag matches the slot's size.
    fn edges_remote(&self, tid: usize, vid: Sid, pid: Sid, dir: Dir) -> Result<Option<Vec<Sid>>> {
        let peer = partition(vid, self.cfg.num_servers);
        let key = EdgeKey::new(vid, pid, dir);
        let Some(mut slot) = self.vertex_remote(tid, peer, key)? else {
            return Ok(None);
        };
        loop {
            if slot.ptr.size() == 0 {
                return Ok(Some(Vec::new()));
            }
            let mut words = self.read_remote_block(tid, peer, slot.ptr)?;
            if !self.cfg.dynamic_gstore {
                return Ok(Some(words));
            }
            let cap = self.block_units(slot.ptr.size() + 1);
            if u64::from(words[(cap - 1) as usize]) == slot.ptr.size() {
                words.truncate(slot.ptr.size() as usize);
                return Ok(Some(words));
            }
            // The block was retired between the slot read and the edge
            // read; drop the cached slot and walk again.
            StoreMetrics::bump(&self.metrics.coherence_retries);
            self.cache.invalidate(key);
            slot = match self.vertex_remote(tid, peer, key)? {
                Some(slot) => slot,
                None => return Ok(None),
            };
        }
    }

    /// Local attribute value; `None` when absent or the tag is not an
    /// attribute type.
    pub fn attr_local(&self, vid: Sid, aid: Sid, dir: Dir) -> Option<AttrValue> {
        let slot = self.lookup_local(EdgeKey::new(vid, aid, dir))?;
        let words: Vec<u32> = (0..slot.ptr.size())
            .map(|i| self.mem.edge(slot.ptr.off() + i))
            .collect();
        match AttrValue::from_words(slot.ptr.attr_type(), &words) {
            Some(v) => Some(v),
            None => {
                tracing::warn!(vid, aid, ty = ?slot.ptr.attr_type(), "unsupported attribute type");
                None
            }
        }
    }

    /// Remote attribute value, tag-validated in dynamic stores. The value
    /// is decoded from the staged transfer buffer.
    pub fn attr_remote(&self, tid: usize, vid: Sid, aid: Sid, dir: Dir) -> Result<Option<AttrValue>> {
        let peer = partition(vid, self.cfg.num_servers);
        let key = EdgeKey::new(vid, aid, dir);
        let Some(mut slot) = self.vertex_remote(tid, peer, key)? else {
            return Ok(None);
        };
        loop {
            if slot.ptr.size() == 0 {
                return Ok(None);
            }
            let words = self.read_remote_block(tid, peer, slot.ptr)?;
            if self.cfg.dynamic_gstore {
                let cap = self.block_units(slot.ptr.size() + 1);
                if u64::from(words[(cap - 1) as usize]) != slot.ptr.size() {
                    StoreMetrics::bump(&self.metrics.coherence_retries);
                    self.cache.invalidate(key);
                    slot = match self.vertex_remote(tid, peer, key)? {
                        Some(slot) => slot,
                        None => return Ok(None),
                    };
                    continue;
                }
            }
            return Ok(match AttrValue::from_words(slot.ptr.attr_type(), &words) {
                Some(v) => Some(v),
                None => {
                    tracing::warn!(vid, aid, ty = ?slot.ptr.attr_type(), "unsupported attribute type");
                    None
                }
            });
        }
    }

    /// Attribute value wherever the vertex lives.
    pub fn attr(&self, tid: usize, vid: Sid, aid: Sid, dir: Dir) -> Result<Option<AttrValue>> {
        if partition(vid, self.cfg.num_servers) == self.sid {
            Ok(self.attr_local(vid, aid, dir))
        } else {
            self.attr_remote(tid, vid, aid, dir)
        }
    }

    // ======================================================================
    // Reporting
    // ======================================================================

    /// Count occupancy and log it, the bulk-load postmortem.
    pub fn usage_report(&self) -> UsageReport {
        let assoc = self.assoc();
        let layout = self.mem.layout();
        let mut main_used = 0u64;
        for bucket in 0..layout.num_buckets {
            let base = bucket * assoc;
            for slot_id in base..base + assoc - 1 {
                if !self.mem.slot_key(slot_id).is_empty() {
                    main_used += 1;
                }
            }
        }
        let ext = self.indirect_used();
        let mut ext_used = 0u64;
        for bucket in layout.num_buckets..layout.num_buckets + ext {
            let base = bucket * assoc;
            for slot_id in base..base + assoc - 1 {
                if !self.mem.slot_key(slot_id).is_empty() {
                    ext_used += 1;
                }
            }
        }
        let report = UsageReport {
            main_slots_used: main_used,
            indirect_buckets_used: ext,
            indirect_slots_used: ext_used,
            entries_used: self.alloc.used_units(),
        };
        tracing::info!(
            main_slots = layout.num_buckets * assoc,
            main_used = report.main_slots_used,
            indirect_buckets = layout.num_buckets_ext,
            indirect_alloced = report.indirect_buckets_used,
            indirect_used = report.indirect_slots_used,
            entries = layout.num_entries,
            entries_used = report.entries_used,
            "store usage"
        );
        report
    }
}

/// Partial index state accumulated by the parallel scan.
#[derive(Default)]
struct IndexAgg {
    pidx_out: FxHashMap<Sid, Vec<Sid>>,
    pidx_in: FxHashMap<Sid, Vec<Sid>>,
    tidx: FxHashMap<Sid, Vec<Sid>>,
    vset: FxHashSet<Sid>,
    tset: FxHashSet<Sid>,
    pset: FxHashSet<Sid>,
}

impl IndexAgg {
    fn merge(mut self, other: Self) -> Self {
        for (k, mut v) in other.pidx_out {
            self.pidx_out.entry(k).or_default().append(&mut v);
        }
        for (k, mut v) in other.pidx_in {
            self.pidx_in.entry(k).or_default().append(&mut v);
        }
        for (k, mut v) in other.tidx {
            self.tidx.entry(k).or_default().append(&mut v);
        }
        self.vset.extend(other.vset);
        self.tset.extend(other.tset);
        self.pset.extend(other.pset);
        self
    }
}
