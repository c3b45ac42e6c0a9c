//! Per-thread ring transport over one-sided writes.
//!
//! Every reader thread owns one bounded ring per writer shard, allocated
//! in the reader's region. Writers on a shard share the ring for a given
//! `(dst_shard, dst_thread)` pair, serialized by a per-ring lock; the
//! reader consumes its rings without any lock, scheduling source shards
//! round-robin.
//!
//! ## Frame format
//!
//! ```text
//! [size: u64] [payload, zero-padded to a multiple of 8] [size: u64]
//! ```
//!
//! Both words carry the payload length (not the padded length). The header
//! doubles as the message-present flag, so a frame body of zero bytes is
//! not representable at this layer — the adaptor's type byte keeps every
//! payload non-empty.
//!
//! ## Why the reader polls the footer
//!
//! One-sided writes deliver bytes without a strict intra-call order
//! guarantee beyond ascending word delivery, and a wrapped frame arrives
//! as two writes. The writer stages the footer as the last word of the
//! frame, so its final value is the completion witness: once the footer
//! equals the header size, every byte before it is visible. The reader
//! therefore spins on the footer, never on a tail cursor.
//!
//! ## Overflow
//!
//! The writer-side view of the reader's progress is the head mirror in the
//! writer's own region, which the reader republishes only after consuming
//! `ring_size / 8` bytes since the last publish. The overflow test
//! `ring_size < tail - published_head + msg_size` is therefore
//! conservative; `send` reports `false` and the caller retries.

use crate::mem::ShardMem;
use crate::remote::RemoteMemory;
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use triplemesh_core::{round8, Error, Result};

/// Reader-side per-ring state: consumed bytes and the last value pushed to
/// the writer's head mirror.
#[derive(Default)]
struct LocalHead {
    head: u64,
    published: u64,
}

/// Symmetric ring transport for one shard.
pub struct RingTransport {
    sid: usize,
    num_servers: usize,
    num_threads: usize,
    ring_size: u64,
    mem: Arc<ShardMem>,
    fabric: Arc<dyn RemoteMemory>,
    /// Writer tails, indexed `(dst_sid, dst_tid)`.
    rmeta: Vec<CachePadded<Mutex<u64>>>,
    /// Reader heads, indexed `(tid, src_sid)`.
    lmeta: Vec<CachePadded<Mutex<LocalHead>>>,
    /// Round-robin cursor per reader thread.
    sched: Vec<CachePadded<AtomicU64>>,
}

impl RingTransport {
    /// Build the transport for shard `sid` over its own region and a
    /// fabric reaching every peer region.
    pub fn new(sid: usize, mem: Arc<ShardMem>, fabric: Arc<dyn RemoteMemory>) -> Self {
        let layout = mem.layout();
        let num_servers = layout.num_servers;
        let num_threads = layout.num_engines;
        let nrings = num_servers * num_threads;
        Self {
            sid,
            num_servers,
            num_threads,
            ring_size: layout.ring_size,
            mem,
            fabric,
            rmeta: (0..nrings).map(|_| CachePadded::new(Mutex::new(0))).collect(),
            lmeta: (0..nrings)
                .map(|_| CachePadded::new(Mutex::new(LocalHead::default())))
                .collect(),
            sched: (0..num_threads)
                .map(|_| CachePadded::new(AtomicU64::new(0)))
                .collect(),
        }
    }

    /// Whether the underlying fabric can reach peers.
    pub fn is_up(&self) -> bool {
        self.fabric.is_up()
    }

    /// Send `data` from thread `tid` to `(dst_sid, dst_tid)`.
    ///
    /// Returns `Ok(false)` when the frame would overrun the reader; the
    /// caller retries or backs off. A frame that cannot fit the ring at
    /// all is an error.
    pub fn send(&self, tid: usize, dst_sid: usize, dst_tid: usize, data: &[u8]) -> Result<bool> {
        debug_assert!(!data.is_empty(), "ring frames carry at least one byte");
        let data_sz = data.len() as u64;
        let msg_sz = 8 + round8(data_sz) + 8;
        if msg_sz > self.ring_size {
            return Err(Error::RingTooSmall {
                msg_size: msg_sz,
                ring_size: self.ring_size,
            });
        }

        // Reserve the frame's byte range under the per-ring lock.
        let off = {
            let mut tail = self.rmeta[dst_sid * self.num_threads + dst_tid].lock();
            let head = self.mem.head_load(dst_tid, dst_sid);
            if self.ring_size < tail.wrapping_sub(head) + msg_sz {
                return Ok(false);
            }
            let off = *tail;
            *tail += msg_sz;
            off
        };

        if dst_sid == self.sid {
            self.write_local(dst_tid, off, data);
        } else {
            self.write_remote(tid, dst_sid, dst_tid, off, data)?;
        }
        Ok(true)
    }

    /// Frame `data` directly into our own ring `(dst_tid, self.sid)`.
    fn write_local(&self, dst_tid: usize, off: u64, data: &[u8]) {
        let rs = self.ring_size;
        let data_sz = data.len() as u64;

        self.mem
            .ring_store(dst_tid, self.sid, off % rs, data_sz);
        let mut pos = off + 8;
        for chunk in data.chunks(8) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            self.mem
                .ring_store(dst_tid, self.sid, pos % rs, u64::from_le_bytes(word));
            pos += 8;
        }
        // Footer last: readers treat it as the completion witness.
        self.mem
            .ring_store(dst_tid, self.sid, (off + 8 + round8(data_sz)) % rs, data_sz);
    }

    /// Stage the whole frame and push it into the peer's ring with one or
    /// two one-sided writes (two when it straddles the ring end).
    fn write_remote(
        &self,
        tid: usize,
        dst_sid: usize,
        dst_tid: usize,
        off: u64,
        data: &[u8],
    ) -> Result<()> {
        let rs = self.ring_size;
        let data_sz = data.len() as u64;
        let msg_sz = 8 + round8(data_sz) + 8;

        let mut frame = vec![0u8; msg_sz as usize];
        frame[..8].copy_from_slice(&data_sz.to_le_bytes());
        frame[8..8 + data.len()].copy_from_slice(data);
        frame[(8 + round8(data_sz)) as usize..].copy_from_slice(&data_sz.to_le_bytes());

        let ring_base = self.mem.layout().ring_offset(dst_tid, self.sid);
        let first = off % rs;
        if first + msg_sz <= rs {
            self.fabric
                .write(tid, dst_sid, &frame, ring_base + first)?;
        } else {
            let split = (rs - first) as usize;
            self.fabric
                .write(tid, dst_sid, &frame[..split], ring_base + first)?;
            self.fabric.write(tid, dst_sid, &frame[split..], ring_base)?;
        }
        Ok(())
    }

    /// Blocking receive for thread `tid`, round-robinning source shards.
    pub fn recv(&self, tid: usize) -> Result<Vec<u8>> {
        loop {
            let src_sid =
                (self.sched[tid].fetch_add(1, Ordering::Relaxed) % self.num_servers as u64) as usize;
            if self.check(tid, src_sid) {
                return self.fetch(tid, src_sid);
            }
            std::hint::spin_loop();
        }
    }

    /// Single non-blocking pass over all source shards.
    pub fn try_recv(&self, tid: usize) -> Result<Option<Vec<u8>>> {
        for src_sid in 0..self.num_servers {
            if self.check(tid, src_sid) {
                return self.fetch(tid, src_sid).map(Some);
            }
        }
        Ok(None)
    }

    /// Message present iff the header word at the head is nonzero.
    fn check(&self, tid: usize, src_sid: usize) -> bool {
        let head = self.lmeta[tid * self.num_servers + src_sid].lock().head;
        self.mem.ring_load(tid, src_sid, head % self.ring_size) != 0
    }

    /// Consume one frame from ring `(tid, src_sid)`.
    fn fetch(&self, tid: usize, src_sid: usize) -> Result<Vec<u8>> {
        let rs = self.ring_size;
        let mut lmeta = self.lmeta[tid * self.num_servers + src_sid].lock();
        let head = lmeta.head;

        let data_sz = self.mem.ring_load(tid, src_sid, head % rs);
        self.mem.ring_store(tid, src_sid, head % rs, 0);

        // The footer is written last by the writer; equality proves the
        // whole frame is visible.
        let footer_off = (head + 8 + round8(data_sz)) % rs;
        loop {
            let footer = self.mem.ring_load(tid, src_sid, footer_off);
            if footer == data_sz {
                break;
            }
            debug_assert!(footer == 0, "footer is either absent or the size");
            std::hint::spin_loop();
        }
        self.mem.ring_store(tid, src_sid, footer_off, 0);

        // Copy out and zero the payload region word by word (wrap-aware).
        let mut payload = Vec::with_capacity(round8(data_sz) as usize);
        let mut pos = head + 8;
        for _ in 0..round8(data_sz) / 8 {
            let word = self.mem.ring_load(tid, src_sid, pos % rs);
            payload.extend_from_slice(&word.to_le_bytes());
            self.mem.ring_store(tid, src_sid, pos % rs, 0);
            pos += 8;
        }
        payload.truncate(data_sz as usize);

        lmeta.head = head + 8 + round8(data_sz) + 8;

        // Lazily republish our progress so writers can pass the overflow
        // check; a remote writer learns it through its head mirror.
        if lmeta.head - lmeta.published > rs / 8 {
            lmeta.published = lmeta.head;
            if src_sid == self.sid {
                self.mem.head_store(tid, self.sid, lmeta.head);
            } else {
                let off = self.mem.layout().head_offset(tid, self.sid);
                self.fabric
                    .write(tid, src_sid, &lmeta.head.to_le_bytes(), off)?;
            }
        }

        Ok(payload)
    }
}
