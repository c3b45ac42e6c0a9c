//! The one-sided remote memory capability.
//!
//! Everything above this seam — the ring transport, remote bucket walks,
//! remote edge fetches — is written against [`RemoteMemory`] and assumes
//! nothing beyond its contract: synchronous byte-exact reads and writes
//! against a peer's registered region, with writes delivered in ascending
//! address order within one call so that a trailing word lands last.
//!
//! Two implementations ship here: [`LoopbackFabric`] for co-located shards
//! (and as the stand-in for real one-sided hardware in tests), and the TCP
//! fallback in [`crate::tcp`].

use crate::mem::ShardMem;
use std::sync::Arc;
use triplemesh_core::{Error, Result};

/// Synchronous one-sided access to peer shard regions.
///
/// `tid` names the issuing thread; implementations may use it to pick a
/// per-thread channel, and completion of a call means the operation is
/// durable in the peer's region. Offsets address the peer's [`MemLayout`]
/// (both sides compute it from the same configuration).
///
/// [`MemLayout`]: crate::mem::MemLayout
pub trait RemoteMemory: Send + Sync {
    /// Read `buf.len()` bytes from `peer`'s region at `off`.
    fn read(&self, tid: usize, peer: usize, buf: &mut [u8], off: u64) -> Result<()>;

    /// Write `buf` into `peer`'s region at `off`.
    fn write(&self, tid: usize, peer: usize, buf: &[u8], off: u64) -> Result<()>;

    /// Whether the fabric is initialized and can reach peers.
    fn is_up(&self) -> bool {
        true
    }
}

/// In-process fabric over directly shared shard regions.
///
/// Used when every shard lives in one process (tests, single-host
/// deployments) and as the reference for what one-sided hardware must
/// provide: word-granular delivery in ascending address order.
pub struct LoopbackFabric {
    shards: Vec<Arc<ShardMem>>,
}

impl LoopbackFabric {
    pub fn new(shards: Vec<Arc<ShardMem>>) -> Self {
        Self { shards }
    }

    fn shard(&self, peer: usize) -> Result<&Arc<ShardMem>> {
        self.shards
            .get(peer)
            .ok_or_else(|| Error::remote(format!("no shard {peer} on loopback fabric")))
    }
}

impl RemoteMemory for LoopbackFabric {
    fn read(&self, _tid: usize, peer: usize, buf: &mut [u8], off: u64) -> Result<()> {
        self.shard(peer)?.read_at(off, buf)
    }

    fn write(&self, _tid: usize, peer: usize, buf: &[u8], off: u64) -> Result<()> {
        self.shard(peer)?.write_at(off, buf)
    }
}

/// A fabric that is never up; every operation reports the peer as
/// unreachable. Stands in where a deployment has no one-sided hardware
/// and no TCP endpoints configured.
pub struct DownFabric;

impl RemoteMemory for DownFabric {
    fn read(&self, _tid: usize, peer: usize, _buf: &mut [u8], _off: u64) -> Result<()> {
        Err(Error::remote(format!("fabric down; shard {peer} unreachable")))
    }

    fn write(&self, _tid: usize, peer: usize, _buf: &[u8], _off: u64) -> Result<()> {
        Err(Error::remote(format!("fabric down; shard {peer} unreachable")))
    }

    fn is_up(&self) -> bool {
        false
    }
}
