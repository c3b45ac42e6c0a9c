//! Worker-facing message facade.
//!
//! Workers exchange [`Bundle`]s — a one-byte message kind plus an opaque
//! payload (serialized queries, result rows, control messages). The
//! adaptor frames bundles onto whichever ring transport the deployment
//! selected: the one-sided-backed transport when the fabric is up, or the
//! TCP-backed transport with identical framing semantics otherwise (see
//! [`select_fabric`]).

use crate::remote::RemoteMemory;
use crate::ring::RingTransport;
use std::sync::Arc;
use triplemesh_core::{Error, Result, StoreConfig};

/// Message kind tag, the first byte of every framed bundle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// A (serialized) query to execute.
    Query = 0,
    /// A result set going back to the issuer.
    Reply = 1,
    /// Loader traffic during ingestion.
    Load = 2,
    /// Control traffic (integrity checks, shutdown).
    Check = 3,
}

impl TryFrom<u8> for MessageKind {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(MessageKind::Query),
            1 => Ok(MessageKind::Reply),
            2 => Ok(MessageKind::Load),
            3 => Ok(MessageKind::Check),
            other => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown message kind {other}"),
            ))),
        }
    }
}

/// One message between workers: kind byte plus payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bundle {
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

impl Bundle {
    pub fn new(kind: MessageKind, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    /// Frame for the wire: `[kind][payload]`. Never empty, which is what
    /// lets the ring use its header word as the message-present flag.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.payload.len());
        out.push(self.kind as u8);
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse a framed bundle.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&kind, payload) = bytes.split_first().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "empty bundle frame",
            ))
        })?;
        Ok(Self {
            kind: MessageKind::try_from(kind)?,
            payload: payload.to_vec(),
        })
    }
}

/// Pick the transport fabric for a deployment: the one-sided fabric when
/// configured and up, otherwise the TCP fallback.
pub fn select_fabric(
    cfg: &StoreConfig,
    one_sided: Option<Arc<dyn RemoteMemory>>,
    tcp: Arc<dyn RemoteMemory>,
) -> Arc<dyn RemoteMemory> {
    match one_sided {
        Some(fabric) if cfg.use_rdma && fabric.is_up() => fabric,
        _ => tcp,
    }
}

/// Per-thread entry point for shard-to-shard messaging.
pub struct Adaptor {
    tid: usize,
    ring: Arc<RingTransport>,
}

impl Adaptor {
    pub fn new(tid: usize, ring: Arc<RingTransport>) -> Self {
        Self { tid, ring }
    }

    /// Send a bundle to worker `dst_tid` on shard `dst_sid`.
    ///
    /// `Ok(false)` means the destination ring is full; retry or back off.
    pub fn send(&self, dst_sid: usize, dst_tid: usize, bundle: &Bundle) -> Result<bool> {
        self.ring.send(self.tid, dst_sid, dst_tid, &bundle.encode())
    }

    /// Blocking receive, round-robinning source shards.
    pub fn recv(&self) -> Result<Bundle> {
        let bytes = self.ring.recv(self.tid)?;
        Bundle::decode(&bytes)
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Result<Option<Bundle>> {
        match self.ring.try_recv(self.tid)? {
            Some(bytes) => Ok(Some(Bundle::decode(&bytes)?)),
            None => Ok(None),
        }
    }
}
