//! TCP fallback for the one-sided capability.
//!
//! When no one-sided hardware is present, each shard runs a
//! [`RegionServer`] that services peer reads/writes against its local
//! [`ShardMem`], and peers use a [`TcpFabric`] client. The framing is
//! byte-exact with the loopback fabric, so the ring transport and the
//! remote read protocol run unchanged on top of it.
//!
//! ## Wire format
//!
//! Request:  `[op: u8] [off: u64 LE] [len: u64 LE] [payload: len bytes if op = write]`
//! Response: `[status: u8] [payload: len bytes if op = read and status = ok]`
//!
//! One lazily-connected stream per `(thread, peer)` keeps requests from a
//! thread strictly ordered, which preserves the "footer lands last"
//! delivery guarantee across the two writes of a wrapped ring frame.

use crate::mem::ShardMem;
use crate::remote::RemoteMemory;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use triplemesh_core::{Error, Result};

const OP_READ: u8 = 0;
const OP_WRITE: u8 = 1;
const STATUS_OK: u8 = 0;
const STATUS_ERR: u8 = 1;

/// Serves this shard's region to TCP peers.
pub struct RegionServer {
    addr: SocketAddr,
}

impl RegionServer {
    /// Bind `addr` (use port 0 for an ephemeral port) and start serving
    /// `mem` on background threads.
    pub fn spawn(addr: &str, mem: Arc<ShardMem>) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let local = listener.local_addr()?;
        std::thread::Builder::new()
            .name("region-server".into())
            .spawn(move || accept_loop(listener, mem))?;
        tracing::info!(addr = %local, "region server up");
        Ok(Self { addr: local })
    }

    /// The bound address peers should dial.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

fn accept_loop(listener: TcpListener, mem: Arc<ShardMem>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let mem = Arc::clone(&mem);
                let _ = std::thread::Builder::new()
                    .name("region-conn".into())
                    .spawn(move || {
                        if let Err(e) = serve_conn(stream, &mem) {
                            tracing::debug!(error = %e, "region connection closed");
                        }
                    });
            }
            Err(e) => {
                tracing::warn!(error = %e, "region server accept failed");
                return;
            }
        }
    }
}

fn serve_conn(mut stream: TcpStream, mem: &ShardMem) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    let mut header = [0u8; 17];
    loop {
        if let Err(e) = stream.read_exact(&mut header) {
            // Peer hung up between requests.
            return if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Ok(())
            } else {
                Err(e)
            };
        }
        let op = header[0];
        let off = u64::from_le_bytes(header[1..9].try_into().unwrap());
        let len = u64::from_le_bytes(header[9..17].try_into().unwrap()) as usize;

        match op {
            OP_READ => {
                let mut buf = vec![0u8; len];
                match mem.read_at(off, &mut buf) {
                    Ok(()) => {
                        stream.write_all(&[STATUS_OK])?;
                        stream.write_all(&buf)?;
                    }
                    Err(e) => {
                        tracing::warn!(off, len, error = %e, "rejected remote read");
                        stream.write_all(&[STATUS_ERR])?;
                    }
                }
            }
            OP_WRITE => {
                let mut buf = vec![0u8; len];
                stream.read_exact(&mut buf)?;
                match mem.write_at(off, &buf) {
                    Ok(()) => stream.write_all(&[STATUS_OK])?,
                    Err(e) => {
                        tracing::warn!(off, len, error = %e, "rejected remote write");
                        stream.write_all(&[STATUS_ERR])?;
                    }
                }
            }
            _ => {
                tracing::warn!(op, "unknown region op; closing connection");
                return Ok(());
            }
        }
        stream.flush()?;
    }
}

/// TCP client side of the one-sided capability.
pub struct TcpFabric {
    peers: Vec<SocketAddr>,
    // One stream per (thread, peer); lazily connected.
    conns: Vec<Mutex<Option<TcpStream>>>,
}

impl TcpFabric {
    /// Build a fabric dialing `peers`, with `num_threads` issuing threads.
    pub fn new(peers: Vec<SocketAddr>, num_threads: usize) -> Self {
        let conns = (0..num_threads * peers.len().max(1))
            .map(|_| Mutex::new(None))
            .collect();
        Self { peers, conns }
    }

    fn with_conn<T>(
        &self,
        tid: usize,
        peer: usize,
        f: impl FnOnce(&mut TcpStream) -> std::io::Result<T>,
    ) -> Result<T> {
        let addr = *self
            .peers
            .get(peer)
            .ok_or_else(|| Error::remote(format!("no TCP endpoint for shard {peer}")))?;
        let mut guard = self.conns[tid * self.peers.len() + peer].lock();
        if guard.is_none() {
            let stream = TcpStream::connect(addr)
                .map_err(|e| Error::remote(format!("shard {peer} at {addr}: {e}")))?;
            stream.set_nodelay(true)?;
            *guard = Some(stream);
        }
        let stream = guard.as_mut().unwrap();
        match f(stream) {
            Ok(v) => Ok(v),
            Err(e) => {
                // Drop the stream; the next call redials.
                *guard = None;
                Err(Error::remote(format!("shard {peer} at {addr}: {e}")))
            }
        }
    }
}

impl RemoteMemory for TcpFabric {
    fn read(&self, tid: usize, peer: usize, buf: &mut [u8], off: u64) -> Result<()> {
        self.with_conn(tid, peer, |stream| {
            let mut header = [0u8; 17];
            header[0] = OP_READ;
            header[1..9].copy_from_slice(&off.to_le_bytes());
            header[9..17].copy_from_slice(&(buf.len() as u64).to_le_bytes());
            stream.write_all(&header)?;
            stream.flush()?;

            let mut status = [0u8; 1];
            stream.read_exact(&mut status)?;
            if status[0] != STATUS_OK {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "peer rejected read",
                ));
            }
            stream.read_exact(buf)
        })
    }

    fn write(&self, tid: usize, peer: usize, buf: &[u8], off: u64) -> Result<()> {
        self.with_conn(tid, peer, |stream| {
            let mut header = [0u8; 17];
            header[0] = OP_WRITE;
            header[1..9].copy_from_slice(&off.to_le_bytes());
            header[9..17].copy_from_slice(&(buf.len() as u64).to_le_bytes());
            stream.write_all(&header)?;
            stream.write_all(buf)?;
            stream.flush()?;

            let mut status = [0u8; 1];
            stream.read_exact(&mut status)?;
            if status[0] != STATUS_OK {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "peer rejected write",
                ));
            }
            Ok(())
        })
    }
}
