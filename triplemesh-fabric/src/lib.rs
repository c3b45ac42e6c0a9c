//! # Triplemesh Fabric
//!
//! The cluster's memory and messaging substrate:
//!
//! - [`mem`]: each shard's registered region and its byte layout — index
//!   slots, edge heap, scratch, rings, head mirrors — backed by atomic
//!   words so local workers and one-sided peers share it safely.
//! - [`remote`]: the [`RemoteMemory`](remote::RemoteMemory) capability
//!   (synchronous one-sided read/write) with an in-process loopback
//!   implementation.
//! - [`tcp`]: the TCP fallback implementing the same capability over
//!   request/response framing.
//! - [`ring`]: per-(reader thread, writer shard) bounded rings with
//!   `[size][payload][size]` frames, overflow detection, wrap-around
//!   framing, and a round-robin receive scheduler.
//! - [`adaptor`]: the worker facade exchanging variant-tagged bundles
//!   over whichever fabric the deployment selected.
//!
//! No async runtime: workers are native threads, sends complete
//! synchronously, and waits are spin loops, mirroring the suspension
//! points of the store itself.

pub mod adaptor;
pub mod mem;
pub mod remote;
pub mod ring;
pub mod tcp;

pub use adaptor::{select_fabric, Adaptor, Bundle, MessageKind};
pub use mem::{MemLayout, ShardMem, EDGE_BYTES};
pub use remote::{DownFabric, LoopbackFabric, RemoteMemory};
pub use ring::RingTransport;
pub use tcp::{RegionServer, TcpFabric};
