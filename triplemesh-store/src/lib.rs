//! # Triplemesh Store
//!
//! One shard of the distributed graph key/value store: the cluster-chained
//! hash index over the registered slot region, the edge-heap allocators,
//! the triple-to-KV mapper (bulk and online), the remote read protocol
//! with its coherence loop, the remote vertex cache, and the integrity
//! verifier.
//!
//! A store reads peers through the
//! [`RemoteMemory`](triplemesh_fabric::RemoteMemory) capability only; it
//! never engages a peer worker thread. Locality is decided by the shared
//! partitioning rule, so every worker calls the same
//! [`edges`](graph::GraphStore::edges)/[`attr`](graph::GraphStore::attr)
//! entry points regardless of where a vertex lives.

pub mod alloc;
pub mod cache;
mod clock;
pub mod graph;
pub mod metrics;
pub mod verify;

pub use alloc::{BuddyAlloc, BumpAlloc, EdgeAlloc};
pub use cache::VertexCache;
pub use graph::{GraphStore, UsageReport, NUM_LOCKS};
pub use metrics::{MetricsSnapshot, StoreMetrics};
pub use verify::{verify, IntegrityReport, Violation};
