//! Error types for triplemesh-core

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type shared across the store and fabric crates.
///
/// `CapacityExhausted` and `DuplicateKey` indicate misconfiguration or a
/// mapper logic error; callers are expected to treat them as fatal.
/// `RemoteUnavailable` is recoverable — the caller surfaces not-found or
/// retries. Not-found itself is never an error.
#[derive(Error, Debug)]
pub enum Error {
    /// A fixed region (indirect buckets, edge heap) ran out of space.
    #[error("capacity exhausted: {0}")]
    CapacityExhausted(String),

    /// Checked insert found the key already present.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// The fabric is down or the target shard is unreachable.
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// A single frame cannot fit the ring at all.
    #[error("message of {msg_size} bytes exceeds ring of {ring_size} bytes")]
    RingTooSmall { msg_size: u64, ring_size: u64 },

    /// Attribute pointer carried a tag outside {int, float, double}.
    #[error("unsupported attribute type tag {0}")]
    UnsupportedAttrType(u8),

    /// Configuration rejected at startup.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// I/O error (TCP fallback transport).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a capacity-exhausted error
    pub fn capacity(msg: impl Into<String>) -> Self {
        Error::CapacityExhausted(msg.into())
    }

    /// Create a duplicate-key error
    pub fn duplicate(msg: impl Into<String>) -> Self {
        Error::DuplicateKey(msg.into())
    }

    /// Create a remote-unavailable error
    pub fn remote(msg: impl Into<String>) -> Self {
        Error::RemoteUnavailable(msg.into())
    }

    /// Create an invalid-config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::InvalidConfig(msg.into())
    }
}
