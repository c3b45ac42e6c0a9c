//! Packed 64-bit edge key.
//!
//! An [`EdgeKey`] names one value list in the store: which vertex, which
//! predicate, which direction. The three fields pack into a single `u64`:
//!
//! ```text
//! bits 63..18  vid (u46)   vertex id, or 0 for index keys
//! bits 17..1   pid (u17)   type/predicate id
//! bit       0  dir         0 = IN, 1 = OUT
//! ```
//!
//! The all-zero word is reserved as the empty-slot marker, so `(0,
//! PREDICATE_ID, IN)` is not a legal key — the schema never produces it.
//!
//! ## Bucket addressing
//!
//! `hash()` scrambles the packed word with a fixed mix ([`crate::hash`]).
//! Remote readers reproduce a peer's bucket address from the key alone,
//! which is why neither the packing nor the scramble may ever change
//! behind a running cluster.

use crate::hash::scramble_u64;
use crate::ids::{Dir, Sid};
use std::fmt;

/// Bits reserved for the direction flag.
pub const DIR_BITS: u32 = 1;
/// Bits reserved for the predicate field (the t/pid range).
pub const PID_BITS: u32 = crate::ids::TPID_BITS;
/// Bits left for the vertex field.
pub const VID_BITS: u32 = 64 - PID_BITS - DIR_BITS;

const PID_SHIFT: u32 = DIR_BITS;
const VID_SHIFT: u32 = DIR_BITS + PID_BITS;
const PID_MAX: u64 = (1 << PID_BITS) - 1;
const VID_MAX: u64 = (1 << VID_BITS) - 1;

/// Packed `(vid, pid, dir)` key. All-zero means "empty slot".
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct EdgeKey(u64);

impl EdgeKey {
    /// The empty-slot marker.
    pub const EMPTY: Self = Self(0);

    /// Pack a key from its parts.
    ///
    /// # Panics
    ///
    /// Panics if `vid` or `pid` would be truncated. Key truncation is a
    /// programmer error in the mapper, never a data-dependent condition.
    #[inline]
    pub fn new(vid: Sid, pid: Sid, dir: Dir) -> Self {
        let vid = vid as u64;
        let pid = pid as u64;
        assert!(vid <= VID_MAX, "vid {vid} exceeds {VID_BITS} bits");
        assert!(pid <= PID_MAX, "pid {pid} exceeds {PID_BITS} bits");
        Self((vid << VID_SHIFT) | (pid << PID_SHIFT) | dir as u64)
    }

    /// Reconstruct from a packed word (remote reads, chain links).
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The packed word.
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Vertex field.
    #[inline]
    pub fn vid(self) -> Sid {
        (self.0 >> VID_SHIFT) as Sid
    }

    /// Predicate field.
    #[inline]
    pub fn pid(self) -> Sid {
        ((self.0 >> PID_SHIFT) & PID_MAX) as Sid
    }

    /// Direction flag.
    #[inline]
    pub fn dir(self) -> Dir {
        Dir::from_bit(self.0 & 1)
    }

    /// Empty-slot test.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Stable 64-bit hash of the packed key.
    #[inline]
    pub fn hash(self) -> u64 {
        scramble_u64(self.0)
    }

    /// Main-region bucket this key probes first.
    #[inline]
    pub fn bucket_of(self, num_buckets: u64) -> u64 {
        self.hash() % num_buckets
    }

    /// A chain-link pseudo-key: the vid field carries the id of the next
    /// bucket. Only ever stored in the last slot of a bucket.
    #[inline]
    pub fn chain_link(next_bucket: u64) -> Self {
        assert!(next_bucket <= VID_MAX, "bucket id exceeds {VID_BITS} bits");
        Self(next_bucket << VID_SHIFT)
    }

    /// The bucket id stored in a chain-link pseudo-key.
    #[inline]
    pub fn chain_target(self) -> u64 {
        self.0 >> VID_SHIFT
    }
}

impl fmt::Debug for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}|{}|{:?}]", self.vid(), self.pid(), self.dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{TYPE_ID, VID_MIN};

    #[test]
    fn test_round_trip() {
        let k = EdgeKey::new(VID_MIN + 5, 37, Dir::Out);
        assert_eq!(k.vid(), VID_MIN + 5);
        assert_eq!(k.pid(), 37);
        assert_eq!(k.dir(), Dir::Out);
        assert!(!k.is_empty());
    }

    #[test]
    fn test_empty_marker() {
        assert!(EdgeKey::EMPTY.is_empty());
        assert!(EdgeKey::from_raw(0).is_empty());
        // The IN direction with zero ids is the empty word by design.
        assert_eq!(EdgeKey::new(0, 0, Dir::In), EdgeKey::EMPTY);
        assert!(!EdgeKey::new(0, TYPE_ID, Dir::In).is_empty());
    }

    #[test]
    fn test_equality_is_all_three_fields() {
        let a = EdgeKey::new(VID_MIN, 3, Dir::Out);
        assert_ne!(a, EdgeKey::new(VID_MIN, 3, Dir::In));
        assert_ne!(a, EdgeKey::new(VID_MIN, 4, Dir::Out));
        assert_ne!(a, EdgeKey::new(VID_MIN + 1, 3, Dir::Out));
        assert_eq!(a, EdgeKey::new(VID_MIN, 3, Dir::Out));
    }

    #[test]
    #[should_panic(expected = "exceeds")]
    fn test_pid_truncation_panics() {
        EdgeKey::new(0, 1 << PID_BITS, Dir::Out);
    }

    #[test]
    fn test_chain_link() {
        let link = EdgeKey::chain_link(12_345);
        assert_eq!(link.chain_target(), 12_345);
        assert!(!link.is_empty());
        assert_eq!(link.pid(), 0);
    }

    #[test]
    fn test_hash_stable_across_equal_keys() {
        let a = EdgeKey::new(VID_MIN + 9, 2, Dir::In);
        let b = EdgeKey::new(VID_MIN + 9, 2, Dir::In);
        assert_eq!(a.hash(), b.hash());
    }
}
