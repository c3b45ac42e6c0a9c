//! Identifier space shared by every shard.
//!
//! All graph entities — subjects, objects, predicates, types — live in one
//! flat `u32` id space produced by the (external) dictionary encoder. The
//! space is split by a fixed threshold:
//!
//! ```text
//! [0, 2^17)   type / predicate ids ("t/pids"), including two sentinels
//! [2^17, ..)  vertex ids ("vids"): subjects and objects
//! ```
//!
//! The split is load-bearing: the bulk loader sorts object-first triple
//! streams so that every `rdf:type` triple (whose object is a t/pid)
//! clusters at the front, and keys reserve exactly [`TPID_BITS`] bits for
//! the predicate field.

use serde::{Deserialize, Serialize};

/// String id: the fixed-width unsigned id every graph entity maps to.
pub type Sid = u32;

/// Number of bits reserved for type/predicate ids.
pub const TPID_BITS: u32 = 17;

/// First vertex id; everything below is a t/pid.
pub const VID_MIN: Sid = 1 << TPID_BITS;

/// Reserved id used as the predicate of "index" keys and, in the versatile
/// schema, as the pseudo-predicate listing a vertex's predicates.
pub const PREDICATE_ID: Sid = 0;

/// Reserved id for `rdf:type`. Type triples are index-only: they never
/// produce an IN-direction edge key.
pub const TYPE_ID: Sid = 1;

/// True for ordinary (non-sentinel) type/predicate ids.
#[inline]
pub fn is_tpid(id: Sid) -> bool {
    id > TYPE_ID && id < VID_MIN
}

/// True for vertex (subject/object) ids.
#[inline]
pub fn is_vid(id: Sid) -> bool {
    id >= VID_MIN
}

/// Edge direction, from the key owner's point of view.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Dir {
    /// The key's vertex is the object; values are subjects.
    In = 0,
    /// The key's vertex is the subject; values are objects.
    Out = 1,
}

impl Dir {
    /// The opposite direction.
    #[inline]
    pub fn flip(self) -> Self {
        match self {
            Dir::In => Dir::Out,
            Dir::Out => Dir::In,
        }
    }

    /// Decode from the key's 1-bit field.
    #[inline]
    pub fn from_bit(bit: u64) -> Self {
        if bit == 0 {
            Dir::In
        } else {
            Dir::Out
        }
    }
}

/// Owning shard of a vertex id: plain modulo partitioning.
///
/// Every shard computes this identically; remote readers use it to pick
/// the peer whose index region they walk.
#[inline]
pub fn partition(vid: Sid, num_servers: usize) -> usize {
    vid as usize % num_servers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_space_split() {
        assert!(!is_tpid(PREDICATE_ID));
        assert!(!is_tpid(TYPE_ID));
        assert!(is_tpid(2));
        assert!(is_tpid(VID_MIN - 1));
        assert!(!is_tpid(VID_MIN));
        assert!(is_vid(VID_MIN));
        assert!(!is_vid(VID_MIN - 1));
    }

    #[test]
    fn test_dir_flip() {
        assert_eq!(Dir::In.flip(), Dir::Out);
        assert_eq!(Dir::Out.flip(), Dir::In);
        assert_eq!(Dir::from_bit(0), Dir::In);
        assert_eq!(Dir::from_bit(1), Dir::Out);
    }

    #[test]
    fn test_partition_stability() {
        assert_eq!(partition(131_072, 3), 131_072 % 3);
        assert_eq!(partition(131_073, 1), 0);
    }
}
