//! The 128-bit index slot.
//!
//! A slot pairs an [`EdgeKey`] with an [`EdgePtr`]; the index region is a
//! flat array of them. Slots cross the wire during remote bucket walks, so
//! the byte encoding is fixed little-endian:
//!
//! ```text
//! [key: u64 LE][ptr: u64 LE]      16 bytes
//! ```

use crate::key::EdgeKey;
use crate::ptr::EdgePtr;

/// Bytes per slot on the wire and in the region layout.
pub const SLOT_BYTES: u64 = 16;

/// One index cell: key plus value pointer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Slot {
    pub key: EdgeKey,
    pub ptr: EdgePtr,
}

impl Slot {
    /// An empty slot.
    pub const EMPTY: Self = Self {
        key: EdgeKey::EMPTY,
        ptr: EdgePtr::NULL,
    };

    /// True when the key field is the empty marker.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    /// Wire encoding.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.key.raw().to_le_bytes());
        out[8..].copy_from_slice(&self.ptr.raw().to_le_bytes());
        out
    }

    /// Decode a slot from 16 wire bytes.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is shorter than 16 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let key = u64::from_le_bytes(bytes[..8].try_into().unwrap());
        let ptr = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        Self {
            key: EdgeKey::from_raw(key),
            ptr: EdgePtr::from_raw(ptr),
        }
    }
}
