//! Triples and typed attribute values.
//!
//! The bulk loader (external) emits triples in id space; the mapper
//! consumes two sorted copies of the same stream (`spo` order and `ops`
//! order). Attribute triples carry a typed literal instead of an object
//! id and are stored under the same key schema with a typed pointer.

use crate::ids::Sid;
use crate::ptr::AttrType;

/// One `(subject, predicate, object)` fact in id space.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Triple {
    pub s: Sid,
    pub p: Sid,
    pub o: Sid,
}

impl Triple {
    pub fn new(s: Sid, p: Sid, o: Sid) -> Self {
        Self { s, p, o }
    }
}

/// One `(subject, attribute, value)` fact.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AttrTriple {
    pub s: Sid,
    pub a: Sid,
    pub v: AttrValue,
}

impl AttrTriple {
    pub fn new(s: Sid, a: Sid, v: AttrValue) -> Self {
        Self { s, a, v }
    }
}

/// Typed attribute literal.
///
/// The edge heap stores values in 32-bit slots, little-endian: `Int` and
/// `Float` take one slot, `Double` takes two (low word first).
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum AttrValue {
    Int(i32),
    Float(f32),
    Double(f64),
}

impl AttrValue {
    /// The 2-bit pointer tag for this value.
    #[inline]
    pub fn attr_type(&self) -> AttrType {
        match self {
            AttrValue::Int(_) => AttrType::Int,
            AttrValue::Float(_) => AttrType::Float,
            AttrValue::Double(_) => AttrType::Double,
        }
    }

    /// Edge slots the encoded value occupies.
    #[inline]
    pub fn payload_slots(&self) -> u64 {
        self.attr_type().payload_slots()
    }

    /// Encode into 32-bit edge words.
    pub fn to_words(&self) -> Vec<u32> {
        match *self {
            AttrValue::Int(v) => vec![v as u32],
            AttrValue::Float(v) => vec![v.to_bits()],
            AttrValue::Double(v) => {
                let bits = v.to_bits();
                vec![bits as u32, (bits >> 32) as u32]
            }
        }
    }

    /// Decode from edge words according to a pointer tag.
    ///
    /// Returns `None` for the sid-list tag (not an attribute) or when the
    /// word slice is too short for the tag.
    pub fn from_words(ty: AttrType, words: &[u32]) -> Option<Self> {
        match ty {
            AttrType::Sid => None,
            AttrType::Int => words.first().map(|&w| AttrValue::Int(w as i32)),
            AttrType::Float => words.first().map(|&w| AttrValue::Float(f32::from_bits(w))),
            AttrType::Double => {
                if words.len() < 2 {
                    return None;
                }
                let bits = u64::from(words[0]) | (u64::from(words[1]) << 32);
                Some(AttrValue::Double(f64::from_bits(bits)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_round_trip() {
        let v = AttrValue::Int(-42);
        assert_eq!(v.payload_slots(), 1);
        let words = v.to_words();
        assert_eq!(AttrValue::from_words(AttrType::Int, &words), Some(v));
    }

    #[test]
    fn test_float_round_trip() {
        let v = AttrValue::Float(3.25);
        let words = v.to_words();
        assert_eq!(AttrValue::from_words(AttrType::Float, &words), Some(v));
    }

    #[test]
    fn test_double_round_trip() {
        let v = AttrValue::Double(-2.5e300);
        assert_eq!(v.payload_slots(), 2);
        let words = v.to_words();
        assert_eq!(words.len(), 2);
        assert_eq!(AttrValue::from_words(AttrType::Double, &words), Some(v));
    }

    #[test]
    fn test_sid_tag_is_not_an_attribute() {
        assert_eq!(AttrValue::from_words(AttrType::Sid, &[1, 2]), None);
    }

    #[test]
    fn test_short_buffer() {
        assert_eq!(AttrValue::from_words(AttrType::Double, &[7]), None);
    }
}
