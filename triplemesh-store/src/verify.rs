//! Offline integrity verifier.
//!
//! Walks every occupied slot and cross-checks the data-model invariants:
//! type triples present in the type-index, predicate indexes consistent
//! both ways, versatile sets complete, no duplicates inside any value
//! list. Violations are collected and logged; the verifier never aborts —
//! it is a diagnostic pass invoked by tests and tools.

use crate::graph::GraphStore;
use std::fmt;
use triplemesh_core::{is_tpid, is_vid, AttrType, Dir, EdgeKey, Sid, PREDICATE_ID, TYPE_ID};

/// One invariant break found by the verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A value list holds the same sid twice.
    DuplicateValue { key: EdgeKey, value: Sid },
    /// An index entry references a vertex whose matching normal key is
    /// absent.
    MissingNormalKey { index: EdgeKey, expected: EdgeKey },
    /// A normal key is not reflected in the index that must list it.
    MissingIndexValue { index: EdgeKey, value: Sid },
    /// A versatile set is missing a member it must contain.
    MissingVersatileValue { index: EdgeKey, value: Sid },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::DuplicateValue { key, value } => {
                write!(f, "duplicate value {value} in list of {key:?}")
            }
            Violation::MissingNormalKey { index, expected } => {
                write!(f, "index {index:?} references missing key {expected:?}")
            }
            Violation::MissingIndexValue { index, value } => {
                write!(f, "index {index:?} is missing value {value}")
            }
            Violation::MissingVersatileValue { index, value } => {
                write!(f, "versatile set {index:?} is missing value {value}")
            }
        }
    }
}

/// Everything one verifier pass found.
#[derive(Debug, Default)]
pub struct IntegrityReport {
    pub violations: Vec<Violation>,
    pub index_keys_checked: u64,
    pub normal_keys_checked: u64,
}

impl IntegrityReport {
    /// Overall pass/fail.
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }

    fn record(&mut self, v: Violation) {
        tracing::error!(violation = %v, "integrity violation");
        self.violations.push(v);
    }
}

/// Run the cross-checks over `store`.
///
/// `index_check` covers the derived index families; `normal_check` covers
/// normal keys against those indexes. Attribute literals are excluded on
/// both sides.
pub fn verify(store: &GraphStore, index_check: bool, normal_check: bool) -> IntegrityReport {
    let versatile = store.versatile();
    let mut report = IntegrityReport::default();
    let mut slots = Vec::new();
    store.scan_slots(|_, slot| {
        if slot.ptr.attr_type() == AttrType::Sid {
            slots.push(slot);
        }
    });

    for slot in &slots {
        let key = slot.key;
        let vid = key.vid();
        let pid = key.pid();

        let values = store
            .edges_local(vid, pid, key.dir())
            .unwrap_or_default();
        check_duplicates(key, &values, &mut report);

        if vid == 0 && is_tpid(pid) {
            if !index_check {
                continue;
            }
            report.index_keys_checked += 1;
            match key.dir() {
                // (0, p, OUT): subjects with p; (0, t, IN) or (0, p, IN):
                // type members or objects with p.
                Dir::Out => idx_check(store, key, &values, Dir::Out, &mut report),
                Dir::In => idx_check_in(store, key, &values, &mut report),
            }
            if versatile {
                ver_idx_check(store, key, &values, &mut report);
            }
        } else if is_vid(vid) && pid == TYPE_ID && key.dir() == Dir::Out {
            if !normal_check {
                continue;
            }
            report.normal_keys_checked += 1;
            nt_check(store, key, &values, &mut report);
            if versatile {
                ver_nt_check(store, key, &mut report);
            }
        } else if is_vid(vid) && is_tpid(pid) {
            if !normal_check {
                continue;
            }
            report.normal_keys_checked += 1;
            // The same-direction predicate index must list this vertex.
            np_check(store, key, &mut report);
        }
    }
    report
}

fn check_duplicates(key: EdgeKey, values: &[Sid], report: &mut IntegrityReport) {
    let mut seen = std::collections::HashSet::new();
    for &v in values {
        if !seen.insert(v) {
            report.record(Violation::DuplicateValue { key, value: v });
        }
    }
}

/// `(0, p, OUT)` entries: every listed subject has `(s, p, OUT)`.
fn idx_check(
    store: &GraphStore,
    index: EdgeKey,
    values: &[Sid],
    dir: Dir,
    report: &mut IntegrityReport,
) {
    for &v in values {
        let expected = EdgeKey::new(v, index.pid(), dir);
        if !store.check_key_exist(expected) {
            report.record(Violation::MissingNormalKey { index, expected });
        }
    }
}

/// `(0, x, IN)` entries are either a type-index (members list type `x`)
/// or a predicate-index (members have an `x` IN-edge key).
fn idx_check_in(store: &GraphStore, index: EdgeKey, values: &[Sid], report: &mut IntegrityReport) {
    for &v in values {
        let types = store.edges_local(v, TYPE_ID, Dir::Out).unwrap_or_default();
        if types.contains(&index.pid()) {
            continue;
        }
        let expected = EdgeKey::new(v, index.pid(), Dir::In);
        if !store.check_key_exist(expected) {
            report.record(Violation::MissingNormalKey { index, expected });
        }
    }
}

/// `(vid, TYPE_ID, OUT)`: each listed type's index lists `vid`.
fn nt_check(store: &GraphStore, key: EdgeKey, types: &[Sid], report: &mut IntegrityReport) {
    for &t in types {
        let index = EdgeKey::new(0, t, Dir::In);
        let members = store.edges_local(0, t, Dir::In).unwrap_or_default();
        if !members.contains(&key.vid()) {
            report.record(Violation::MissingIndexValue {
                index,
                value: key.vid(),
            });
        }
    }
}

/// `(vid, p, d)`: the predicate index on side `d` lists `vid`.
fn np_check(store: &GraphStore, key: EdgeKey, report: &mut IntegrityReport) {
    let index = EdgeKey::new(0, key.pid(), key.dir());
    let members = store
        .edges_local(0, key.pid(), key.dir())
        .unwrap_or_default();
    if !members.contains(&key.vid()) {
        report.record(Violation::MissingIndexValue {
            index,
            value: key.vid(),
        });
    }
}

/// Versatile completeness for index keys: the t/pid is known to the
/// all-types or all-predicates set, and every member is a known vertex.
fn ver_idx_check(store: &GraphStore, index: EdgeKey, values: &[Sid], report: &mut IntegrityReport) {
    let tset = store.edges_local(0, TYPE_ID, Dir::Out).unwrap_or_default();
    let pset = store
        .edges_local(0, PREDICATE_ID, Dir::Out)
        .unwrap_or_default();
    if !tset.contains(&index.pid()) && !pset.contains(&index.pid()) {
        report.record(Violation::MissingVersatileValue {
            index: EdgeKey::new(0, PREDICATE_ID, Dir::Out),
            value: index.pid(),
        });
    }
    let vset = store.edges_local(0, TYPE_ID, Dir::In).unwrap_or_default();
    for &v in values {
        if !vset.contains(&v) {
            report.record(Violation::MissingVersatileValue {
                index: EdgeKey::new(0, TYPE_ID, Dir::In),
                value: v,
            });
        }
    }
}

/// Versatile completeness for `(vid, TYPE_ID, OUT)`: the vertex's
/// predicate list records TYPE_ID and the vertex is a known local vertex.
fn ver_nt_check(store: &GraphStore, key: EdgeKey, report: &mut IntegrityReport) {
    let preds = store
        .edges_local(key.vid(), PREDICATE_ID, Dir::Out)
        .unwrap_or_default();
    if !preds.contains(&TYPE_ID) {
        report.record(Violation::MissingVersatileValue {
            index: EdgeKey::new(key.vid(), PREDICATE_ID, Dir::Out),
            value: TYPE_ID,
        });
    }
    let vset = store.edges_local(0, TYPE_ID, Dir::In).unwrap_or_default();
    if !vset.contains(&key.vid()) {
        report.record(Violation::MissingVersatileValue {
            index: EdgeKey::new(0, TYPE_ID, Dir::In),
            value: key.vid(),
        });
    }
}
