//! Secondary index structures: hash, range, prefix and suffix.

use std::collections::BTreeMap;
use std::ops::Bound;

use ahash::RandomState;
use common::RowId;
use hashbrown::HashMap;
use parking_lot::RwLock;
use typecode::Value;

/// Equality index: key → set of row handles, O(1) average lookup.
#[derive(Default)]
pub struct HashIndex {
    map: RwLock<HashMap<Value, Vec<RowId>, RandomState>>,
}

impl HashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, key: Value, row: RowId) {
        self.map.write().entry(key).or_default().push(row);
    }

    pub fn remove(&self, key: &Value, row: RowId) {
        let mut map = self.map.write();
        if let Some(rows) = map.get_mut(key) {
            if let Some(pos) = rows.iter().position(|r| *r == row) {
                rows.swap_remove(pos);
            }
            if rows.is_empty() {
                map.remove(key);
            }
        }
    }

    /// Snapshot of the handles currently mapped to `key`.
    pub fn lookup(&self, key: &Value) -> Vec<RowId> {
        self.map.read().get(key).cloned().unwrap_or_default()
    }

    /// Union of lookups, for IN probes.
    pub fn lookup_any(&self, keys: &[Value]) -> Vec<RowId> {
        let map = self.map.read();
        let mut out = Vec::new();
        for key in keys {
            if let Some(rows) = map.get(key) {
                out.extend_from_slice(rows);
            }
        }
        out
    }

    pub fn key_count(&self) -> usize {
        self.map.read().len()
    }
}

/// Ordered index: key → set of row handles with O(log n) range scans.
/// Results are unordered row sets; ordering is the executor's concern.
#[derive(Default)]
pub struct RangeIndex {
    map: RwLock<BTreeMap<Value, Vec<RowId>>>,
}

impl RangeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, key: Value, row: RowId) {
        self.map.write().entry(key).or_default().push(row);
    }

    pub fn remove(&self, key: &Value, row: RowId) {
        let mut map = self.map.write();
        if let Some(rows) = map.get_mut(key) {
            if let Some(pos) = rows.iter().position(|r| *r == row) {
                rows.swap_remove(pos);
            }
            if rows.is_empty() {
                map.remove(key);
            }
        }
    }

    pub fn lookup(&self, key: &Value) -> Vec<RowId> {
        self.map.read().get(key).cloned().unwrap_or_default()
    }

    pub fn between(&self, lo: &Value, hi: &Value, inclusive: (bool, bool)) -> Vec<RowId> {
        let lo = if inclusive.0 {
            Bound::Included(lo.clone())
        } else {
            Bound::Excluded(lo.clone())
        };
        let hi = if inclusive.1 {
            Bound::Included(hi.clone())
        } else {
            Bound::Excluded(hi.clone())
        };
        self.collect((lo, hi))
    }

    pub fn greater(&self, key: &Value, inclusive: bool) -> Vec<RowId> {
        let lo = if inclusive {
            Bound::Included(key.clone())
        } else {
            Bound::Excluded(key.clone())
        };
        self.collect((lo, Bound::Unbounded))
    }

    pub fn less(&self, key: &Value, inclusive: bool) -> Vec<RowId> {
        let hi = if inclusive {
            Bound::Included(key.clone())
        } else {
            Bound::Excluded(key.clone())
        };
        self.collect((Bound::Unbounded, hi))
    }

    fn collect(&self, bounds: (Bound<Value>, Bound<Value>)) -> Vec<RowId> {
        self.map
            .read()
            .range(bounds)
            .flat_map(|(_, rows)| rows.iter().copied())
            .collect()
    }

    pub fn key_count(&self) -> usize {
        self.map.read().len()
    }
}

/// starts-with index over string keys: an ordered map walked over the
/// half-open key range sharing the probe prefix.
pub struct PrefixIndex {
    map: RwLock<BTreeMap<String, Vec<RowId>>>,
    case_insensitive: bool,
}

impl PrefixIndex {
    pub fn new(case_insensitive: bool) -> Self {
        PrefixIndex {
            map: RwLock::default(),
            case_insensitive,
        }
    }

    fn fold(&self, s: &str) -> String {
        if self.case_insensitive {
            s.to_lowercase()
        } else {
            s.to_owned()
        }
    }

    pub fn add(&self, key: &Value, row: RowId) {
        if let Some(s) = key.as_str() {
            self.map.write().entry(self.fold(s)).or_default().push(row);
        }
    }

    pub fn remove(&self, key: &Value, row: RowId) {
        if let Some(s) = key.as_str() {
            let folded = self.fold(s);
            let mut map = self.map.write();
            if let Some(rows) = map.get_mut(&folded) {
                if let Some(pos) = rows.iter().position(|r| *r == row) {
                    rows.swap_remove(pos);
                }
                if rows.is_empty() {
                    map.remove(&folded);
                }
            }
        }
    }

    pub fn starting_with(&self, prefix: &str) -> Vec<RowId> {
        let prefix = self.fold(prefix);
        self.map
            .read()
            .range::<String, _>((Bound::Included(&prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(&prefix))
            .flat_map(|(_, rows)| rows.iter().copied())
            .collect()
    }

    pub fn case_insensitive(&self) -> bool {
        self.case_insensitive
    }
}

/// ends-with index: a prefix index over reversed keys.
pub struct SuffixIndex {
    inner: PrefixIndex,
}

impl SuffixIndex {
    pub fn new(case_insensitive: bool) -> Self {
        SuffixIndex {
            inner: PrefixIndex::new(case_insensitive),
        }
    }

    fn reversed(s: &str) -> String {
        s.chars().rev().collect()
    }

    pub fn add(&self, key: &Value, row: RowId) {
        if let Some(s) = key.as_str() {
            self.inner.add(&Value::str(Self::reversed(s)), row);
        }
    }

    pub fn remove(&self, key: &Value, row: RowId) {
        if let Some(s) = key.as_str() {
            self.inner.remove(&Value::str(Self::reversed(s)), row);
        }
    }

    pub fn ending_with(&self, suffix: &str) -> Vec<RowId> {
        self.inner.starting_with(&Self::reversed(suffix))
    }

    pub fn case_insensitive(&self) -> bool {
        self.inner.case_insensitive()
    }
}
