//! Typed column storage for one page, plus the in-place scan kernels.
//!
//! Cells are atomic so scans may run concurrently with row writers; torn
//! reads of a single cell are impossible and cross-field consistency is the
//! row seqlock's job (a scan only selects candidates; rows are re-verified
//! under the seqlock before they are returned to callers).
//!
//! Each column keeps its own value-present bitmap (null tracking), distinct
//! from the page's row-liveness bitmap: IS NULL consults it directly and
//! every other operator skips cells whose bit is clear.

use std::sync::atomic::{
    AtomicBool, AtomicI16, AtomicI32, AtomicI64, AtomicI8, AtomicU32, AtomicU64, Ordering,
};

use ahash::RandomState;
use hashbrown::HashSet;
use typecode::{Operator, Storage, TypeCode, Value};

use crate::bitmap::Bitmap;
use crate::like::like_match;
use crate::pool::{StringPool, NO_STRING};

/// Substring scan modes of the string columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextMode {
    StartsWith,
    EndsWith,
    Contains,
    Like,
}

/// One column on one page: dense atomic cells plus the value-present bitmap.
pub struct PageColumn {
    present: Box<[AtomicU64]>,
    cells: Cells,
}

enum Cells {
    I8(Box<[AtomicI8]>),
    I16(Box<[AtomicI16]>),
    I32(Box<[AtomicI32]>),
    I64(Box<[AtomicI64]>),
    F32(Box<[AtomicU32]>),
    F64(Box<[AtomicU64]>),
    Bool(Box<[AtomicBool]>),
    Char(Box<[AtomicU32]>),
    Str(Box<[AtomicU32]>),
    Uuid {
        msb: Box<[AtomicU64]>,
        lsb: Box<[AtomicU64]>,
    },
}

fn zeroed_u64(n: usize) -> Box<[AtomicU64]> {
    (0..n).map(|_| AtomicU64::new(0)).collect()
}

fn zeroed_u32(n: usize) -> Box<[AtomicU32]> {
    (0..n).map(|_| AtomicU32::new(0)).collect()
}

impl PageColumn {
    pub fn new(storage: Storage, capacity: usize) -> Self {
        let cells = match storage {
            Storage::I8 => Cells::I8((0..capacity).map(|_| AtomicI8::new(0)).collect()),
            Storage::I16 => Cells::I16((0..capacity).map(|_| AtomicI16::new(0)).collect()),
            Storage::I32 => Cells::I32((0..capacity).map(|_| AtomicI32::new(0)).collect()),
            Storage::I64 => Cells::I64((0..capacity).map(|_| AtomicI64::new(0)).collect()),
            Storage::F32 => Cells::F32(zeroed_u32(capacity)),
            Storage::F64 => Cells::F64(zeroed_u64(capacity)),
            Storage::Bool => Cells::Bool((0..capacity).map(|_| AtomicBool::new(false)).collect()),
            Storage::Char => Cells::Char(zeroed_u32(capacity)),
            Storage::Str => Cells::Str(
                (0..capacity).map(|_| AtomicU32::new(NO_STRING)).collect(),
            ),
            Storage::Uuid => Cells::Uuid {
                msb: zeroed_u64(capacity),
                lsb: zeroed_u64(capacity),
            },
        };
        PageColumn {
            present: zeroed_u64(capacity.div_ceil(64)),
            cells,
        }
    }

    pub fn value_present(&self, slot: usize) -> bool {
        self.present[slot / 64].load(Ordering::Acquire) & (1 << (slot % 64)) != 0
    }

    fn set_present(&self, slot: usize) {
        self.present[slot / 64].fetch_or(1 << (slot % 64), Ordering::Release);
    }

    fn clear_present(&self, slot: usize) {
        self.present[slot / 64].fetch_and(!(1 << (slot % 64)), Ordering::Release);
    }

    /// Snapshot of the value-present words as a bitmap.
    pub fn present_bitmap(&self, capacity: usize) -> Bitmap {
        let words = self
            .present
            .iter()
            .map(|w| w.load(Ordering::Acquire))
            .collect();
        Bitmap::from_words(capacity, words)
    }

    /// Read the cell at `slot` as a semantic value of `code`.
    pub fn load(&self, slot: usize, code: TypeCode, pool: &StringPool) -> Value {
        if !self.value_present(slot) {
            return Value::Null;
        }
        match (&self.cells, code) {
            (Cells::I8(a), _) => Value::I8(a[slot].load(Ordering::Relaxed)),
            (Cells::I16(a), _) => Value::I16(a[slot].load(Ordering::Relaxed)),
            (Cells::I32(a), _) => Value::I32(a[slot].load(Ordering::Relaxed)),
            (Cells::I64(a), TypeCode::Instant) => Value::Instant(a[slot].load(Ordering::Relaxed)),
            (Cells::I64(a), TypeCode::Date) => Value::Date(a[slot].load(Ordering::Relaxed)),
            (Cells::I64(a), TypeCode::DateTime) => Value::DateTime(a[slot].load(Ordering::Relaxed)),
            (Cells::I64(a), _) => Value::I64(a[slot].load(Ordering::Relaxed)),
            (Cells::F32(a), _) => Value::F32(f32::from_bits(a[slot].load(Ordering::Relaxed))),
            (Cells::F64(a), _) => Value::F64(f64::from_bits(a[slot].load(Ordering::Relaxed))),
            (Cells::Bool(a), _) => Value::Bool(a[slot].load(Ordering::Relaxed)),
            (Cells::Char(a), _) => {
                Value::Char(char::from_u32(a[slot].load(Ordering::Relaxed)).unwrap_or('\0'))
            }
            (Cells::Str(a), code) => {
                let handle = a[slot].load(Ordering::Relaxed);
                if handle == NO_STRING {
                    return Value::Null;
                }
                let s = pool.get(handle);
                match code {
                    TypeCode::Decimal => Value::Decimal(s),
                    _ => Value::Str(s),
                }
            }
            (Cells::Uuid { msb, lsb }, _) => {
                let hi = msb[slot].load(Ordering::Relaxed) as u128;
                let lo = lsb[slot].load(Ordering::Relaxed) as u128;
                Value::Uuid(uuid::Uuid::from_u128(hi << 64 | lo))
            }
        }
    }

    /// Write the cell at `slot`. A `Null` clears the value-present bit and
    /// leaves the cell unread. Type conformance is the caller's invariant;
    /// a mismatch here is a bug, not an error.
    pub fn store(&self, slot: usize, value: &Value, pool: &StringPool) {
        if value.is_null() {
            self.clear_present(slot);
            if let Cells::Str(a) = &self.cells {
                a[slot].store(NO_STRING, Ordering::Relaxed);
            }
            return;
        }
        match (&self.cells, value) {
            (Cells::I8(a), v) => a[slot].store(
                v.as_i64().expect("i8 column write") as i8,
                Ordering::Relaxed,
            ),
            (Cells::I16(a), v) => a[slot].store(
                v.as_i64().expect("i16 column write") as i16,
                Ordering::Relaxed,
            ),
            (Cells::I32(a), v) => a[slot].store(
                v.as_i64().expect("i32 column write") as i32,
                Ordering::Relaxed,
            ),
            (Cells::I64(a), v) => {
                a[slot].store(v.as_i64().expect("i64 column write"), Ordering::Relaxed)
            }
            (Cells::F32(a), Value::F32(v)) => a[slot].store(v.to_bits(), Ordering::Relaxed),
            (Cells::F64(a), Value::F64(v)) => a[slot].store(v.to_bits(), Ordering::Relaxed),
            (Cells::F64(a), Value::F32(v)) => {
                a[slot].store(f64::from(*v).to_bits(), Ordering::Relaxed)
            }
            (Cells::Bool(a), Value::Bool(v)) => a[slot].store(*v, Ordering::Relaxed),
            (Cells::Char(a), Value::Char(v)) => a[slot].store(*v as u32, Ordering::Relaxed),
            (Cells::Str(a), v) => {
                let s = v.as_str().expect("string column write");
                a[slot].store(pool.intern(s), Ordering::Relaxed);
            }
            (Cells::Uuid { msb, lsb }, Value::Uuid(v)) => {
                let bits = v.as_u128();
                msb[slot].store((bits >> 64) as u64, Ordering::Relaxed);
                lsb[slot].store(bits as u64, Ordering::Relaxed);
            }
            (_, v) => unreachable!("storage class mismatch writing {v:?}"),
        }
        self.set_present(slot);
    }

    /// Null out reference storage when a row is deleted.
    pub fn clear(&self, slot: usize) {
        self.clear_present(slot);
        if let Cells::Str(a) = &self.cells {
            a[slot].store(NO_STRING, Ordering::Relaxed);
        }
    }

    // ---- scans ------------------------------------------------------------

    /// Comparison scan: Eq, Ne, Lt, Le, Gt, Ge. `live` is the page's
    /// row-liveness bitmap; cells without a present value never match.
    pub fn scan_cmp(
        &self,
        op: Operator,
        probe: &Value,
        live: &Bitmap,
        pool: &StringPool,
        ignore_case: bool,
    ) -> Bitmap {
        let mut out = Bitmap::new(live.len());
        match &self.cells {
            Cells::I8(_) | Cells::I16(_) | Cells::I32(_) | Cells::I64(_) => {
                let probe = probe.as_i64().expect("numeric probe");
                self.each_i64(live, |slot, v| {
                    if int_cmp_matches(op, v, probe) {
                        out.set(slot);
                    }
                });
            }
            Cells::F32(a) => {
                let probe = float_probe(probe);
                for slot in live.ones() {
                    if !self.value_present(slot) {
                        continue;
                    }
                    let v = f64::from(f32::from_bits(a[slot].load(Ordering::Relaxed)));
                    if float_cmp_matches(op, v, probe) {
                        out.set(slot);
                    }
                }
            }
            Cells::F64(a) => {
                let probe = float_probe(probe);
                for slot in live.ones() {
                    if !self.value_present(slot) {
                        continue;
                    }
                    let v = f64::from_bits(a[slot].load(Ordering::Relaxed));
                    if float_cmp_matches(op, v, probe) {
                        out.set(slot);
                    }
                }
            }
            Cells::Bool(a) => {
                let probe = probe.as_bool().expect("bool probe");
                for slot in live.ones() {
                    if !self.value_present(slot) {
                        continue;
                    }
                    let v = a[slot].load(Ordering::Relaxed);
                    let hit = match op {
                        Operator::Eq => v == probe,
                        Operator::Ne => v != probe,
                        _ => unreachable!("bool comparison {op:?}"),
                    };
                    if hit {
                        out.set(slot);
                    }
                }
            }
            Cells::Char(a) => {
                let probe = match probe {
                    Value::Char(c) => *c as u32,
                    other => unreachable!("char probe {other:?}"),
                };
                for slot in live.ones() {
                    if !self.value_present(slot) {
                        continue;
                    }
                    let v = a[slot].load(Ordering::Relaxed);
                    let hit = match op {
                        Operator::Eq => v == probe,
                        Operator::Ne => v != probe,
                        _ => unreachable!("char comparison {op:?}"),
                    };
                    if hit {
                        out.set(slot);
                    }
                }
            }
            Cells::Str(a) => {
                let needle = probe.as_str().expect("string probe");
                if ignore_case {
                    let needle = needle.to_lowercase();
                    let snap = pool.snapshot();
                    for slot in live.ones() {
                        if !self.value_present(slot) {
                            continue;
                        }
                        let handle = a[slot].load(Ordering::Relaxed);
                        if handle == NO_STRING {
                            continue;
                        }
                        let eq = snap.resolve(handle).to_lowercase() == needle;
                        let hit = match op {
                            Operator::Eq => eq,
                            Operator::Ne => !eq,
                            _ => unreachable!("string comparison {op:?}"),
                        };
                        if hit {
                            out.set(slot);
                        }
                    }
                } else {
                    // Interning makes equality a handle compare; a probe the
                    // pool has never seen matches nothing.
                    let wanted = pool.find(needle);
                    for slot in live.ones() {
                        if !self.value_present(slot) {
                            continue;
                        }
                        let handle = a[slot].load(Ordering::Relaxed);
                        if handle == NO_STRING {
                            continue;
                        }
                        let eq = Some(handle) == wanted;
                        let hit = match op {
                            Operator::Eq => eq,
                            Operator::Ne => !eq,
                            _ => unreachable!("string comparison {op:?}"),
                        };
                        if hit {
                            out.set(slot);
                        }
                    }
                }
            }
            Cells::Uuid { msb, lsb } => {
                let probe = probe.as_uuid().expect("uuid probe").as_u128();
                for slot in live.ones() {
                    if !self.value_present(slot) {
                        continue;
                    }
                    let hi = msb[slot].load(Ordering::Relaxed) as u128;
                    let lo = lsb[slot].load(Ordering::Relaxed) as u128;
                    let v = hi << 64 | lo;
                    let hit = match op {
                        Operator::Eq => v == probe,
                        Operator::Ne => v != probe,
                        _ => unreachable!("uuid comparison {op:?}"),
                    };
                    if hit {
                        out.set(slot);
                    }
                }
            }
        }
        out
    }

    /// Range scan over numeric columns with per-bound inclusivity.
    pub fn scan_between(
        &self,
        lo: &Value,
        hi: &Value,
        inclusive: (bool, bool),
        live: &Bitmap,
    ) -> Bitmap {
        let mut out = Bitmap::new(live.len());
        match &self.cells {
            Cells::I8(_) | Cells::I16(_) | Cells::I32(_) | Cells::I64(_) => {
                let lo = lo.as_i64().expect("numeric lower bound");
                let hi = hi.as_i64().expect("numeric upper bound");
                self.each_i64(live, |slot, v| {
                    let above = if inclusive.0 { v >= lo } else { v > lo };
                    let below = if inclusive.1 { v <= hi } else { v < hi };
                    if above && below {
                        out.set(slot);
                    }
                });
            }
            Cells::F32(_) | Cells::F64(_) => {
                let lo = float_probe(lo);
                let hi = float_probe(hi);
                self.each_f64(live, |slot, v| {
                    let above = if inclusive.0 {
                        v.total_cmp(&lo).is_ge()
                    } else {
                        v.total_cmp(&lo).is_gt()
                    };
                    let below = if inclusive.1 {
                        v.total_cmp(&hi).is_le()
                    } else {
                        v.total_cmp(&hi).is_lt()
                    };
                    if above && below {
                        out.set(slot);
                    }
                });
            }
            _ => unreachable!("range scan on non-numeric column"),
        }
        out
    }

    /// IN / NOT IN membership scan.
    pub fn scan_in(
        &self,
        probes: &[Value],
        negate: bool,
        live: &Bitmap,
        pool: &StringPool,
        ignore_case: bool,
    ) -> Bitmap {
        let mut out = Bitmap::new(live.len());
        match &self.cells {
            Cells::I8(_) | Cells::I16(_) | Cells::I32(_) | Cells::I64(_) => {
                let set: HashSet<i64, RandomState> =
                    probes.iter().filter_map(Value::as_i64).collect();
                self.each_i64(live, |slot, v| {
                    if set.contains(&v) != negate {
                        out.set(slot);
                    }
                });
            }
            Cells::Char(a) => {
                let set: HashSet<u32, RandomState> = probes
                    .iter()
                    .filter_map(|p| match p {
                        Value::Char(c) => Some(*c as u32),
                        _ => None,
                    })
                    .collect();
                for slot in live.ones() {
                    if !self.value_present(slot) {
                        continue;
                    }
                    let v = a[slot].load(Ordering::Relaxed);
                    if set.contains(&v) != negate {
                        out.set(slot);
                    }
                }
            }
            Cells::Str(a) if ignore_case => {
                let set: HashSet<String, RandomState> = probes
                    .iter()
                    .filter_map(|p| p.as_str().map(str::to_lowercase))
                    .collect();
                let snap = pool.snapshot();
                for slot in live.ones() {
                    if !self.value_present(slot) {
                        continue;
                    }
                    let handle = a[slot].load(Ordering::Relaxed);
                    if handle == NO_STRING {
                        continue;
                    }
                    let hit = set.contains(&snap.resolve(handle).to_lowercase());
                    if hit != negate {
                        out.set(slot);
                    }
                }
            }
            Cells::Str(a) => {
                // Probes the pool never interned cannot match any cell.
                let set: HashSet<u32, RandomState> = probes
                    .iter()
                    .filter_map(|p| p.as_str().and_then(|s| pool.find(s)))
                    .collect();
                for slot in live.ones() {
                    if !self.value_present(slot) {
                        continue;
                    }
                    let handle = a[slot].load(Ordering::Relaxed);
                    if handle == NO_STRING {
                        continue;
                    }
                    if set.contains(&handle) != negate {
                        out.set(slot);
                    }
                }
            }
            Cells::Uuid { msb, lsb } => {
                let set: HashSet<u128, RandomState> = probes
                    .iter()
                    .filter_map(|p| p.as_uuid().map(|u| u.as_u128()))
                    .collect();
                for slot in live.ones() {
                    if !self.value_present(slot) {
                        continue;
                    }
                    let hi = msb[slot].load(Ordering::Relaxed) as u128;
                    let lo = lsb[slot].load(Ordering::Relaxed) as u128;
                    if set.contains(&(hi << 64 | lo)) != negate {
                        out.set(slot);
                    }
                }
            }
            _ => unreachable!("membership scan on unsupported column"),
        }
        out
    }

    /// Substring scans: STARTING_WITH / ENDING_WITH / CONTAINING / LIKE.
    pub fn scan_text(
        &self,
        mode: TextMode,
        pattern: &str,
        negate: bool,
        ignore_case: bool,
        live: &Bitmap,
        pool: &StringPool,
    ) -> Bitmap {
        let Cells::Str(a) = &self.cells else {
            unreachable!("text scan on non-string column");
        };
        let mut out = Bitmap::new(live.len());
        let folded;
        let pattern = if ignore_case && mode != TextMode::Like {
            folded = pattern.to_lowercase();
            &folded
        } else {
            pattern
        };
        let snap = pool.snapshot();
        for slot in live.ones() {
            if !self.value_present(slot) {
                continue;
            }
            let handle = a[slot].load(Ordering::Relaxed);
            if handle == NO_STRING {
                continue;
            }
            let cell = snap.resolve(handle);
            let folded_cell;
            let cell = if ignore_case && mode != TextMode::Like {
                folded_cell = cell.to_lowercase();
                folded_cell.as_str()
            } else {
                cell
            };
            let hit = match mode {
                TextMode::StartsWith => cell.starts_with(pattern),
                TextMode::EndsWith => cell.ends_with(pattern),
                TextMode::Contains => cell.contains(pattern),
                TextMode::Like => like_match(pattern, cell, ignore_case),
            };
            if hit != negate {
                out.set(slot);
            }
        }
        out
    }

    /// IS_TRUE / IS_FALSE over boolean columns.
    pub fn scan_bool_is(&self, want: bool, live: &Bitmap) -> Bitmap {
        let Cells::Bool(a) = &self.cells else {
            unreachable!("boolean scan on non-bool column");
        };
        let mut out = Bitmap::new(live.len());
        for slot in live.ones() {
            if !self.value_present(slot) {
                continue;
            }
            if a[slot].load(Ordering::Relaxed) == want {
                out.set(slot);
            }
        }
        out
    }

    // Shared traversal for integer-class cells.
    fn each_i64(&self, live: &Bitmap, mut f: impl FnMut(usize, i64)) {
        for slot in live.ones() {
            if !self.value_present(slot) {
                continue;
            }
            let v = match &self.cells {
                Cells::I8(a) => i64::from(a[slot].load(Ordering::Relaxed)),
                Cells::I16(a) => i64::from(a[slot].load(Ordering::Relaxed)),
                Cells::I32(a) => i64::from(a[slot].load(Ordering::Relaxed)),
                Cells::I64(a) => a[slot].load(Ordering::Relaxed),
                _ => unreachable!("integer traversal"),
            };
            f(slot, v);
        }
    }

    fn each_f64(&self, live: &Bitmap, mut f: impl FnMut(usize, f64)) {
        for slot in live.ones() {
            if !self.value_present(slot) {
                continue;
            }
            let v = match &self.cells {
                Cells::F32(a) => f64::from(f32::from_bits(a[slot].load(Ordering::Relaxed))),
                Cells::F64(a) => f64::from_bits(a[slot].load(Ordering::Relaxed)),
                _ => unreachable!("float traversal"),
            };
            f(slot, v);
        }
    }
}

fn int_cmp_matches(op: Operator, v: i64, probe: i64) -> bool {
    match op {
        Operator::Eq => v == probe,
        Operator::Ne => v != probe,
        Operator::Lt => v < probe,
        Operator::Le => v <= probe,
        Operator::Gt => v > probe,
        Operator::Ge => v >= probe,
        _ => unreachable!("integer comparison {op:?}"),
    }
}

fn float_cmp_matches(op: Operator, v: f64, probe: f64) -> bool {
    let ord = v.total_cmp(&probe);
    match op {
        Operator::Eq => ord.is_eq(),
        Operator::Ne => ord.is_ne(),
        Operator::Lt => ord.is_lt(),
        Operator::Le => ord.is_le(),
        Operator::Gt => ord.is_gt(),
        Operator::Ge => ord.is_ge(),
        _ => unreachable!("float comparison {op:?}"),
    }
}

fn float_probe(v: &Value) -> f64 {
    match v {
        Value::F32(x) => f64::from(*x),
        Value::F64(x) => *x,
        other => other.as_i64().map(|i| i as f64).expect("float probe"),
    }
}
