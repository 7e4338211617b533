//! Closed set of column type codes and the canonical value encoding.
//!
//! Every entity field maps to exactly one [`TypeCode`]; every type code maps
//! to exactly one [`Storage`] class, which decides the dense array a page
//! column allocates. The three date/time carriers all store as `i64`
//! (epoch-millis or epoch-day) and big-decimal/big-integer store as a
//! canonical string, so the storage layer only ever deals with ten physical
//! layouts.
//!
//! [`Value`] is the boundary type between user entities and the engine. It
//! carries a total equality, a total order and a hash so it can key hash and
//! range indexes directly; floats compare by `total_cmp` and hash by bit
//! pattern.

mod operator;

pub use operator::Operator;

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Semantic type tag for one column. The set is closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeCode {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bool,
    Char,
    Str,
    /// UTC timestamp, stored as epoch-millis.
    Instant,
    /// Local calendar date, stored as epoch-day.
    Date,
    /// Local date-time, stored as epoch-millis of the local wall clock.
    DateTime,
    Uuid,
    /// Arbitrary-precision decimal or integer, stored as a canonical string.
    Decimal,
}

/// Physical layout class backing a type code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Storage {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bool,
    Char,
    Str,
    Uuid,
}

impl TypeCode {
    /// Storage class this code occupies on a page.
    pub fn storage(self) -> Storage {
        match self {
            TypeCode::I8 => Storage::I8,
            TypeCode::I16 => Storage::I16,
            TypeCode::I32 => Storage::I32,
            TypeCode::I64 | TypeCode::Instant | TypeCode::Date | TypeCode::DateTime => Storage::I64,
            TypeCode::F32 => Storage::F32,
            TypeCode::F64 => Storage::F64,
            TypeCode::Bool => Storage::Bool,
            TypeCode::Char => Storage::Char,
            TypeCode::Str | TypeCode::Decimal => Storage::Str,
            TypeCode::Uuid => Storage::Uuid,
        }
    }

    /// Small integer tag, stable across the closed set.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// True for the codes whose comparisons follow a numeric total order.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            TypeCode::I8
                | TypeCode::I16
                | TypeCode::I32
                | TypeCode::I64
                | TypeCode::F32
                | TypeCode::F64
                | TypeCode::Instant
                | TypeCode::Date
                | TypeCode::DateTime
        )
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Canonical runtime value for one field.
///
/// `Null` is representable here for the benefit of accessors and query
/// literals; column storage keeps nullness in the per-column presence bitmap
/// instead, and IS NULL / IS NOT NULL consult that bitmap directly.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Char(char),
    Str(Arc<str>),
    Instant(i64),
    Date(i64),
    DateTime(i64),
    Uuid(Uuid),
    Decimal(Arc<str>),
}

impl Value {
    /// Build a string value.
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    /// Build a decimal value from its canonical textual form.
    pub fn decimal(s: impl AsRef<str>) -> Self {
        Value::Decimal(Arc::from(s.as_ref()))
    }

    pub fn instant_from(ts: DateTime<Utc>) -> Self {
        Value::Instant(ts.timestamp_millis())
    }

    pub fn date_from(date: NaiveDate) -> Self {
        Value::Date(i64::from(date.num_days_from_ce() - EPOCH_DAYS_FROM_CE))
    }

    pub fn date_time_from(dt: NaiveDateTime) -> Self {
        Value::DateTime(dt.and_utc().timestamp_millis())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Type code of a non-null value.
    pub fn type_code(&self) -> Option<TypeCode> {
        Some(match self {
            Value::Null => return None,
            Value::I8(_) => TypeCode::I8,
            Value::I16(_) => TypeCode::I16,
            Value::I32(_) => TypeCode::I32,
            Value::I64(_) => TypeCode::I64,
            Value::F32(_) => TypeCode::F32,
            Value::F64(_) => TypeCode::F64,
            Value::Bool(_) => TypeCode::Bool,
            Value::Char(_) => TypeCode::Char,
            Value::Str(_) => TypeCode::Str,
            Value::Instant(_) => TypeCode::Instant,
            Value::Date(_) => TypeCode::Date,
            Value::DateTime(_) => TypeCode::DateTime,
            Value::Uuid(_) => TypeCode::Uuid,
            Value::Decimal(_) => TypeCode::Decimal,
        })
    }

    /// Whether this value may be stored in a column of the given code.
    /// `Null` conforms to every code; nullability is checked separately.
    pub fn conforms_to(&self, code: TypeCode) -> bool {
        match self.type_code() {
            None => true,
            Some(own) => {
                own == code
                    || (own.storage() == code.storage() && own.is_numeric() == code.is_numeric())
            }
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I8(v) => Some(i64::from(*v)),
            Value::I16(v) => Some(i64::from(*v)),
            Value::I32(v) => Some(i64::from(*v)),
            Value::I64(v) | Value::Instant(v) | Value::Date(v) | Value::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    /// Total comparison used by range predicates, ORDER BY and the range
    /// index. Same-type values compare naturally (floats by `total_cmp`);
    /// `Null` sorts first; values of different types fall back to the type
    /// rank, which compiled plans never rely on.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (I8(a), I8(b)) => a.cmp(b),
            (I16(a), I16(b)) => a.cmp(b),
            (I32(a), I32(b)) => a.cmp(b),
            (I64(a), I64(b)) => a.cmp(b),
            (Instant(a), Instant(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (F32(a), F32(b)) => a.total_cmp(b),
            (F64(a), F64(b)) => a.total_cmp(b),
            (Bool(a), Bool(b)) => a.cmp(b),
            (Char(a), Char(b)) => a.cmp(b),
            (Str(a), Str(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Decimal(a), Decimal(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Uuid(a), Uuid(b)) => a.cmp(b),
            // Mixed numeric widths can reach here through argument binding.
            (a, b) if a.as_i64().is_some() && b.as_i64().is_some() => {
                a.as_i64().cmp(&b.as_i64())
            }
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }
}

const EPOCH_DAYS_FROM_CE: i32 = 719_163;

fn rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::I8(_) => 2,
        Value::I16(_) => 3,
        Value::I32(_) => 4,
        Value::I64(_) => 5,
        Value::F32(_) => 6,
        Value::F64(_) => 7,
        Value::Char(_) => 8,
        Value::Str(_) => 9,
        Value::Instant(_) => 10,
        Value::Date(_) => 11,
        Value::DateTime(_) => 12,
        Value::Uuid(_) => 13,
        Value::Decimal(_) => 14,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (F32(a), F32(b)) => a.to_bits() == b.to_bits(),
            (F64(a), F64(b)) => a.to_bits() == b.to_bits(),
            (a, b) => {
                rank(a) == rank(b)
                    && match (a, b) {
                        (I8(x), I8(y)) => x == y,
                        (I16(x), I16(y)) => x == y,
                        (I32(x), I32(y)) => x == y,
                        (I64(x), I64(y)) => x == y,
                        (Bool(x), Bool(y)) => x == y,
                        (Char(x), Char(y)) => x == y,
                        (Str(x), Str(y)) => x == y,
                        (Instant(x), Instant(y)) => x == y,
                        (Date(x), Date(y)) => x == y,
                        (DateTime(x), DateTime(y)) => x == y,
                        (Uuid(x), Uuid(y)) => x == y,
                        (Decimal(x), Decimal(y)) => x == y,
                        _ => false,
                    }
            }
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        rank(self).hash(state);
        match self {
            Value::Null => {}
            Value::I8(v) => v.hash(state),
            Value::I16(v) => v.hash(state),
            Value::I32(v) => v.hash(state),
            Value::I64(v) | Value::Instant(v) | Value::Date(v) | Value::DateTime(v) => {
                v.hash(state)
            }
            Value::F32(v) => v.to_bits().hash(state),
            Value::F64(v) => v.to_bits().hash(state),
            Value::Bool(v) => v.hash(state),
            Value::Char(v) => v.hash(state),
            Value::Str(v) | Value::Decimal(v) => v.hash(state),
            Value::Uuid(v) => v.hash(state),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.total_cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::I8(v) => write!(f, "{v}"),
            Value::I16(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Char(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "'{v}'"),
            Value::Instant(v) => write!(f, "instant({v})"),
            Value::Date(v) => write!(f, "date({v})"),
            Value::DateTime(v) => write!(f, "datetime({v})"),
            Value::Uuid(v) => write!(f, "{v}"),
            Value::Decimal(v) => write!(f, "{v}"),
        }
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::I8(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::I16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<char> for Value {
    fn from(v: char) -> Self {
        Value::Char(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::str(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v.as_str()))
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
