//! Unique primary-key indexes, specialized per key type.

use std::sync::Arc;

use ahash::RandomState;
use common::{EngineError, EngineResult, RowId};
use hashbrown::HashMap;
use parking_lot::RwLock;
use typecode::{TypeCode, Value};
use uuid::Uuid;

type Map<K> = RwLock<HashMap<K, RowId, RandomState>>;

/// Total, unique map from primary key to row handle. Inserting a duplicate
/// key is an error; the caller decides whether that means "update instead".
pub enum IdIndex {
    Long(Map<i64>),
    Str(Map<Arc<str>>),
    Uuid(Map<Uuid>),
}

impl IdIndex {
    /// Pick the specialization for the id field's type code.
    pub fn for_code(code: TypeCode) -> EngineResult<Self> {
        match code.storage() {
            typecode::Storage::I8
            | typecode::Storage::I16
            | typecode::Storage::I32
            | typecode::Storage::I64 => Ok(IdIndex::Long(RwLock::default())),
            typecode::Storage::Str => Ok(IdIndex::Str(RwLock::default())),
            typecode::Storage::Uuid => Ok(IdIndex::Uuid(RwLock::default())),
            other => Err(EngineError::TypeMismatch(format!(
                "unsupported id column storage {other:?}"
            ))),
        }
    }

    /// Insert a fresh id. `DuplicateId` if the key is already mapped.
    pub fn insert_unique(&self, id: &Value, row: RowId) -> EngineResult<()> {
        match self {
            IdIndex::Long(map) => {
                let key = id
                    .as_i64()
                    .ok_or_else(|| EngineError::TypeMismatch(format!("integer id expected, got {id}")))?;
                match map.write().try_insert(key, row) {
                    Ok(_) => Ok(()),
                    Err(_) => Err(EngineError::DuplicateId(key.to_string())),
                }
            }
            IdIndex::Str(map) => {
                let key: Arc<str> = match id {
                    Value::Str(s) | Value::Decimal(s) => s.clone(),
                    other => {
                        return Err(EngineError::TypeMismatch(format!(
                            "string id expected, got {other}"
                        )))
                    }
                };
                match map.write().try_insert(key.clone(), row) {
                    Ok(_) => Ok(()),
                    Err(_) => Err(EngineError::DuplicateId(key.to_string())),
                }
            }
            IdIndex::Uuid(map) => {
                let key = id
                    .as_uuid()
                    .ok_or_else(|| EngineError::TypeMismatch(format!("uuid id expected, got {id}")))?;
                match map.write().try_insert(key, row) {
                    Ok(_) => Ok(()),
                    Err(_) => Err(EngineError::DuplicateId(key.to_string())),
                }
            }
        }
    }

    /// Point an existing key at a new handle (or insert it), atomically
    /// under the map's write guard. Used to swap a reservation for the real
    /// handle without a window where the key is absent.
    pub fn replace(&self, id: &Value, row: RowId) -> EngineResult<()> {
        match self {
            IdIndex::Long(map) => {
                let key = id
                    .as_i64()
                    .ok_or_else(|| EngineError::TypeMismatch(format!("integer id expected, got {id}")))?;
                map.write().insert(key, row);
            }
            IdIndex::Str(map) => {
                let key: Arc<str> = match id {
                    Value::Str(s) | Value::Decimal(s) => s.clone(),
                    other => {
                        return Err(EngineError::TypeMismatch(format!(
                            "string id expected, got {other}"
                        )))
                    }
                };
                map.write().insert(key, row);
            }
            IdIndex::Uuid(map) => {
                let key = id
                    .as_uuid()
                    .ok_or_else(|| EngineError::TypeMismatch(format!("uuid id expected, got {id}")))?;
                map.write().insert(key, row);
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &Value) -> Option<RowId> {
        match self {
            IdIndex::Long(map) => map.read().get(&id.as_i64()?).copied(),
            IdIndex::Str(map) => map.read().get(id.as_str()?).copied(),
            IdIndex::Uuid(map) => map.read().get(&id.as_uuid()?).copied(),
        }
    }

    /// Explicit removal on delete.
    pub fn remove(&self, id: &Value) -> Option<RowId> {
        match self {
            IdIndex::Long(map) => map.write().remove(&id.as_i64()?),
            IdIndex::Str(map) => map.write().remove(id.as_str()?),
            IdIndex::Uuid(map) => map.write().remove(&id.as_uuid()?),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            IdIndex::Long(map) => map.read().len(),
            IdIndex::Str(map) => map.read().len(),
            IdIndex::Uuid(map) => map.read().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
