//! Secondary and identity indexes, maintained in lock-step with the store.
//!
//! Callers treat every index as a thread-safe black box: reads return
//! snapshot row-handle sets, writes take short write guards. A reader that
//! reaches a row through an index must still snapshot-read the row itself;
//! an index entry may briefly point at a row whose seqlock is held.

mod id;
mod secondary;
#[cfg(test)]
mod tests;

pub use id::IdIndex;
pub use secondary::{HashIndex, PrefixIndex, RangeIndex, SuffixIndex};

use common::{EngineResult, FieldId, RowId};
use schema::{EntityDescriptor, IndexKind};
use typecode::Value;

/// One secondary index attached to a field.
pub enum FieldIndex {
    Hash(HashIndex),
    Range(RangeIndex),
    Prefix(PrefixIndex),
    Suffix(SuffixIndex),
}

impl FieldIndex {
    pub fn kind(&self) -> IndexKind {
        match self {
            FieldIndex::Hash(_) => IndexKind::Hash,
            FieldIndex::Range(_) => IndexKind::Range,
            FieldIndex::Prefix(_) => IndexKind::Prefix,
            FieldIndex::Suffix(_) => IndexKind::Suffix,
        }
    }

    pub fn add(&self, key: &Value, row: RowId) {
        match self {
            FieldIndex::Hash(ix) => ix.add(key.clone(), row),
            FieldIndex::Range(ix) => ix.add(key.clone(), row),
            FieldIndex::Prefix(ix) => ix.add(key, row),
            FieldIndex::Suffix(ix) => ix.add(key, row),
        }
    }

    pub fn remove(&self, key: &Value, row: RowId) {
        match self {
            FieldIndex::Hash(ix) => ix.remove(key, row),
            FieldIndex::Range(ix) => ix.remove(key, row),
            FieldIndex::Prefix(ix) => ix.remove(key, row),
            FieldIndex::Suffix(ix) => ix.remove(key, row),
        }
    }
}

/// The indexes of one table: the unique id index plus the declared
/// secondary indexes, addressable by field.
pub struct TableIndexes {
    id: IdIndex,
    fields: Vec<(FieldId, FieldIndex)>,
}

impl TableIndexes {
    /// Build from the descriptor's declarations. The config gates whether
    /// prefix/suffix declarations materialize; relationship (foreign-key)
    /// fields get an implicit hash index so joins can back-translate.
    pub fn build(desc: &EntityDescriptor, config: &common::Config) -> EngineResult<Self> {
        let id = IdIndex::for_code(desc.id_descriptor().type_code)?;
        let mut fields = Vec::new();
        for f in &desc.fields {
            if f.is_id || f.transient {
                continue;
            }
            let declared = match f.index {
                Some(spec) => match spec.kind {
                    IndexKind::Hash => Some(FieldIndex::Hash(HashIndex::new())),
                    IndexKind::Range => Some(FieldIndex::Range(RangeIndex::new())),
                    IndexKind::Prefix if config.enable_prefix_index => Some(FieldIndex::Prefix(
                        PrefixIndex::new(spec.case_insensitive),
                    )),
                    IndexKind::Suffix if config.enable_suffix_index => Some(FieldIndex::Suffix(
                        SuffixIndex::new(spec.case_insensitive),
                    )),
                    _ => None,
                },
                None if f.relation.is_some() => Some(FieldIndex::Hash(HashIndex::new())),
                None => None,
            };
            if let Some(ix) = declared {
                fields.push((f.id, ix));
            }
        }
        Ok(TableIndexes { id, fields })
    }

    pub fn id(&self) -> &IdIndex {
        &self.id
    }

    pub fn field(&self, field: FieldId) -> Option<&FieldIndex> {
        self.fields
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, ix)| ix)
    }

    /// Insert the secondary entries for a freshly published row. Null
    /// fields carry no index entry; IS NULL goes to the presence bitmap.
    pub fn add_row(&self, values: &[Value], row: RowId) {
        for (field, ix) in &self.fields {
            let key = &values[*field as usize];
            if !key.is_null() {
                ix.add(key, row);
            }
        }
    }

    /// Remove the secondary entries of a row about to be deleted.
    pub fn remove_row(&self, values: &[Value], row: RowId) {
        for (field, ix) in &self.fields {
            let key = &values[*field as usize];
            if !key.is_null() {
                ix.remove(key, row);
            }
        }
    }

    /// Re-index the fields whose value changed in an in-place update.
    pub fn reindex(&self, old: &[Value], new: &[Value], row: RowId) {
        for (field, ix) in &self.fields {
            let before = &old[*field as usize];
            let after = &new[*field as usize];
            if before == after {
                continue;
            }
            if !before.is_null() {
                ix.remove(before, row);
            }
            if !after.is_null() {
                ix.add(after, row);
            }
        }
    }
}
