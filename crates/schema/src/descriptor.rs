//! Entity and field descriptors.

use common::{EngineError, EngineResult, FieldId};
use serde::{Deserialize, Serialize};
use typecode::TypeCode;

/// Identity assignment policy for an entity's primary key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdStrategy {
    /// Monotonic per-table i64 counter; assigned when the saved entity's id
    /// is unset. Never reused, even after deletion.
    Generated,
    /// Random v4 UUID assigned when the saved entity's id is nil.
    Uuid,
    /// The caller always provides the id.
    Provided,
}

/// Kind of secondary index declared on a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    /// O(1) equality lookups.
    Hash,
    /// Ordered lookups: between, gt/ge/lt/le.
    Range,
    /// starts-with lookups.
    Prefix,
    /// ends-with lookups (stores reversed keys).
    Suffix,
}

/// Index declaration on a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub kind: IndexKind,
    /// When set, keys are lowercased before indexing and queries lowercase
    /// the probe; meaningful for string fields only.
    pub case_insensitive: bool,
}

/// Relationship declaration: the field's column stores the target entity's
/// primary-key value and dotted query paths resolve through it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Target entity name as registered in the schema registry.
    pub target: String,
}

/// One field of an entity: column position, semantic type and annotations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub id: FieldId,
    pub name: String,
    /// Lowercased name with underscores stripped; the tokenizer's
    /// longest-prefix resolution compares against this form.
    pub norm: String,
    pub type_code: TypeCode,
    pub nullable: bool,
    pub is_id: bool,
    pub transient: bool,
    pub relation: Option<Relation>,
    pub index: Option<IndexSpec>,
    /// Converter id resolved against the converter registry at setup.
    pub converter: Option<String>,
}

/// Builder-flavored field declaration consumed by [`EntityDescriptor::builder`].
#[derive(Clone, Debug)]
pub struct Field {
    name: String,
    type_code: TypeCode,
    nullable: bool,
    is_id: bool,
    transient: bool,
    relation: Option<Relation>,
    index: Option<IndexSpec>,
    converter: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, type_code: TypeCode) -> Self {
        Field {
            name: name.into(),
            type_code,
            nullable: false,
            is_id: false,
            transient: false,
            relation: None,
            index: None,
            converter: None,
        }
    }

    pub fn id(mut self) -> Self {
        self.is_id = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn indexed(mut self, kind: IndexKind) -> Self {
        self.index = Some(IndexSpec {
            kind,
            case_insensitive: false,
        });
        self
    }

    pub fn indexed_ignore_case(mut self, kind: IndexKind) -> Self {
        self.index = Some(IndexSpec {
            kind,
            case_insensitive: true,
        });
        self
    }

    pub fn relation(mut self, target: impl Into<String>) -> Self {
        self.relation = Some(Relation {
            target: target.into(),
        });
        self
    }

    pub fn converter(mut self, id: impl Into<String>) -> Self {
        self.converter = Some(id.into());
        self
    }
}

/// Complete metadata for one entity type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Short entity name used in queries (`FROM User u`).
    pub name: String,
    /// Fully-qualified identifier of the user value type, for diagnostics.
    pub type_name: String,
    pub fields: Vec<FieldDescriptor>,
    pub id_field: FieldId,
    pub id_strategy: IdStrategy,
}

impl EntityDescriptor {
    pub fn builder(name: impl Into<String>, type_name: impl Into<String>) -> Builder {
        Builder {
            name: name.into(),
            type_name: type_name.into(),
            id_strategy: IdStrategy::Provided,
            fields: Vec::new(),
        }
    }

    pub fn field(&self, id: FieldId) -> &FieldDescriptor {
        &self.fields[id as usize]
    }

    pub fn id_descriptor(&self) -> &FieldDescriptor {
        &self.fields[self.id_field as usize]
    }

    /// Field lookup by exact name.
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Field whose normalized name equals the normalized probe, used for
    /// case-insensitive property resolution.
    pub fn field_by_norm(&self, probe: &str) -> Option<&FieldDescriptor> {
        let probe = normalize(probe);
        self.fields.iter().find(|f| f.norm == probe)
    }

    /// Fields carrying an index declaration.
    pub fn indexed_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.index.is_some())
    }

    /// Relationship fields.
    pub fn relation_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.relation.is_some())
    }
}

/// Lowercase and strip underscores: the shared normal form for property
/// names, so `first_name` matches the token `FirstName`.
pub(crate) fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

pub struct Builder {
    name: String,
    type_name: String,
    id_strategy: IdStrategy,
    fields: Vec<Field>,
}

impl Builder {
    pub fn id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Validate and seal the descriptor: exactly one id field, unique
    /// (normalized) names, id neither nullable nor transient.
    pub fn build(self) -> EngineResult<EntityDescriptor> {
        let mut id_field = None;
        let mut fields = Vec::with_capacity(self.fields.len());
        for (i, f) in self.fields.into_iter().enumerate() {
            let id = i as FieldId;
            let norm = normalize(&f.name);
            if fields.iter().any(|existing: &FieldDescriptor| existing.norm == norm) {
                return Err(EngineError::BadInput(format!(
                    "entity '{}': duplicate field name '{}'",
                    self.name, f.name
                )));
            }
            if f.is_id {
                if id_field.is_some() {
                    return Err(EngineError::BadInput(format!(
                        "entity '{}': more than one id field",
                        self.name
                    )));
                }
                if f.nullable || f.transient {
                    return Err(EngineError::BadInput(format!(
                        "entity '{}': id field '{}' may not be nullable or transient",
                        self.name, f.name
                    )));
                }
                id_field = Some(id);
            }
            fields.push(FieldDescriptor {
                id,
                name: f.name,
                norm,
                type_code: f.type_code,
                nullable: f.nullable,
                is_id: f.is_id,
                transient: f.transient,
                relation: f.relation,
                index: f.index,
                converter: f.converter,
            });
        }
        let id_field = id_field.ok_or_else(|| {
            EngineError::BadInput(format!("entity '{}': no id field declared", self.name))
        })?;
        if self.id_strategy == IdStrategy::Generated
            && fields[id_field as usize].type_code != TypeCode::I64
        {
            return Err(EngineError::TypeMismatch(format!(
                "entity '{}': generated ids require an i64 id field",
                self.name
            )));
        }
        if self.id_strategy == IdStrategy::Uuid
            && fields[id_field as usize].type_code != TypeCode::Uuid
        {
            return Err(EngineError::TypeMismatch(format!(
                "entity '{}': uuid id strategy requires a uuid id field",
                self.name
            )));
        }
        Ok(EntityDescriptor {
            name: self.name,
            type_name: self.type_name,
            fields,
            id_field,
            id_strategy: self.id_strategy,
        })
    }
}
