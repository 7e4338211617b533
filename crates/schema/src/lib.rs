//! Entity metadata: descriptors, accessor trait, registries.
//!
//! Descriptors are produced once per entity at setup and drive everything
//! downstream: column layout, index creation, property-path resolution and
//! the bound accessor arrays of the materializer. Nothing in the engine
//! inspects an entity struct at runtime; all field access goes through the
//! [`Entity`] trait's index-addressed readers and writers.

mod descriptor;
mod registry;

pub use descriptor::{
    EntityDescriptor, Field, FieldDescriptor, IdStrategy, IndexKind, IndexSpec, Relation,
};
pub use registry::{Converter, ConverterRegistry, SchemaRegistry};

use common::FieldId;
use serde::{Deserialize, Serialize};
use typecode::Value;

/// Value accessor surface every stored entity type implements.
///
/// Implementations are ordinary hand-written (or macro-generated) `match`
/// statements over the field index; the engine binds them once at setup and
/// calls them through dense arrays, never by name.
pub trait Entity: Clone + Send + Sync + 'static {
    /// The entity's descriptor. Called once at setup; the engine caches it.
    fn descriptor() -> EntityDescriptor;

    /// A value with every field unset, used as the materialization target.
    fn blank() -> Self;

    /// Read the field at `field` as a canonical value.
    fn read_field(&self, field: FieldId) -> Value;

    /// Write the field at `field` from a canonical value.
    fn write_field(&mut self, field: FieldId, value: Value);
}

/// Operation code of a compiled query. The set is closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpCode {
    Find,
    FindById,
    FindAll,
    Count,
    CountAll,
    Exists,
    ExistsById,
    Delete,
    DeleteById,
    SaveOne,
    SaveAll,
    /// Predicate-driven bulk delete (`deleteBy…` / `DELETE FROM … WHERE …`).
    DeleteQuery,
    /// `MODIFYING` JPQL update.
    UpdateQuery,
}

/// Shape of the value a repository method returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReturnKind {
    OneOptional,
    ManyList,
    ManySet,
    CountLong,
    ExistsBool,
    GroupMap,
    Nothing,
}

/// Descriptor of one repository method as the façade hands it to the core:
/// name, arity, return shape and the optional annotated query string.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    pub arity: usize,
    pub return_kind: ReturnKind,
    /// Present when the method carries an annotated query instead of a
    /// derivable name.
    pub query: Option<String>,
    /// Whether an annotated UPDATE/DELETE is permitted to modify rows.
    pub modifying: bool,
    /// Declared parameter names, for `:name` binding.
    pub param_names: Vec<String>,
}

impl MethodDescriptor {
    pub fn derived(name: impl Into<String>, arity: usize, return_kind: ReturnKind) -> Self {
        MethodDescriptor {
            name: name.into(),
            arity,
            return_kind,
            query: None,
            modifying: false,
            param_names: Vec::new(),
        }
    }

    pub fn annotated(
        name: impl Into<String>,
        query: impl Into<String>,
        return_kind: ReturnKind,
        param_names: Vec<String>,
    ) -> Self {
        MethodDescriptor {
            name: name.into(),
            arity: param_names.len(),
            return_kind,
            query: Some(query.into()),
            modifying: false,
            param_names,
        }
    }

    pub fn modifying(mut self) -> Self {
        self.modifying = true;
        self
    }
}
