//! Schema and converter registries, passed explicitly into the engine at
//! setup. There are no process-wide singletons.

use std::sync::Arc;

use ahash::RandomState;
use common::{EngineError, EngineResult};
use hashbrown::HashMap;
use typecode::Value;

use crate::EntityDescriptor;

type Map<K, V> = HashMap<K, V, RandomState>;

/// Registry of entity descriptors, keyed by entity name. Relationship
/// targets resolve through it.
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    entities: Map<String, Arc<EntityDescriptor>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: EntityDescriptor) -> EngineResult<()> {
        if self.entities.contains_key(&descriptor.name) {
            return Err(EngineError::BadInput(format!(
                "entity '{}' registered twice",
                descriptor.name
            )));
        }
        self.entities
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(())
    }

    pub fn get(&self, name: &str) -> EngineResult<Arc<EntityDescriptor>> {
        self.entities.get(name).cloned().ok_or_else(|| {
            EngineError::BadInput(format!("unknown entity '{name}'"))
        })
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.entities.values()
    }

    /// Verify every relationship target is registered. Called once when the
    /// engine is built, so dangling targets fail setup instead of a query.
    pub fn validate(&self) -> EngineResult<()> {
        for desc in self.entities.values() {
            for field in desc.relation_fields() {
                let relation = field.relation.as_ref().expect("relation field");
                if !self.entities.contains_key(&relation.target) {
                    return Err(EngineError::BadInput(format!(
                        "entity '{}': field '{}' references unregistered entity '{}'",
                        desc.name, field.name, relation.target
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Bidirectional value conversion for user-defined field representations.
#[derive(Clone)]
pub struct Converter {
    /// Entity-side value to column-side value.
    pub to_column: Arc<dyn Fn(Value) -> EngineResult<Value> + Send + Sync>,
    /// Column-side value back to entity-side value.
    pub from_column: Arc<dyn Fn(Value) -> EngineResult<Value> + Send + Sync>,
}

/// Explicit converter registry handed to the engine at setup.
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    converters: Map<String, Converter>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T, F>(&mut self, id: impl Into<String>, to_column: T, from_column: F)
    where
        T: Fn(Value) -> EngineResult<Value> + Send + Sync + 'static,
        F: Fn(Value) -> EngineResult<Value> + Send + Sync + 'static,
    {
        self.converters.insert(
            id.into(),
            Converter {
                to_column: Arc::new(to_column),
                from_column: Arc::new(from_column),
            },
        );
    }

    pub fn get(&self, id: &str) -> EngineResult<Converter> {
        self.converters.get(id).cloned().ok_or_else(|| {
            EngineError::BadInput(format!("unknown converter '{id}'"))
        })
    }
}
