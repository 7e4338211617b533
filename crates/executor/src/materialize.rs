//! Entity materializer and extractor: dense arrays of field accessors
//! bound once at setup, one indirect call per field on the hot path.

use std::sync::Arc;

use common::{EngineResult, FieldId};
use schema::{ConverterRegistry, Entity, EntityDescriptor};
use typecode::Value;

type Writer<E> = Box<dyn Fn(&mut E, Value) -> EngineResult<()> + Send + Sync>;
type Reader<E> = Box<dyn Fn(&E) -> EngineResult<Value> + Send + Sync>;

/// Row values → entity. One pre-bound writer per non-transient field;
/// converters are resolved when the array is built, never per call.
pub struct Materializer<E: Entity> {
    writers: Vec<(FieldId, Writer<E>)>,
}

impl<E: Entity> Materializer<E> {
    pub fn build(
        desc: &EntityDescriptor,
        converters: &ConverterRegistry,
    ) -> EngineResult<Self> {
        let mut writers: Vec<(FieldId, Writer<E>)> = Vec::new();
        for f in &desc.fields {
            if f.transient {
                continue;
            }
            let field = f.id;
            let writer: Writer<E> = match &f.converter {
                Some(id) => {
                    let conv = converters.get(id)?;
                    let from_column = Arc::clone(&conv.from_column);
                    Box::new(move |entity, value| {
                        entity.write_field(field, (from_column)(value)?);
                        Ok(())
                    })
                }
                None => Box::new(move |entity, value| {
                    entity.write_field(field, value);
                    Ok(())
                }),
            };
            writers.push((field, writer));
        }
        Ok(Materializer { writers })
    }

    /// Construct an entity from a row snapshot (indexed by field id).
    pub fn materialize(&self, values: &[Value]) -> EngineResult<E> {
        let mut entity = E::blank();
        for (field, writer) in &self.writers {
            writer(&mut entity, values[*field as usize].clone())?;
        }
        Ok(entity)
    }
}

/// Entity → row values; the inverse path, used by SAVE and by
/// delete-by-entity to recover the primary key.
pub struct Extractor<E: Entity> {
    readers: Vec<(FieldId, Reader<E>)>,
    field_count: usize,
}

impl<E: Entity> Extractor<E> {
    pub fn build(
        desc: &EntityDescriptor,
        converters: &ConverterRegistry,
    ) -> EngineResult<Self> {
        let mut readers: Vec<(FieldId, Reader<E>)> = Vec::new();
        for f in &desc.fields {
            if f.transient {
                continue;
            }
            let field = f.id;
            let reader: Reader<E> = match &f.converter {
                Some(id) => {
                    let conv = converters.get(id)?;
                    let to_column = Arc::clone(&conv.to_column);
                    Box::new(move |entity| (to_column)(entity.read_field(field)))
                }
                None => Box::new(move |entity| Ok(entity.read_field(field))),
            };
            readers.push((field, reader));
        }
        Ok(Extractor {
            readers,
            field_count: desc.fields.len(),
        })
    }

    /// Read every stored field out of the entity. Transient fields come
    /// back as `Null` so the vector indexes by field id.
    pub fn extract(&self, entity: &E) -> EngineResult<Vec<Value>> {
        let mut values = vec![Value::Null; self.field_count];
        for (field, reader) in &self.readers {
            values[*field as usize] = reader(entity)?;
        }
        Ok(values)
    }
}
