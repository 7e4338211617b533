//! Engine and repository façade.
//!
//! The [`Engine`] owns one table per registered entity. A [`Repository`]
//! is built once per entity type: derived method names and annotated
//! queries are parsed and compiled at build time into a `CompiledQuery`
//! array indexed by a small `queryId`, so each call is a plain dispatch
//! with no per-call parsing or reflection. CRUD built-ins (`save`,
//! `find_by_id`, `count`, …) are recognized by signature and bypass the
//! query pipeline entirely.


use std::sync::Arc;

use ahash::RandomState;
use common::{Config, EngineError, EngineResult};
use executor::{Arg, Extractor, GroupMap, Kernel, Materializer, TableSet};
use hashbrown::HashMap;
use schema::{ConverterRegistry, Entity, MethodDescriptor, ReturnKind, SchemaRegistry};
use store::Table;
use tracing::info;
use typecode::Value;

/// The in-process storage engine: configuration, schema and converter
/// registries, and one columnar table per registered entity.
pub struct Engine {
    config: Arc<Config>,
    registry: SchemaRegistry,
    converters: ConverterRegistry,
    tables: TableSet,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder {
            config: Config::default(),
            registry: SchemaRegistry::new(),
            converters: ConverterRegistry::new(),
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// The table backing a registered entity, e.g. for interrupt requests
    /// or row-count inspection.
    pub fn table(&self, entity: &str) -> EngineResult<&Arc<Table>> {
        self.tables.get(entity)
    }

    /// Start building a repository for `E`, which must be registered.
    pub fn repository<E: Entity>(&self) -> RepositoryBuilder<'_, E> {
        RepositoryBuilder {
            engine: self,
            methods: Vec::new(),
            _entity: std::marker::PhantomData,
        }
    }
}

pub struct EngineBuilder {
    config: Config,
    registry: SchemaRegistry,
    converters: ConverterRegistry,
}

impl EngineBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Register an entity type; its descriptor is produced exactly once.
    pub fn register<E: Entity>(mut self) -> EngineResult<Self> {
        self.registry.register(E::descriptor())?;
        Ok(self)
    }

    pub fn converters(mut self, converters: ConverterRegistry) -> Self {
        self.converters = converters;
        self
    }

    /// Validate the schema and create the tables.
    pub fn build(self) -> EngineResult<Engine> {
        self.registry.validate()?;
        let config = Arc::new(self.config);
        let mut tables = TableSet::new();
        for desc in self.registry.entities() {
            let table = Table::new(Arc::clone(desc), Arc::clone(&config))?;
            tables.insert(desc.name.clone(), Arc::new(table));
            info!(entity = %desc.name, fields = desc.fields.len(), "table created");
        }
        Ok(Engine {
            config,
            registry: self.registry,
            converters: self.converters,
            tables,
        })
    }
}

/// Declarative method registration; everything is parsed and compiled in
/// [`RepositoryBuilder::build`], so a bad method name or query string
/// fails repository creation, never a call.
pub struct RepositoryBuilder<'e, E: Entity> {
    engine: &'e Engine,
    methods: Vec<MethodDescriptor>,
    _entity: std::marker::PhantomData<E>,
}

impl<E: Entity> RepositoryBuilder<'_, E> {
    /// A derived method, parsed from its name.
    pub fn method(mut self, name: &str, arity: usize, return_kind: ReturnKind) -> Self {
        self.methods
            .push(MethodDescriptor::derived(name, arity, return_kind));
        self
    }

    /// An annotated query with named parameters.
    pub fn query(
        mut self,
        name: &str,
        text: &str,
        return_kind: ReturnKind,
        params: &[&str],
    ) -> Self {
        self.methods.push(MethodDescriptor::annotated(
            name,
            text,
            return_kind,
            params.iter().map(|p| (*p).to_string()).collect(),
        ));
        self
    }

    /// An annotated UPDATE/DELETE; the modifying flag is what licenses an
    /// UPDATE statement to run.
    pub fn modifying_query(
        mut self,
        name: &str,
        text: &str,
        return_kind: ReturnKind,
        params: &[&str],
    ) -> Self {
        self.methods.push(
            MethodDescriptor::annotated(
                name,
                text,
                return_kind,
                params.iter().map(|p| (*p).to_string()).collect(),
            )
            .modifying(),
        );
        self
    }

    pub fn build(self) -> EngineResult<Repository<E>> {
        let desc = E::descriptor();
        let desc = self.engine.registry.get(&desc.name)?;
        let table = Arc::clone(self.engine.tables.get(&desc.name)?);

        let mut queries = Vec::with_capacity(self.methods.len());
        let mut method_ids: HashMap<String, (usize, ReturnKind), RandomState> =
            HashMap::default();
        for method in &self.methods {
            let logical = match &method.query {
                Some(text) => parser::parse_query(text, &desc)?,
                None => parser::parse_method_name(
                    &method.name,
                    method.arity,
                    &desc,
                    &self.engine.registry,
                )?,
            };
            let compiled = planner::compile(&logical, &desc, &self.engine.registry, method)?;
            if method_ids
                .insert(method.name.clone(), (queries.len(), method.return_kind))
                .is_some()
            {
                return Err(EngineError::BadInput(format!(
                    "method '{}' registered twice",
                    method.name
                )));
            }
            queries.push(compiled);
        }
        info!(
            entity = %desc.name,
            methods = queries.len(),
            "repository compiled"
        );

        let kernel = Kernel::new(
            table,
            self.engine.tables.clone(),
            queries,
            Materializer::build(&desc, &self.engine.converters)?,
            Extractor::build(&desc, &self.engine.converters)?,
        );
        Ok(Repository { kernel, method_ids })
    }
}

/// The compiled façade over one entity's table. Derived methods are
/// addressed by name (resolved to their `queryId` once) or directly by id.
pub struct Repository<E: Entity> {
    kernel: Kernel<E>,
    method_ids: HashMap<String, (usize, ReturnKind), RandomState>,
}

impl<E: Entity> std::fmt::Debug for Repository<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").finish_non_exhaustive()
    }
}

impl<E: Entity> Repository<E> {
    pub fn kernel(&self) -> &Kernel<E> {
        &self.kernel
    }

    /// The compiled id of a registered method.
    pub fn query_id(&self, method: &str) -> EngineResult<usize> {
        self.lookup(method).map(|(id, _)| id)
    }

    fn lookup(&self, method: &str) -> EngineResult<(usize, ReturnKind)> {
        self.method_ids.get(method).copied().ok_or_else(|| {
            EngineError::BadInput(format!("no registered method '{method}'"))
        })
    }

    fn expect_kind(
        &self,
        method: &str,
        accept: &[ReturnKind],
    ) -> EngineResult<usize> {
        let (id, kind) = self.lookup(method)?;
        if !accept.contains(&kind) {
            return Err(EngineError::TypeMismatch(format!(
                "method '{method}' returns {kind:?}"
            )));
        }
        Ok(id)
    }

    // ---- built-ins --------------------------------------------------------

    pub fn save(&self, entity: E) -> EngineResult<E> {
        self.kernel.save(entity)
    }

    pub fn save_all(&self, entities: Vec<E>) -> EngineResult<Vec<E>> {
        self.kernel.save_all(entities)
    }

    pub fn find_by_id(&self, id: impl Into<Value>) -> EngineResult<Option<E>> {
        self.kernel.find_by_id(&id.into())
    }

    pub fn exists_by_id(&self, id: impl Into<Value>) -> EngineResult<bool> {
        self.kernel.exists_by_id(&id.into())
    }

    pub fn find_all(&self) -> EngineResult<Vec<E>> {
        self.kernel.find_all()
    }

    pub fn find_all_by_id(
        &self,
        ids: impl IntoIterator<Item = impl Into<Value>>,
    ) -> EngineResult<Vec<E>> {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        self.kernel.find_all_by_id(&ids)
    }

    pub fn count(&self) -> u64 {
        self.kernel.count_all()
    }

    pub fn delete(&self, entity: &E) -> EngineResult<()> {
        self.kernel.delete_entity(entity)
    }

    pub fn delete_by_id(&self, id: impl Into<Value>) -> EngineResult<bool> {
        self.kernel.delete_by_id(&id.into())
    }

    pub fn delete_all(&self) -> EngineResult<u64> {
        self.kernel.delete_all()
    }

    pub fn delete_all_entities(&self, entities: &[E]) -> EngineResult<()> {
        for entity in entities {
            self.kernel.delete_entity(entity)?;
        }
        Ok(())
    }

    pub fn delete_all_by_id(
        &self,
        ids: impl IntoIterator<Item = impl Into<Value>>,
    ) -> EngineResult<u64> {
        let mut deleted = 0;
        for id in ids {
            if self.kernel.delete_by_id(&id.into())? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    // ---- derived methods --------------------------------------------------

    /// Many-result finder (list or set return kinds).
    pub fn find(&self, method: &str, args: &[Arg]) -> EngineResult<Vec<E>> {
        let id = self.expect_kind(
            method,
            &[ReturnKind::ManyList, ReturnKind::ManySet],
        )?;
        self.kernel.find_many(id, args)
    }

    /// Single-optional finder.
    pub fn find_one(&self, method: &str, args: &[Arg]) -> EngineResult<Option<E>> {
        let id = self.expect_kind(
            method,
            &[ReturnKind::OneOptional, ReturnKind::ManyList, ReturnKind::ManySet],
        )?;
        self.kernel.find_one(id, args)
    }

    pub fn count_by(&self, method: &str, args: &[Arg]) -> EngineResult<u64> {
        let id = self.expect_kind(method, &[ReturnKind::CountLong])?;
        self.kernel.count(id, args)
    }

    pub fn exists_by(&self, method: &str, args: &[Arg]) -> EngineResult<bool> {
        let id = self.expect_kind(method, &[ReturnKind::ExistsBool])?;
        self.kernel.exists(id, args)
    }

    pub fn delete_by(&self, method: &str, args: &[Arg]) -> EngineResult<u64> {
        let id = self.expect_kind(method, &[ReturnKind::CountLong, ReturnKind::Nothing])?;
        self.kernel.delete_where(id, args)
    }

    /// Modifying annotated UPDATE.
    pub fn update_by(&self, method: &str, args: &[Arg]) -> EngineResult<u64> {
        let id = self.expect_kind(method, &[ReturnKind::CountLong, ReturnKind::Nothing])?;
        self.kernel.update_where(id, args)
    }

    /// Grouped finder (`GROUP BY` queries).
    pub fn group_by(&self, method: &str, args: &[Arg]) -> EngineResult<GroupMap<E>> {
        let id = self.expect_kind(method, &[ReturnKind::GroupMap])?;
        self.kernel.group(id, args)
    }
}
