//! Runtime kernel: executes compiled queries against the columnar store.
//!
//! The generated façade calls one typed entry point per return shape with
//! `(queryId, args…)`; nothing is parsed or resolved per call. Selection
//! goes through indexes or typed scans, AND is set intersection, OR is set
//! union, and every candidate row is snapshot-read under its seqlock and
//! re-verified before it can influence a result. EXISTS short-circuits,
//! COUNT returns the combined set's size, DELETE walks handles, FIND
//! applies ORDER BY / DISTINCT / LIMIT before materializing.

mod materialize;
mod select;
mod sort;

pub use materialize::{Extractor, Materializer};
pub use select::{Arg, TableSet};

use std::collections::HashMap;
use std::sync::Arc;

use common::{EngineError, EngineResult, RowId};
use planner::{Binding, ColumnRef, CompiledQuery, Distinct};
use schema::{Entity, IdStrategy, OpCode};
use select::{eval_condition, verify, Check, Evaluated};
use sort::{Keyed, TopK};
use store::{Selection, Table};
use tracing::trace;
use typecode::Value;

/// Grouped results: group-key tuple → entities of the group.
pub type GroupMap<E> = HashMap<Vec<Value>, Vec<E>>;

/// The per-entity execution kernel. Holds the compiled queries indexed by
/// `queryId` and the pre-bound accessor arrays; immutable after setup.
pub struct Kernel<E: Entity> {
    table: Arc<Table>,
    tables: TableSet,
    queries: Vec<CompiledQuery>,
    materializer: Materializer<E>,
    extractor: Extractor<E>,
}

impl<E: Entity> Kernel<E> {
    pub fn new(
        table: Arc<Table>,
        tables: TableSet,
        queries: Vec<CompiledQuery>,
        materializer: Materializer<E>,
        extractor: Extractor<E>,
    ) -> Self {
        Kernel {
            table,
            tables,
            queries,
            materializer,
            extractor,
        }
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    fn query(&self, query_id: usize) -> EngineResult<&CompiledQuery> {
        self.queries.get(query_id).ok_or_else(|| {
            EngineError::BadInput(format!("unknown query id {query_id}"))
        })
    }

    // ---- derived-query entry points, one per return shape -----------------

    pub fn find_many(&self, query_id: usize, args: &[Arg]) -> EngineResult<Vec<E>> {
        let cq = self.query(query_id)?;
        let rows = self.gather(cq, args)?;
        rows.iter()
            .map(|k| self.materializer.materialize(&k.values))
            .collect()
    }

    pub fn find_one(&self, query_id: usize, args: &[Arg]) -> EngineResult<Option<E>> {
        let cq = self.query(query_id)?;
        let rows = self.gather(cq, args)?;
        match rows.first() {
            Some(k) => Ok(Some(self.materializer.materialize(&k.values)?)),
            None => Ok(None),
        }
    }

    pub fn count(&self, query_id: usize, args: &[Arg]) -> EngineResult<u64> {
        let cq = self.query(query_id)?;
        let (selection, _) = self.run_selection(cq, args)?;
        Ok(selection.len() as u64)
    }

    pub fn exists(&self, query_id: usize, args: &[Arg]) -> EngineResult<bool> {
        let cq = self.query(query_id)?;
        let (selection, checks) = self.run_selection(cq, args)?;
        for row in selection.iter() {
            if let Some(values) = self.snapshot(row)? {
                if verify(&values, &checks) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    pub fn delete_where(&self, query_id: usize, args: &[Arg]) -> EngineResult<u64> {
        let cq = self.query(query_id)?;
        let (selection, checks) = self.run_selection(cq, args)?;
        let mut deleted = 0u64;
        for row in selection.iter() {
            let Some(values) = self.snapshot(row)? else {
                continue;
            };
            if verify(&values, &checks) && self.table.delete(row)? {
                deleted += 1;
            }
        }
        trace!(deleted, "delete query");
        Ok(deleted)
    }

    /// MODIFYING update: rewrite the assigned fields of every matching row
    /// in place; indexed fields re-index inside the table's update.
    pub fn update_where(&self, query_id: usize, args: &[Arg]) -> EngineResult<u64> {
        let cq = self.query(query_id)?;
        let (selection, checks) = self.run_selection(cq, args)?;
        let mut updated = 0u64;
        for row in selection.iter() {
            let Some(values) = self.snapshot(row)? else {
                continue;
            };
            if !verify(&values, &checks) {
                continue;
            }
            let mut next = values;
            for (field, binding) in &cq.assignments {
                let value = match binding {
                    Binding::Value(v) => v.clone(),
                    Binding::Arg(i) => {
                        let code = self.table.descriptor().field(*field).type_code;
                        match args.get(*i) {
                            Some(Arg::One(v)) => planner::coerce_literal(v, code)?,
                            Some(Arg::Many(_)) => {
                                return Err(EngineError::TypeMismatch(
                                    "assignment takes a scalar argument".into(),
                                ))
                            }
                            None => {
                                return Err(EngineError::BadInput(format!(
                                    "missing argument {}",
                                    i + 1
                                )))
                            }
                        }
                    }
                };
                next[*field as usize] = value;
            }
            match self.table.update(row, &next) {
                Ok(()) => updated += 1,
                // The row vanished between snapshot and write; skip it.
                Err(EngineError::MissingEntity(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(updated)
    }

    /// GROUP BY execution: group-key tuple → materialized entities, with
    /// HAVING filtering groups by COUNT(*).
    pub fn group(&self, query_id: usize, args: &[Arg]) -> EngineResult<GroupMap<E>> {
        let cq = self.query(query_id)?;
        let rows = self.gather(cq, args)?;
        let mut grouped: HashMap<Vec<Value>, Vec<&Keyed>> = HashMap::new();
        for keyed in &rows {
            let mut key = Vec::with_capacity(cq.group_by.len());
            for column in &cq.group_by {
                key.push(self.project(&keyed.values, column)?);
            }
            grouped.entry(key).or_default().push(keyed);
        }
        if let Some(having) = &cq.having {
            let bound = match &having.binding {
                Binding::Value(v) => v.clone(),
                Binding::Arg(i) => match args.get(*i) {
                    Some(Arg::One(v)) => v.clone(),
                    _ => return Err(EngineError::BadInput(format!("missing argument {}", i + 1))),
                },
            };
            let threshold = bound.as_i64().ok_or_else(|| {
                EngineError::TypeMismatch(format!("HAVING COUNT(*) compares to {bound}"))
            })?;
            grouped.retain(|_, members| {
                select::value_matches(
                    having.op,
                    &Value::I64(members.len() as i64),
                    &[Value::I64(threshold)],
                    false,
                )
            });
        }
        let mut out = GroupMap::new();
        for (key, members) in grouped {
            let mut entities = Vec::with_capacity(members.len());
            for keyed in members {
                entities.push(self.materializer.materialize(&keyed.values)?);
            }
            out.insert(key, entities);
        }
        Ok(out)
    }

    // ---- built-ins recognized by signature --------------------------------

    /// Upsert one entity: a known id updates in place, an unset id draws
    /// from the id strategy. Returns the entity with its id assigned.
    pub fn save(&self, mut entity: E) -> EngineResult<E> {
        let desc = Arc::clone(self.table.descriptor());
        let mut values = self.extractor.extract(&entity)?;
        let idf = desc.id_field as usize;
        match desc.id_strategy {
            IdStrategy::Generated => {
                let current = values[idf].as_i64().unwrap_or(0);
                if values[idf].is_null() || current == 0 {
                    let id = self.table.next_id();
                    values[idf] = Value::I64(id);
                    entity.write_field(desc.id_field, Value::I64(id));
                } else {
                    self.table.observe_id(current);
                }
            }
            IdStrategy::Uuid => {
                let unset = match &values[idf] {
                    Value::Uuid(u) => u.is_nil(),
                    Value::Null => true,
                    _ => false,
                };
                if unset {
                    let id = Value::Uuid(uuid::Uuid::new_v4());
                    values[idf] = id.clone();
                    entity.write_field(desc.id_field, id);
                }
            }
            IdStrategy::Provided => {
                if values[idf].is_null() {
                    return Err(EngineError::BadInput(format!(
                        "entity '{}' requires a provided id",
                        desc.name
                    )));
                }
            }
        }

        // Insert/update race both ways: a concurrent insert of the same id
        // turns ours into an update, a concurrent delete turns an update
        // back into an insert. Every failed round means a competing writer
        // completed its own transition on this id, so the loop makes
        // progress and nothing transient ever reaches the caller.
        loop {
            if let Some(row) = self.table.indexes().id().get(&values[idf]) {
                match self.table.update(row, &values) {
                    Ok(()) => return Ok(entity),
                    // Deleted underneath us; fall through and insert fresh.
                    Err(EngineError::MissingEntity(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            match self.table.insert(&values) {
                Ok(_) => return Ok(entity),
                // Someone else published this id first; update it instead.
                Err(EngineError::DuplicateId(_)) => {}
                Err(e) => return Err(e),
            }
            std::thread::yield_now();
        }
    }

    pub fn save_all(&self, entities: Vec<E>) -> EngineResult<Vec<E>> {
        entities.into_iter().map(|e| self.save(e)).collect()
    }

    pub fn find_by_id(&self, id: &Value) -> EngineResult<Option<E>> {
        match self.lookup_id(id)? {
            Some((_, values)) => Ok(Some(self.materializer.materialize(&values)?)),
            None => Ok(None),
        }
    }

    pub fn exists_by_id(&self, id: &Value) -> EngineResult<bool> {
        Ok(self.lookup_id(id)?.is_some())
    }

    pub fn find_all(&self) -> EngineResult<Vec<E>> {
        let selection = self.table.live_rows()?;
        let mut out = Vec::with_capacity(selection.len());
        for row in selection.iter() {
            if let Some(values) = self.snapshot(row)? {
                out.push(self.materializer.materialize(&values)?);
            }
        }
        Ok(out)
    }

    pub fn find_all_by_id(&self, ids: &[Value]) -> EngineResult<Vec<E>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(e) = self.find_by_id(id)? {
                out.push(e);
            }
        }
        Ok(out)
    }

    pub fn count_all(&self) -> u64 {
        self.table.row_count()
    }

    /// Delete by entity; the id must resolve. `MissingEntity` otherwise.
    pub fn delete_entity(&self, entity: &E) -> EngineResult<()> {
        let values = self.extractor.extract(entity)?;
        let id = &values[self.table.descriptor().id_field as usize];
        let row = self.table.indexes().id().get(id).ok_or_else(|| {
            EngineError::MissingEntity(format!(
                "{} with id {id}",
                self.table.descriptor().name
            ))
        })?;
        self.table.delete(row)?;
        Ok(())
    }

    pub fn delete_by_id(&self, id: &Value) -> EngineResult<bool> {
        let id = self.coerce_id(id)?;
        match self.table.indexes().id().get(&id) {
            Some(row) => self.table.delete(row),
            None => Ok(false),
        }
    }

    pub fn delete_all(&self) -> EngineResult<u64> {
        let selection = self.table.live_rows()?;
        let mut deleted = 0u64;
        for row in selection.iter() {
            if self.table.delete(row)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    // ---- internals --------------------------------------------------------

    fn coerce_id(&self, id: &Value) -> EngineResult<Value> {
        let code = self.table.descriptor().id_descriptor().type_code;
        planner::coerce_literal(id, code)
    }

    fn lookup_id(&self, id: &Value) -> EngineResult<Option<(RowId, Vec<Value>)>> {
        let id = self.coerce_id(id)?;
        let Some(row) = self.table.indexes().id().get(&id) else {
            return Ok(None);
        };
        let Some(values) = self.snapshot(row)? else {
            return Ok(None);
        };
        // The slot may have been recycled between lookup and read.
        let idf = self.table.descriptor().id_field as usize;
        if values[idf] != id {
            return Ok(None);
        }
        Ok(Some((row, values)))
    }

    /// Seqlock snapshot with bounded re-read rounds. A row that stays
    /// contended past the budget is treated as being written and skipped
    /// by the caller; the conflict never surfaces.
    fn snapshot(&self, row: RowId) -> EngineResult<Option<Vec<Value>>> {
        let mut rounds = 0u32;
        loop {
            match self.table.read(row) {
                Err(EngineError::TransientConflict(_)) if rounds < 8 => {
                    rounds += 1;
                    std::thread::yield_now();
                }
                Err(EngineError::TransientConflict(_)) => return Ok(None),
                other => return other,
            }
        }
    }

    fn run_selection(
        &self,
        cq: &CompiledQuery,
        args: &[Arg],
    ) -> EngineResult<(Selection, Vec<Vec<Check>>)> {
        if cq.groups.is_empty() {
            return Ok((self.table.live_rows()?, Vec::new()));
        }
        let mut combined: Option<Selection> = None;
        let mut checks = Vec::with_capacity(cq.groups.len());
        for group in &cq.groups {
            let mut group_selection: Option<Selection> = None;
            let mut group_checks = Vec::with_capacity(group.len());
            for cond in group {
                let Evaluated { selection, check } =
                    eval_condition(&self.table, &self.tables, cond, args)?;
                group_selection = Some(match group_selection {
                    None => selection,
                    Some(current) => current.intersect(&selection),
                });
                group_checks.push(check);
            }
            let group_selection = match group_selection {
                Some(s) => s,
                None => self.table.live_rows()?,
            };
            combined = Some(match combined {
                None => group_selection,
                Some(current) => current.union(&group_selection),
            });
            checks.push(group_checks);
        }
        Ok((combined.expect("at least one group"), checks))
    }

    /// Project one column out of a row snapshot; joined columns read the
    /// referenced entity's table through the foreign key.
    fn project(&self, values: &[Value], column: &ColumnRef) -> EngineResult<Value> {
        match column {
            ColumnRef::Direct { field, .. } => Ok(values[*field as usize].clone()),
            ColumnRef::Joined {
                fk_field,
                target,
                inner_field,
                ..
            } => {
                let fk = &values[*fk_field as usize];
                if fk.is_null() {
                    return Ok(Value::Null);
                }
                let inner = self.tables.get(target)?;
                let Some(row) = inner.indexes().id().get(fk) else {
                    // Foreign key to a deleted row reads as absent.
                    return Ok(Value::Null);
                };
                match inner.read_field(row, *inner_field) {
                    Ok(Some(v)) => Ok(v),
                    Ok(None) => Ok(Value::Null),
                    Err(EngineError::TransientConflict(_)) => Ok(Value::Null),
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// FIND pipeline: select, snapshot-verify, order, dedupe, limit.
    fn gather(&self, cq: &CompiledQuery, args: &[Arg]) -> EngineResult<Vec<Keyed>> {
        let (selection, checks) = self.run_selection(cq, args)?;
        let descending: Vec<bool> = cq.order_by.iter().map(|k| k.descending).collect();

        // LIMIT without ORDER BY or DISTINCT stops at k verified rows.
        let early_stop = if cq.order_by.is_empty() && matches!(cq.distinct, Distinct::None) {
            cq.limit
        } else {
            None
        };
        // LIMIT with ORDER BY and no DISTINCT keeps a bounded heap instead
        // of sorting the full result.
        let top_k = if !cq.order_by.is_empty() && matches!(cq.distinct, Distinct::None) {
            cq.limit
        } else {
            None
        };

        let mut heap = top_k.map(|k| TopK::new(k, &descending));
        let mut rows: Vec<Keyed> = Vec::new();
        let mut seq = 0usize;
        for row in selection.iter() {
            let Some(values) = self.snapshot(row)? else {
                continue;
            };
            if !verify(&values, &checks) {
                continue;
            }
            let mut keys = Vec::with_capacity(cq.order_by.len());
            for key in &cq.order_by {
                keys.push(self.project(&values, &key.column)?);
            }
            let keyed = Keyed { keys, seq, values };
            seq += 1;
            match &mut heap {
                Some(topk) => topk.push(keyed),
                None => rows.push(keyed),
            }
            if let Some(k) = early_stop {
                if rows.len() >= k {
                    break;
                }
            }
        }

        let mut rows = match heap {
            Some(topk) => topk.into_sorted(),
            None => {
                if !cq.order_by.is_empty() {
                    let config = self.table.config();
                    sort::sort(
                        &mut rows,
                        &descending,
                        config.enable_parallel_sorting,
                        config.parallel_sort_threshold,
                    );
                }
                rows
            }
        };

        if let Distinct::ByProjection(columns) = &cq.distinct {
            let mut seen: hashbrown::HashSet<Vec<Value>, ahash::RandomState> =
                hashbrown::HashSet::default();
            let mut deduped = Vec::with_capacity(rows.len());
            for keyed in rows {
                let mut key = Vec::with_capacity(columns.len());
                for column in columns {
                    key.push(self.project(&keyed.values, column)?);
                }
                if seen.insert(key) {
                    deduped.push(keyed);
                }
            }
            rows = deduped;
        }

        if let Some(limit) = cq.limit {
            rows.truncate(limit);
        }

        debug_assert!(
            cq.op == OpCode::Find,
            "gather is the FIND pipeline, got {:?}",
            cq.op
        );
        Ok(rows)
    }
}
