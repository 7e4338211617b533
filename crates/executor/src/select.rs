//! Condition evaluation: compiled conditions → row selections, plus the
//! residual checks re-applied to every row's seqlock snapshot.
//!
//! Indexes and scans only nominate candidates. Because index entries and
//! column cells settle independently of row publication, every emitted row
//! is re-verified against the full predicate on its snapshot; a row mutated
//! between selection and read simply drops out.

use std::sync::Arc;

use ahash::RandomState;
use common::{EngineError, EngineResult, FieldId};
use hashbrown::{HashMap, HashSet};
use indexes::FieldIndex;
use planner::{Binding, ColumnRef, CompiledCondition, Strategy};
use schema::IndexKind;
use store::{like_match, Selection, Table, TextMode};
use typecode::{Operator, Value};

/// One runtime argument: a scalar, or a collection feeding IN / NOT IN.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    One(Value),
    Many(Vec<Value>),
}

macro_rules! arg_from_scalar {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Arg {
            fn from(v: $ty) -> Self {
                Arg::One(v.into())
            }
        })*
    };
}

arg_from_scalar!(Value, i8, i16, i32, i64, f32, f64, bool, char, &str, String, uuid::Uuid);

impl Arg {
    pub fn many<T: Into<Value>>(values: impl IntoIterator<Item = T>) -> Self {
        Arg::Many(values.into_iter().map(Into::into).collect())
    }
}

/// Tables of the engine, addressable by entity name; the join runtime
/// resolves relationship targets through it.
#[derive(Clone, Default)]
pub struct TableSet {
    map: HashMap<String, Arc<Table>, RandomState>,
}

impl TableSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, table: Arc<Table>) {
        self.map.insert(name.into(), table);
    }

    pub fn get(&self, name: &str) -> EngineResult<&Arc<Table>> {
        self.map
            .get(name)
            .ok_or_else(|| EngineError::BadInput(format!("no table for entity '{name}'")))
    }
}

/// Residual predicate applied to a row snapshot.
pub(crate) enum Check {
    Local {
        field: FieldId,
        op: Operator,
        ignore_case: bool,
        operands: Vec<Value>,
    },
    /// Joined condition: the row's foreign key must be one of the inner
    /// rows that matched.
    FkIn {
        fk_field: FieldId,
        ids: HashSet<Value, RandomState>,
    },
}

pub(crate) struct Evaluated {
    pub selection: Selection,
    pub check: Check,
}

/// Resolve a condition's operands from its bindings and the call arguments,
/// coercing each into the column's value space.
fn operands(cond: &CompiledCondition, args: &[Arg]) -> EngineResult<Vec<Value>> {
    let code = cond.column.code();
    let collection_ok = matches!(cond.op, Operator::In | Operator::NotIn);
    let mut out = Vec::with_capacity(cond.bindings.len());
    for binding in &cond.bindings {
        match binding {
            Binding::Value(v) => out.push(v.clone()),
            Binding::Arg(i) => {
                let arg = args.get(*i).ok_or_else(|| {
                    EngineError::BadInput(format!("missing argument {}", i + 1))
                })?;
                match arg {
                    Arg::One(v) => out.push(planner::coerce_literal(v, code)?),
                    Arg::Many(vs) if collection_ok => {
                        for v in vs {
                            out.push(planner::coerce_literal(v, code)?);
                        }
                    }
                    Arg::Many(_) => {
                        return Err(EngineError::TypeMismatch(format!(
                            "argument {} is a collection but {:?} takes a scalar",
                            i + 1,
                            cond.op
                        )))
                    }
                }
            }
        }
    }
    Ok(out)
}

/// Evaluate one condition into a candidate selection plus its residual check.
pub(crate) fn eval_condition(
    table: &Table,
    tables: &TableSet,
    cond: &CompiledCondition,
    args: &[Arg],
) -> EngineResult<Evaluated> {
    let operands = operands(cond, args)?;
    match &cond.column {
        ColumnRef::Direct { field, .. } => {
            let selection = eval_local(table, *field, cond, &operands)?;
            Ok(Evaluated {
                selection,
                check: Check::Local {
                    field: *field,
                    op: cond.op,
                    ignore_case: cond.ignore_case,
                    operands,
                },
            })
        }
        ColumnRef::Joined {
            fk_field,
            target,
            inner_field,
            ..
        } => {
            let inner = tables.get(target)?;
            let inner_selection = eval_local(inner, *inner_field, cond, &operands)?;

            // Back-translate: inner matches → their primary keys → outer
            // rows whose foreign key carries one of them.
            let id_field = inner.descriptor().id_field;
            let mut ids: HashSet<Value, RandomState> = HashSet::default();
            for row in inner_selection.iter() {
                match inner.read_field(row, id_field) {
                    Ok(Some(id)) => {
                        ids.insert(id);
                    }
                    Ok(None) => {}
                    Err(EngineError::TransientConflict(_)) => {
                        // A writer holds the row; one bounded re-read.
                        if let Ok(Some(id)) = retry_read(inner, row, id_field) {
                            ids.insert(id);
                        }
                    }
                    Err(e) => return Err(e),
                }
            }

            let id_list: Vec<Value> = ids.iter().cloned().collect();
            let selection = match table.indexes().field(*fk_field) {
                Some(FieldIndex::Hash(ix)) => Selection::from_unsorted(ix.lookup_any(&id_list)),
                _ => table.scan_in(*fk_field, &id_list, false, false)?,
            };
            Ok(Evaluated {
                selection,
                check: Check::FkIn {
                    fk_field: *fk_field,
                    ids,
                },
            })
        }
    }
}

fn retry_read(table: &Table, row: common::RowId, field: FieldId) -> EngineResult<Option<Value>> {
    std::thread::yield_now();
    match table.read_field(row, field) {
        Err(EngineError::TransientConflict(_)) => Ok(None),
        other => other,
    }
}

/// Evaluate against one table's column: through the chosen index when the
/// table actually carries it, otherwise a typed scan.
fn eval_local(
    table: &Table,
    field: FieldId,
    cond: &CompiledCondition,
    operands: &[Value],
) -> EngineResult<Selection> {
    match cond.strategy {
        Strategy::UseIdIndex => Ok(Selection::from_unsorted(
            table
                .indexes()
                .id()
                .get(&operands[0])
                .into_iter()
                .collect(),
        )),
        Strategy::UseIndex(kind) => match (kind, table.indexes().field(field)) {
            (IndexKind::Hash, Some(FieldIndex::Hash(ix))) => Ok(Selection::from_unsorted(
                match cond.op {
                    Operator::Eq => ix.lookup(&operands[0]),
                    Operator::In => ix.lookup_any(operands),
                    _ => unreachable!("hash index strategy for {:?}", cond.op),
                },
            )),
            (IndexKind::Range, Some(FieldIndex::Range(ix))) => Ok(Selection::from_unsorted(
                match cond.op {
                    Operator::Eq => ix.lookup(&operands[0]),
                    Operator::Between => ix.between(&operands[0], &operands[1], (true, true)),
                    Operator::Lt => ix.less(&operands[0], false),
                    Operator::Le => ix.less(&operands[0], true),
                    Operator::Gt => ix.greater(&operands[0], false),
                    Operator::Ge => ix.greater(&operands[0], true),
                    _ => unreachable!("range index strategy for {:?}", cond.op),
                },
            )),
            (IndexKind::Prefix, Some(FieldIndex::Prefix(ix))) => {
                let pattern = text_operand(&operands[0])?;
                Ok(Selection::from_unsorted(ix.starting_with(pattern)))
            }
            (IndexKind::Suffix, Some(FieldIndex::Suffix(ix))) => {
                let pattern = text_operand(&operands[0])?;
                Ok(Selection::from_unsorted(ix.ending_with(pattern)))
            }
            // The configuration gated this index off; scan instead.
            _ => scan(table, field, cond, operands),
        },
        Strategy::ScanColumn => scan(table, field, cond, operands),
    }
}

fn scan(
    table: &Table,
    field: FieldId,
    cond: &CompiledCondition,
    operands: &[Value],
) -> EngineResult<Selection> {
    let ic = cond.ignore_case;
    match cond.op {
        Operator::Eq | Operator::Ne | Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
            table.scan_cmp(field, cond.op, &operands[0], ic)
        }
        Operator::Between => table.scan_between(field, &operands[0], &operands[1], (true, true)),
        Operator::In => table.scan_in(field, operands, false, ic),
        Operator::NotIn => table.scan_in(field, operands, true, ic),
        Operator::Like => table.scan_text(field, TextMode::Like, text_operand(&operands[0])?, false, ic),
        Operator::NotLike => {
            table.scan_text(field, TextMode::Like, text_operand(&operands[0])?, true, ic)
        }
        Operator::StartingWith => {
            table.scan_text(field, TextMode::StartsWith, text_operand(&operands[0])?, false, ic)
        }
        Operator::EndingWith => {
            table.scan_text(field, TextMode::EndsWith, text_operand(&operands[0])?, false, ic)
        }
        Operator::Containing => {
            table.scan_text(field, TextMode::Contains, text_operand(&operands[0])?, false, ic)
        }
        Operator::IsNull => table.scan_null(field, false),
        Operator::IsNotNull => table.scan_null(field, true),
        Operator::IsTrue => table.scan_bool_is(field, true),
        Operator::IsFalse => table.scan_bool_is(field, false),
    }
}

fn text_operand(v: &Value) -> EngineResult<&str> {
    v.as_str().ok_or_else(|| {
        EngineError::TypeMismatch(format!("string operand expected, got {v}"))
    })
}

/// Does the snapshot still satisfy the whole predicate? Empty groups mean
/// an unconditioned query.
pub(crate) fn verify(values: &[Value], groups: &[Vec<Check>]) -> bool {
    if groups.is_empty() {
        return true;
    }
    groups
        .iter()
        .any(|group| group.iter().all(|check| check_one(values, check)))
}

fn check_one(values: &[Value], check: &Check) -> bool {
    match check {
        Check::Local {
            field,
            op,
            ignore_case,
            operands,
        } => value_matches(*op, &values[*field as usize], operands, *ignore_case),
        Check::FkIn { fk_field, ids } => ids.contains(&values[*fk_field as usize]),
    }
}

/// Value-level predicate semantics, shared by residual verification.
pub(crate) fn value_matches(
    op: Operator,
    v: &Value,
    operands: &[Value],
    ignore_case: bool,
) -> bool {
    match op {
        Operator::IsNull => return v.is_null(),
        Operator::IsNotNull => return !v.is_null(),
        Operator::IsTrue => return v.as_bool() == Some(true),
        Operator::IsFalse => return v.as_bool() == Some(false),
        _ => {}
    }
    if v.is_null() {
        return false;
    }
    let eq = |probe: &Value| -> bool {
        if ignore_case {
            if let (Some(a), Some(b)) = (v.as_str(), probe.as_str()) {
                return a.to_lowercase() == b.to_lowercase();
            }
        }
        v.total_cmp(probe).is_eq()
    };
    match op {
        Operator::Eq => eq(&operands[0]),
        Operator::Ne => !eq(&operands[0]),
        Operator::Lt => v.total_cmp(&operands[0]).is_lt(),
        Operator::Le => v.total_cmp(&operands[0]).is_le(),
        Operator::Gt => v.total_cmp(&operands[0]).is_gt(),
        Operator::Ge => v.total_cmp(&operands[0]).is_ge(),
        Operator::Between => {
            v.total_cmp(&operands[0]).is_ge() && v.total_cmp(&operands[1]).is_le()
        }
        Operator::In => operands.iter().any(eq),
        Operator::NotIn => !operands.iter().any(eq),
        Operator::Like | Operator::NotLike => {
            let hit = match (operands[0].as_str(), v.as_str()) {
                (Some(pattern), Some(s)) => like_match(pattern, s, ignore_case),
                _ => false,
            };
            hit == (op == Operator::Like)
        }
        Operator::StartingWith | Operator::EndingWith | Operator::Containing => {
            let (Some(pattern), Some(s)) = (operands[0].as_str(), v.as_str()) else {
                return false;
            };
            let folded_p;
            let folded_s;
            let (pattern, s) = if ignore_case {
                folded_p = pattern.to_lowercase();
                folded_s = s.to_lowercase();
                (folded_p.as_str(), folded_s.as_str())
            } else {
                (pattern, s)
            };
            match op {
                Operator::StartingWith => s.starts_with(pattern),
                Operator::EndingWith => s.ends_with(pattern),
                _ => s.contains(pattern),
            }
        }
        _ => unreachable!("nullary operator reached value comparison"),
    }
}
