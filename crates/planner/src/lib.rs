//! Query compiler: [`parser::LogicalQuery`] → immutable [`CompiledQuery`].
//!
//! Compilation resolves property paths to column indices (one relationship
//! hop allowed), validates every operator against the column's type code,
//! picks an index-or-scan strategy per condition, lowers each (operator,
//! type-code) pair to a dispatch code, and splits operands into bound
//! literals and argument positions. Everything that can fail does so here;
//! the executor never sees an invalid plan.

mod dispatch;
#[cfg(test)]
mod tests;

pub use dispatch::{pack as dispatch_code, unpack as unpack_dispatch};

use common::{EngineError, EngineResult, FieldId};
use parser::{Argument, Condition, LogicalQuery, OrderKey};
use schema::{
    EntityDescriptor, FieldDescriptor, IndexKind, MethodDescriptor, OpCode, ReturnKind,
    SchemaRegistry,
};
use tracing::debug;
use typecode::{Operator, TypeCode, Value};

/// How a condition operand reaches the executor.
#[derive(Clone, Debug, PartialEq)]
pub enum Binding {
    /// Caller argument at this position.
    Arg(usize),
    /// Literal bound at compile time.
    Value(Value),
}

/// A resolved column: on the owning table, or one hop through a
/// relationship field into the target entity's table.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnRef {
    Direct {
        field: FieldId,
        code: TypeCode,
    },
    Joined {
        /// Foreign-key column on the owning table.
        fk_field: FieldId,
        /// Target entity name, resolved to a table at runtime.
        target: String,
        /// Column on the target entity's table.
        inner_field: FieldId,
        code: TypeCode,
    },
}

impl ColumnRef {
    pub fn code(&self) -> TypeCode {
        match self {
            ColumnRef::Direct { code, .. } | ColumnRef::Joined { code, .. } => *code,
        }
    }
}

/// Execution strategy chosen per condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Unique-id index point lookup.
    UseIdIndex,
    /// Declared secondary index of this kind.
    UseIndex(IndexKind),
    /// Typed column scan across all pages.
    ScanColumn,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledCondition {
    pub column: ColumnRef,
    pub op: Operator,
    pub ignore_case: bool,
    pub bindings: Vec<Binding>,
    pub strategy: Strategy,
    /// Lowered (operator, type-code) pair; see [`unpack_dispatch`].
    pub dispatch: u16,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledOrderKey {
    pub column: ColumnRef,
    pub descending: bool,
}

/// Deduplication mode, decided at compile time.
#[derive(Clone, Debug, PartialEq)]
pub enum Distinct {
    None,
    /// Whole-entity results: the row-handle set is already unique.
    ByRow,
    /// Deduplicate by the projected tuple of these columns.
    ByProjection(Vec<ColumnRef>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledHaving {
    pub op: Operator,
    pub binding: Binding,
}

/// Immutable plan for one repository method. Refers to columns by index
/// only; never mutated after emission.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledQuery {
    pub op: OpCode,
    pub return_kind: ReturnKind,
    /// OR of AND groups, in declaration order.
    pub groups: Vec<Vec<CompiledCondition>>,
    pub order_by: Vec<CompiledOrderKey>,
    pub limit: Option<usize>,
    pub distinct: Distinct,
    pub group_by: Vec<ColumnRef>,
    pub having: Option<CompiledHaving>,
    /// Field/operand pairs of a modifying update.
    pub assignments: Vec<(FieldId, Binding)>,
    pub arity: usize,
}

/// Compile one logical query against its entity and method descriptors.
pub fn compile(
    logical: &LogicalQuery,
    desc: &EntityDescriptor,
    registry: &SchemaRegistry,
    method: &MethodDescriptor,
) -> EngineResult<CompiledQuery> {
    let ctx = Compiler {
        desc,
        registry,
        method,
    };
    let compiled = ctx.run(logical)?;
    debug!(
        method = %method.name,
        entity = %desc.name,
        conditions = compiled.groups.iter().map(Vec::len).sum::<usize>(),
        "compiled query"
    );
    Ok(compiled)
}

struct Compiler<'a> {
    desc: &'a EntityDescriptor,
    registry: &'a SchemaRegistry,
    method: &'a MethodDescriptor,
}

impl Compiler<'_> {
    fn run(&self, logical: &LogicalQuery) -> EngineResult<CompiledQuery> {
        if matches!(logical.op, OpCode::UpdateQuery) && !self.method.modifying {
            return Err(EngineError::BadInput(format!(
                "method '{}': UPDATE queries require the modifying flag",
                self.method.name
            )));
        }

        let mut groups = Vec::with_capacity(logical.groups.len());
        for group in &logical.groups {
            let mut compiled = Vec::with_capacity(group.len());
            for cond in group {
                compiled.push(self.condition(cond)?);
            }
            groups.push(compiled);
        }

        let order_by = logical
            .order_by
            .iter()
            .map(|key| self.order_key(key))
            .collect::<EngineResult<Vec<_>>>()?;

        let group_by = logical
            .group_by
            .iter()
            .map(|path| self.column(path))
            .collect::<EngineResult<Vec<_>>>()?;

        let having = match &logical.having {
            Some(h) => Some(CompiledHaving {
                op: h.op,
                binding: self.binding(&h.arg, TypeCode::I64)?,
            }),
            None => None,
        };

        let assignments = logical
            .assignments
            .iter()
            .map(|(path, arg)| {
                let column = self.column(path)?;
                let ColumnRef::Direct { field, code } = column else {
                    return Err(EngineError::BadInput(format!(
                        "method '{}': assignment through a join is unsupported",
                        self.method.name
                    )));
                };
                Ok((field, self.binding(arg, code)?))
            })
            .collect::<EngineResult<Vec<_>>>()?;

        let distinct = self.distinct(logical, &groups)?;
        let return_kind = self.validate_return_kind(logical)?;

        Ok(CompiledQuery {
            op: logical.op,
            return_kind,
            groups,
            order_by,
            limit: logical.limit,
            distinct,
            group_by,
            having,
            assignments,
            arity: self.method.arity,
        })
    }

    /// Resolve a property path to a column reference. A joined path whose
    /// inner field is the target's primary key degenerates to the
    /// foreign-key column itself, so no join happens at runtime.
    fn column(&self, path: &[String]) -> EngineResult<ColumnRef> {
        match path {
            [name] => {
                let field = self.field(self.desc, name)?;
                Ok(ColumnRef::Direct {
                    field: field.id,
                    code: field.type_code,
                })
            }
            [outer, inner] => {
                let fk = self.field(self.desc, outer)?;
                let relation = fk.relation.as_ref().ok_or_else(|| {
                    EngineError::BadInput(format!(
                        "method '{}': '{outer}' is not a relationship field of '{}'",
                        self.method.name, self.desc.name
                    ))
                })?;
                let target = self.registry.get(&relation.target)?;
                let inner_field = self.field(&target, inner)?;
                if inner_field.is_id {
                    return Ok(ColumnRef::Direct {
                        field: fk.id,
                        code: fk.type_code,
                    });
                }
                Ok(ColumnRef::Joined {
                    fk_field: fk.id,
                    target: relation.target.clone(),
                    inner_field: inner_field.id,
                    code: inner_field.type_code,
                })
            }
            _ => Err(EngineError::BadInput(format!(
                "method '{}': path '{}' nests deeper than one join level",
                self.method.name,
                path.join(".")
            ))),
        }
    }

    fn field<'d>(
        &self,
        desc: &'d EntityDescriptor,
        name: &str,
    ) -> EngineResult<&'d FieldDescriptor> {
        let field = desc.field_by_name(name).ok_or_else(|| {
            EngineError::BadInput(format!(
                "method '{}': entity '{}' has no field '{name}'",
                self.method.name, desc.name
            ))
        })?;
        if field.transient {
            return Err(EngineError::BadInput(format!(
                "method '{}': field '{name}' is transient and not queryable",
                self.method.name
            )));
        }
        Ok(field)
    }

    fn condition(&self, cond: &Condition) -> EngineResult<CompiledCondition> {
        let column = self.column(&cond.path)?;
        let code = column.code();
        let dispatch = dispatch::pack(cond.op, code)?;

        if cond.ignore_case {
            if code != TypeCode::Str {
                return Err(EngineError::TypeMismatch(format!(
                    "method '{}': IgnoreCase applies to string fields, '{}' is {code}",
                    self.method.name,
                    cond.path.join(".")
                )));
            }
            if !cond.op.supports_ignore_case() {
                return Err(EngineError::TypeMismatch(format!(
                    "method '{}': IgnoreCase does not combine with {:?}",
                    self.method.name, cond.op
                )));
            }
        }

        // IN takes either one collection argument or a literal list; every
        // other operator takes exactly its arity.
        let bindings = if matches!(cond.op, Operator::In | Operator::NotIn) {
            if cond.args.is_empty() {
                return Err(EngineError::BadInput(format!(
                    "method '{}': {} needs at least one operand",
                    self.method.name,
                    cond.path.join(".")
                )));
            }
            cond.args
                .iter()
                .map(|arg| self.binding(arg, code))
                .collect::<EngineResult<Vec<_>>>()?
        } else {
            if cond.args.len() != cond.op.arity() {
                return Err(EngineError::BadInput(format!(
                    "method '{}': {:?} takes {} operand(s), got {}",
                    self.method.name,
                    cond.op,
                    cond.op.arity(),
                    cond.args.len()
                )));
            }
            cond.args
                .iter()
                .map(|arg| self.binding(arg, code))
                .collect::<EngineResult<Vec<_>>>()?
        };

        let strategy = self.strategy(&column, cond);
        Ok(CompiledCondition {
            column,
            op: cond.op,
            ignore_case: cond.ignore_case,
            bindings,
            strategy,
            dispatch,
        })
    }

    /// Index selection: the id index for primary-key equality, a declared
    /// secondary index when its kind supports the operator (and its case
    /// folding matches the condition's), otherwise a column scan.
    fn strategy(&self, column: &ColumnRef, cond: &Condition) -> Strategy {
        match column {
            ColumnRef::Direct { field, .. } => strategy_for(self.desc, *field, cond),
            // For a joined condition the strategy applies to the inner column.
            ColumnRef::Joined {
                target,
                inner_field,
                ..
            } => match self.registry.get(target) {
                Ok(target) => strategy_for(&target, *inner_field, cond),
                Err(_) => Strategy::ScanColumn,
            },
        }
    }

    fn binding(&self, arg: &Argument, code: TypeCode) -> EngineResult<Binding> {
        match arg {
            Argument::Param(i) => {
                if *i >= self.method.arity {
                    return Err(EngineError::BadInput(format!(
                        "method '{}': parameter ?{} exceeds the declared arity {}",
                        self.method.name,
                        i + 1,
                        self.method.arity
                    )));
                }
                Ok(Binding::Arg(*i))
            }
            Argument::Named(name) => {
                let pos = self
                    .method
                    .param_names
                    .iter()
                    .position(|p| p == name)
                    .ok_or_else(|| {
                        EngineError::BadInput(format!(
                            "method '{}': no parameter named ':{name}' (declared: {})",
                            self.method.name,
                            self.method.param_names.join(", ")
                        ))
                    })?;
                Ok(Binding::Arg(pos))
            }
            Argument::Literal(value) => Ok(Binding::Value(coerce_literal(value, code)?)),
        }
    }

    fn order_key(&self, key: &OrderKey) -> EngineResult<CompiledOrderKey> {
        Ok(CompiledOrderKey {
            column: self.column(&key.path)?,
            descending: key.descending,
        })
    }

    fn distinct(
        &self,
        logical: &LogicalQuery,
        groups: &[Vec<CompiledCondition>],
    ) -> EngineResult<Distinct> {
        if !logical.distinct {
            return Ok(Distinct::None);
        }
        if !logical.projection.is_empty() {
            let columns = logical
                .projection
                .iter()
                .map(|path| self.column(path))
                .collect::<EngineResult<Vec<_>>>()?;
            return Ok(Distinct::ByProjection(columns));
        }
        // A whole-entity `SELECT DISTINCT e` deduplicates by row handle.
        if logical.annotated {
            return Ok(Distinct::ByRow);
        }
        // Derived `findDistinctBy<Prop>` deduplicates by the predicate
        // properties, declared here rather than inferred at runtime.
        let mut columns: Vec<ColumnRef> = Vec::new();
        for cond in groups.iter().flatten() {
            if !columns.contains(&cond.column) {
                columns.push(cond.column.clone());
            }
        }
        if columns.is_empty() {
            Ok(Distinct::ByRow)
        } else {
            Ok(Distinct::ByProjection(columns))
        }
    }

    fn validate_return_kind(&self, logical: &LogicalQuery) -> EngineResult<ReturnKind> {
        let declared = self.method.return_kind;
        let ok = match logical.op {
            OpCode::Find => {
                if logical.group_by.is_empty() {
                    matches!(
                        declared,
                        ReturnKind::OneOptional | ReturnKind::ManyList | ReturnKind::ManySet
                    )
                } else {
                    declared == ReturnKind::GroupMap
                }
            }
            OpCode::Count => declared == ReturnKind::CountLong,
            OpCode::Exists => declared == ReturnKind::ExistsBool,
            OpCode::DeleteQuery | OpCode::UpdateQuery => {
                matches!(declared, ReturnKind::CountLong | ReturnKind::Nothing)
            }
            other => {
                return Err(EngineError::BadInput(format!(
                    "method '{}': opcode {other:?} is built-in and not derivable",
                    self.method.name
                )))
            }
        };
        if !ok {
            return Err(EngineError::TypeMismatch(format!(
                "method '{}': return kind {declared:?} does not fit {:?}",
                self.method.name, logical.op
            )));
        }
        Ok(declared)
    }
}

fn strategy_for(desc: &EntityDescriptor, field_id: FieldId, cond: &Condition) -> Strategy {
    let field = desc.field(field_id);
    if field.is_id && cond.op == Operator::Eq && !cond.ignore_case {
        return Strategy::UseIdIndex;
    }
    let Some(spec) = field.index else {
        return Strategy::ScanColumn;
    };
    let usable = match spec.kind {
        IndexKind::Hash => {
            matches!(cond.op, Operator::Eq | Operator::In) && !cond.ignore_case
        }
        IndexKind::Range => matches!(
            cond.op,
            Operator::Eq
                | Operator::Lt
                | Operator::Le
                | Operator::Gt
                | Operator::Ge
                | Operator::Between
        ),
        IndexKind::Prefix => {
            cond.op == Operator::StartingWith && spec.case_insensitive == cond.ignore_case
        }
        IndexKind::Suffix => {
            cond.op == Operator::EndingWith && spec.case_insensitive == cond.ignore_case
        }
    };
    if usable {
        Strategy::UseIndex(spec.kind)
    } else {
        Strategy::ScanColumn
    }
}

/// Coerce a parsed literal into the column's value space. Numeric literals
/// narrow with a range check; strings feed string, decimal, char and uuid
/// columns; a bare NULL literal is rejected in favor of IS NULL.
pub fn coerce_literal(value: &Value, code: TypeCode) -> EngineResult<Value> {
    if value.is_null() {
        return Err(EngineError::BadInput(
            "comparisons with NULL never match; use IS NULL / IS NOT NULL".into(),
        ));
    }
    let mismatch = || {
        EngineError::TypeMismatch(format!(
            "literal {value} does not fit a {code} field"
        ))
    };
    match code {
        TypeCode::I8 => {
            let v = value.as_i64().ok_or_else(mismatch)?;
            i8::try_from(v).map(Value::I8).map_err(|_| mismatch())
        }
        TypeCode::I16 => {
            let v = value.as_i64().ok_or_else(mismatch)?;
            i16::try_from(v).map(Value::I16).map_err(|_| mismatch())
        }
        TypeCode::I32 => {
            let v = value.as_i64().ok_or_else(mismatch)?;
            i32::try_from(v).map(Value::I32).map_err(|_| mismatch())
        }
        TypeCode::I64 => value.as_i64().map(Value::I64).ok_or_else(mismatch),
        TypeCode::Instant => value.as_i64().map(Value::Instant).ok_or_else(mismatch),
        TypeCode::Date => value.as_i64().map(Value::Date).ok_or_else(mismatch),
        TypeCode::DateTime => value.as_i64().map(Value::DateTime).ok_or_else(mismatch),
        TypeCode::F32 => match value {
            Value::F32(v) => Ok(Value::F32(*v)),
            Value::F64(v) => Ok(Value::F32(*v as f32)),
            v => v
                .as_i64()
                .map(|i| Value::F32(i as f32))
                .ok_or_else(mismatch),
        },
        TypeCode::F64 => match value {
            Value::F64(v) => Ok(Value::F64(*v)),
            Value::F32(v) => Ok(Value::F64(f64::from(*v))),
            v => v
                .as_i64()
                .map(|i| Value::F64(i as f64))
                .ok_or_else(mismatch),
        },
        TypeCode::Bool => value
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(mismatch),
        TypeCode::Char => match value {
            Value::Char(c) => Ok(Value::Char(*c)),
            Value::Str(s) if s.chars().count() == 1 => {
                Ok(Value::Char(s.chars().next().expect("one char")))
            }
            _ => Err(mismatch()),
        },
        TypeCode::Str => value
            .as_str()
            .map(Value::str)
            .ok_or_else(mismatch),
        TypeCode::Decimal => value
            .as_str()
            .map(Value::decimal)
            .ok_or_else(mismatch),
        TypeCode::Uuid => match value {
            Value::Uuid(u) => Ok(Value::Uuid(*u)),
            Value::Str(s) => uuid::Uuid::parse_str(s)
                .map(Value::Uuid)
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
    }
}
