//! Derived-query tokenizer: camel-cased method names → [`LogicalQuery`].
//!
//! Property paths resolve by longest prefix over the entity's field names,
//! recursing one level through relationship fields for dotted paths. CRUD
//! built-ins (`save`, `findById`, …) are recognized by signature in the
//! repository layer and never reach this tokenizer.

use common::{EngineError, EngineResult};
use schema::{EntityDescriptor, FieldDescriptor, OpCode, SchemaRegistry};
use typecode::Operator;

use crate::logical::{Argument, Condition, LogicalQuery, OrderKey};

/// Operator suffixes in longest-first match order. `Before`/`After` alias
/// the comparison operators; `True`/`False` are the nullary boolean tests.
const OPERATOR_TOKENS: &[(&str, Operator)] = &[
    ("GreaterThanEqual", Operator::Ge),
    ("LessThanEqual", Operator::Le),
    ("StartingWith", Operator::StartingWith),
    ("GreaterThan", Operator::Gt),
    ("EndingWith", Operator::EndingWith),
    ("Containing", Operator::Containing),
    ("IsNotNull", Operator::IsNotNull),
    ("LessThan", Operator::Lt),
    ("NotLike", Operator::NotLike),
    ("Between", Operator::Between),
    ("IsNull", Operator::IsNull),
    ("Before", Operator::Lt),
    ("Equals", Operator::Eq),
    ("NotIn", Operator::NotIn),
    ("After", Operator::Gt),
    ("False", Operator::IsFalse),
    ("Like", Operator::Like),
    ("True", Operator::IsTrue),
    ("Not", Operator::Ne),
    ("In", Operator::In),
];

/// Parse a derived repository method name against the entity's descriptor.
/// `arity` is the number of runtime arguments the method declares; the
/// tokenizer assigns them to conditions in order and rejects a mismatch.
pub fn parse_method_name(
    name: &str,
    arity: usize,
    desc: &EntityDescriptor,
    registry: &SchemaRegistry,
) -> EngineResult<LogicalQuery> {
    let (op, rest) = strip_prefix(name)?;
    let mut query = LogicalQuery::new(op);
    let mut rest = rest;

    if op == OpCode::Find {
        if let Some(stripped) = rest.strip_prefix("Top").or_else(|| rest.strip_prefix("First")) {
            let digits: String = stripped.chars().take_while(char::is_ascii_digit).collect();
            if digits.is_empty() {
                // `First` with no count means one row.
                if rest.starts_with("First") {
                    query.limit = Some(1);
                    rest = stripped;
                } else {
                    return Err(EngineError::BadInput(format!(
                        "method '{name}': Top requires a count"
                    )));
                }
            } else {
                query.limit = Some(digits.parse().map_err(|_| {
                    EngineError::BadInput(format!("method '{name}': bad Top count '{digits}'"))
                })?);
                rest = &stripped[digits.len()..];
            }
        }
        if let Some(stripped) = rest.strip_prefix("Distinct") {
            query.distinct = true;
            rest = stripped;
        }
    }

    let Some(predicate_part) = rest.strip_prefix("By") else {
        return Err(EngineError::BadInput(format!(
            "method '{name}': expected 'By' before the predicate, found '{rest}'"
        )));
    };

    let (predicate_part, order_part) = match predicate_part.rfind("OrderBy") {
        Some(pos) => (&predicate_part[..pos], &predicate_part[pos + "OrderBy".len()..]),
        None => (predicate_part, ""),
    };
    if predicate_part.is_empty() && order_part.is_empty() {
        return Err(EngineError::BadInput(format!(
            "method '{name}': empty predicate"
        )));
    }

    let mut params = 0usize;
    // `findFirstByOrderBy…` keeps the predicate empty and only orders.
    if !predicate_part.is_empty() {
        query.groups = parse_predicate(name, predicate_part, desc, registry, &mut params)?;
    }
    if !order_part.is_empty() {
        query.order_by = parse_order(name, order_part, desc, registry)?;
    }

    if params != arity {
        return Err(EngineError::BadInput(format!(
            "method '{name}': predicate consumes {params} argument(s) but the method declares {arity}"
        )));
    }
    Ok(query)
}

fn strip_prefix(name: &str) -> EngineResult<(OpCode, &str)> {
    for (prefix, op) in [
        ("delete", OpCode::DeleteQuery),
        ("remove", OpCode::DeleteQuery),
        ("exists", OpCode::Exists),
        ("count", OpCode::Count),
        ("query", OpCode::Find),
        ("find", OpCode::Find),
        ("read", OpCode::Find),
        ("get", OpCode::Find),
    ] {
        if let Some(rest) = name.strip_prefix(prefix) {
            return Ok((op, rest));
        }
    }
    Err(EngineError::BadInput(format!(
        "method '{name}': unknown prefix; expected find/read/query/get/count/exists/delete/remove"
    )))
}

/// Longest-prefix property match: one field, or a relationship field
/// followed by a field of the target entity.
fn match_path(
    rest: &str,
    desc: &EntityDescriptor,
    registry: &SchemaRegistry,
) -> EngineResult<Option<(Vec<String>, usize, FieldDescriptor)>> {
    let Some(field) = match_field(rest, desc) else {
        return Ok(None);
    };
    let consumed = field.norm.len();
    if field.relation.is_some() {
        let target = registry.get(&field.relation.as_ref().expect("relation").target)?;
        if let Some(inner) = match_field(&rest[consumed..], &target) {
            return Ok(Some((
                vec![field.name.clone(), inner.name.clone()],
                consumed + inner.norm.len(),
                inner.clone(),
            )));
        }
    }
    Ok(Some((vec![field.name.clone()], consumed, field.clone())))
}

fn match_field<'a>(rest: &str, desc: &'a EntityDescriptor) -> Option<&'a FieldDescriptor> {
    desc.fields
        .iter()
        .filter(|f| {
            rest.len() >= f.norm.len() && rest[..f.norm.len()].eq_ignore_ascii_case(&f.norm)
        })
        .max_by_key(|f| f.norm.len())
}

/// A segment boundary: what may legally follow a complete condition.
fn boundary_ok(rest: &str) -> bool {
    rest.is_empty()
        || rest.starts_with("And")
        || rest.starts_with("Or")
        || rest.starts_with("IgnoreCase")
}

fn match_operator(rest: &str) -> Option<(Operator, usize)> {
    OPERATOR_TOKENS
        .iter()
        .find(|(tok, _)| rest.starts_with(tok) && boundary_ok(&rest[tok.len()..]))
        .map(|(tok, op)| (*op, tok.len()))
}

fn parse_predicate(
    name: &str,
    mut rest: &str,
    desc: &EntityDescriptor,
    registry: &SchemaRegistry,
    params: &mut usize,
) -> EngineResult<Vec<Vec<Condition>>> {
    let mut groups: Vec<Vec<Condition>> = vec![Vec::new()];
    loop {
        let Some((path, consumed, _)) = match_path(rest, desc, registry)? else {
            return Err(EngineError::BadInput(format!(
                "method '{name}': no property of '{}' matches '{rest}'",
                desc.name
            )));
        };
        rest = &rest[consumed..];

        let (op, oplen) = match_operator(rest).unwrap_or((Operator::Eq, 0));
        rest = &rest[oplen..];

        let mut ignore_case = false;
        if let Some(stripped) = rest.strip_prefix("IgnoreCase") {
            ignore_case = true;
            rest = stripped;
        }

        let args = (0..op.arity())
            .map(|_| {
                let idx = *params;
                *params += 1;
                Argument::Param(idx)
            })
            .collect();
        groups
            .last_mut()
            .expect("at least one group")
            .push(Condition {
                path,
                op,
                ignore_case,
                args,
            });

        if rest.is_empty() {
            break;
        }
        if let Some(stripped) = rest.strip_prefix("And") {
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix("Or") {
            groups.push(Vec::new());
            rest = stripped;
        } else {
            return Err(EngineError::BadInput(format!(
                "method '{name}': expected And/Or, found '{rest}'"
            )));
        }
    }
    Ok(groups)
}

fn parse_order(
    name: &str,
    mut rest: &str,
    desc: &EntityDescriptor,
    registry: &SchemaRegistry,
) -> EngineResult<Vec<OrderKey>> {
    let mut keys = Vec::new();
    while !rest.is_empty() {
        let Some((path, consumed, _)) = match_path(rest, desc, registry)? else {
            return Err(EngineError::BadInput(format!(
                "method '{name}': no property of '{}' matches order key '{rest}'",
                desc.name
            )));
        };
        rest = &rest[consumed..];
        let mut descending = false;
        if let Some(stripped) = rest.strip_prefix("Desc") {
            descending = true;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix("Asc") {
            rest = stripped;
        }
        keys.push(OrderKey { path, descending });
    }
    Ok(keys)
}
