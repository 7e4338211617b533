//! The logical query: the single structure both front ends lower to.

use schema::OpCode;
use typecode::{Operator, Value};

/// How a condition operand is supplied at call time.
#[derive(Clone, Debug, PartialEq)]
pub enum Argument {
    /// Positional method argument (0-based).
    Param(usize),
    /// Named JPQL parameter, resolved to a position at compile time.
    Named(String),
    /// Immediate literal from the query text.
    Literal(Value),
}

/// One predicate over a property path. Paths hold resolved field names:
/// one segment, or two for a single relationship hop.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub path: Vec<String>,
    pub op: Operator,
    pub ignore_case: bool,
    pub args: Vec<Argument>,
}

/// One ORDER BY key.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderKey {
    pub path: Vec<String>,
    pub descending: bool,
}

/// HAVING over grouped results; the subset supports COUNT(*) comparisons.
#[derive(Clone, Debug, PartialEq)]
pub struct Having {
    pub op: Operator,
    pub arg: Argument,
}

/// Logical form of one repository query, produced by the method-name
/// tokenizer or the annotated-query parser and consumed by the compiler.
///
/// The predicate is held in its single-precedence-level normal form: an OR
/// of AND groups. Parenthesized source input is normalized into this shape;
/// NOT has already been pushed into the operators.
#[derive(Clone, Debug, PartialEq)]
pub struct LogicalQuery {
    pub op: OpCode,
    pub groups: Vec<Vec<Condition>>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<usize>,
    pub distinct: bool,
    /// True when this query came from an annotated query string rather
    /// than a method name; whole-entity DISTINCT differs between the two.
    pub annotated: bool,
    /// Projected property paths; empty means the whole entity.
    pub projection: Vec<Vec<String>>,
    pub group_by: Vec<Vec<String>>,
    pub having: Option<Having>,
    /// `SET path = arg` pairs of a modifying update.
    pub assignments: Vec<(Vec<String>, Argument)>,
}

impl LogicalQuery {
    pub fn new(op: OpCode) -> Self {
        LogicalQuery {
            op,
            groups: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            distinct: false,
            annotated: false,
            projection: Vec::new(),
            group_by: Vec::new(),
            having: None,
            assignments: Vec::new(),
        }
    }

    /// Conditions in declaration order across all groups.
    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.groups.iter().flatten()
    }
}
