//! Predicate operators and the operator/type support table.

use serde::{Deserialize, Serialize};

use crate::TypeCode;

/// Closed set of condition operators. `IgnoreCase` is a flag on the
/// condition, not an operator; `ILIKE` lowers to `Like` with that flag set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Between,
    In,
    NotIn,
    Like,
    NotLike,
    StartingWith,
    EndingWith,
    Containing,
    IsNull,
    IsNotNull,
    IsTrue,
    IsFalse,
}

impl Operator {
    /// Number of runtime arguments the operator consumes.
    pub fn arity(self) -> usize {
        match self {
            Operator::IsNull | Operator::IsNotNull | Operator::IsTrue | Operator::IsFalse => 0,
            Operator::Between => 2,
            _ => 1,
        }
    }

    /// Whether the operator applies to a column of the given type code.
    /// This is the support table of the external interface, consulted by
    /// the compiler; the executor never sees an unsupported pair.
    pub fn supports(self, code: TypeCode) -> bool {
        use Operator::*;
        use TypeCode::*;
        // Null tests only consult the presence bitmap.
        if matches!(self, IsNull | IsNotNull) {
            return true;
        }
        match code {
            I8 | I16 | I32 | I64 | Instant | Date | DateTime => {
                matches!(self, Eq | Ne | Lt | Le | Gt | Ge | Between | In | NotIn)
            }
            F32 | F64 => matches!(self, Eq | Ne | Lt | Le | Gt | Ge | Between),
            Bool => matches!(self, Eq | Ne | IsTrue | IsFalse),
            Char => matches!(self, Eq | Ne | In | NotIn),
            Str => matches!(
                self,
                Eq | Ne | In | NotIn | Like | NotLike | StartingWith | EndingWith | Containing
            ),
            Uuid | Decimal => matches!(self, Eq | Ne | In | NotIn),
        }
    }

    /// True for the operators whose ignore-case variant is defined
    /// (string columns only).
    pub fn supports_ignore_case(self) -> bool {
        matches!(
            self,
            Operator::Eq
                | Operator::Ne
                | Operator::In
                | Operator::NotIn
                | Operator::Like
                | Operator::NotLike
                | Operator::StartingWith
                | Operator::EndingWith
                | Operator::Containing
        )
    }

    /// The operator with its outcome negated, where one exists in the set.
    pub fn negated(self) -> Option<Operator> {
        use Operator::*;
        Some(match self {
            Eq => Ne,
            Ne => Eq,
            Lt => Ge,
            Le => Gt,
            Gt => Le,
            Ge => Lt,
            In => NotIn,
            NotIn => In,
            Like => NotLike,
            NotLike => Like,
            IsNull => IsNotNull,
            IsNotNull => IsNull,
            IsTrue => IsFalse,
            IsFalse => IsTrue,
            Between | StartingWith | EndingWith | Containing => return None,
        })
    }
}
