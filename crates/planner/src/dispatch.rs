//! (operator, type-code) → single dispatch code lowering.
//!
//! Compiled conditions carry one `u16` per condition so the executor picks
//! its scan kernel with a constant-time unpack instead of re-deriving the
//! pairing on every call. Packing validates the pair against the operator
//! support table; an invalid pair never reaches a CompiledQuery.

use common::{EngineError, EngineResult};
use typecode::{Operator, TypeCode};

const OPERATORS: [Operator; 18] = [
    Operator::Eq,
    Operator::Ne,
    Operator::Lt,
    Operator::Le,
    Operator::Gt,
    Operator::Ge,
    Operator::Between,
    Operator::In,
    Operator::NotIn,
    Operator::Like,
    Operator::NotLike,
    Operator::StartingWith,
    Operator::EndingWith,
    Operator::Containing,
    Operator::IsNull,
    Operator::IsNotNull,
    Operator::IsTrue,
    Operator::IsFalse,
];

const TYPE_CODES: [TypeCode; 14] = [
    TypeCode::I8,
    TypeCode::I16,
    TypeCode::I32,
    TypeCode::I64,
    TypeCode::F32,
    TypeCode::F64,
    TypeCode::Bool,
    TypeCode::Char,
    TypeCode::Str,
    TypeCode::Instant,
    TypeCode::Date,
    TypeCode::DateTime,
    TypeCode::Uuid,
    TypeCode::Decimal,
];

fn operator_index(op: Operator) -> u8 {
    OPERATORS
        .iter()
        .position(|o| *o == op)
        .expect("operator table is total") as u8
}

fn type_index(code: TypeCode) -> u8 {
    TYPE_CODES
        .iter()
        .position(|c| *c == code)
        .expect("type-code table is total") as u8
}

/// Pack a validated (operator, type-code) pair.
pub fn pack(op: Operator, code: TypeCode) -> EngineResult<u16> {
    if !op.supports(code) {
        let supported: Vec<String> = OPERATORS
            .iter()
            .filter(|o| o.supports(code))
            .map(|o| format!("{o:?}"))
            .collect();
        return Err(EngineError::TypeMismatch(format!(
            "operator {op:?} does not apply to {code} fields; supported: {}",
            supported.join(", ")
        )));
    }
    Ok(u16::from(operator_index(op)) << 8 | u16::from(type_index(code)))
}

/// Unpack a dispatch code emitted by [`pack`].
pub fn unpack(dispatch: u16) -> (Operator, TypeCode) {
    let op = OPERATORS[(dispatch >> 8) as usize];
    let code = TYPE_CODES[(dispatch & 0xFF) as usize];
    (op, code)
}
