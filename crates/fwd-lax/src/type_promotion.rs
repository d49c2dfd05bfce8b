#![forbid(unsafe_code)]

use fwd_core::{DType, Literal, Primitive};

use crate::EvalError;

fn is_integral(dtype: DType) -> bool {
    matches!(dtype, DType::I64 | DType::I32)
}

/// Result dtype of a binary op: I64 when both operands are integral,
/// otherwise F64. Decided from the operands so empty tensors keep their type.
#[inline]
pub(crate) fn promote_dtype(lhs: DType, rhs: DType) -> DType {
    if is_integral(lhs) && is_integral(rhs) {
        DType::I64
    } else {
        DType::F64
    }
}

/// Result dtype of an integer-preserving unary op.
#[inline]
pub(crate) fn unary_dtype(input: DType) -> DType {
    promote_dtype(input, input)
}

/// Apply a binary operation to two literals, dispatching on int vs float.
#[inline]
pub(crate) fn binary_literal_op(
    lhs: Literal,
    rhs: Literal,
    primitive: Primitive,
    int_op: &impl Fn(i64, i64) -> i64,
    float_op: &impl Fn(f64, f64) -> f64,
) -> Result<Literal, EvalError> {
    match (lhs, rhs) {
        (Literal::I64(left), Literal::I64(right)) => Ok(Literal::I64(int_op(left, right))),
        (left, right) => {
            let lhs_f = left.as_f64().ok_or(EvalError::TypeMismatch {
                primitive,
                detail: "expected numeric lhs",
            })?;
            let rhs_f = right.as_f64().ok_or(EvalError::TypeMismatch {
                primitive,
                detail: "expected numeric rhs",
            })?;
            Ok(Literal::from_f64(float_op(lhs_f, rhs_f)))
        }
    }
}

/// Numeric view of a literal for float-only kernels.
#[inline]
pub(crate) fn literal_to_f64(
    literal: Literal,
    primitive: Primitive,
    detail: &'static str,
) -> Result<f64, EvalError> {
    literal
        .as_f64()
        .ok_or(EvalError::TypeMismatch { primitive, detail })
}
