#![forbid(unsafe_code)]

use fwd_core::{DType, Literal, Primitive, Shape, TensorValue, Value};

use crate::EvalError;
use crate::type_promotion::{binary_literal_op, literal_to_f64, promote_dtype, unary_dtype};

/// Binary elementwise operation dispatching on int/float paths.
/// Scalars broadcast against tensors; tensors must agree in shape.
#[inline]
pub(crate) fn eval_binary_elementwise(
    primitive: Primitive,
    inputs: &[Value],
    int_op: impl Fn(i64, i64) -> i64,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    if inputs.len() != 2 {
        return Err(EvalError::ArityMismatch {
            primitive,
            expected: 2,
            actual: inputs.len(),
        });
    }

    match (&inputs[0], &inputs[1]) {
        (Value::Scalar(lhs), Value::Scalar(rhs)) => Ok(Value::Scalar(binary_literal_op(
            *lhs, *rhs, primitive, &int_op, &float_op,
        )?)),
        (Value::Tensor(lhs), Value::Tensor(rhs)) => {
            if lhs.shape != rhs.shape {
                return Err(EvalError::ShapeMismatch {
                    primitive,
                    left: lhs.shape.clone(),
                    right: rhs.shape.clone(),
                });
            }

            let elements = lhs
                .elements
                .iter()
                .copied()
                .zip(rhs.elements.iter().copied())
                .map(|(left, right)| binary_literal_op(left, right, primitive, &int_op, &float_op))
                .collect::<Result<Vec<_>, _>>()?;

            tensor_from(promote_dtype(lhs.dtype, rhs.dtype), lhs.shape.clone(), elements)
        }
        (Value::Scalar(lhs), Value::Tensor(rhs)) => {
            let elements = rhs
                .elements
                .iter()
                .copied()
                .map(|right| binary_literal_op(*lhs, right, primitive, &int_op, &float_op))
                .collect::<Result<Vec<_>, _>>()?;

            tensor_from(promote_dtype(lhs.dtype(), rhs.dtype), rhs.shape.clone(), elements)
        }
        (Value::Tensor(lhs), Value::Scalar(rhs)) => {
            let elements = lhs
                .elements
                .iter()
                .copied()
                .map(|left| binary_literal_op(left, *rhs, primitive, &int_op, &float_op))
                .collect::<Result<Vec<_>, _>>()?;

            tensor_from(promote_dtype(lhs.dtype, rhs.dtype()), lhs.shape.clone(), elements)
        }
    }
}

/// Unary elementwise operation that converts to f64 first (exp, log, sqrt, etc.).
#[inline]
pub(crate) fn eval_unary_elementwise(
    primitive: Primitive,
    inputs: &[Value],
    op: impl Fn(f64) -> f64,
) -> Result<Value, EvalError> {
    if inputs.len() != 1 {
        return Err(EvalError::ArityMismatch {
            primitive,
            expected: 1,
            actual: inputs.len(),
        });
    }

    match &inputs[0] {
        Value::Scalar(literal) => {
            let value = literal_to_f64(*literal, primitive, "expected numeric scalar")?;
            Ok(Value::scalar_f64(op(value)))
        }
        Value::Tensor(tensor) => {
            let elements = tensor
                .elements
                .iter()
                .copied()
                .map(|literal| {
                    literal_to_f64(literal, primitive, "expected numeric tensor elements")
                        .map(|value| Literal::from_f64(op(value)))
                })
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Value::Tensor(TensorValue::new(
                DType::F64,
                tensor.shape.clone(),
                elements,
            )?))
        }
    }
}

/// Unary elementwise that preserves integer types (neg, abs, square, sign).
#[inline]
pub(crate) fn eval_unary_int_or_float(
    primitive: Primitive,
    inputs: &[Value],
    int_op: impl Fn(i64) -> i64,
    float_op: impl Fn(f64) -> f64,
) -> Result<Value, EvalError> {
    if inputs.len() != 1 {
        return Err(EvalError::ArityMismatch {
            primitive,
            expected: 1,
            actual: inputs.len(),
        });
    }

    let apply = |literal: Literal| match literal {
        Literal::I64(v) => Ok(Literal::I64(int_op(v))),
        Literal::F64Bits(bits) => Ok(Literal::from_f64(float_op(f64::from_bits(bits)))),
        Literal::Bool(_) => Err(EvalError::TypeMismatch {
            primitive,
            detail: "expected numeric value, got bool",
        }),
    };

    match &inputs[0] {
        Value::Scalar(literal) => apply(*literal).map(Value::Scalar),
        Value::Tensor(tensor) => {
            let elements = tensor
                .elements
                .iter()
                .copied()
                .map(apply)
                .collect::<Result<Vec<_>, _>>()?;
            tensor_from(unary_dtype(tensor.dtype), tensor.shape.clone(), elements)
        }
    }
}

/// Dot product over rank <= 2 operands.
///
/// Scalars scale the other operand. Otherwise the last axis of the lhs is
/// contracted with the first axis of the rhs: `(k)·(k) -> ()`,
/// `(m,k)·(k) -> (m)`, `(k)·(k,n) -> (n)`, `(m,k)·(k,n) -> (m,n)`.
pub(crate) fn eval_dot(inputs: &[Value]) -> Result<Value, EvalError> {
    let primitive = Primitive::Dot;
    if inputs.len() != 2 {
        return Err(EvalError::ArityMismatch {
            primitive,
            expected: 2,
            actual: inputs.len(),
        });
    }

    let (lhs, rhs) = match (&inputs[0], &inputs[1]) {
        (Value::Scalar(_), _) | (_, Value::Scalar(_)) => {
            return eval_binary_elementwise(primitive, inputs, |a, b| a * b, |a, b| a * b);
        }
        (Value::Tensor(lhs), Value::Tensor(rhs)) => (lhs, rhs),
    };

    if lhs.rank() > 2 || rhs.rank() > 2 {
        return Err(EvalError::Unsupported {
            primitive,
            detail: format!(
                "dot supports rank <= 2 operands, got ranks {} and {}",
                lhs.rank(),
                rhs.rank()
            ),
        });
    }

    let (m, k_lhs) = match lhs.shape.dims.as_slice() {
        [k] => (None, *k as usize),
        [m, k] => (Some(*m as usize), *k as usize),
        _ => unreachable!("rank checked above"),
    };
    let (k_rhs, n) = match rhs.shape.dims.as_slice() {
        [k] => (*k as usize, None),
        [k, n] => (*k as usize, Some(*n as usize)),
        _ => unreachable!("rank checked above"),
    };
    if k_lhs != k_rhs {
        return Err(EvalError::ShapeMismatch {
            primitive,
            left: lhs.shape.clone(),
            right: rhs.shape.clone(),
        });
    }

    let rows = m.unwrap_or(1);
    let cols = n.unwrap_or(1);
    let dtype = promote_dtype(lhs.dtype, rhs.dtype);
    let integral = dtype == DType::I64;
    let mut elements = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            let lhs_at = |i: usize| lhs.elements[row * k_lhs + i];
            let rhs_at = |i: usize| rhs.elements[i * cols + col];
            if integral {
                let mut sum = 0_i64;
                for i in 0..k_lhs {
                    let left = lhs_at(i).as_i64().ok_or(EvalError::TypeMismatch {
                        primitive,
                        detail: "integral dot expected i64 elements",
                    })?;
                    let right = rhs_at(i).as_i64().ok_or(EvalError::TypeMismatch {
                        primitive,
                        detail: "integral dot expected i64 elements",
                    })?;
                    sum = sum.wrapping_add(left.wrapping_mul(right));
                }
                elements.push(Literal::I64(sum));
            } else {
                let mut sum = 0.0_f64;
                for i in 0..k_lhs {
                    sum += literal_to_f64(lhs_at(i), primitive, "expected numeric lhs tensor")?
                        * literal_to_f64(rhs_at(i), primitive, "expected numeric rhs tensor")?;
                }
                elements.push(Literal::from_f64(sum));
            }
        }
    }

    let dims = m.into_iter().chain(n).map(|d| d as u32).collect::<Vec<_>>();
    if dims.is_empty() {
        return Ok(Value::Scalar(elements[0]));
    }
    tensor_from(dtype, Shape { dims }, elements)
}

fn tensor_from(dtype: DType, shape: Shape, elements: Vec<Literal>) -> Result<Value, EvalError> {
    Ok(Value::Tensor(TensorValue::new(dtype, shape, elements)?))
}
