#![forbid(unsafe_code)]

mod arithmetic;
mod reduction;
mod type_promotion;

use fwd_core::{Primitive, Shape, Value, ValueError};
use std::collections::BTreeMap;

use arithmetic::{eval_binary_elementwise, eval_dot, eval_unary_elementwise, eval_unary_int_or_float};
use reduction::eval_reduce_sum;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    ArityMismatch {
        primitive: Primitive,
        expected: usize,
        actual: usize,
    },
    TypeMismatch {
        primitive: Primitive,
        detail: &'static str,
    },
    ShapeMismatch {
        primitive: Primitive,
        left: Shape,
        right: Shape,
    },
    Unsupported {
        primitive: Primitive,
        detail: String,
    },
    InvalidTensor(ValueError),
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ArityMismatch {
                primitive,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "arity mismatch for {}: expected {}, got {}",
                    primitive.as_str(),
                    expected,
                    actual
                )
            }
            Self::TypeMismatch { primitive, detail } => {
                write!(f, "type mismatch for {}: {}", primitive.as_str(), detail)
            }
            Self::ShapeMismatch {
                primitive,
                left,
                right,
            } => {
                write!(
                    f,
                    "shape mismatch for {}: left={:?} right={:?}",
                    primitive.as_str(),
                    left.dims,
                    right.dims
                )
            }
            Self::Unsupported { primitive, detail } => {
                write!(f, "unsupported {} behavior: {}", primitive.as_str(), detail)
            }
            Self::InvalidTensor(err) => write!(f, "invalid tensor: {err}"),
        }
    }
}

impl std::error::Error for EvalError {}

impl From<ValueError> for EvalError {
    fn from(value: ValueError) -> Self {
        Self::InvalidTensor(value)
    }
}

#[inline]
pub fn eval_primitive(
    primitive: Primitive,
    inputs: &[Value],
    params: &BTreeMap<String, String>,
) -> Result<Value, EvalError> {
    match primitive {
        // Binary arithmetic
        Primitive::Add => eval_binary_elementwise(primitive, inputs, i64::wrapping_add, |a, b| a + b),
        Primitive::Sub => eval_binary_elementwise(primitive, inputs, i64::wrapping_sub, |a, b| a - b),
        Primitive::Mul => eval_binary_elementwise(primitive, inputs, i64::wrapping_mul, |a, b| a * b),
        Primitive::Div => eval_binary_elementwise(
            primitive,
            inputs,
            |a, b| if b != 0 { a.wrapping_div(b) } else { 0 },
            |a, b| a / b,
        ),
        Primitive::Max => eval_binary_elementwise(primitive, inputs, |a, b| a.max(b), f64::max),
        Primitive::Min => eval_binary_elementwise(primitive, inputs, |a, b| a.min(b), f64::min),
        Primitive::Pow => eval_binary_elementwise(
            primitive,
            inputs,
            |a, b| (a as f64).powf(b as f64) as i64,
            f64::powf,
        ),
        // Unary arithmetic
        Primitive::Neg => eval_unary_int_or_float(primitive, inputs, i64::wrapping_neg, |x| -x),
        Primitive::Abs => eval_unary_int_or_float(primitive, inputs, i64::wrapping_abs, f64::abs),
        Primitive::Exp => eval_unary_elementwise(primitive, inputs, f64::exp),
        Primitive::Log => eval_unary_elementwise(primitive, inputs, f64::ln),
        Primitive::Sqrt => eval_unary_elementwise(primitive, inputs, f64::sqrt),
        // Trigonometric
        Primitive::Sin => eval_unary_elementwise(primitive, inputs, f64::sin),
        Primitive::Cos => eval_unary_elementwise(primitive, inputs, f64::cos),
        Primitive::Tanh => eval_unary_elementwise(primitive, inputs, f64::tanh),
        // Additional math
        Primitive::Logistic => {
            eval_unary_elementwise(primitive, inputs, |x| 1.0 / (1.0 + (-x).exp()))
        }
        Primitive::Square => eval_unary_int_or_float(primitive, inputs, |x| x.wrapping_mul(x), |x| x * x),
        Primitive::Reciprocal => eval_unary_elementwise(primitive, inputs, |x| 1.0 / x),
        Primitive::Floor => eval_unary_elementwise(primitive, inputs, f64::floor),
        Primitive::Sign => eval_unary_int_or_float(
            primitive,
            inputs,
            |x| x.signum(),
            |x| {
                if x.is_nan() {
                    f64::NAN
                } else if x == 0.0 {
                    x
                } else {
                    x.signum()
                }
            },
        ),
        Primitive::Dot => eval_dot(inputs),
        Primitive::ReduceSum => eval_reduce_sum(inputs, params),
    }
}
