#![forbid(unsafe_code)]

//! Forward-mode differentiation over `Jaxpr` programs.
//!
//! Tangents are pushed alongside the primal evaluation. A Jacobian is
//! assembled from one batched pass over the standard basis of the
//! differentiated arguments, so the primal program runs exactly once and
//! the returned value is the same value a plain evaluation produces.

mod jacobian;
mod jvp;
mod rules;

use fwd_core::{DType, JaxprValidationError, Shape, ValueError};
use fwd_interpreters::InterpreterError;
use fwd_lax::EvalError;

pub use jacobian::{
    Argnums, JacfwdConfig, ValueAndJacobian, jacfwd_jaxpr, value_and_jacfwd_jaxpr,
};
pub use jvp::{JvpBatch, jvp, jvp_batched};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdError {
    Interpreter(InterpreterError),
    Validation(JaxprValidationError),
    InvalidTensor(ValueError),
    TangentArity {
        expected: usize,
        actual: usize,
    },
    TangentShapeMismatch {
        index: usize,
        primal: Shape,
        tangent: Shape,
    },
    NonFloatTangent {
        index: usize,
        dtype: DType,
    },
    EmptyArgnums,
    ArgnumOutOfRange {
        argnum: usize,
        arity: usize,
    },
    DuplicateArgnum {
        argnum: usize,
    },
    NonFloatInput {
        argnum: usize,
        dtype: DType,
    },
    NonFloatOutput {
        output: usize,
        dtype: DType,
    },
    AuxRequiresPair {
        outputs: usize,
    },
}

impl std::fmt::Display for AdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interpreter(err) => write!(f, "interpreter error: {err}"),
            Self::Validation(err) => write!(f, "malformed program: {err}"),
            Self::InvalidTensor(err) => write!(f, "invalid tensor: {err}"),
            Self::TangentArity { expected, actual } => write!(
                f,
                "tangent arity mismatch: expected {}, got {}",
                expected, actual
            ),
            Self::TangentShapeMismatch {
                index,
                primal,
                tangent,
            } => write!(
                f,
                "tangent {} has shape {:?} but its primal has shape {:?}",
                index, tangent.dims, primal.dims
            ),
            Self::NonFloatTangent { index, dtype } => {
                write!(f, "tangent {} must be floating point, got {:?}", index, dtype)
            }
            Self::EmptyArgnums => write!(f, "argnums must name at least one argument"),
            Self::ArgnumOutOfRange { argnum, arity } => write!(
                f,
                "argnum {} out of range for a function of {} arguments",
                argnum, arity
            ),
            Self::DuplicateArgnum { argnum } => write!(f, "argnum {} given more than once", argnum),
            Self::NonFloatInput { argnum, dtype } => write!(
                f,
                "jacfwd requires real floating-point inputs, argument {} has dtype {:?}",
                argnum, dtype
            ),
            Self::NonFloatOutput { output, dtype } => write!(
                f,
                "jacfwd requires real floating-point outputs, output {} has dtype {:?}",
                output, dtype
            ),
            Self::AuxRequiresPair { outputs } => write!(
                f,
                "has_aux requires a value output followed by aux outputs, program has {} output(s)",
                outputs
            ),
        }
    }
}

impl std::error::Error for AdError {}

impl From<InterpreterError> for AdError {
    fn from(value: InterpreterError) -> Self {
        Self::Interpreter(value)
    }
}

impl From<EvalError> for AdError {
    fn from(value: EvalError) -> Self {
        Self::Interpreter(InterpreterError::Primitive(value))
    }
}

impl From<JaxprValidationError> for AdError {
    fn from(value: JaxprValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<ValueError> for AdError {
    fn from(value: ValueError) -> Self {
        Self::InvalidTensor(value)
    }
}
