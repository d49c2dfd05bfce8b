#![forbid(unsafe_code)]

use fwd_ad::AdError;
use fwd_core::JaxprValidationError;
use fwd_interpreters::InterpreterError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The program was rejected before evaluation (`Hardened` mode).
    Validation(JaxprValidationError),
    /// Evaluating the program failed, with or without a transform.
    Interpreter(InterpreterError),
    /// Differentiation failed or its arguments were invalid.
    Transform(AdError),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "program validation failed: {err}"),
            Self::Interpreter(err) => write!(f, "evaluation failed: {err}"),
            Self::Transform(err) => write!(f, "transform failed: {err}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<JaxprValidationError> for ApiError {
    fn from(value: JaxprValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<InterpreterError> for ApiError {
    fn from(value: InterpreterError) -> Self {
        Self::Interpreter(value)
    }
}

impl From<AdError> for ApiError {
    fn from(value: AdError) -> Self {
        match value {
            AdError::Validation(err) => Self::Validation(err),
            AdError::Interpreter(err) => Self::Interpreter(err),
            other => Self::Transform(other),
        }
    }
}
