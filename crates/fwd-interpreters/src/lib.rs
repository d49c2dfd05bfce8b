#![forbid(unsafe_code)]

use fwd_core::{Atom, Equation, Jaxpr, Value, VarId};
use fwd_lax::{EvalError, eval_primitive};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterpreterError {
    InputArity {
        expected: usize,
        actual: usize,
    },
    MissingVariable(VarId),
    UnexpectedOutputArity {
        primitive: fwd_core::Primitive,
        actual: usize,
    },
    Primitive(EvalError),
}

impl std::fmt::Display for InterpreterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InputArity { expected, actual } => {
                write!(
                    f,
                    "input arity mismatch: expected {}, got {}",
                    expected, actual
                )
            }
            Self::MissingVariable(var) => write!(f, "missing variable v{}", var.0),
            Self::UnexpectedOutputArity { primitive, actual } => write!(
                f,
                "expected single-output primitive {}, got {} outputs",
                primitive.as_str(),
                actual
            ),
            Self::Primitive(err) => write!(f, "primitive eval failed: {err}"),
        }
    }
}

impl std::error::Error for InterpreterError {}

impl From<EvalError> for InterpreterError {
    fn from(value: EvalError) -> Self {
        Self::Primitive(value)
    }
}

/// Variable environment keyed by binding id.
pub type Env<T> = FxHashMap<VarId, T>;

/// Bind `args` to the program's invars, checking arity.
pub fn bind_inputs<T: Clone>(jaxpr: &Jaxpr, args: &[T]) -> Result<Env<T>, InterpreterError> {
    if args.len() != jaxpr.invars.len() {
        return Err(InterpreterError::InputArity {
            expected: jaxpr.invars.len(),
            actual: args.len(),
        });
    }

    let mut env = Env::default();
    env.reserve(jaxpr.invars.len() + jaxpr.equations.len());
    for (var, arg) in jaxpr.invars.iter().zip(args) {
        env.insert(*var, arg.clone());
    }
    Ok(env)
}

/// Resolve an equation's input atoms against `env`.
pub fn resolve_inputs(eqn: &Equation, env: &Env<Value>) -> Result<Vec<Value>, InterpreterError> {
    eqn.inputs
        .iter()
        .map(|atom| match atom {
            Atom::Var(var) => env
                .get(var)
                .cloned()
                .ok_or(InterpreterError::MissingVariable(*var)),
            Atom::Lit(lit) => Ok(Value::Scalar(*lit)),
        })
        .collect()
}

/// Evaluate one single-output equation on already-resolved inputs.
pub fn eval_equation(eqn: &Equation, inputs: &[Value]) -> Result<Value, InterpreterError> {
    if eqn.outputs.len() != 1 {
        return Err(InterpreterError::UnexpectedOutputArity {
            primitive: eqn.primitive,
            actual: eqn.outputs.len(),
        });
    }
    Ok(eval_primitive(eqn.primitive, inputs, &eqn.params)?)
}

/// Read the program's outvars out of `env`.
pub fn collect_outputs<T: Clone>(jaxpr: &Jaxpr, env: &Env<T>) -> Result<Vec<T>, InterpreterError> {
    jaxpr
        .outvars
        .iter()
        .map(|var| {
            env.get(var)
                .cloned()
                .ok_or(InterpreterError::MissingVariable(*var))
        })
        .collect()
}

pub fn eval_jaxpr(jaxpr: &Jaxpr, args: &[Value]) -> Result<Vec<Value>, InterpreterError> {
    let mut env = bind_inputs(jaxpr, args)?;

    for eqn in &jaxpr.equations {
        let resolved = resolve_inputs(eqn, &env)?;
        let output = eval_equation(eqn, &resolved)?;
        env.insert(eqn.outputs[0], output);
    }

    collect_outputs(jaxpr, &env)
}
