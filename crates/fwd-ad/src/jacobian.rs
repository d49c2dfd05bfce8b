#![forbid(unsafe_code)]

use fwd_core::{CompatibilityMode, Jaxpr, Value};
use fwd_interpreters::InterpreterError;

use crate::AdError;
use crate::jvp::jvp_batched;

/// Which positional arguments a Jacobian is taken with respect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argnums {
    Single(usize),
    Many(Vec<usize>),
}

impl Default for Argnums {
    fn default() -> Self {
        Self::Single(0)
    }
}

impl From<usize> for Argnums {
    fn from(value: usize) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<usize>> for Argnums {
    fn from(value: Vec<usize>) -> Self {
        Self::Many(value)
    }
}

impl From<&[usize]> for Argnums {
    fn from(value: &[usize]) -> Self {
        Self::Many(value.to_vec())
    }
}

impl Argnums {
    /// Validated argument indices in the order given.
    pub fn resolve(&self, arity: usize) -> Result<Vec<usize>, AdError> {
        let indices = match self {
            Self::Single(argnum) => vec![*argnum],
            Self::Many(argnums) => argnums.clone(),
        };
        if indices.is_empty() {
            return Err(AdError::EmptyArgnums);
        }
        for (position, &argnum) in indices.iter().enumerate() {
            if argnum >= arity {
                return Err(AdError::ArgnumOutOfRange { argnum, arity });
            }
            if indices[..position].contains(&argnum) {
                return Err(AdError::DuplicateArgnum { argnum });
            }
        }
        Ok(indices)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Many(argnums) => argnums.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JacfwdConfig {
    pub argnums: Argnums,
    pub has_aux: bool,
    pub mode: CompatibilityMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueAndJacobian {
    /// Differentiated outputs, exactly as a plain evaluation returns them.
    pub value: Vec<Value>,
    /// Outputs `1..` of a `has_aux` program, never differentiated.
    pub aux: Option<Vec<Value>>,
    /// One block per (differentiated output, argnum) pair, output-major.
    /// Each block has shape `output.shape ++ argument.shape`.
    pub jacobian: Vec<Value>,
    pub tangent_directions: usize,
    pub primal_evaluations: usize,
}

/// Value and forward-mode Jacobian of `jaxpr` at `args` from one pass.
pub fn value_and_jacfwd_jaxpr(
    jaxpr: &Jaxpr,
    args: &[Value],
    config: &JacfwdConfig,
) -> Result<ValueAndJacobian, AdError> {
    if config.mode == CompatibilityMode::Hardened {
        jaxpr.validate_well_formed()?;
    }
    if args.len() != jaxpr.invars.len() {
        return Err(InterpreterError::InputArity {
            expected: jaxpr.invars.len(),
            actual: args.len(),
        }
        .into());
    }

    let argnums = config.argnums.resolve(args.len())?;
    for &argnum in &argnums {
        let dtype = args[argnum].dtype();
        if !dtype.is_floating() {
            return Err(AdError::NonFloatInput { argnum, dtype });
        }
    }

    let output_count = jaxpr.outvars.len();
    if config.has_aux && output_count < 2 {
        return Err(AdError::AuxRequiresPair {
            outputs: output_count,
        });
    }
    let differentiated_outputs = if config.has_aux { 1 } else { output_count };

    let (directions, arg_sizes) = standard_basis(args, &argnums)?;
    let batch = jvp_batched(jaxpr, args, &directions)?;

    let mut outputs = batch.primals_out;
    for (output, value) in outputs.iter().enumerate().take(differentiated_outputs) {
        let dtype = value.dtype();
        if !dtype.is_floating() {
            return Err(AdError::NonFloatOutput { output, dtype });
        }
    }

    let mut jacobian = Vec::with_capacity(differentiated_outputs * argnums.len());
    for (output, value) in outputs.iter().enumerate().take(differentiated_outputs) {
        let out_shape = value.shape();
        let out_count = value.element_count();
        let mut offset = 0;
        for (&argnum, &arg_size) in argnums.iter().zip(&arg_sizes) {
            let mut block = vec![0.0_f64; out_count * arg_size];
            for q in 0..arg_size {
                let column = &batch.tangents_out[offset + q][output];
                let column = column.to_f64_vec().ok_or(AdError::NonFloatOutput {
                    output,
                    dtype: column.dtype(),
                })?;
                for (p, entry) in column.into_iter().enumerate() {
                    block[p * arg_size + q] = entry;
                }
            }
            let shape = out_shape.concat(&args[argnum].shape());
            jacobian.push(Value::tensor_f64(shape, &block)?);
            offset += arg_size;
        }
    }

    let aux = config
        .has_aux
        .then(|| outputs.split_off(differentiated_outputs));

    Ok(ValueAndJacobian {
        value: outputs,
        aux,
        jacobian,
        tangent_directions: directions.len(),
        primal_evaluations: batch.primal_evaluations,
    })
}

/// Forward-mode Jacobian alone; identical to the Jacobian half of
/// [`value_and_jacfwd_jaxpr`].
pub fn jacfwd_jaxpr(
    jaxpr: &Jaxpr,
    args: &[Value],
    config: &JacfwdConfig,
) -> Result<Vec<Value>, AdError> {
    value_and_jacfwd_jaxpr(jaxpr, args, config).map(|result| result.jacobian)
}

/// One-hot tangent directions over every element of every differentiated
/// argument, argument order first and row-major within an argument.
fn standard_basis(
    args: &[Value],
    argnums: &[usize],
) -> Result<(Vec<Vec<Option<Value>>>, Vec<usize>), AdError> {
    let arg_sizes = argnums
        .iter()
        .map(|&argnum| args[argnum].element_count())
        .collect::<Vec<_>>();
    let mut directions = Vec::with_capacity(arg_sizes.iter().sum());

    for (&argnum, &size) in argnums.iter().zip(&arg_sizes) {
        let shape = args[argnum].shape();
        let mut seed = vec![0.0_f64; size];
        for index in 0..size {
            seed[index] = 1.0;
            let mut direction = vec![None; args.len()];
            direction[argnum] = Some(Value::tensor_f64(shape.clone(), &seed)?);
            directions.push(direction);
            seed[index] = 0.0;
        }
    }

    Ok((directions, arg_sizes))
}
