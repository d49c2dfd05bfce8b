#![forbid(unsafe_code)]

use fwd_core::{Atom, Jaxpr, Value};
use fwd_interpreters::{Env, bind_inputs, collect_outputs, eval_equation, resolve_inputs};

use crate::AdError;
use crate::rules::tangent_rule;

/// Result of pushing several tangent directions through one primal pass.
#[derive(Debug, Clone, PartialEq)]
pub struct JvpBatch {
    pub primals_out: Vec<Value>,
    /// `tangents_out[d][o]` is the tangent of output `o` along direction `d`.
    pub tangents_out: Vec<Vec<Value>>,
    /// Primitive evaluations on the primal path. Independent of the number
    /// of directions.
    pub primal_evaluations: usize,
}

/// Forward-mode product along a single tangent per input.
///
/// Tangents must match the primals in count and shape and be floating
/// point.
pub fn jvp(
    jaxpr: &Jaxpr,
    primals: &[Value],
    tangents: &[Value],
) -> Result<(Vec<Value>, Vec<Value>), AdError> {
    let direction = tangents.iter().cloned().map(Some).collect::<Vec<_>>();
    let mut batch = jvp_batched(jaxpr, primals, std::slice::from_ref(&direction))?;
    let tangents_out = batch.tangents_out.pop().unwrap_or_default();
    Ok((batch.primals_out, tangents_out))
}

/// Evaluate the primal once and propagate every direction alongside it.
///
/// Each direction holds one entry per input; `None` is a symbolic zero.
/// Present tangents are checked the same way [`jvp`] checks its tangents.
pub fn jvp_batched(
    jaxpr: &Jaxpr,
    primals: &[Value],
    directions: &[Vec<Option<Value>>],
) -> Result<JvpBatch, AdError> {
    for direction in directions {
        check_direction(primals, direction)?;
    }

    let mut env = bind_inputs(jaxpr, primals)?;
    let mut tangent_envs = Vec::with_capacity(directions.len());
    for direction in directions {
        let mut tangent_env = Env::default();
        for (var, tangent) in jaxpr.invars.iter().zip(direction) {
            if let Some(tangent) = tangent {
                tangent_env.insert(*var, tangent.clone());
            }
        }
        tangent_envs.push(tangent_env);
    }

    let mut primal_evaluations = 0_usize;
    for eqn in &jaxpr.equations {
        let resolved = resolve_inputs(eqn, &env)?;
        let output = eval_equation(eqn, &resolved)?;
        primal_evaluations += 1;
        let out_var = eqn.outputs[0];

        for tangent_env in &mut tangent_envs {
            let tangent = {
                let input_tangents = eqn
                    .inputs
                    .iter()
                    .map(|atom| match atom {
                        Atom::Var(var) => tangent_env.get(var),
                        Atom::Lit(_) => None,
                    })
                    .collect::<Vec<_>>();
                tangent_rule(eqn, &resolved, &output, &input_tangents)?
            };
            if let Some(tangent) = tangent {
                tangent_env.insert(out_var, tangent);
            }
        }

        env.insert(out_var, output);
    }

    let primals_out = collect_outputs(jaxpr, &env)?;
    let tangents_out = tangent_envs
        .iter()
        .map(|tangent_env| materialize_tangents(jaxpr, &primals_out, tangent_env))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(JvpBatch {
        primals_out,
        tangents_out,
        primal_evaluations,
    })
}

fn check_direction(primals: &[Value], direction: &[Option<Value>]) -> Result<(), AdError> {
    if direction.len() != primals.len() {
        return Err(AdError::TangentArity {
            expected: primals.len(),
            actual: direction.len(),
        });
    }
    for (index, (primal, tangent)) in primals.iter().zip(direction).enumerate() {
        let Some(tangent) = tangent else {
            continue;
        };
        let (primal_shape, tangent_shape) = (primal.shape(), tangent.shape());
        if primal_shape != tangent_shape {
            return Err(AdError::TangentShapeMismatch {
                index,
                primal: primal_shape,
                tangent: tangent_shape,
            });
        }
        if !tangent.dtype().is_floating() {
            return Err(AdError::NonFloatTangent {
                index,
                dtype: tangent.dtype(),
            });
        }
    }
    Ok(())
}

fn materialize_tangents(
    jaxpr: &Jaxpr,
    primals_out: &[Value],
    tangent_env: &Env<Value>,
) -> Result<Vec<Value>, AdError> {
    jaxpr
        .outvars
        .iter()
        .zip(primals_out)
        .map(|(var, primal)| match tangent_env.get(var) {
            Some(tangent) => Ok(tangent.clone()),
            None => Ok(primal.zeros_like_f64()?),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{jvp, jvp_batched};
    use crate::AdError;
    use fwd_core::{DType, ProgramSpec, Shape, Value, build_program};

    fn f64s(value: &Value) -> Vec<f64> {
        value.to_f64_vec().expect("numeric value")
    }

    #[test]
    fn jvp_of_square_scales_tangent() {
        let jaxpr = build_program(ProgramSpec::Square);
        let (out, tangent) = jvp(&jaxpr, &[Value::scalar_f64(3.0)], &[Value::scalar_f64(1.0)])
            .expect("jvp should succeed");
        assert_eq!(out, vec![Value::scalar_f64(9.0)]);
        assert_eq!(tangent, vec![Value::scalar_f64(6.0)]);
    }

    #[test]
    fn jvp_through_integer_literal() {
        // x * x + 2 * x at x = 3 has derivative 2x + 2 = 8.
        let jaxpr = build_program(ProgramSpec::SquarePlusLinear);
        let (out, tangent) = jvp(&jaxpr, &[Value::scalar_f64(3.0)], &[Value::scalar_f64(1.0)])
            .expect("jvp should succeed");
        assert_eq!(out, vec![Value::scalar_f64(15.0)]);
        assert_eq!(tangent, vec![Value::scalar_f64(8.0)]);
    }

    #[test]
    fn jvp_of_sum_of_squares_along_vector() {
        let jaxpr = build_program(ProgramSpec::SumOfSquares);
        let x = Value::vector_f64(&[0.0, 1.0, 2.0]).expect("vector");
        let t = Value::vector_f64(&[1.0, 1.0, 1.0]).expect("vector");
        let (out, tangent) = jvp(&jaxpr, &[x], &[t]).expect("jvp should succeed");
        assert_eq!(out, vec![Value::scalar_f64(5.0)]);
        assert_eq!(tangent, vec![Value::scalar_f64(6.0)]);
    }

    #[test]
    fn tangent_arity_mismatch() {
        let jaxpr = build_program(ProgramSpec::Add2);
        let err = jvp(
            &jaxpr,
            &[Value::scalar_f64(1.0), Value::scalar_f64(2.0)],
            &[Value::scalar_f64(1.0)],
        )
        .expect_err("arity");
        assert_eq!(
            err,
            AdError::TangentArity {
                expected: 2,
                actual: 1,
            }
        );
    }

    #[test]
    fn tangent_shape_mismatch() {
        let jaxpr = build_program(ProgramSpec::ElementwiseSquare);
        let err = jvp(
            &jaxpr,
            &[Value::vector_f64(&[1.0, 2.0]).expect("vector")],
            &[Value::scalar_f64(1.0)],
        )
        .expect_err("shape");
        assert_eq!(
            err,
            AdError::TangentShapeMismatch {
                index: 0,
                primal: Shape::vector(2),
                tangent: Shape::scalar(),
            }
        );
    }

    #[test]
    fn integer_tangent_is_rejected() {
        let jaxpr = build_program(ProgramSpec::Square);
        let err = jvp(&jaxpr, &[Value::scalar_f64(1.0)], &[Value::scalar_i64(1)])
            .expect_err("int tangent");
        assert_eq!(
            err,
            AdError::NonFloatTangent {
                index: 0,
                dtype: DType::I64,
            }
        );
    }

    #[test]
    fn symbolic_zero_outputs_are_materialised() {
        let jaxpr = build_program(ProgramSpec::ExpScaledWithFloor);
        let x = Value::vector_f64(&[0.5, 1.5]).expect("vector");
        let y = Value::vector_f64(&[2.0, 3.0]).expect("vector");
        let batch = jvp_batched(&jaxpr, &[x.clone(), y], &[vec![None, None]])
            .expect("batch should succeed");
        assert_eq!(batch.tangents_out.len(), 1);
        for (tangent, primal) in batch.tangents_out[0].iter().zip(&batch.primals_out) {
            assert_eq!(tangent.shape(), primal.shape());
            assert!(f64s(tangent).iter().all(|v| *v == 0.0));
        }
    }

    #[test]
    fn batched_directions_share_one_primal_pass() {
        let jaxpr = build_program(ProgramSpec::ProductAndQuotient);
        let primals = [Value::scalar_f64(3.0), Value::scalar_f64(2.0)];
        let directions = vec![
            vec![Some(Value::scalar_f64(1.0)), None],
            vec![None, Some(Value::scalar_f64(1.0))],
        ];
        let batch = jvp_batched(&jaxpr, &primals, &directions).expect("batch");
        assert_eq!(batch.primal_evaluations, jaxpr.equations.len());
        assert_eq!(
            batch.primals_out,
            vec![Value::scalar_f64(6.0), Value::scalar_f64(1.5)]
        );
        // d(xy)/dx = y, d(x/y)/dx = 1/y
        assert_eq!(
            batch.tangents_out[0],
            vec![Value::scalar_f64(2.0), Value::scalar_f64(0.5)]
        );
        // d(xy)/dy = x, d(x/y)/dy = -x/y^2
        assert_eq!(
            batch.tangents_out[1],
            vec![Value::scalar_f64(3.0), Value::scalar_f64(-0.75)]
        );
    }

    #[test]
    fn direction_arity_is_checked() {
        let jaxpr = build_program(ProgramSpec::Square);
        let err = jvp_batched(&jaxpr, &[Value::scalar_f64(1.0)], &[vec![None, None]])
            .expect_err("arity");
        assert!(matches!(err, AdError::TangentArity { expected: 1, actual: 2 }));
    }

    #[test]
    fn batched_directions_are_checked_like_single_tangents() {
        let jaxpr = build_program(ProgramSpec::SumOfSquares);
        let x = Value::vector_f64(&[1.0, 1.0, 1.0]).expect("vector");
        let err = jvp_batched(
            &jaxpr,
            std::slice::from_ref(&x),
            &[vec![Some(Value::scalar_f64(1.0))]],
        )
        .expect_err("scalar tangent against a vector primal");
        assert_eq!(
            err,
            AdError::TangentShapeMismatch {
                index: 0,
                primal: Shape::vector(3),
                tangent: Shape::scalar(),
            }
        );

        let err = jvp_batched(
            &jaxpr,
            &[x],
            &[vec![Some(Value::vector_i64(&[1, 0, 0]).expect("vector"))]],
        )
        .expect_err("integer tangent");
        assert_eq!(
            err,
            AdError::NonFloatTangent {
                index: 0,
                dtype: DType::I64,
            }
        );
    }

    #[test]
    fn jvp_of_empty_vector() {
        let jaxpr = build_program(ProgramSpec::SumOfSquares);
        let x = Value::vector_f64(&[]).expect("vector");
        let (out, tangent) = jvp(&jaxpr, std::slice::from_ref(&x), &[x.clone()])
            .expect("jvp should succeed");
        assert_eq!(out, vec![Value::scalar_f64(0.0)]);
        assert_eq!(tangent, vec![Value::scalar_f64(0.0)]);
    }
}
