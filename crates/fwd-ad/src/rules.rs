#![forbid(unsafe_code)]

//! Per-primitive tangent rules.
//!
//! A rule maps the primal inputs, the primal output and the input tangents
//! to the output tangent. `None` is a symbolic zero: it is never
//! materialised while propagating, only when an output is read.

use fwd_core::{Equation, Literal, Primitive, Value};
use fwd_lax::eval_primitive;
use std::collections::BTreeMap;

use crate::AdError;

type Tangent = Option<Value>;

fn lax(primitive: Primitive, inputs: &[Value]) -> Result<Value, AdError> {
    Ok(eval_primitive(primitive, inputs, &BTreeMap::new())?)
}

fn lit(value: f64) -> Value {
    Value::Scalar(Literal::from_f64(value))
}

fn scale(tangent: &Value, factor: &Value) -> Result<Value, AdError> {
    lax(Primitive::Mul, &[tangent.clone(), factor.clone()])
}

fn sum_tangents(lhs: Tangent, rhs: Tangent) -> Result<Tangent, AdError> {
    match (lhs, rhs) {
        (None, None) => Ok(None),
        (Some(t), None) | (None, Some(t)) => Ok(Some(t)),
        (Some(a), Some(b)) => lax(Primitive::Add, &[a, b]).map(Some),
    }
}

/// `log(a)` with zero bases read as one, so `0^b` has a zero exponent
/// tangent rather than `-inf * 0`.
fn log_of_nonzero_base(base: &Value) -> Result<Value, AdError> {
    let nonzero = |a: f64| if a == 0.0 { 1.0 } else { a };
    let replaced = match base {
        Value::Scalar(_) => base.as_f64_scalar().map(|a| Value::scalar_f64(nonzero(a))),
        Value::Tensor(_) => base
            .to_f64_vec()
            .map(|values| {
                let values = values.into_iter().map(nonzero).collect::<Vec<_>>();
                Value::tensor_f64(base.shape(), &values)
            })
            .transpose()?,
    };
    lax(Primitive::Log, &[replaced.unwrap_or_else(|| base.clone())])
}

/// Tangent of `primitive(inputs) = output` along `tangents`.
pub(crate) fn tangent_rule(
    eqn: &Equation,
    inputs: &[Value],
    output: &Value,
    tangents: &[Option<&Value>],
) -> Result<Tangent, AdError> {
    if tangents.iter().all(Option::is_none) {
        return Ok(None);
    }

    let unary = || tangents.first().copied().flatten();
    let binary = || {
        (
            tangents.first().copied().flatten(),
            tangents.get(1).copied().flatten(),
        )
    };

    let tangent = match eqn.primitive {
        Primitive::Add => {
            let (ta, tb) = binary();
            sum_tangents(ta.cloned(), tb.cloned())?
        }
        Primitive::Sub => {
            let (ta, tb) = binary();
            let neg_tb = tb.map(|t| lax(Primitive::Neg, &[t.clone()])).transpose()?;
            sum_tangents(ta.cloned(), neg_tb)?
        }
        Primitive::Mul => {
            let (ta, tb) = binary();
            let da = ta.map(|t| scale(t, &inputs[1])).transpose()?;
            let db = tb.map(|t| scale(t, &inputs[0])).transpose()?;
            sum_tangents(da, db)?
        }
        Primitive::Div => {
            // d(a/b) = (ta - tb * out) / b
            let (ta, tb) = binary();
            let numerator = sum_tangents(
                ta.cloned(),
                tb.map(|t| {
                    let scaled = scale(t, output)?;
                    lax(Primitive::Neg, &[scaled])
                })
                .transpose()?,
            )?;
            numerator
                .map(|n| lax(Primitive::Div, &[n, inputs[1].clone()]))
                .transpose()?
        }
        Primitive::Max | Primitive::Min => {
            // Ties split the tangent evenly: mask = (sign(a - b) + 1) / 2 for max.
            let (ta, tb) = binary();
            let diff = if eqn.primitive == Primitive::Max {
                lax(Primitive::Sub, &[inputs[0].clone(), inputs[1].clone()])?
            } else {
                lax(Primitive::Sub, &[inputs[1].clone(), inputs[0].clone()])?
            };
            let sign = lax(Primitive::Sign, &[diff])?;
            let mask_a = scale(&lax(Primitive::Add, &[sign, lit(1.0)])?, &lit(0.5))?;
            let mask_b = lax(Primitive::Sub, &[lit(1.0), mask_a.clone()])?;
            let da = ta.map(|t| scale(t, &mask_a)).transpose()?;
            let db = tb.map(|t| scale(t, &mask_b)).transpose()?;
            sum_tangents(da, db)?
        }
        Primitive::Pow => {
            let (ta, tb) = binary();
            let da = ta
                .map(|t| {
                    let exponent_minus_one = lax(Primitive::Sub, &[inputs[1].clone(), lit(1.0)])?;
                    let power = lax(Primitive::Pow, &[inputs[0].clone(), exponent_minus_one])?;
                    scale(t, &lax(Primitive::Mul, &[inputs[1].clone(), power])?)
                })
                .transpose()?;
            let db = tb
                .map(|t| {
                    let log_base = log_of_nonzero_base(&inputs[0])?;
                    scale(t, &lax(Primitive::Mul, &[log_base, output.clone()])?)
                })
                .transpose()?;
            sum_tangents(da, db)?
        }
        Primitive::Dot => {
            let (ta, tb) = binary();
            let da = ta
                .map(|t| lax(Primitive::Dot, &[t.clone(), inputs[1].clone()]))
                .transpose()?;
            let db = tb
                .map(|t| lax(Primitive::Dot, &[inputs[0].clone(), t.clone()]))
                .transpose()?;
            sum_tangents(da, db)?
        }
        Primitive::Neg => unary()
            .map(|t| lax(Primitive::Neg, &[t.clone()]))
            .transpose()?,
        Primitive::Abs => unary()
            .map(|t| scale(t, &lax(Primitive::Sign, &[inputs[0].clone()])?))
            .transpose()?,
        Primitive::Exp => unary().map(|t| scale(t, output)).transpose()?,
        Primitive::Log => unary()
            .map(|t| lax(Primitive::Div, &[t.clone(), inputs[0].clone()]))
            .transpose()?,
        Primitive::Sqrt => unary()
            .map(|t| {
                let twice = scale(output, &lit(2.0))?;
                lax(Primitive::Div, &[t.clone(), twice])
            })
            .transpose()?,
        Primitive::Sin => unary()
            .map(|t| scale(t, &lax(Primitive::Cos, &[inputs[0].clone()])?))
            .transpose()?,
        Primitive::Cos => unary()
            .map(|t| {
                let sin = lax(Primitive::Sin, &[inputs[0].clone()])?;
                scale(t, &lax(Primitive::Neg, &[sin])?)
            })
            .transpose()?,
        Primitive::Tanh => unary()
            .map(|t| {
                let squared = lax(Primitive::Square, &[output.clone()])?;
                scale(t, &lax(Primitive::Sub, &[lit(1.0), squared])?)
            })
            .transpose()?,
        Primitive::Logistic => unary()
            .map(|t| {
                let complement = lax(Primitive::Sub, &[lit(1.0), output.clone()])?;
                scale(t, &lax(Primitive::Mul, &[output.clone(), complement])?)
            })
            .transpose()?,
        Primitive::Square => unary()
            .map(|t| scale(t, &scale(&inputs[0], &lit(2.0))?))
            .transpose()?,
        Primitive::Reciprocal => unary()
            .map(|t| {
                let squared = lax(Primitive::Square, &[output.clone()])?;
                scale(t, &lax(Primitive::Neg, &[squared])?)
            })
            .transpose()?,
        // Piecewise constant: derivative is zero wherever it exists.
        Primitive::Floor | Primitive::Sign => None,
        Primitive::ReduceSum => unary()
            .map(|t| {
                eval_primitive(Primitive::ReduceSum, std::slice::from_ref(t), &eqn.params)
                    .map_err(AdError::from)
            })
            .transpose()?,
    };

    tangent.map(|t| fit_to_output(t, output)).transpose()
}

/// Broadcast a scalar tangent up to a tensor-shaped primal output, which
/// happens when a scalar input meets a tensor operand.
fn fit_to_output(tangent: Value, output: &Value) -> Result<Value, AdError> {
    match (&tangent, output) {
        (Value::Scalar(_), Value::Tensor(_)) => {
            lax(Primitive::Add, &[tangent, output.zeros_like_f64()?])
        }
        _ => Ok(tangent),
    }
}

#[cfg(test)]
mod tests {
    use crate::jvp;
    use fwd_core::{Atom, Equation, Jaxpr, Primitive, Value, VarId};
    use fwd_interpreters::eval_jaxpr;
    use smallvec::smallvec;
    use std::collections::BTreeMap;

    fn unary(primitive: Primitive) -> Jaxpr {
        Jaxpr::new(
            vec![VarId(1)],
            vec![VarId(2)],
            vec![Equation {
                primitive,
                inputs: smallvec![Atom::Var(VarId(1))],
                outputs: smallvec![VarId(2)],
                params: BTreeMap::new(),
            }],
        )
    }

    fn binary(primitive: Primitive) -> Jaxpr {
        Jaxpr::new(
            vec![VarId(1), VarId(2)],
            vec![VarId(3)],
            vec![Equation {
                primitive,
                inputs: smallvec![Atom::Var(VarId(1)), Atom::Var(VarId(2))],
                outputs: smallvec![VarId(3)],
                params: BTreeMap::new(),
            }],
        )
    }

    fn scalar_out(jaxpr: &Jaxpr, args: &[f64]) -> f64 {
        let args = args.iter().copied().map(Value::scalar_f64).collect::<Vec<_>>();
        let out = eval_jaxpr(jaxpr, &args).expect("eval");
        out[0].as_f64_scalar().expect("scalar output")
    }

    /// Compare the directional derivative along `tangents` with a central
    /// difference.
    fn assert_matches_central_difference(jaxpr: &Jaxpr, point: &[f64], tangents: &[f64]) {
        let eps = 1e-6;
        let primals = point.iter().copied().map(Value::scalar_f64).collect::<Vec<_>>();
        let dirs = tangents.iter().copied().map(Value::scalar_f64).collect::<Vec<_>>();
        let (_, tangent_out) = jvp(jaxpr, &primals, &dirs).expect("jvp");
        let analytic = tangent_out[0].as_f64_scalar().expect("scalar tangent");

        let shifted = |sign: f64| {
            point
                .iter()
                .zip(tangents)
                .map(|(x, t)| x + sign * eps * t)
                .collect::<Vec<_>>()
        };
        let numeric = (scalar_out(jaxpr, &shifted(1.0)) - scalar_out(jaxpr, &shifted(-1.0)))
            / (2.0 * eps);
        let tolerance = 1e-5 * (1.0 + numeric.abs());
        assert!(
            (analytic - numeric).abs() < tolerance,
            "{jaxpr:?}: analytic {analytic} vs numeric {numeric}"
        );
    }

    #[test]
    fn smooth_unary_rules_match_central_differences() {
        let cases = [
            (Primitive::Neg, 0.7),
            (Primitive::Abs, -1.3),
            (Primitive::Exp, 0.4),
            (Primitive::Log, 2.5),
            (Primitive::Sqrt, 1.7),
            (Primitive::Sin, 0.9),
            (Primitive::Cos, 0.9),
            (Primitive::Tanh, -0.6),
            (Primitive::Logistic, 1.2),
            (Primitive::Square, -2.0),
            (Primitive::Reciprocal, 1.6),
        ];
        for (primitive, x) in cases {
            assert_matches_central_difference(&unary(primitive), &[x], &[1.0]);
        }
    }

    #[test]
    fn binary_rules_match_central_differences() {
        let cases = [
            Primitive::Add,
            Primitive::Sub,
            Primitive::Mul,
            Primitive::Div,
            Primitive::Max,
            Primitive::Min,
            Primitive::Pow,
            Primitive::Dot,
        ];
        for primitive in cases {
            let jaxpr = binary(primitive);
            assert_matches_central_difference(&jaxpr, &[1.5, 0.8], &[1.0, 0.0]);
            assert_matches_central_difference(&jaxpr, &[1.5, 0.8], &[0.0, 1.0]);
            assert_matches_central_difference(&jaxpr, &[1.5, 0.8], &[0.3, -0.7]);
        }
    }

    #[test]
    fn max_and_min_split_ties_evenly() {
        for primitive in [Primitive::Max, Primitive::Min] {
            let (_, tangent) = jvp(
                &binary(primitive),
                &[Value::scalar_f64(2.0), Value::scalar_f64(2.0)],
                &[Value::scalar_f64(1.0), Value::scalar_f64(0.0)],
            )
            .expect("jvp");
            assert_eq!(tangent, vec![Value::scalar_f64(0.5)]);
        }
    }

    #[test]
    fn pow_exponent_tangent_is_zero_at_zero_base() {
        let (out, tangent) = jvp(
            &binary(Primitive::Pow),
            &[Value::scalar_f64(0.0), Value::scalar_f64(2.0)],
            &[Value::scalar_f64(0.0), Value::scalar_f64(1.0)],
        )
        .expect("jvp");
        assert_eq!(out, vec![Value::scalar_f64(0.0)]);
        assert_eq!(tangent, vec![Value::scalar_f64(0.0)]);

        let base = Value::vector_f64(&[0.0, 2.0]).expect("vector");
        let zeros = base.zeros_like_f64().expect("zeros");
        let (_, tangent) = jvp(
            &binary(Primitive::Pow),
            &[base, Value::scalar_f64(2.0)],
            &[zeros, Value::scalar_f64(1.0)],
        )
        .expect("jvp");
        let tangent = tangent[0].to_f64_vec().expect("f64 tangent");
        assert_eq!(tangent[0], 0.0);
        assert!((tangent[1] - 4.0 * 2.0_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn piecewise_constant_rules_have_zero_tangent() {
        for primitive in [Primitive::Floor, Primitive::Sign] {
            let (_, tangent) = jvp(
                &unary(primitive),
                &[Value::scalar_f64(1.25)],
                &[Value::scalar_f64(1.0)],
            )
            .expect("jvp");
            assert_eq!(tangent, vec![Value::scalar_f64(0.0)]);
        }
    }

    #[test]
    fn scalar_operand_tangent_broadcasts_to_tensor_output() {
        // s * x with tangent only on the scalar s yields x itself.
        let jaxpr = binary(Primitive::Mul);
        let x = Value::vector_f64(&[1.0, -2.0, 3.0]).expect("vector");
        let zeros = x.zeros_like_f64().expect("zeros");
        let (_, tangent) = jvp(
            &jaxpr,
            &[Value::scalar_f64(2.0), x.clone()],
            &[Value::scalar_f64(1.0), zeros],
        )
        .expect("jvp");
        assert_eq!(tangent, vec![x]);

        // x - s with tangent only on s is a tensor of -1.
        let jaxpr = binary(Primitive::Sub);
        let x = Value::vector_f64(&[1.0, 2.0]).expect("vector");
        let zeros = x.zeros_like_f64().expect("zeros");
        let (_, tangent) = jvp(
            &jaxpr,
            &[x, Value::scalar_f64(0.5)],
            &[zeros, Value::scalar_f64(1.0)],
        )
        .expect("jvp");
        assert_eq!(
            tangent,
            vec![Value::vector_f64(&[-1.0, -1.0]).expect("vector")]
        );
    }

    #[test]
    fn reduce_sum_tangent_respects_axes() {
        let mut params = BTreeMap::new();
        params.insert("axes".to_owned(), "1".to_owned());
        let jaxpr = Jaxpr::new(
            vec![VarId(1)],
            vec![VarId(2)],
            vec![Equation {
                primitive: Primitive::ReduceSum,
                inputs: smallvec![Atom::Var(VarId(1))],
                outputs: smallvec![VarId(2)],
                params,
            }],
        );
        let m = Value::matrix_f64(2, 2, &[1.0, 2.0, 3.0, 4.0]).expect("matrix");
        let t = Value::matrix_f64(2, 2, &[1.0, 0.0, 0.5, 0.5]).expect("matrix");
        let (out, tangent) = jvp(&jaxpr, &[m], &[t]).expect("jvp");
        assert_eq!(out, vec![Value::vector_f64(&[3.0, 7.0]).expect("vector")]);
        assert_eq!(
            tangent,
            vec![Value::vector_f64(&[1.0, 1.0]).expect("vector")]
        );
    }
}
