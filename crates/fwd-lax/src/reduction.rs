#![forbid(unsafe_code)]

use fwd_core::{DType, Literal, Primitive, Shape, TensorValue, Value};
use std::collections::BTreeMap;

use crate::EvalError;

/// Sum reduction. Without an `axes` param every axis is reduced and the
/// result is a scalar; with `axes` (comma-separated) only those are.
pub(crate) fn eval_reduce_sum(
    inputs: &[Value],
    params: &BTreeMap<String, String>,
) -> Result<Value, EvalError> {
    let primitive = Primitive::ReduceSum;
    if inputs.len() != 1 {
        return Err(EvalError::ArityMismatch {
            primitive,
            expected: 1,
            actual: inputs.len(),
        });
    }

    let tensor = match &inputs[0] {
        Value::Scalar(literal) => return Ok(Value::Scalar(*literal)),
        Value::Tensor(tensor) => tensor,
    };
    let rank = tensor.rank();

    let axes = match params.get("axes") {
        Some(raw) if !raw.trim().is_empty() => parse_axes(raw, rank)?,
        _ => (0..rank).collect(),
    };

    let kept_axes: Vec<usize> = (0..rank).filter(|axis| !axes.contains(axis)).collect();
    let out_dims: Vec<u32> = kept_axes.iter().map(|&axis| tensor.shape.dims[axis]).collect();
    let out_count: usize = out_dims.iter().map(|d| *d as usize).product();
    let integral = tensor.dtype == DType::I64 || tensor.dtype == DType::I32;
    let strides = compute_strides(&tensor.shape.dims);

    let elements = if integral {
        let mut acc = vec![0_i64; out_count];
        for (flat_idx, literal) in tensor.elements.iter().enumerate() {
            let value = literal.as_i64().ok_or(EvalError::TypeMismatch {
                primitive,
                detail: "expected i64 tensor",
            })?;
            let slot = &mut acc[out_flat_index(flat_idx, &strides, &kept_axes, &out_dims)];
            *slot = slot.wrapping_add(value);
        }
        acc.into_iter().map(Literal::I64).collect::<Vec<_>>()
    } else {
        let mut acc = vec![0.0_f64; out_count];
        for (flat_idx, literal) in tensor.elements.iter().enumerate() {
            let value = literal.as_f64().ok_or(EvalError::TypeMismatch {
                primitive,
                detail: "expected numeric tensor",
            })?;
            acc[out_flat_index(flat_idx, &strides, &kept_axes, &out_dims)] += value;
        }
        acc.into_iter().map(Literal::from_f64).collect::<Vec<_>>()
    };

    if out_dims.is_empty() {
        return Ok(Value::Scalar(elements[0]));
    }
    let dtype = if integral { DType::I64 } else { DType::F64 };
    Ok(Value::Tensor(TensorValue::new(
        dtype,
        Shape { dims: out_dims },
        elements,
    )?))
}

fn parse_axes(raw: &str, rank: usize) -> Result<Vec<usize>, EvalError> {
    let mut axes = raw
        .split(',')
        .map(|part| {
            let trimmed = part.trim();
            let axis = trimmed
                .parse::<usize>()
                .map_err(|_| EvalError::Unsupported {
                    primitive: Primitive::ReduceSum,
                    detail: format!("invalid axis value: {trimmed}"),
                })?;
            if axis >= rank {
                return Err(EvalError::Unsupported {
                    primitive: Primitive::ReduceSum,
                    detail: format!("axis {axis} out of bounds for rank {rank}"),
                });
            }
            Ok(axis)
        })
        .collect::<Result<Vec<_>, _>>()?;
    axes.sort_unstable();
    axes.dedup();
    Ok(axes)
}

fn compute_strides(dims: &[u32]) -> Vec<usize> {
    let mut strides = vec![1_usize; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1] as usize;
    }
    strides
}

fn out_flat_index(flat: usize, strides: &[usize], kept_axes: &[usize], out_dims: &[u32]) -> usize {
    let mut idx = 0;
    let mut stride = 1;
    for (out_axis, &axis) in kept_axes.iter().enumerate().rev() {
        let dim = out_dims[out_axis] as usize;
        idx += (flat / strides[axis]) % dim * stride;
        stride *= dim;
    }
    idx
}
