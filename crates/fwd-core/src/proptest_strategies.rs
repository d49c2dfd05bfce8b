use crate::{Atom, Equation, Jaxpr, Primitive, Shape, Value, VarId};
use proptest::prelude::*;
use smallvec::smallvec;
use std::collections::BTreeMap;

pub fn arb_shape() -> impl Strategy<Value = Shape> {
    prop_oneof![
        Just(Shape::scalar()),
        (1_u32..6).prop_map(Shape::vector),
        (1_u32..4, 1_u32..4).prop_map(|(rows, cols)| Shape::matrix(rows, cols)),
    ]
}

pub fn arb_f64_value() -> impl Strategy<Value = Value> {
    arb_shape().prop_flat_map(|shape| {
        let count = shape.element_count().unwrap_or(1) as usize;
        proptest::collection::vec(-10.0_f64..10.0, count).prop_map(move |elements| {
            Value::tensor_f64(shape.clone(), &elements)
                .unwrap_or_else(|_| Value::scalar_f64(0.0))
        })
    })
}

pub fn arb_smooth_unary_primitive() -> impl Strategy<Value = Primitive> {
    prop_oneof![
        Just(Primitive::Neg),
        Just(Primitive::Sin),
        Just(Primitive::Cos),
        Just(Primitive::Tanh),
        Just(Primitive::Logistic),
        Just(Primitive::Square),
    ]
}

/// A single-input chain `v1 -> p0 -> p1 -> ...` of smooth unary primitives.
pub fn arb_unary_jaxpr() -> impl Strategy<Value = Jaxpr> {
    proptest::collection::vec(arb_smooth_unary_primitive(), 1..5).prop_map(|primitives| {
        let equations = primitives
            .iter()
            .enumerate()
            .map(|(idx, primitive)| Equation {
                primitive: *primitive,
                inputs: smallvec![Atom::Var(VarId(idx as u32 + 1))],
                outputs: smallvec![VarId(idx as u32 + 2)],
                params: BTreeMap::new(),
            })
            .collect::<Vec<_>>();
        let out = VarId(primitives.len() as u32 + 1);
        Jaxpr::new(vec![VarId(1)], vec![out], equations)
    })
}
