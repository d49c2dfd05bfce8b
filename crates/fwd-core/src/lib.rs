#![forbid(unsafe_code)]

#[cfg(test)]
pub mod proptest_strategies;

use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompatibilityMode {
    #[default]
    Strict,
    Hardened,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    F32,
    F64,
    I32,
    I64,
    Bool,
}

impl DType {
    #[must_use]
    pub fn is_floating(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    pub dims: Vec<u32>,
}

impl Shape {
    #[must_use]
    pub fn scalar() -> Self {
        Self { dims: Vec::new() }
    }

    #[must_use]
    pub fn vector(len: u32) -> Self {
        Self { dims: vec![len] }
    }

    #[must_use]
    pub fn matrix(rows: u32, cols: u32) -> Self {
        Self {
            dims: vec![rows, cols],
        }
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    #[must_use]
    pub fn element_count(&self) -> Option<u64> {
        self.dims
            .iter()
            .try_fold(1_u64, |acc, dim| acc.checked_mul(u64::from(*dim)))
    }

    /// Shape `self ++ other`, the layout of a Jacobian block.
    #[must_use]
    pub fn concat(&self, other: &Self) -> Self {
        let mut dims = Vec::with_capacity(self.rank() + other.rank());
        dims.extend_from_slice(&self.dims);
        dims.extend_from_slice(&other.dims);
        Self { dims }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Primitive {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Abs,
    Max,
    Min,
    Pow,
    Exp,
    Log,
    Sqrt,
    // Trigonometric
    Sin,
    Cos,
    Tanh,
    // Additional math
    Logistic,
    Square,
    Reciprocal,
    Floor,
    Sign,
    // Linear algebra
    Dot,
    // Reduction
    ReduceSum,
}

impl Primitive {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Neg => "neg",
            Self::Abs => "abs",
            Self::Max => "max",
            Self::Min => "min",
            Self::Pow => "pow",
            Self::Exp => "exp",
            Self::Log => "log",
            Self::Sqrt => "sqrt",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tanh => "tanh",
            Self::Logistic => "logistic",
            Self::Square => "square",
            Self::Reciprocal => "reciprocal",
            Self::Floor => "floor",
            Self::Sign => "sign",
            Self::Dot => "dot",
            Self::ReduceSum => "reduce_sum",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Transform {
    Jit,
    Jvp,
    Jacfwd,
    ValueAndJacfwd,
}

impl Transform {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jit => "jit",
            Self::Jvp => "jvp",
            Self::Jacfwd => "jacfwd",
            Self::ValueAndJacfwd => "value_and_jacfwd",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VarId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Literal {
    I64(i64),
    Bool(bool),
    F64Bits(u64),
}

impl Literal {
    #[must_use]
    pub fn from_f64(value: f64) -> Self {
        Self::F64Bits(value.to_bits())
    }

    #[must_use]
    pub fn as_f64(self) -> Option<f64> {
        match self {
            Self::F64Bits(bits) => Some(f64::from_bits(bits)),
            Self::I64(value) => Some(value as f64),
            Self::Bool(_) => None,
        }
    }

    #[must_use]
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Self::I64(value) => Some(value),
            Self::Bool(_) | Self::F64Bits(_) => None,
        }
    }

    #[must_use]
    pub fn dtype(self) -> DType {
        match self {
            Self::I64(_) => DType::I64,
            Self::Bool(_) => DType::Bool,
            Self::F64Bits(_) => DType::F64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Scalar(Literal),
    Tensor(TensorValue),
}

impl Value {
    #[must_use]
    pub fn scalar_i64(value: i64) -> Self {
        Self::Scalar(Literal::I64(value))
    }

    #[must_use]
    pub fn scalar_f64(value: f64) -> Self {
        Self::Scalar(Literal::from_f64(value))
    }

    #[must_use]
    pub fn scalar_bool(value: bool) -> Self {
        Self::Scalar(Literal::Bool(value))
    }

    pub fn vector_i64(values: &[i64]) -> Result<Self, ValueError> {
        let elements = values.iter().copied().map(Literal::I64).collect::<Vec<_>>();
        Ok(Self::Tensor(TensorValue::new(
            DType::I64,
            Shape::vector(values.len() as u32),
            elements,
        )?))
    }

    pub fn vector_f64(values: &[f64]) -> Result<Self, ValueError> {
        Self::tensor_f64(Shape::vector(values.len() as u32), values)
    }

    /// Row-major f64 matrix.
    pub fn matrix_f64(rows: u32, cols: u32, values: &[f64]) -> Result<Self, ValueError> {
        Self::tensor_f64(Shape::matrix(rows, cols), values)
    }

    /// Row-major f64 value of any shape; a rank-0 shape yields a scalar.
    pub fn tensor_f64(shape: Shape, values: &[f64]) -> Result<Self, ValueError> {
        let elements = values
            .iter()
            .copied()
            .map(Literal::from_f64)
            .collect::<Vec<_>>();
        if shape.rank() == 0 {
            return match elements.as_slice() {
                [single] => Ok(Self::Scalar(*single)),
                _ => Err(ValueError::ElementCountMismatch {
                    shape,
                    expected_count: 1,
                    actual_count: elements.len(),
                }),
            };
        }
        Ok(Self::Tensor(TensorValue::new(DType::F64, shape, elements)?))
    }

    /// f64 zeros with the shape of `self`.
    pub fn zeros_like_f64(&self) -> Result<Self, ValueError> {
        let shape = self.shape();
        let count = shape
            .element_count()
            .ok_or_else(|| ValueError::ShapeOverflow {
                shape: shape.clone(),
            })?;
        Self::tensor_f64(shape, &vec![0.0; count as usize])
    }

    #[must_use]
    pub fn as_scalar_literal(&self) -> Option<Literal> {
        match self {
            Self::Scalar(lit) => Some(*lit),
            Self::Tensor(_) => None,
        }
    }

    #[must_use]
    pub fn as_f64_scalar(&self) -> Option<f64> {
        self.as_scalar_literal().and_then(Literal::as_f64)
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Scalar(lit) => lit.dtype(),
            Self::Tensor(t) => t.dtype,
        }
    }

    #[must_use]
    pub fn shape(&self) -> Shape {
        match self {
            Self::Scalar(_) => Shape::scalar(),
            Self::Tensor(t) => t.shape.clone(),
        }
    }

    #[must_use]
    pub fn element_count(&self) -> usize {
        match self {
            Self::Scalar(_) => 1,
            Self::Tensor(t) => t.len(),
        }
    }

    /// Flattened row-major elements as f64; `None` for bool data.
    #[must_use]
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        match self {
            Self::Scalar(lit) => lit.as_f64().map(|value| vec![value]),
            Self::Tensor(t) => t.to_f64_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorValue {
    pub dtype: DType,
    pub shape: Shape,
    pub elements: Vec<Literal>,
}

impl TensorValue {
    pub fn new(dtype: DType, shape: Shape, elements: Vec<Literal>) -> Result<Self, ValueError> {
        let expected_count = shape.element_count().ok_or(ValueError::ShapeOverflow {
            shape: shape.clone(),
        })?;

        if expected_count != elements.len() as u64 {
            return Err(ValueError::ElementCountMismatch {
                shape,
                expected_count,
                actual_count: elements.len(),
            });
        }

        Ok(Self {
            dtype,
            shape,
            elements,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        self.elements.iter().copied().map(Literal::as_f64).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    ShapeOverflow {
        shape: Shape,
    },
    ElementCountMismatch {
        shape: Shape,
        expected_count: u64,
        actual_count: usize,
    },
}

impl std::fmt::Display for ValueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShapeOverflow { shape } => {
                write!(f, "shape element count overflowed: {:?}", shape.dims)
            }
            Self::ElementCountMismatch {
                shape,
                expected_count,
                actual_count,
            } => {
                write!(
                    f,
                    "tensor element count mismatch for shape {:?}: expected {}, got {}",
                    shape.dims, expected_count, actual_count
                )
            }
        }
    }
}

impl std::error::Error for ValueError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Atom {
    Var(VarId),
    Lit(Literal),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equation {
    pub primitive: Primitive,
    pub inputs: SmallVec<[Atom; 4]>,
    pub outputs: SmallVec<[VarId; 2]>,
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Jaxpr {
    pub invars: Vec<VarId>,
    pub outvars: Vec<VarId>,
    pub equations: Vec<Equation>,
    #[serde(skip)]
    fingerprint_cache: std::sync::OnceLock<String>,
}

impl Clone for Jaxpr {
    fn clone(&self) -> Self {
        Self {
            invars: self.invars.clone(),
            outvars: self.outvars.clone(),
            equations: self.equations.clone(),
            fingerprint_cache: std::sync::OnceLock::new(),
        }
    }
}

impl PartialEq for Jaxpr {
    fn eq(&self, other: &Self) -> bool {
        self.invars == other.invars
            && self.outvars == other.outvars
            && self.equations == other.equations
    }
}

impl Eq for Jaxpr {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JaxprValidationError {
    DuplicateBinding { section: &'static str, var: VarId },
    UnboundInputVar { equation_index: usize, var: VarId },
    OutputShadowsBinding { equation_index: usize, var: VarId },
    UnknownOutvar { var: VarId },
}

impl std::fmt::Display for JaxprValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateBinding { section, var } => {
                write!(f, "duplicate binding in {} for var v{}", section, var.0)
            }
            Self::UnboundInputVar {
                equation_index,
                var,
            } => {
                write!(
                    f,
                    "equation {} references unbound input var v{}",
                    equation_index, var.0
                )
            }
            Self::OutputShadowsBinding {
                equation_index,
                var,
            } => {
                write!(
                    f,
                    "equation {} output var v{} shadows an existing binding",
                    equation_index, var.0
                )
            }
            Self::UnknownOutvar { var } => {
                write!(f, "outvar v{} does not have a defining binding", var.0)
            }
        }
    }
}

impl std::error::Error for JaxprValidationError {}

impl Jaxpr {
    #[must_use]
    pub fn new(invars: Vec<VarId>, outvars: Vec<VarId>, equations: Vec<Equation>) -> Self {
        Self {
            invars,
            outvars,
            equations,
            fingerprint_cache: std::sync::OnceLock::new(),
        }
    }

    #[must_use]
    pub fn canonical_fingerprint(&self) -> &str {
        self.fingerprint_cache.get_or_init(|| {
            let mut out = String::new();
            write_var_list(&mut out, "in", &self.invars);
            write_var_list(&mut out, "out", &self.outvars);

            for eqn in &self.equations {
                let _ = write!(&mut out, "eqn:{}(", eqn.primitive.as_str());
                for atom in &eqn.inputs {
                    write_atom(&mut out, atom);
                    out.push(',');
                }
                out.push(')');
                out.push_str("->");
                for outvar in &eqn.outputs {
                    let _ = write!(&mut out, "v{},", outvar.0);
                }
                out.push('{');
                for (key, value) in &eqn.params {
                    let _ = write!(&mut out, "{key}={value};");
                }
                out.push('}');
                out.push('|');
            }

            out
        })
    }

    pub fn validate_well_formed(&self) -> Result<(), JaxprValidationError> {
        let mut bindings = BTreeSet::new();

        for var in &self.invars {
            if !bindings.insert(*var) {
                return Err(JaxprValidationError::DuplicateBinding {
                    section: "invars",
                    var: *var,
                });
            }
        }

        for (equation_index, eqn) in self.equations.iter().enumerate() {
            for atom in &eqn.inputs {
                if let Atom::Var(var) = atom
                    && !bindings.contains(var)
                {
                    return Err(JaxprValidationError::UnboundInputVar {
                        equation_index,
                        var: *var,
                    });
                }
            }
            for out_var in &eqn.outputs {
                if !bindings.insert(*out_var) {
                    return Err(JaxprValidationError::OutputShadowsBinding {
                        equation_index,
                        var: *out_var,
                    });
                }
            }
        }

        // Outvars may repeat (a value returned twice) but must be bound.
        for outvar in &self.outvars {
            if !bindings.contains(outvar) {
                return Err(JaxprValidationError::UnknownOutvar { var: *outvar });
            }
        }

        Ok(())
    }
}

fn write_var_list(out: &mut String, label: &str, vars: &[VarId]) {
    let _ = write!(out, "{label}=[");
    for var in vars {
        let _ = write!(out, "v{},", var.0);
    }
    out.push(']');
}

fn write_atom(out: &mut String, atom: &Atom) {
    match atom {
        Atom::Var(var) => {
            let _ = write!(out, "v{}", var.0);
        }
        Atom::Lit(Literal::I64(value)) => {
            let _ = write!(out, "i64:{value}");
        }
        Atom::Lit(Literal::Bool(value)) => {
            let _ = write!(out, "bool:{value}");
        }
        Atom::Lit(Literal::F64Bits(value)) => {
            let _ = write!(out, "f64bits:{value}");
        }
    }
}

/// Fixture programs used by tests, benchmarks and the conformance bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgramSpec {
    /// `x + y`
    Add2,
    /// `x ** y`
    Pow2,
    /// `x * x`
    Square,
    /// `x * x + 2 * x`
    SquarePlusLinear,
    /// `sin(x)`
    SinX,
    /// `dot(x, y)`
    Dot3,
    /// `sum(x * x)`
    SumOfSquares,
    /// `(sum(x * x), sum(x))`; the second output is the aux of `has_aux` callers.
    SumOfSquaresWithSum,
    /// `x * x` elementwise, vector to vector.
    ElementwiseSquare,
    /// `dot(a, x)` for matrix `a` and vector `x`.
    MatVec,
    /// `logistic(x)` elementwise.
    Logistic,
    /// `(x * y, x / y)`, two differentiable outputs.
    ProductAndQuotient,
    /// `(exp(x) * y, floor(x))`; the second output is integral-valued and non-differentiable.
    ExpScaledWithFloor,
}

#[must_use]
pub fn build_program(program: ProgramSpec) -> Jaxpr {
    match program {
        ProgramSpec::Add2 => binary_program(Primitive::Add),
        ProgramSpec::Pow2 => binary_program(Primitive::Pow),
        ProgramSpec::Square => Jaxpr::new(
            vec![VarId(1)],
            vec![VarId(2)],
            vec![equation(
                Primitive::Mul,
                smallvec![Atom::Var(VarId(1)), Atom::Var(VarId(1))],
                VarId(2),
            )],
        ),
        ProgramSpec::SquarePlusLinear => Jaxpr::new(
            vec![VarId(1)],
            vec![VarId(4)],
            vec![
                equation(
                    Primitive::Mul,
                    smallvec![Atom::Var(VarId(1)), Atom::Var(VarId(1))],
                    VarId(2),
                ),
                equation(
                    Primitive::Mul,
                    smallvec![Atom::Var(VarId(1)), Atom::Lit(Literal::I64(2))],
                    VarId(3),
                ),
                equation(
                    Primitive::Add,
                    smallvec![Atom::Var(VarId(2)), Atom::Var(VarId(3))],
                    VarId(4),
                ),
            ],
        ),
        ProgramSpec::SinX => unary_program(Primitive::Sin),
        ProgramSpec::Dot3 | ProgramSpec::MatVec => binary_program(Primitive::Dot),
        ProgramSpec::SumOfSquares => Jaxpr::new(
            vec![VarId(1)],
            vec![VarId(3)],
            vec![
                equation(
                    Primitive::Mul,
                    smallvec![Atom::Var(VarId(1)), Atom::Var(VarId(1))],
                    VarId(2),
                ),
                equation(
                    Primitive::ReduceSum,
                    smallvec![Atom::Var(VarId(2))],
                    VarId(3),
                ),
            ],
        ),
        ProgramSpec::SumOfSquaresWithSum => Jaxpr::new(
            vec![VarId(1)],
            vec![VarId(3), VarId(4)],
            vec![
                equation(
                    Primitive::Mul,
                    smallvec![Atom::Var(VarId(1)), Atom::Var(VarId(1))],
                    VarId(2),
                ),
                equation(
                    Primitive::ReduceSum,
                    smallvec![Atom::Var(VarId(2))],
                    VarId(3),
                ),
                equation(
                    Primitive::ReduceSum,
                    smallvec![Atom::Var(VarId(1))],
                    VarId(4),
                ),
            ],
        ),
        ProgramSpec::ElementwiseSquare => unary_program(Primitive::Square),
        ProgramSpec::Logistic => unary_program(Primitive::Logistic),
        ProgramSpec::ProductAndQuotient => Jaxpr::new(
            vec![VarId(1), VarId(2)],
            vec![VarId(3), VarId(4)],
            vec![
                equation(
                    Primitive::Mul,
                    smallvec![Atom::Var(VarId(1)), Atom::Var(VarId(2))],
                    VarId(3),
                ),
                equation(
                    Primitive::Div,
                    smallvec![Atom::Var(VarId(1)), Atom::Var(VarId(2))],
                    VarId(4),
                ),
            ],
        ),
        ProgramSpec::ExpScaledWithFloor => Jaxpr::new(
            vec![VarId(1), VarId(2)],
            vec![VarId(4), VarId(5)],
            vec![
                equation(Primitive::Exp, smallvec![Atom::Var(VarId(1))], VarId(3)),
                equation(
                    Primitive::Mul,
                    smallvec![Atom::Var(VarId(3)), Atom::Var(VarId(2))],
                    VarId(4),
                ),
                equation(Primitive::Floor, smallvec![Atom::Var(VarId(1))], VarId(5)),
            ],
        ),
    }
}

fn equation(primitive: Primitive, inputs: SmallVec<[Atom; 4]>, output: VarId) -> Equation {
    Equation {
        primitive,
        inputs,
        outputs: smallvec![output],
        params: BTreeMap::new(),
    }
}

fn unary_program(primitive: Primitive) -> Jaxpr {
    Jaxpr::new(
        vec![VarId(1)],
        vec![VarId(2)],
        vec![equation(primitive, smallvec![Atom::Var(VarId(1))], VarId(2))],
    )
}

fn binary_program(primitive: Primitive) -> Jaxpr {
    Jaxpr::new(
        vec![VarId(1), VarId(2)],
        vec![VarId(3)],
        vec![equation(
            primitive,
            smallvec![Atom::Var(VarId(1)), Atom::Var(VarId(2))],
            VarId(3),
        )],
    )
}

#[cfg(test)]
mod tests {
    use super::{
        Atom, DType, Equation, Jaxpr, JaxprValidationError, Literal, Primitive, ProgramSpec,
        Shape, TensorValue, Value, ValueError, VarId, build_program,
    };
    use fwd_test_utils::{LoggedSuite, TestMode};
    use proptest::prelude::*;
    use proptest::test_runner::{Config as ProptestConfig, TestRunner};
    use smallvec::smallvec;
    use std::collections::BTreeMap;

    fn suite() -> LoggedSuite {
        LoggedSuite::new("fwd-core", "fwd-core", env!("CARGO_MANIFEST_DIR"))
    }

    const ALL_PROGRAMS: [ProgramSpec; 13] = [
        ProgramSpec::Add2,
        ProgramSpec::Pow2,
        ProgramSpec::Square,
        ProgramSpec::SquarePlusLinear,
        ProgramSpec::SinX,
        ProgramSpec::Dot3,
        ProgramSpec::SumOfSquares,
        ProgramSpec::SumOfSquaresWithSum,
        ProgramSpec::ElementwiseSquare,
        ProgramSpec::MatVec,
        ProgramSpec::Logistic,
        ProgramSpec::ProductAndQuotient,
        ProgramSpec::ExpScaledWithFloor,
    ];

    #[test]
    fn every_fixture_program_is_well_formed() {
        suite().run(
            module_path!(),
            "every_fixture_program_is_well_formed",
            &ALL_PROGRAMS,
            TestMode::Strict,
            || {
                for program in ALL_PROGRAMS {
                    build_program(program)
                        .validate_well_formed()
                        .map_err(|err| format!("{program:?} should validate: {err}"))?;
                }
                Ok(Vec::new())
            },
        );
    }

    #[test]
    fn aux_fixture_returns_two_outputs() {
        let jaxpr = build_program(ProgramSpec::SumOfSquaresWithSum);
        assert_eq!(jaxpr.outvars.len(), 2);
        assert_eq!(jaxpr.equations.len(), 3);
    }

    #[test]
    fn jaxpr_duplicate_invar_detection() {
        suite().run(
            module_path!(),
            "jaxpr_duplicate_invar_detection",
            &("duplicate-varid", 1_u32),
            TestMode::Strict,
            || {
                let bad = Jaxpr::new(vec![VarId(1), VarId(1)], vec![VarId(1)], vec![]);
                let err = bad
                    .validate_well_formed()
                    .expect_err("duplicate invar should fail");
                assert_eq!(
                    err,
                    JaxprValidationError::DuplicateBinding {
                        section: "invars",
                        var: VarId(1)
                    }
                );
                Ok(Vec::new())
            },
        );
    }

    #[test]
    fn jaxpr_validation_error_variants() {
        let unbound = Jaxpr::new(
            vec![VarId(1)],
            vec![VarId(3)],
            vec![Equation {
                primitive: Primitive::Add,
                inputs: smallvec![Atom::Var(VarId(1)), Atom::Var(VarId(2))],
                outputs: smallvec![VarId(3)],
                params: BTreeMap::new(),
            }],
        );
        let err = unbound.validate_well_formed().expect_err("unbound input");
        assert_eq!(
            err,
            JaxprValidationError::UnboundInputVar {
                equation_index: 0,
                var: VarId(2)
            }
        );
        assert!(err.to_string().contains("unbound input var v2"));

        let shadow = Jaxpr::new(
            vec![VarId(1)],
            vec![VarId(1)],
            vec![Equation {
                primitive: Primitive::Neg,
                inputs: smallvec![Atom::Var(VarId(1))],
                outputs: smallvec![VarId(1)],
                params: BTreeMap::new(),
            }],
        );
        assert!(matches!(
            shadow.validate_well_formed(),
            Err(JaxprValidationError::OutputShadowsBinding { .. })
        ));

        let unknown = Jaxpr::new(vec![VarId(1)], vec![VarId(9)], vec![]);
        assert_eq!(
            unknown.validate_well_formed(),
            Err(JaxprValidationError::UnknownOutvar { var: VarId(9) })
        );
    }

    #[test]
    fn canonical_fingerprint_is_deterministic_and_sensitive() {
        suite().run(
            module_path!(),
            "canonical_fingerprint_is_deterministic_and_sensitive",
            &("fingerprint", 2_u32),
            TestMode::Strict,
            || {
                let base = build_program(ProgramSpec::SquarePlusLinear);
                assert_eq!(
                    base.canonical_fingerprint(),
                    base.clone().canonical_fingerprint()
                );
                let mut modified = base.clone();
                modified.equations[0]
                    .params
                    .insert("axes".to_owned(), "0".to_owned());
                assert_ne!(
                    base.canonical_fingerprint(),
                    modified.canonical_fingerprint()
                );
                assert!(base.canonical_fingerprint().contains("i64:2"));
                Ok(Vec::new())
            },
        );
    }

    #[test]
    fn jaxpr_serde_round_trip_preserves_fingerprint() {
        let jaxpr = build_program(ProgramSpec::SumOfSquaresWithSum);
        let encoded = serde_json::to_string(&jaxpr).expect("serialize");
        let decoded: Jaxpr = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(decoded, jaxpr);
        assert_eq!(
            decoded.canonical_fingerprint(),
            jaxpr.canonical_fingerprint()
        );
    }

    #[test]
    fn tensor_new_rejects_wrong_element_count() {
        let err = TensorValue::new(DType::F64, Shape::vector(3), vec![Literal::from_f64(1.0)])
            .expect_err("should reject");
        assert_eq!(
            err,
            ValueError::ElementCountMismatch {
                shape: Shape::vector(3),
                expected_count: 3,
                actual_count: 1,
            }
        );
    }

    #[test]
    fn tensor_f64_rank_zero_is_scalar() {
        let value = Value::tensor_f64(Shape::scalar(), &[2.5]).expect("scalar");
        assert_eq!(value, Value::scalar_f64(2.5));
        assert!(Value::tensor_f64(Shape::scalar(), &[1.0, 2.0]).is_err());
    }

    #[test]
    fn zeros_like_preserves_shape_and_switches_to_f64() {
        let ints = Value::vector_i64(&[1, 2, 3]).expect("vector");
        let zeros = ints.zeros_like_f64().expect("zeros");
        assert_eq!(zeros.dtype(), DType::F64);
        assert_eq!(zeros.shape(), Shape::vector(3));
        assert_eq!(zeros.to_f64_vec(), Some(vec![0.0, 0.0, 0.0]));
        assert_eq!(
            Value::scalar_i64(4).zeros_like_f64(),
            Ok(Value::scalar_f64(0.0))
        );
    }

    #[test]
    fn shape_concat_builds_jacobian_layout() {
        let out = Shape::vector(2);
        let arg = Shape::matrix(3, 4);
        assert_eq!(out.concat(&arg).dims, vec![2, 3, 4]);
        assert_eq!(Shape::scalar().concat(&Shape::scalar()).rank(), 0);
    }

    #[test]
    fn dtype_floating_classification() {
        assert!(DType::F64.is_floating());
        assert!(DType::F32.is_floating());
        assert!(!DType::I64.is_floating());
        assert!(!DType::Bool.is_floating());
        assert_eq!(Value::scalar_bool(true).dtype(), DType::Bool);
    }

    #[test]
    fn proptest_value_shapes_match_element_counts() {
        let mut runner = TestRunner::new(ProptestConfig::with_cases(
            fwd_test_utils::property_test_case_count(),
        ));
        runner
            .run(&super::proptest_strategies::arb_f64_value(), |value| {
                let count = value.shape().element_count().unwrap_or(0);
                prop_assert_eq!(count as usize, value.element_count());
                prop_assert_eq!(value.to_f64_vec().map(|v| v.len()), Some(value.element_count()));
                Ok(())
            })
            .expect("value strategy should produce consistent shapes");
    }

    #[test]
    fn proptest_fingerprint_is_stable_under_clone() {
        let mut runner = TestRunner::new(ProptestConfig::with_cases(
            fwd_test_utils::property_test_case_count(),
        ));
        runner
            .run(&super::proptest_strategies::arb_unary_jaxpr(), |jaxpr| {
                prop_assert!(jaxpr.validate_well_formed().is_ok());
                let cloned = jaxpr.clone();
                prop_assert_eq!(jaxpr.canonical_fingerprint(), cloned.canonical_fingerprint());
                Ok(())
            })
            .expect("fingerprint should be stable");
    }
}
