#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use fwd_ad::{Argnums, JacfwdConfig, value_and_jacfwd_jaxpr};
use fwd_cache::{CacheKeyInput, build_cache_key};
use fwd_core::{CompatibilityMode, Jaxpr, Transform, Value};
use fwd_interpreters::eval_jaxpr;
use fwd_ledger::{CallRecord, EvidenceLedger, EvidenceSignal, LedgerEntry};

use crate::errors::ApiError;

#[derive(Debug, Clone, PartialEq)]
pub struct JitWrapped {
    jaxpr: Jaxpr,
    mode: CompatibilityMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JvpWrapped {
    jaxpr: Jaxpr,
    mode: CompatibilityMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JacfwdWrapped {
    jaxpr: Jaxpr,
    config: JacfwdConfig,
}

/// `f` wrapped so that one call returns its value and its forward-mode
/// Jacobian.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueAndJacfwdWrapped {
    jaxpr: Jaxpr,
    config: JacfwdConfig,
}

/// Primal half of a [`ValueAndJacfwdWrapped`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum Primal {
    /// Every output of `f`, all differentiated.
    Value(Vec<Value>),
    /// `has_aux`: the differentiated output and the aux outputs after it.
    WithAux { value: Value, aux: Vec<Value> },
}

impl Primal {
    /// The differentiated outputs.
    #[must_use]
    pub fn value(&self) -> &[Value] {
        match self {
            Self::Value(values) => values,
            Self::WithAux { value, .. } => std::slice::from_ref(value),
        }
    }

    #[must_use]
    pub fn aux(&self) -> Option<&[Value]> {
        match self {
            Self::Value(_) => None,
            Self::WithAux { aux, .. } => Some(aux),
        }
    }
}

/// Outputs of a call together with its key and evidence.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformResponse<T> {
    pub outputs: T,
    pub cache_key: String,
    pub evidence_ledger: EvidenceLedger,
}

#[must_use]
pub fn jit(jaxpr: Jaxpr) -> JitWrapped {
    JitWrapped {
        jaxpr,
        mode: CompatibilityMode::Strict,
    }
}

#[must_use]
pub fn jvp(jaxpr: Jaxpr) -> JvpWrapped {
    JvpWrapped {
        jaxpr,
        mode: CompatibilityMode::Strict,
    }
}

#[must_use]
pub fn jacfwd(jaxpr: Jaxpr) -> JacfwdWrapped {
    JacfwdWrapped {
        jaxpr,
        config: JacfwdConfig::default(),
    }
}

#[must_use]
pub fn value_and_jacfwd(jaxpr: Jaxpr) -> ValueAndJacfwdWrapped {
    ValueAndJacfwdWrapped {
        jaxpr,
        config: JacfwdConfig::default(),
    }
}

fn render_argnums(argnums: &Argnums) -> String {
    match argnums {
        Argnums::Single(argnum) => argnum.to_string(),
        Argnums::Many(argnums) => argnums
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(","),
    }
}

fn jacfwd_options(config: &JacfwdConfig) -> BTreeMap<String, String> {
    let mut options = BTreeMap::new();
    options.insert("argnums".to_owned(), render_argnums(&config.argnums));
    options.insert("has_aux".to_owned(), config.has_aux.to_string());
    options
}

fn build_evidence(
    jaxpr: &Jaxpr,
    transform: Transform,
    mode: CompatibilityMode,
    options: BTreeMap<String, String>,
    mut signals: Vec<EvidenceSignal>,
) -> (String, EvidenceLedger) {
    let cache_key = build_cache_key(&CacheKeyInput {
        mode,
        transform,
        jaxpr,
        options,
    })
    .as_string();

    signals.insert(0, EvidenceSignal::count("eqn_count", jaxpr.equations.len()));
    let mut ledger = EvidenceLedger::new();
    ledger.append(LedgerEntry {
        decision_id: cache_key.clone(),
        record: CallRecord::now(transform, mode),
        signals,
    });
    (cache_key, ledger)
}

fn validate_if_hardened(jaxpr: &Jaxpr, mode: CompatibilityMode) -> Result<(), ApiError> {
    if mode == CompatibilityMode::Hardened {
        jaxpr.validate_well_formed()?;
    }
    Ok(())
}

impl JitWrapped {
    #[must_use]
    pub fn with_mode(mut self, mode: CompatibilityMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn call(&self, args: Vec<Value>) -> Result<Vec<Value>, ApiError> {
        validate_if_hardened(&self.jaxpr, self.mode)?;
        Ok(eval_jaxpr(&self.jaxpr, &args)?)
    }

    pub fn call_with_evidence(
        &self,
        args: Vec<Value>,
    ) -> Result<TransformResponse<Vec<Value>>, ApiError> {
        let outputs = self.call(args)?;
        let (cache_key, evidence_ledger) = build_evidence(
            &self.jaxpr,
            Transform::Jit,
            self.mode,
            BTreeMap::new(),
            vec![EvidenceSignal::count(
                "primal_evaluations",
                self.jaxpr.equations.len(),
            )],
        );
        Ok(TransformResponse {
            outputs,
            cache_key,
            evidence_ledger,
        })
    }
}

impl JvpWrapped {
    #[must_use]
    pub fn with_mode(mut self, mode: CompatibilityMode) -> Self {
        self.mode = mode;
        self
    }

    /// Outputs of `f` at `primals` and their tangents along `tangents`.
    pub fn call(
        &self,
        primals: Vec<Value>,
        tangents: Vec<Value>,
    ) -> Result<(Vec<Value>, Vec<Value>), ApiError> {
        validate_if_hardened(&self.jaxpr, self.mode)?;
        Ok(fwd_ad::jvp(&self.jaxpr, &primals, &tangents)?)
    }

    pub fn call_with_evidence(
        &self,
        primals: Vec<Value>,
        tangents: Vec<Value>,
    ) -> Result<TransformResponse<(Vec<Value>, Vec<Value>)>, ApiError> {
        let outputs = self.call(primals, tangents)?;
        let (cache_key, evidence_ledger) = build_evidence(
            &self.jaxpr,
            Transform::Jvp,
            self.mode,
            BTreeMap::new(),
            vec![
                EvidenceSignal::count("primal_evaluations", self.jaxpr.equations.len()),
                EvidenceSignal::count("tangent_directions", 1),
            ],
        );
        Ok(TransformResponse {
            outputs,
            cache_key,
            evidence_ledger,
        })
    }
}

impl JacfwdWrapped {
    #[must_use]
    pub fn with_argnums(mut self, argnums: impl Into<Argnums>) -> Self {
        self.config.argnums = argnums.into();
        self
    }

    /// Treat outputs `1..` as aux data; `call` drops them and
    /// `call_with_aux` returns them.
    #[must_use]
    pub fn with_has_aux(mut self, has_aux: bool) -> Self {
        self.config.has_aux = has_aux;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: CompatibilityMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn call(&self, args: Vec<Value>) -> Result<Vec<Value>, ApiError> {
        Ok(fwd_ad::jacfwd_jaxpr(&self.jaxpr, &args, &self.config)?)
    }

    /// Jacobian together with the aux outputs, which are `Some` exactly
    /// when `has_aux` is set.
    pub fn call_with_aux(
        &self,
        args: Vec<Value>,
    ) -> Result<(Vec<Value>, Option<Vec<Value>>), ApiError> {
        let result = value_and_jacfwd_jaxpr(&self.jaxpr, &args, &self.config)?;
        Ok((result.jacobian, result.aux))
    }

    pub fn call_with_evidence(
        &self,
        args: Vec<Value>,
    ) -> Result<TransformResponse<Vec<Value>>, ApiError> {
        let result = value_and_jacfwd_jaxpr(&self.jaxpr, &args, &self.config)?;
        let (cache_key, evidence_ledger) = build_evidence(
            &self.jaxpr,
            Transform::Jacfwd,
            self.config.mode,
            jacfwd_options(&self.config),
            jacobian_signals(&self.config, &result),
        );
        Ok(TransformResponse {
            outputs: result.jacobian,
            cache_key,
            evidence_ledger,
        })
    }
}

impl ValueAndJacfwdWrapped {
    #[must_use]
    pub fn with_argnums(mut self, argnums: impl Into<Argnums>) -> Self {
        self.config.argnums = argnums.into();
        self
    }

    /// Treat output 0 as the value and outputs `1..` as aux data.
    #[must_use]
    pub fn with_has_aux(mut self, has_aux: bool) -> Self {
        self.config.has_aux = has_aux;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: CompatibilityMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Value and Jacobian of `f` at `args` from a single forward pass.
    pub fn call(&self, args: Vec<Value>) -> Result<(Primal, Vec<Value>), ApiError> {
        let result = value_and_jacfwd_jaxpr(&self.jaxpr, &args, &self.config)?;
        Ok((into_primal(result.value, result.aux), result.jacobian))
    }

    pub fn call_with_evidence(
        &self,
        args: Vec<Value>,
    ) -> Result<TransformResponse<(Primal, Vec<Value>)>, ApiError> {
        let result = value_and_jacfwd_jaxpr(&self.jaxpr, &args, &self.config)?;
        let (cache_key, evidence_ledger) = build_evidence(
            &self.jaxpr,
            Transform::ValueAndJacfwd,
            self.config.mode,
            jacfwd_options(&self.config),
            jacobian_signals(&self.config, &result),
        );
        Ok(TransformResponse {
            outputs: (into_primal(result.value, result.aux), result.jacobian),
            cache_key,
            evidence_ledger,
        })
    }
}

fn into_primal(mut value: Vec<Value>, aux: Option<Vec<Value>>) -> Primal {
    match (aux, value.pop()) {
        (Some(aux), Some(value)) => Primal::WithAux { value, aux },
        (_, last) => {
            value.extend(last);
            Primal::Value(value)
        }
    }
}

fn jacobian_signals(
    config: &JacfwdConfig,
    result: &fwd_ad::ValueAndJacobian,
) -> Vec<EvidenceSignal> {
    vec![
        EvidenceSignal::count("primal_evaluations", result.primal_evaluations),
        EvidenceSignal::count("tangent_directions", result.tangent_directions),
        EvidenceSignal::count("argnum_count", config.argnums.len()),
        EvidenceSignal::flag("has_aux", config.has_aux),
    ]
}
