//! Emulation of expensive calculators.
//!
//! An [`Emulator`] replaces a calculator (named scalar parameters in, named
//! arrays out) with a fast approximation fitted on sampled input/output
//! pairs, keeping an invertible preprocessing pipeline around the fit.
//!
//! ## Module overview
//!
//! | Module | Key types | What it does |
//! |---|---|---|
//! | [`comm`] | [`Communicator`], [`SingleProcess`], [`LocalGroup`] | collective broadcast/gather between ranks |
//! | [`samples`] | [`Samples`] | `X.<param>` / `Y.<output>` column store |
//! | [`operation`] | [`Operation`], [`KeyedOperation`] | invertible transforms with calibrated constants |
//! | [`engine`] | [`EmulatorEngine`], [`EngineBackend`] | point, Taylor and MLP fits of one output |
//! | [`sampler`] | [`GridSampler`], [`QmcSampler`] | drive a calculator over a parameter box |
//! | [`pipeline`] | [`Emulator`], [`EmulatedCalculator`] | classification, fit, predict |
//! | [`state`] | [`EmulatorState`] | serialisable snapshot of a fitted emulator |
//!
//! # Invariants
//!
//! - **Rank 0 decides**: only rank 0 holds samples; every data-dependent
//!   branch (classification, finiteness verdicts, fitted states) is broadcast
//!   before other ranks act on it, so all ranks fail or succeed together.
//! - **Explicit randomness**: every random draw comes from a seeded
//!   `ChaCha8Rng` owned by the caller or the component; there is no global seed.
//! - **Fixed outputs**: an output found constant is never fitted and is
//!   returned verbatim by `predict`.

pub mod comm;
pub mod engine;
pub mod operation;
pub mod pipeline;
pub mod sampler;
pub mod samples;
pub mod state;

use std::collections::BTreeMap;

use ndarray::ArrayD;

use crate::error::CosmologyResult;

pub use comm::{Communicator, LocalGroup, SingleProcess};
pub use engine::{
    engine_from_name, EmulatorEngine, EngineBackend, MlpConfig, MlpEngine, PointEngine,
    TaylorConfig, TaylorEngine,
};
pub use operation::{
    operation_from_name, operation_from_state, ArcsinhOperation, ChebyshevOperation,
    KeyedOperation, Log10Operation, MissingKey, NormOperation, Operation, PcaOperation,
    ScaleOperation,
};
pub use pipeline::{EmulatedCalculator, Emulator};
pub use sampler::{GridSampler, ParamLimits, QmcSampler};
pub use samples::Samples;
pub use state::{EmulatorState, EngineState, KeyedOperationState, OperationState};

/// Named scalar inputs of a calculator.
pub type Params = BTreeMap<String, f64>;

/// Named array outputs of a calculator.
pub type Outputs = BTreeMap<String, ArrayD<f64>>;

// ─── Calculator ────────────────────────────────────────────────────────────

/// Anything mapping named parameters to named arrays.
pub trait Calculator {
    /// Default parameter values, merged under explicit parameters at predict time.
    fn defaults(&self) -> Params {
        Params::new()
    }

    /// Evaluate at `params`.
    fn evaluate(&self, params: &Params) -> CosmologyResult<Outputs>;
}

/// [`Calculator`] backed by a closure.
pub struct FnCalculator<F> {
    defaults: Params,
    f: F,
}

impl<F> FnCalculator<F>
where
    F: Fn(&Params) -> CosmologyResult<Outputs>,
{
    /// Wrap `f`, with no defaults.
    pub fn new(f: F) -> Self {
        Self {
            defaults: Params::new(),
            f,
        }
    }

    /// Set the default parameter values.
    pub fn with_defaults(mut self, defaults: Params) -> Self {
        self.defaults = defaults;
        self
    }
}

impl<F> Calculator for FnCalculator<F>
where
    F: Fn(&Params) -> CosmologyResult<Outputs>,
{
    fn defaults(&self) -> Params {
        self.defaults.clone()
    }

    fn evaluate(&self, params: &Params) -> CosmologyResult<Outputs> {
        (self.f)(params)
    }
}

// ─── Helpers ───────────────────────────────────────────────────────────────

/// Equality used to classify outputs: both absent, or same shape and
/// bit-identical values (so NaN equals NaN).
pub fn deep_eq(a: Option<&ArrayD<f64>>, b: Option<&ArrayD<f64>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            a.shape() == b.shape() && a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits())
        }
        _ => false,
    }
}

/// Whether `pattern` contains glob wildcards.
pub(crate) fn is_pattern(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// Glob match with `*` (any run) and `?` (any one character).
pub fn matches(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut i, mut j) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while j < n.len() {
        if i < p.len() && (p[i] == '?' || p[i] == n[j]) {
            i += 1;
            j += 1;
        } else if i < p.len() && p[i] == '*' {
            star = Some((i, j));
            i += 1;
        } else if let Some((si, sj)) = star {
            i = si + 1;
            j = sj + 1;
            star = Some((si, sj + 1));
        } else {
            return false;
        }
    }
    p[i..].iter().all(|c| *c == '*')
}

/// Names among `names` matched by any of `patterns`, in `names` order.
pub fn find_names<'a, S: AsRef<str>>(names: &'a [String], patterns: &[S]) -> Vec<&'a String> {
    names
        .iter()
        .filter(|name| patterns.iter().any(|p| matches(p.as_ref(), name)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, ArrayD, IxDyn};

    #[test]
    fn test_glob_matching() {
        assert!(matches("*", "anything"));
        assert!(matches("pk_*", "pk_lin"));
        assert!(!matches("pk_*", "cl_tt"));
        assert!(matches("cl_??", "cl_tt"));
        assert!(!matches("cl_?", "cl_tt"));
        assert!(matches("a*b*c", "axxbyyc"));
        assert!(matches("exact", "exact"));
    }

    #[test]
    fn test_deep_eq_none_shape_and_nan() {
        let a = arr1(&[1.0, f64::NAN]).into_dyn();
        let b = arr1(&[1.0, f64::NAN]).into_dyn();
        assert!(deep_eq(Some(&a), Some(&b)));
        assert!(deep_eq(None, None));
        assert!(!deep_eq(Some(&a), None));
        let reshaped = ArrayD::from_shape_vec(IxDyn(&[2, 1]), vec![1.0, f64::NAN]).unwrap();
        assert!(!deep_eq(Some(&a), Some(&reshaped)));
        let c = arr1(&[1.0, 2.0]).into_dyn();
        assert!(!deep_eq(Some(&a), Some(&c)));
    }

    #[test]
    fn test_find_names_keeps_order() {
        let names = vec!["b".to_string(), "a1".to_string(), "a2".to_string()];
        let found = find_names(&names, &["a*"]);
        assert_eq!(found, vec!["a1", "a2"]);
    }
}
