//! Serialisable snapshots of operations, engines and emulators.
//!
//! States are nested maps of plain data: names, arrays and numbers. Restoring
//! re-dispatches on the recorded `name` through the operation and engine
//! registries, so no calculator is needed to reload a fitted emulator.

use std::collections::BTreeMap;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::emulator::{Outputs, Params};

/// One operation: registered name, readable transform, calibrated constants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperationState {
    /// Registry name (`log10`, `scale`, ...).
    pub name: String,
    /// Forward transform, in terms of `v` and the locals.
    pub direct: String,
    /// Inverse transform, if any.
    pub inverse: Option<String>,
    /// Calibrated arrays; empty before `initialize`.
    #[serde(default)]
    pub locals: BTreeMap<String, ArrayD<f64>>,
    /// Scalar settings (`npcs`, `order`, `axis`).
    #[serde(default)]
    pub settings: BTreeMap<String, f64>,
}

/// An operation applied per entry of a name → array map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyedOperationState {
    /// Uncalibrated template.
    pub operation: OperationState,
    /// Key patterns the operation applies to.
    pub keys: Vec<String>,
    /// Calibrated copy per matched key.
    #[serde(default)]
    pub calibrated: BTreeMap<String, OperationState>,
}

/// One emulator engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    /// Registry name (`point`, `taylor`, `mlp`).
    pub name: String,
    /// Input parameter order.
    pub params: Vec<String>,
    /// Per-sample input shape after x-operations, before flattening.
    #[serde(default)]
    pub xshape: Vec<usize>,
    /// Per-sample output shape after y-operations, before flattening.
    #[serde(default)]
    pub yshape: Vec<usize>,
    /// Engine-level operations on the parameter vector.
    #[serde(default)]
    pub xoperations: Vec<OperationState>,
    /// Engine-level operations on the output.
    #[serde(default)]
    pub yoperations: Vec<OperationState>,
    /// Attributes copied from the training samples.
    #[serde(default)]
    pub attrs: BTreeMap<String, serde_json::Value>,
    /// Backend configuration and fitted coefficients.
    pub backend: serde_json::Value,
    /// Whether the engine was fitted.
    #[serde(default)]
    pub fitted: bool,
}

/// A whole emulator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EmulatorState {
    /// Fitted engine per output name.
    pub engines: BTreeMap<String, EngineState>,
    /// Emulator-level operations on the parameter map.
    #[serde(default)]
    pub xoperations: Vec<KeyedOperationState>,
    /// Emulator-level operations on the output map.
    #[serde(default)]
    pub yoperations: Vec<KeyedOperationState>,
    /// Default parameter values.
    #[serde(default)]
    pub defaults: Params,
    /// Outputs found constant, stored after y-operations.
    #[serde(default)]
    pub fixed: Outputs,
}
