//! The emulator: classify outputs, transform samples, fit engines, predict.
//!
//! Data flow:
//!
//! ```text
//! calculator / samples ──► classify (varied | fixed)
//!                      ──► y-operations, x-operations (calibrated on rank 0)
//!                      ──► one EmulatorEngine per varied output
//! params ──► defaults ∪ params ──► x-operations ──► engines ∪ fixed
//!        ──► y-operations inverse (reverse order) ──► outputs
//! ```
//!
//! # Invariants
//!
//! - **Shared decisions**: classification, calibrated operation states,
//!   finiteness verdicts and fitted engines are computed on rank 0 and
//!   broadcast, so every rank can `predict` after `fit`.
//! - **Fixed outputs** are stored after y-operations and go through the same
//!   inverse as fitted outputs at predict time.
//! - **Engine choice**: an engine registered under the exact output name wins
//!   over patterns; among patterns the last registered match wins.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use ndarray::{concatenate, Array2, ArrayD, Axis, Ix1};
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::emulator::comm::{from_wire, share, to_wire, WireArray};
use crate::emulator::operation::KeyedOperation;
use crate::emulator::sampler::{check_limits, ParamLimits};
use crate::emulator::state::{EmulatorState, KeyedOperationState};
use crate::emulator::{
    deep_eq, find_names, matches, Calculator, Communicator, EmulatorEngine, Outputs, Params,
    Samples,
};
use crate::error::{CosmologyError, CosmologyResult};

/// Calculator draws used to tell varied from fixed outputs.
const SURVEY_DRAWS: usize = 3;

/// Rows of supplied samples used for the same purpose.
const CLASSIFY_ROWS: usize = 10;

const SEED: u64 = 42;

/// Per-sample shape of each varied output.
type Varied = BTreeMap<String, Vec<usize>>;

/// Classification result, as broadcast from rank 0.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct Survey {
    varied: Varied,
    fixed: BTreeMap<String, WireArray>,
}

/// Everything non-root ranks need after rank 0 transformed the samples.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct Prepared {
    params: Vec<String>,
    varied: Varied,
    fixed: BTreeMap<String, WireArray>,
    xoperations: Vec<KeyedOperationState>,
    yoperations: Vec<KeyedOperationState>,
}

/// Engine awaiting [`Emulator::fit`], with its training samples (rank 0 only).
#[derive(Clone, Debug)]
struct PendingFit {
    engine: EmulatorEngine,
    samples: Option<Arc<Samples>>,
}

// ─── Classification ────────────────────────────────────────────────────────

/// Split `draws` into varied outputs (with their per-sample shape) and
/// fixed outputs (identical in every draw).
fn classify(draws: &[Outputs]) -> (Varied, Outputs) {
    let mut names: Vec<&String> = draws.iter().flat_map(|draw| draw.keys()).collect();
    names.sort();
    names.dedup();
    let mut varied = Varied::new();
    let mut fixed = Outputs::new();
    for name in names {
        let values: Vec<Option<&ArrayD<f64>>> = draws.iter().map(|draw| draw.get(name)).collect();
        let first = values[0];
        if values.iter().all(|value| deep_eq(*value, first)) {
            if let Some(value) = first {
                fixed.insert(name.clone(), value.clone());
            }
        } else if let Some(value) = values.iter().flatten().next() {
            varied.insert(name.clone(), value.shape().to_vec());
        }
    }
    (varied, fixed)
}

/// Rows `indices` of a batch, one map per row.
fn rows(batch: &Outputs, indices: &[usize]) -> Vec<Outputs> {
    indices
        .iter()
        .map(|&i| {
            batch
                .iter()
                .map(|(name, column)| (name.clone(), column.index_axis(Axis(0), i).to_owned()))
                .collect()
        })
        .collect()
}

/// Seeded subsample of at most [`CLASSIFY_ROWS`] row indices.
fn subsample(len: usize) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    sample(&mut rng, len, len.min(CLASSIFY_ROWS)).into_vec()
}

/// Columns under `prefix`, with the prefix stripped.
fn strip_columns(samples: &Samples, prefix: &str) -> Outputs {
    samples
        .iter()
        .filter_map(|(name, column)| {
            name.strip_prefix(prefix)
                .map(|short| (short.to_string(), column.clone()))
        })
        .collect()
}

fn survey_calculator(calculator: &dyn Calculator, limits: &ParamLimits) -> CosmologyResult<Survey> {
    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    let draws = (0..SURVEY_DRAWS)
        .map(|_| {
            let params: Params = limits
                .iter()
                .map(|(name, (lo, hi))| (name.clone(), rng.gen_range(*lo..=*hi)))
                .collect();
            calculator.evaluate(&params)
        })
        .collect::<CosmologyResult<Vec<_>>>()?;
    let (varied, fixed) = classify(&draws);
    Ok(Survey {
        varied,
        fixed: to_wire(&fixed),
    })
}

fn all_finite<'a>(values: impl IntoIterator<Item = &'a f64>) -> bool {
    values.into_iter().all(|v| v.is_finite())
}

/// Repeat a single sample `n` times along a new leading axis.
fn tile(value: &ArrayD<f64>, n: usize) -> CosmologyResult<ArrayD<f64>> {
    let row = value.clone().insert_axis(Axis(0));
    let views = vec![row.view(); n];
    Ok(concatenate(Axis(0), &views)?)
}

/// Apply keyed operations to a batch, calibrating each one first.
/// Operations naming an absent key are skipped.
fn calibrate(operations: &mut [KeyedOperation], mut batch: Outputs, what: &str) -> CosmologyResult<Outputs> {
    for operation in operations {
        if let Err(missing) = operation.check(&batch) {
            debug!(operation = operation.name(), key = %missing.key, "skipping {what}-operation");
            continue;
        }
        operation.initialize(&batch)?;
        batch = operation.direct_batch(&batch)?;
    }
    Ok(batch)
}

fn scalar(name: &str, value: &ArrayD<f64>) -> CosmologyResult<f64> {
    match value.len() {
        1 => Ok(value.iter().copied().sum()),
        len => Err(CosmologyError::input(format!(
            "parameter '{name}' maps to {len} values after x-operations"
        ))),
    }
}

// ─── Emulator ──────────────────────────────────────────────────────────────

/// Fitted replacement for a [`Calculator`].
#[derive(Clone, Debug)]
pub struct Emulator {
    comm: Arc<dyn Communicator>,
    templates: Vec<(String, EmulatorEngine)>,
    xoperations: Vec<KeyedOperation>,
    yoperations: Vec<KeyedOperation>,
    pending: BTreeMap<String, PendingFit>,
    engines: BTreeMap<String, EmulatorEngine>,
    defaults: Params,
    fixed: Outputs,
}

impl Emulator {
    /// Empty emulator over `comm`.
    pub fn new(comm: Arc<dyn Communicator>) -> Self {
        Self {
            comm,
            templates: Vec::new(),
            xoperations: Vec::new(),
            yoperations: Vec::new(),
            pending: BTreeMap::new(),
            engines: BTreeMap::new(),
            defaults: Params::new(),
            fixed: Outputs::new(),
        }
    }

    /// Use `engine` for outputs matching `pattern`.
    pub fn with_engine(mut self, pattern: impl Into<String>, engine: EmulatorEngine) -> Self {
        self.templates.push((pattern.into(), engine));
        self
    }

    /// Append an operation on the parameter map.
    pub fn with_xoperation(mut self, operation: KeyedOperation) -> Self {
        self.xoperations.push(operation);
        self
    }

    /// Append an operation on the output map.
    pub fn with_yoperation(mut self, operation: KeyedOperation) -> Self {
        self.yoperations.push(operation);
        self
    }

    /// Communicator shared by every collective.
    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    /// Default parameter values.
    pub fn defaults(&self) -> &Params {
        &self.defaults
    }

    /// Outputs found constant (after y-operations).
    pub fn fixed(&self) -> &Outputs {
        &self.fixed
    }

    /// Fitted engine for `name`.
    pub fn engine(&self, name: &str) -> Option<&EmulatorEngine> {
        self.engines.get(name)
    }

    /// Names of fitted outputs.
    pub fn engine_names(&self) -> Vec<&String> {
        self.engines.keys().collect()
    }

    /// Union of the fitted engines' parameters, first-seen order.
    pub fn params(&self) -> Vec<String> {
        let mut params: Vec<String> = Vec::new();
        for name in self.engines.values().flat_map(|engine| engine.params()) {
            if !params.contains(name) {
                params.push(name.clone());
            }
        }
        params
    }

    fn template_for(&self, name: &str) -> CosmologyResult<&EmulatorEngine> {
        self.templates
            .iter()
            .rev()
            .find(|(pattern, _)| pattern == name)
            .or_else(|| self.templates.iter().rev().find(|(pattern, _)| matches(pattern, name)))
            .map(|(_, engine)| engine)
            .ok_or_else(|| {
                CosmologyError::input(format!("no engine specified for varying output '{name}'"))
            })
    }

    // ── Samples ──

    /// Classify the calculator's outputs over `limits`, then sample it with
    /// the default sampler of the first varied output's engine. Collective.
    pub fn set_calculator(&mut self, calculator: &dyn Calculator, limits: &ParamLimits) -> CosmologyResult<()> {
        let comm = Arc::clone(&self.comm);
        let root = comm.rank() == 0;
        check_limits(limits)?;
        self.defaults = calculator.defaults();

        let local = root.then(|| survey_calculator(calculator, limits));
        let survey = share(comm.as_ref(), local, 0)?;
        if root {
            let params: Vec<&String> = limits.iter().map(|(name, _)| name).collect();
            info!(?params, "Varied parameters");
            info!(
                varied = ?survey.varied.keys().collect::<Vec<_>>(),
                fixed = ?survey.fixed.keys().collect::<Vec<_>>(),
                "Found varying and fixed outputs"
            );
        }
        let first = survey
            .varied
            .keys()
            .next()
            .ok_or_else(|| CosmologyError::input("found no varying quantity in provided calculator"))?;
        let samples = self
            .template_for(first)?
            .default_samples(calculator, limits, comm.as_ref())?;

        let params: Vec<String> = limits.iter().map(|(name, _)| name.clone()).collect();
        let fixed = from_wire(survey.fixed)?;
        let local = root.then(|| match samples {
            Some(samples) => self.prepare(&samples, params, survey.varied, fixed),
            None => Err(CosmologyError::computation("rank 0 holds no samples")),
        });
        self.finish(local)
    }

    /// Train on `samples` (`X.<param>` and `Y.<output>` columns), which only
    /// rank 0 needs to hold. Collective.
    pub fn set_samples(&mut self, samples: Option<Samples>) -> CosmologyResult<()> {
        let local = (self.comm.rank() == 0).then(|| match samples {
            Some(samples) => {
                let params: Vec<String> = strip_columns(&samples, "X.").into_keys().collect();
                let outputs = strip_columns(&samples, "Y.");
                let (varied, fixed) = classify(&rows(&outputs, &subsample(samples.len())));
                self.prepare(&samples, params, varied, fixed)
            }
            None => Err(CosmologyError::input("no samples provided on rank 0")),
        });
        self.finish(local)
    }

    /// Rank 0: calibrate and apply the x/y operations, reclassify, and build
    /// the training samples.
    fn prepare(
        &mut self,
        samples: &Samples,
        params: Vec<String>,
        mut varied: Varied,
        mut fixed: Outputs,
    ) -> CosmologyResult<(Samples, Prepared)> {
        if varied.is_empty() {
            return Err(CosmologyError::input("found no varying quantity in samples"));
        }
        let nonfinite: Vec<&String> = samples
            .iter()
            .filter(|(_, column)| !all_finite(column.iter()))
            .map(|(name, _)| name)
            .collect();
        if !nonfinite.is_empty() {
            warn!(columns = ?nonfinite, "samples are not finite");
        }

        let n = samples.len();
        let x: Outputs = params
            .iter()
            .map(|name| Ok((name.clone(), samples.require(&format!("X.{name}"))?.clone())))
            .collect::<CosmologyResult<_>>()?;
        let mut y = Outputs::new();
        for (name, value) in &fixed {
            y.insert(name.clone(), tile(value, n)?);
        }
        for name in varied.keys() {
            y.insert(name.clone(), samples.require(&format!("Y.{name}"))?.clone());
        }

        let y = calibrate(&mut self.yoperations, y, "y")?;
        if !self.yoperations.is_empty() {
            let (reclassified, refixed) = classify(&rows(&y, &subsample(n)));
            varied = reclassified;
            fixed.extend(refixed);
        }
        let x = calibrate(&mut self.xoperations, x, "x")?;

        let mut training = Samples::new();
        for (name, column) in &x {
            training.insert(format!("X.{name}"), column.clone())?;
        }
        for name in varied.keys() {
            let column = y
                .get(name)
                .ok_or_else(|| CosmologyError::computation(format!("output '{name}' lost by y-operations")))?;
            training.insert(format!("Y.{name}"), column.clone())?;
        }
        *training.attrs_mut() = samples.attrs().clone();

        let prepared = Prepared {
            params,
            varied,
            fixed: to_wire(&fixed),
            xoperations: self.xoperations.iter().map(KeyedOperation::state).collect(),
            yoperations: self.yoperations.iter().map(KeyedOperation::state).collect(),
        };
        Ok((training, prepared))
    }

    /// Every rank: adopt rank 0's decisions and set up one engine per varied output.
    fn finish(&mut self, local: Option<CosmologyResult<(Samples, Prepared)>>) -> CosmologyResult<()> {
        let (training, local) = match local {
            Some(Ok((training, prepared))) => (Some(Arc::new(training)), Some(Ok(prepared))),
            Some(Err(err)) => (None, Some(Err(err))),
            None => (None, None),
        };
        let prepared = share(self.comm.as_ref(), local, 0)?;
        if self.comm.rank() != 0 {
            self.xoperations = prepared
                .xoperations
                .iter()
                .map(KeyedOperation::from_state)
                .collect::<CosmologyResult<_>>()?;
            self.yoperations = prepared
                .yoperations
                .iter()
                .map(KeyedOperation::from_state)
                .collect::<CosmologyResult<_>>()?;
        }
        self.fixed.extend(from_wire(prepared.fixed)?);
        for name in prepared.varied.keys() {
            let mut engine = self.template_for(name)?.clone();
            engine.initialize(prepared.params.clone());
            self.pending.insert(
                name.clone(),
                PendingFit {
                    engine,
                    samples: training.clone(),
                },
            );
        }
        Ok(())
    }

    // ── Fit and predict ──

    /// Fit the outputs matching `names` (all pending outputs if empty). Collective.
    pub fn fit(&mut self, names: &[&str]) -> CosmologyResult<()> {
        let available: Vec<String> = self.pending.keys().cloned().collect();
        let selected: Vec<String> = if names.is_empty() {
            available.clone()
        } else {
            find_names(&available, names).into_iter().cloned().collect()
        };
        let comm = Arc::clone(&self.comm);
        for name in selected {
            let Some(pending) = self.pending.get(&name) else {
                continue;
            };
            let mut engine = pending.engine.clone();
            let local = (comm.rank() == 0).then(|| training_data(pending.samples.as_deref(), &engine, &name));
            let (data, verdict) = match local {
                Some(Ok(data)) => {
                    let verdict = (all_finite(data.0.iter()), all_finite(data.1.iter()));
                    (Some(data), Some(Ok(verdict)))
                }
                Some(Err(err)) => (None, Some(Err(err))),
                None => (None, None),
            };
            let (x_finite, y_finite) = share(comm.as_ref(), verdict, 0)?;
            if !x_finite {
                return Err(CosmologyError::computation(format!("X for '{name}' is not finite")));
            }
            if !y_finite {
                return Err(CosmologyError::computation(format!("'{name}' is not finite")));
            }
            if comm.rank() == 0 {
                info!(output = %name, engine = engine.name(), "Fitting");
            }
            let (x, y, attrs) = match data {
                Some((x, y, attrs)) => (Some(x), Some(y), attrs),
                None => (None, None, BTreeMap::new()),
            };
            engine.fit(x, y, attrs, comm.as_ref())?;
            self.pending.remove(&name);
            self.engines.insert(name, engine);
        }
        Ok(())
    }

    /// Emulated outputs at `params` (merged over the defaults).
    pub fn predict(&self, params: &Params) -> CosmologyResult<Outputs> {
        let mut merged = self.defaults.clone();
        merged.extend(params.iter().map(|(name, value)| (name.clone(), *value)));
        let mut x: Outputs = merged
            .into_iter()
            .map(|(name, value)| (name, ndarray::arr0(value).into_dyn()))
            .collect();
        for operation in &self.xoperations {
            if operation.check(&x).is_ok() {
                x = operation.direct(&x)?;
            }
        }
        let params: Params = x
            .iter()
            .map(|(name, value)| Ok((name.clone(), scalar(name, value)?)))
            .collect::<CosmologyResult<_>>()?;

        let mut outputs = self.fixed.clone();
        for (name, engine) in &self.engines {
            outputs.insert(name.clone(), engine.predict(&params)?);
        }
        for operation in self.yoperations.iter().rev() {
            if operation.check(&outputs).is_ok() {
                outputs = operation.inverse(&outputs)?;
            }
        }
        Ok(outputs)
    }

    /// Wrap as a [`Calculator`].
    pub fn to_calculator(self) -> EmulatedCalculator {
        EmulatedCalculator { emulator: self }
    }

    /// Merge another emulator's engines, defaults and fixed outputs into this
    /// one; entries of `other` win.
    ///
    /// Y-operation calibrations follow the outputs they were fitted on: this
    /// emulator's copies for the incoming names are dropped, and `other`'s
    /// y-operations are appended restricted to its own outputs. X-operations
    /// are left untouched.
    pub fn update(&mut self, other: Emulator) {
        let incoming: BTreeSet<String> =
            other.engines.keys().chain(other.fixed.keys()).cloned().collect();
        for operation in &mut self.yoperations {
            operation.retain_calibrated(|name| !incoming.contains(name));
        }
        for mut operation in other.yoperations {
            operation.retain_calibrated(|name| incoming.contains(name));
            if operation.calibrated_names().next().is_some() {
                self.yoperations.push(operation);
            }
        }
        self.engines.extend(other.engines);
        self.defaults.extend(other.defaults);
        self.fixed.extend(other.fixed);
    }

    // ── State ──

    /// Snapshot of the fitted emulator.
    pub fn state(&self) -> CosmologyResult<EmulatorState> {
        Ok(EmulatorState {
            engines: self
                .engines
                .iter()
                .map(|(name, engine)| Ok((name.clone(), engine.state()?)))
                .collect::<CosmologyResult<_>>()?,
            xoperations: self.xoperations.iter().map(KeyedOperation::state).collect(),
            yoperations: self.yoperations.iter().map(KeyedOperation::state).collect(),
            defaults: self.defaults.clone(),
            fixed: self.fixed.clone(),
        })
    }

    /// Rebuild from [`Self::state`].
    pub fn from_state(state: &EmulatorState, comm: Arc<dyn Communicator>) -> CosmologyResult<Self> {
        let keyed = |states: &[KeyedOperationState]| {
            states
                .iter()
                .map(KeyedOperation::from_state)
                .collect::<CosmologyResult<Vec<_>>>()
        };
        Ok(Self {
            xoperations: keyed(&state.xoperations)?,
            yoperations: keyed(&state.yoperations)?,
            engines: state
                .engines
                .iter()
                .map(|(name, engine)| Ok((name.clone(), EmulatorEngine::from_state(engine)?)))
                .collect::<CosmologyResult<_>>()?,
            defaults: state.defaults.clone(),
            fixed: state.fixed.clone(),
            ..Self::new(comm)
        })
    }

    /// Write the state as JSON (rank 0 only; other ranks return at once).
    pub fn save(&self, path: impl AsRef<Path>) -> CosmologyResult<()> {
        if self.comm.rank() != 0 {
            return Ok(());
        }
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        info!(path = %path.display(), "Saving emulator");
        std::fs::write(path, serde_json::to_vec(&self.state()?)?)?;
        Ok(())
    }

    /// Read a state written by [`Self::save`].
    pub fn load(path: impl AsRef<Path>, comm: Arc<dyn Communicator>) -> CosmologyResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading emulator");
        let state: EmulatorState = serde_json::from_slice(&std::fs::read(path)?)?;
        Self::from_state(&state, comm)
    }
}

type TrainingData = (Array2<f64>, ArrayD<f64>, BTreeMap<String, serde_json::Value>);

/// Rank 0: inputs stacked in the engine's parameter order, and the output column.
fn training_data(samples: Option<&Samples>, engine: &EmulatorEngine, name: &str) -> CosmologyResult<TrainingData> {
    let samples = samples.ok_or_else(|| CosmologyError::computation("rank 0 holds no training samples"))?;
    let columns = engine
        .params()
        .iter()
        .map(|param| {
            Ok(samples
                .require(&format!("X.{param}"))?
                .view()
                .into_dimensionality::<Ix1>()?
                .insert_axis(Axis(1)))
        })
        .collect::<CosmologyResult<Vec<_>>>()?;
    let x = if columns.is_empty() {
        Array2::zeros((samples.len(), 0))
    } else {
        concatenate(Axis(1), &columns)?
    };
    let y = samples.require(&format!("Y.{name}"))?.clone();
    Ok((x, y, samples.attrs().clone()))
}

// ─── Calculator view ───────────────────────────────────────────────────────

/// An [`Emulator`] behaving as a [`Calculator`].
#[derive(Clone, Debug)]
pub struct EmulatedCalculator {
    emulator: Emulator,
}

impl EmulatedCalculator {
    /// Load a saved emulator directly as a calculator.
    pub fn load(path: impl AsRef<Path>, comm: Arc<dyn Communicator>) -> CosmologyResult<Self> {
        Ok(Emulator::load(path, comm)?.to_calculator())
    }

    /// The wrapped emulator.
    pub fn emulator(&self) -> &Emulator {
        &self.emulator
    }
}

impl Calculator for EmulatedCalculator {
    fn defaults(&self) -> Params {
        self.emulator.defaults.clone()
    }

    fn evaluate(&self, params: &Params) -> CosmologyResult<Outputs> {
        self.emulator.predict(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::{engine_from_name, PointEngine, SingleProcess};
    use ndarray::arr1;

    fn outputs(entries: &[(&str, ArrayD<f64>)]) -> Outputs {
        entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_classify_varied_fixed_and_partial() {
        let draws = vec![
            outputs(&[("a", arr1(&[1.0]).into_dyn()), ("c", arr1(&[5.0, 6.0]).into_dyn())]),
            outputs(&[("a", arr1(&[2.0]).into_dyn()), ("c", arr1(&[5.0, 6.0]).into_dyn())]),
            outputs(&[("b", arr1(&[0.0, 1.0]).into_dyn()), ("c", arr1(&[5.0, 6.0]).into_dyn())]),
        ];
        let (varied, fixed) = classify(&draws);
        assert_eq!(varied.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(varied["b"], vec![2]);
        assert_eq!(fixed.keys().collect::<Vec<_>>(), vec!["c"]);
    }

    #[test]
    fn test_subsample_is_seeded_and_bounded() {
        let picked = subsample(100);
        assert_eq!(picked.len(), CLASSIFY_ROWS);
        assert_eq!(picked, subsample(100));
        assert!(picked.iter().all(|i| *i < 100), "picked={:?}", picked);
        let mut small = subsample(4);
        small.sort();
        assert_eq!(small, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_exact_engine_name_beats_pattern() {
        let emulator = Emulator::new(Arc::new(SingleProcess))
            .with_engine("pk", engine_from_name("point").unwrap())
            .with_engine("*", engine_from_name("taylor").unwrap());
        assert_eq!(emulator.template_for("pk").unwrap().name(), "point");
        assert_eq!(emulator.template_for("cl").unwrap().name(), "taylor");
        let bare = Emulator::new(Arc::new(SingleProcess)).with_engine("pk_*", EmulatorEngine::new(PointEngine::default()));
        assert!(bare.template_for("cl").unwrap_err().is_input());
    }

    #[test]
    fn test_tile_repeats_along_new_axis() {
        let tiled = tile(&arr1(&[1.0, 2.0]).into_dyn(), 3).unwrap();
        assert_eq!(tiled.shape(), &[3, 2]);
        assert_eq!(tiled[[2, 1]], 2.0);
    }

    #[test]
    fn test_set_samples_without_samples_is_input_error() {
        let mut emulator = Emulator::new(Arc::new(SingleProcess)).with_engine("*", engine_from_name("point").unwrap());
        assert!(emulator.set_samples(None).unwrap_err().is_input());
    }
}
