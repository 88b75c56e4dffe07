//! Emulator engines: the fitted approximation of one output.
//!
//! An [`EmulatorEngine`] owns the parameter order, its own x-/y-operations and
//! the pre-flatten shapes; the numerical fit lives in an [`EngineBackend`]:
//!
//! | Name | Backend | Default samples |
//! |---|---|---|
//! | `point` | [`PointEngine`]: constant prediction | box centre |
//! | `taylor` | [`TaylorEngine`]: least-squares polynomial | `(order + 1)` points per axis |
//! | `mlp` | [`MlpEngine`]: tanh perceptron trained with Adam | Halton sequence |
//!
//! Fitting happens on rank 0; the fitted state is then broadcast and rebuilt
//! on the other ranks.

use std::collections::BTreeMap;
use std::fmt;

use nalgebra::DMatrix;
use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayView2, Axis, IxDyn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::emulator::comm::share;
use crate::emulator::operation::{map_samples, operation_from_state, Operation};
use crate::emulator::sampler::{GridSampler, ParamLimits, QmcSampler};
use crate::emulator::state::{EngineState, OperationState};
use crate::emulator::{Calculator, Communicator, Params, Samples};
use crate::error::{CosmologyError, CosmologyResult};

/// Numerical core of an engine, on flat rows.
pub trait EngineBackend: fmt::Debug + Send + Sync {
    /// Registry name.
    fn name(&self) -> &'static str;

    /// Training samples suited to this backend; `Some` on rank 0 only.
    fn default_samples(
        &self,
        calculator: &dyn Calculator,
        limits: &ParamLimits,
        comm: &dyn Communicator,
    ) -> CosmologyResult<Option<Samples>>;

    /// Fit flat inputs `x` (samples × features) to flat outputs `y`.
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>) -> CosmologyResult<()>;

    /// Flat prediction for one flat input row.
    fn predict(&self, x: ArrayView1<'_, f64>) -> CosmologyResult<Array1<f64>>;

    /// Configuration and fitted coefficients.
    fn state(&self) -> CosmologyResult<serde_json::Value>;

    /// Clone behind a box.
    fn boxed_clone(&self) -> Box<dyn EngineBackend>;
}

impl Clone for Box<dyn EngineBackend> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

fn not_fitted(name: &str) -> CosmologyError {
    CosmologyError::input(format!("engine '{name}' used before fit"))
}

fn to_dmatrix(a: &ArrayView2<'_, f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

// ─── Point ─────────────────────────────────────────────────────────────────

/// Returns the first training output whatever the input.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PointEngine {
    point: Option<Array1<f64>>,
}

impl EngineBackend for PointEngine {
    fn name(&self) -> &'static str {
        "point"
    }

    fn default_samples(
        &self,
        calculator: &dyn Calculator,
        limits: &ParamLimits,
        comm: &dyn Communicator,
    ) -> CosmologyResult<Option<Samples>> {
        GridSampler::new(limits.clone(), 1).run(calculator, comm)
    }

    fn fit(&mut self, _x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>) -> CosmologyResult<()> {
        if y.nrows() == 0 {
            return Err(CosmologyError::input("point engine needs one sample"));
        }
        self.point = Some(y.row(0).to_owned());
        Ok(())
    }

    fn predict(&self, _x: ArrayView1<'_, f64>) -> CosmologyResult<Array1<f64>> {
        self.point.clone().ok_or_else(|| not_fitted("point"))
    }

    fn state(&self) -> CosmologyResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn boxed_clone(&self) -> Box<dyn EngineBackend> {
        Box::new(self.clone())
    }
}

// ─── Taylor ────────────────────────────────────────────────────────────────

/// Polynomial engine settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaylorConfig {
    /// Maximum total degree of the monomials.
    pub order: usize,
}

impl Default for TaylorConfig {
    fn default() -> Self {
        Self { order: 3 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct TaylorFit {
    centre: Array1<f64>,
    scale: Array1<f64>,
    /// One exponent vector per monomial.
    exponents: Vec<Vec<u32>>,
    /// (monomials, outputs).
    coefficients: Array2<f64>,
}

/// Least-squares polynomial in the centred and scaled inputs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaylorEngine {
    config: TaylorConfig,
    fit: Option<TaylorFit>,
}

impl TaylorEngine {
    /// Engine with `config`.
    pub fn new(config: TaylorConfig) -> Self {
        Self { config, fit: None }
    }

    /// Exponent vectors of every monomial of total degree ≤ `order` in `ndim` variables.
    fn exponents(ndim: usize, order: usize) -> Vec<Vec<u32>> {
        fn walk(prefix: &mut Vec<u32>, ndim: usize, left: u32, out: &mut Vec<Vec<u32>>) {
            if prefix.len() == ndim {
                out.push(prefix.clone());
                return;
            }
            for e in 0..=left {
                prefix.push(e);
                walk(prefix, ndim, left - e, out);
                prefix.pop();
            }
        }
        let mut out = Vec::new();
        walk(&mut Vec::with_capacity(ndim), ndim, order as u32, &mut out);
        out
    }

    fn monomials(u: &[f64], exponents: &[Vec<u32>]) -> Array1<f64> {
        exponents
            .iter()
            .map(|e| u.iter().zip(e).map(|(x, p)| x.powi(*p as i32)).product::<f64>())
            .collect()
    }
}

impl EngineBackend for TaylorEngine {
    fn name(&self) -> &'static str {
        "taylor"
    }

    fn default_samples(
        &self,
        calculator: &dyn Calculator,
        limits: &ParamLimits,
        comm: &dyn Communicator,
    ) -> CosmologyResult<Option<Samples>> {
        GridSampler::new(limits.clone(), self.config.order + 1).run(calculator, comm)
    }

    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>) -> CosmologyResult<()> {
        let (n, ndim) = x.dim();
        let lo = x.fold_axis(Axis(0), f64::INFINITY, |a, b| a.min(*b));
        let hi = x.fold_axis(Axis(0), f64::NEG_INFINITY, |a, b| a.max(*b));
        let centre = (&lo + &hi) / 2.0;
        let scale = ((&hi - &lo) / 2.0).mapv(|s| if s > 0.0 { s } else { 1.0 });
        let exponents = Self::exponents(ndim, self.config.order);
        if n < exponents.len() {
            warn!(samples = n, monomials = exponents.len(), "Taylor fit is underdetermined");
        }
        let design = Array2::from_shape_fn((n, exponents.len()), |(i, k)| {
            exponents[k]
                .iter()
                .enumerate()
                .map(|(d, p)| ((x[[i, d]] - centre[d]) / scale[d]).powi(*p as i32))
                .product::<f64>()
        });
        let svd = to_dmatrix(&design.view()).svd(true, true);
        let solution = svd
            .solve(&to_dmatrix(&y), 1e-12)
            .map_err(|reason| CosmologyError::computation(format!("Taylor least squares failed: {reason}")))?;
        let coefficients =
            Array2::from_shape_fn((solution.nrows(), solution.ncols()), |(i, j)| solution[(i, j)]);
        debug!(monomials = exponents.len(), outputs = y.ncols(), "fitted Taylor engine");
        self.fit = Some(TaylorFit {
            centre,
            scale,
            exponents,
            coefficients,
        });
        Ok(())
    }

    fn predict(&self, x: ArrayView1<'_, f64>) -> CosmologyResult<Array1<f64>> {
        let fit = self.fit.as_ref().ok_or_else(|| not_fitted("taylor"))?;
        if x.len() != fit.centre.len() {
            return Err(CosmologyError::input(format!(
                "taylor engine fitted on {} inputs, got {}",
                fit.centre.len(),
                x.len()
            )));
        }
        let u: Vec<f64> = x
            .iter()
            .zip(fit.centre.iter().zip(fit.scale.iter()))
            .map(|(x, (c, s))| (x - c) / s)
            .collect();
        Ok(Self::monomials(&u, &fit.exponents).dot(&fit.coefficients))
    }

    fn state(&self) -> CosmologyResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn boxed_clone(&self) -> Box<dyn EngineBackend> {
        Box::new(self.clone())
    }
}

// ─── MLP ───────────────────────────────────────────────────────────────────

/// Perceptron settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MlpConfig {
    /// Width of each hidden layer.
    pub hidden: Vec<usize>,
    /// Full-batch Adam steps.
    pub epochs: usize,
    /// Adam step size.
    pub learning_rate: f64,
    /// Seed of the weight initialisation.
    pub seed: u64,
    /// Size of the default Halton sample.
    pub nsamples: usize,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden: vec![32, 32],
            epochs: 2000,
            learning_rate: 1e-2,
            seed: 42,
            nsamples: 100,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Layer {
    /// (inputs, outputs).
    weights: Array2<f64>,
    bias: Array1<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct MlpFit {
    x_mean: Array1<f64>,
    x_sigma: Array1<f64>,
    y_mean: Array1<f64>,
    y_sigma: Array1<f64>,
    layers: Vec<Layer>,
}

impl MlpFit {
    /// Activations of every layer; the last is the linear output.
    fn forward(layers: &[Layer], x: Array2<f64>) -> Vec<Array2<f64>> {
        let mut activations = vec![x];
        for (l, layer) in layers.iter().enumerate() {
            let mut z = activations[l].dot(&layer.weights) + &layer.bias;
            if l + 1 < layers.len() {
                z.mapv_inplace(f64::tanh);
            }
            activations.push(z);
        }
        activations
    }
}

/// Adam moments for one layer.
struct Moments {
    mw: Array2<f64>,
    vw: Array2<f64>,
    mb: Array1<f64>,
    vb: Array1<f64>,
}

/// Tanh perceptron on standardised inputs and outputs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MlpEngine {
    config: MlpConfig,
    fit: Option<MlpFit>,
}

impl MlpEngine {
    /// Engine with `config`.
    pub fn new(config: MlpConfig) -> Self {
        Self { config, fit: None }
    }

    fn standardise(a: &ArrayView2<'_, f64>) -> (Array1<f64>, Array1<f64>) {
        let mean = a.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(a.ncols()));
        let sigma = if a.nrows() > 1 {
            a.std_axis(Axis(0), 1.0)
        } else {
            Array1::ones(a.ncols())
        };
        let sigma = sigma.mapv(|s| if s > 0.0 && s.is_finite() { s } else { 1.0 });
        (mean, sigma)
    }
}

impl EngineBackend for MlpEngine {
    fn name(&self) -> &'static str {
        "mlp"
    }

    fn default_samples(
        &self,
        calculator: &dyn Calculator,
        limits: &ParamLimits,
        comm: &dyn Communicator,
    ) -> CosmologyResult<Option<Samples>> {
        QmcSampler::new(limits.clone(), self.config.nsamples)
            .with_seed(self.config.seed)
            .run(calculator, comm)
    }

    fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>) -> CosmologyResult<()> {
        let n = x.nrows();
        if n == 0 {
            return Err(CosmologyError::input("mlp engine needs samples"));
        }
        let (x_mean, x_sigma) = Self::standardise(&x);
        let (y_mean, y_sigma) = Self::standardise(&y);
        let xn = (&x - &x_mean) / &x_sigma;
        let yn = (&y - &y_mean) / &y_sigma;

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut widths = vec![x.ncols()];
        widths.extend(&self.config.hidden);
        widths.push(y.ncols());
        let mut layers: Vec<Layer> = widths
            .windows(2)
            .map(|w| {
                let limit = (6.0 / (w[0] + w[1]) as f64).sqrt();
                Layer {
                    weights: Array2::from_shape_fn((w[0], w[1]), |_| rng.gen_range(-limit..limit)),
                    bias: Array1::zeros(w[1]),
                }
            })
            .collect();
        let mut moments: Vec<Moments> = layers
            .iter()
            .map(|layer| Moments {
                mw: Array2::zeros(layer.weights.raw_dim()),
                vw: Array2::zeros(layer.weights.raw_dim()),
                mb: Array1::zeros(layer.bias.raw_dim()),
                vb: Array1::zeros(layer.bias.raw_dim()),
            })
            .collect();

        let (beta1, beta2, eps): (f64, f64, f64) = (0.9, 0.999, 1e-8);
        let lr = self.config.learning_rate;
        let mut loss = f64::NAN;
        for epoch in 1..=self.config.epochs {
            let activations = MlpFit::forward(&layers, xn.clone());
            let residual = &activations[layers.len()] - &yn;
            loss = residual.mapv(|r| r * r).mean().unwrap_or(f64::NAN);
            let mut delta = residual / n as f64;
            let t = epoch as i32;
            for l in (0..layers.len()).rev() {
                let grad_w = activations[l].t().dot(&delta);
                let grad_b = delta.sum_axis(Axis(0));
                if l > 0 {
                    let back = delta.dot(&layers[l].weights.t());
                    delta = back * activations[l].mapv(|a| 1.0 - a * a);
                }
                let m = &mut moments[l];
                m.mw = &m.mw * beta1 + &grad_w * (1.0 - beta1);
                m.vw = &m.vw * beta2 + &grad_w.mapv(|g| g * g) * (1.0 - beta2);
                m.mb = &m.mb * beta1 + &grad_b * (1.0 - beta1);
                m.vb = &m.vb * beta2 + &grad_b.mapv(|g| g * g) * (1.0 - beta2);
                let (c1, c2) = (1.0 - beta1.powi(t), 1.0 - beta2.powi(t));
                let layer = &mut layers[l];
                ndarray::Zip::from(&mut layer.weights)
                    .and(&m.mw)
                    .and(&m.vw)
                    .for_each(|w, mw, vw| *w -= lr * (mw / c1) / ((vw / c2).sqrt() + eps));
                ndarray::Zip::from(&mut layer.bias)
                    .and(&m.mb)
                    .and(&m.vb)
                    .for_each(|b, mb, vb| *b -= lr * (mb / c1) / ((vb / c2).sqrt() + eps));
            }
        }
        if !loss.is_finite() && self.config.epochs > 0 {
            return Err(CosmologyError::computation("mlp training diverged"));
        }
        debug!(loss, epochs = self.config.epochs, "trained mlp engine");
        self.fit = Some(MlpFit {
            x_mean,
            x_sigma,
            y_mean,
            y_sigma,
            layers,
        });
        Ok(())
    }

    fn predict(&self, x: ArrayView1<'_, f64>) -> CosmologyResult<Array1<f64>> {
        let fit = self.fit.as_ref().ok_or_else(|| not_fitted("mlp"))?;
        if x.len() != fit.x_mean.len() {
            return Err(CosmologyError::input(format!(
                "mlp engine fitted on {} inputs, got {}",
                fit.x_mean.len(),
                x.len()
            )));
        }
        let xn = ((&x - &fit.x_mean) / &fit.x_sigma).insert_axis(Axis(0));
        let mut activations = MlpFit::forward(&fit.layers, xn);
        let out = activations
            .pop()
            .map(|a| a.row(0).to_owned())
            .ok_or_else(|| CosmologyError::computation("mlp has no layers"))?;
        Ok(out * &fit.y_sigma + &fit.y_mean)
    }

    fn state(&self) -> CosmologyResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn boxed_clone(&self) -> Box<dyn EngineBackend> {
        Box::new(self.clone())
    }
}

// ─── Registry ──────────────────────────────────────────────────────────────

type BackendFactory = fn() -> Box<dyn EngineBackend>;
type BackendLoader = fn(serde_json::Value) -> CosmologyResult<Box<dyn EngineBackend>>;

fn new_backend<T: EngineBackend + Default + 'static>() -> Box<dyn EngineBackend> {
    Box::new(T::default())
}

fn load_backend<T: EngineBackend + DeserializeOwned + 'static>(
    value: serde_json::Value,
) -> CosmologyResult<Box<dyn EngineBackend>> {
    Ok(Box::new(serde_json::from_value::<T>(value)?))
}

static ENGINES: [(&str, BackendFactory, BackendLoader); 3] = [
    ("point", new_backend::<PointEngine>, load_backend::<PointEngine>),
    ("taylor", new_backend::<TaylorEngine>, load_backend::<TaylorEngine>),
    ("mlp", new_backend::<MlpEngine>, load_backend::<MlpEngine>),
];

fn lookup(name: &str) -> CosmologyResult<&'static (&'static str, BackendFactory, BackendLoader)> {
    let lower = name.to_ascii_lowercase();
    ENGINES
        .iter()
        .find(|(known, _, _)| *known == lower)
        .ok_or_else(|| CosmologyError::input(format!("unknown emulator engine '{name}'")))
}

/// Engine with the default settings of the backend registered as `name`.
pub fn engine_from_name(name: &str) -> CosmologyResult<EmulatorEngine> {
    let (_, factory, _) = lookup(name)?;
    Ok(EmulatorEngine::from_boxed(factory()))
}

// ─── EmulatorEngine ────────────────────────────────────────────────────────

/// A backend plus its parameter order, operations and shapes.
#[derive(Clone, Debug)]
pub struct EmulatorEngine {
    backend: Box<dyn EngineBackend>,
    params: Vec<String>,
    xoperations: Vec<Box<dyn Operation>>,
    yoperations: Vec<Box<dyn Operation>>,
    xshape: Vec<usize>,
    yshape: Vec<usize>,
    attrs: BTreeMap<String, serde_json::Value>,
    fitted: bool,
}

impl EmulatorEngine {
    /// Wrap `backend`.
    pub fn new(backend: impl EngineBackend + 'static) -> Self {
        Self::from_boxed(Box::new(backend))
    }

    /// Wrap a boxed backend.
    pub fn from_boxed(backend: Box<dyn EngineBackend>) -> Self {
        Self {
            backend,
            params: Vec::new(),
            xoperations: Vec::new(),
            yoperations: Vec::new(),
            xshape: Vec::new(),
            yshape: Vec::new(),
            attrs: BTreeMap::new(),
            fitted: false,
        }
    }

    /// Append an operation on the parameter vector.
    pub fn with_xoperation(mut self, operation: impl Operation + 'static) -> Self {
        self.xoperations.push(Box::new(operation));
        self
    }

    /// Append an operation on the output.
    pub fn with_yoperation(mut self, operation: impl Operation + 'static) -> Self {
        self.yoperations.push(Box::new(operation));
        self
    }

    /// Backend registry name.
    pub fn name(&self) -> &'static str {
        self.backend.name()
    }

    /// Input parameter order.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Per-sample output shape, known after fit.
    pub fn yshape(&self) -> &[usize] {
        &self.yshape
    }

    /// Whether [`Self::fit`] has completed.
    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    /// Record the input parameter order.
    pub fn initialize(&mut self, params: Vec<String>) {
        self.params = params;
    }

    /// Delegate to the backend.
    pub fn default_samples(
        &self,
        calculator: &dyn Calculator,
        limits: &ParamLimits,
        comm: &dyn Communicator,
    ) -> CosmologyResult<Option<Samples>> {
        self.backend.default_samples(calculator, limits, comm)
    }

    fn fit_local(
        &mut self,
        x: Array2<f64>,
        y: ArrayD<f64>,
        attrs: BTreeMap<String, serde_json::Value>,
    ) -> CosmologyResult<EngineState> {
        let n = x.nrows();
        if y.ndim() == 0 || y.len_of(Axis(0)) != n {
            return Err(CosmologyError::input(format!(
                "{n} input rows for output of shape {:?}",
                y.shape()
            )));
        }
        let mut y = y;
        for operation in &mut self.yoperations {
            operation.initialize(y.view())?;
            y = map_samples(y.view(), |row| operation.direct(row))?;
        }
        let mut x = x.into_dyn();
        for operation in &mut self.xoperations {
            operation.initialize(x.view())?;
            x = map_samples(x.view(), |row| operation.direct(row))?;
        }
        self.xshape = x.shape()[1..].to_vec();
        self.yshape = y.shape()[1..].to_vec();
        let xflat = x.as_standard_layout().into_owned().into_shape((n, self.xshape.iter().product::<usize>()))?;
        let yflat = y.as_standard_layout().into_owned().into_shape((n, self.yshape.iter().product::<usize>()))?;
        self.backend.fit(xflat.view(), yflat.view())?;
        self.attrs = attrs;
        self.fitted = true;
        self.state()
    }

    /// Fit on rank 0 (which alone passes `x` and `y`), then share the
    /// fitted state so every rank ends up with the same engine.
    pub fn fit(
        &mut self,
        x: Option<Array2<f64>>,
        y: Option<ArrayD<f64>>,
        attrs: BTreeMap<String, serde_json::Value>,
        comm: &dyn Communicator,
    ) -> CosmologyResult<()> {
        let local = (comm.rank() == 0).then(|| match (x, y) {
            (Some(x), Some(y)) => self.fit_local(x, y, attrs),
            _ => Err(CosmologyError::computation("rank 0 holds no training data")),
        });
        let state = share(comm, local, 0)?;
        if comm.rank() != 0 {
            *self = Self::from_state(&state)?;
        }
        Ok(())
    }

    /// Predict the output at `params` (must hold every engine parameter).
    pub fn predict(&self, params: &Params) -> CosmologyResult<ArrayD<f64>> {
        if !self.fitted {
            return Err(not_fitted(self.name()));
        }
        let row = self
            .params
            .iter()
            .map(|name| {
                params
                    .get(name)
                    .copied()
                    .ok_or_else(|| CosmologyError::input(format!("missing parameter '{name}'")))
            })
            .collect::<CosmologyResult<Array1<f64>>>()?;
        let mut x = row.into_dyn();
        for operation in &self.xoperations {
            x = operation.direct(x.view())?;
        }
        let flat = Array1::from_iter(x.iter().copied());
        let mut y = self.backend.predict(flat.view())?.into_shape(IxDyn(&self.yshape))?;
        for operation in self.yoperations.iter().rev() {
            y = operation.inverse(y.view())?;
        }
        Ok(y)
    }

    /// Snapshot.
    pub fn state(&self) -> CosmologyResult<EngineState> {
        Ok(EngineState {
            name: self.name().to_string(),
            params: self.params.clone(),
            xshape: self.xshape.clone(),
            yshape: self.yshape.clone(),
            xoperations: self.xoperations.iter().map(|op| op.state()).collect(),
            yoperations: self.yoperations.iter().map(|op| op.state()).collect(),
            attrs: self.attrs.clone(),
            backend: self.backend.state()?,
            fitted: self.fitted,
        })
    }

    /// Rebuild from [`Self::state`], dispatching on `state.name`.
    pub fn from_state(state: &EngineState) -> CosmologyResult<Self> {
        let (_, _, load) = lookup(&state.name)?;
        let ops = |states: &[OperationState]| {
            states
                .iter()
                .map(operation_from_state)
                .collect::<CosmologyResult<Vec<_>>>()
        };
        Ok(Self {
            backend: load(state.backend.clone())?,
            params: state.params.clone(),
            xoperations: ops(&state.xoperations)?,
            yoperations: ops(&state.yoperations)?,
            xshape: state.xshape.clone(),
            yshape: state.yshape.clone(),
            attrs: state.attrs.clone(),
            fitted: state.fitted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::operation::Log10Operation;
    use crate::emulator::SingleProcess;
    use ndarray::{arr1, Array};

    fn params(a: f64, b: f64) -> Params {
        [("a".to_string(), a), ("b".to_string(), b)].into_iter().collect()
    }

    fn design(points: &[(f64, f64)]) -> Array2<f64> {
        Array2::from_shape_fn((points.len(), 2), |(i, j)| if j == 0 { points[i].0 } else { points[i].1 })
    }

    fn grid() -> Vec<(f64, f64)> {
        let mut points = Vec::new();
        for i in 0..4 {
            for j in 0..4 {
                points.push((i as f64 / 3.0, -1.0 + 2.0 * j as f64 / 3.0));
            }
        }
        points
    }

    #[test]
    fn test_taylor_monomial_count() {
        assert_eq!(TaylorEngine::exponents(2, 3).len(), 10);
        assert_eq!(TaylorEngine::exponents(3, 2).len(), 10);
        assert_eq!(TaylorEngine::exponents(1, 0), vec![vec![0]]);
    }

    #[test]
    fn test_taylor_reproduces_cubic() {
        let points = grid();
        let x = design(&points);
        let y = Array::from_shape_fn((points.len(), 2), |(i, j)| {
            let (a, b) = points[i];
            if j == 0 { 1.0 + a * a * b - b * b * b } else { 3.0 * a }
        });
        let mut engine = EmulatorEngine::new(TaylorEngine::default());
        engine.initialize(vec!["a".into(), "b".into()]);
        engine.fit(Some(x), Some(y.into_dyn()), BTreeMap::new(), &SingleProcess).unwrap();
        let out = engine.predict(&params(0.4, 0.3)).unwrap();
        let expected = 1.0 + 0.16 * 0.3 - 0.027;
        assert!((out[[0]] - expected).abs() < 1e-10, "out={}", out[[0]]);
        assert!((out[[1]] - 1.2).abs() < 1e-10, "out={}", out[[1]]);
    }

    #[test]
    fn test_point_engine_and_state_round_trip() {
        let mut engine = engine_from_name("POINT").unwrap();
        engine.initialize(vec!["a".into()]);
        assert!(engine.predict(&params(0.0, 0.0)).unwrap_err().is_input());
        let x = Array2::zeros((2, 1));
        let y = ndarray::arr3(&[[[1.0, 2.0]], [[3.0, 4.0]]]).into_dyn();
        engine.fit(Some(x), Some(y), BTreeMap::new(), &SingleProcess).unwrap();
        let out = engine.predict(&params(5.0, 0.0)).unwrap();
        assert_eq!(out, ndarray::arr2(&[[1.0, 2.0]]).into_dyn());

        let json = serde_json::to_string(&engine.state().unwrap()).unwrap();
        let restored = EmulatorEngine::from_state(&serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(restored.predict(&params(5.0, 0.0)).unwrap(), out);
        assert!(restored.predict(&Params::new()).is_err());
    }

    #[test]
    fn test_engine_level_yoperation_is_inverted() {
        let points = grid();
        let x = design(&points);
        let y = Array::from_shape_fn((points.len(), 1), |(i, _)| 10f64.powf(1.0 + points[i].0));
        let mut engine = EmulatorEngine::new(TaylorEngine::new(TaylorConfig { order: 1 }))
            .with_yoperation(Log10Operation);
        engine.initialize(vec!["a".into(), "b".into()]);
        engine.fit(Some(x), Some(y.into_dyn()), BTreeMap::new(), &SingleProcess).unwrap();
        let out = engine.predict(&params(0.5, 0.0)).unwrap();
        assert!((out[[0]] / 10f64.powf(1.5) - 1.0).abs() < 1e-10, "out={}", out[[0]]);
    }

    #[test]
    fn test_mlp_learns_linear_map() {
        let xs: Vec<f64> = (0..30).map(|i| i as f64 / 29.0).collect();
        let x = Array2::from_shape_fn((30, 1), |(i, _)| xs[i]);
        let y = Array2::from_shape_fn((30, 2), |(i, j)| if j == 0 { 2.0 * xs[i] } else { -xs[i] });
        let mut backend = MlpEngine::new(MlpConfig {
            hidden: vec![16],
            epochs: 1500,
            ..MlpConfig::default()
        });
        backend.fit(x.view(), y.view()).unwrap();
        let out = backend.predict(arr1(&[0.5]).view()).unwrap();
        assert!((out[0] - 1.0).abs() < 0.1, "out={}", out[0]);
        assert!((out[1] + 0.5).abs() < 0.1, "out={}", out[1]);
        let restored = load_backend::<MlpEngine>(backend.state().unwrap()).unwrap();
        let again = restored.predict(arr1(&[0.5]).view()).unwrap();
        assert!((again[0] - out[0]).abs() < 1e-10, "again={}", again[0]);
    }

    #[test]
    fn test_unknown_engine() {
        assert!(engine_from_name("gp").unwrap_err().is_input());
    }
}
