//! Invertible transforms for the emulator preprocessing pipeline.
//!
//! An [`Operation`] acts on one sample at a time. Operations with calibrated
//! constants learn them once, in [`Operation::initialize`], from a batch whose
//! leading axis runs over samples. [`KeyedOperation`] lifts an operation to
//! name → array maps, keeping one calibrated copy per matched name.
//!
//! | Name | Forward | Calibrated from the batch |
//! |---|---|---|
//! | `log10` | log₁₀ v | nothing |
//! | `arcsinh` | asinh v | nothing |
//! | `scale` | (v − lo) / (hi − lo) | per-element min / max |
//! | `norm` | (v − μ) / σ | per-element mean / std (ddof = 1) |
//! | `pca` | projection on the leading principal components | mean, std, eigenvectors |
//! | `chebyshev` | projection on T₀..T_order along one axis | basis and its pseudo-inverse |
//!
//! # Invariants
//!
//! - **Round trip**: `inverse(direct(v)) == v` up to rounding for `log10`,
//!   `arcsinh`, `scale`, `norm`, and for `pca` with as many components as
//!   elements; `chebyshev` and truncated `pca` return the projection of `v`.
//! - **Degenerate spread**: equal scale limits map to (0, 1) and a zero or
//!   undefined standard deviation becomes 1, so nothing divides by zero.

use std::collections::BTreeMap;
use std::fmt;

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, ArrayD, ArrayViewD, Axis, IxDyn, Zip};
use thiserror::Error;
use tracing::warn;

use crate::emulator::state::{KeyedOperationState, OperationState};
use crate::emulator::{is_pattern, matches, Outputs};
use crate::error::{CosmologyError, CosmologyResult};
use crate::numeric::linspace;

/// Invertible per-sample transform.
pub trait Operation: fmt::Debug + Send + Sync {
    /// Registry name.
    fn name(&self) -> &'static str;

    /// Calibrate constants from a batch (leading axis = samples).
    fn initialize(&mut self, _batch: ArrayViewD<'_, f64>) -> CosmologyResult<()> {
        Ok(())
    }

    /// Forward transform of one sample.
    fn direct(&self, v: ArrayViewD<'_, f64>) -> CosmologyResult<ArrayD<f64>>;

    /// Inverse transform of one sample.
    fn inverse(&self, v: ArrayViewD<'_, f64>) -> CosmologyResult<ArrayD<f64>>;

    /// Snapshot, including calibrated constants.
    fn state(&self) -> OperationState;

    /// Clone behind a box.
    fn boxed_clone(&self) -> Box<dyn Operation>;
}

impl Clone for Box<dyn Operation> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

/// Apply `f` to every sample of `batch` and restack along the leading axis.
pub fn map_samples<F>(batch: ArrayViewD<'_, f64>, f: F) -> CosmologyResult<ArrayD<f64>>
where
    F: Fn(ArrayViewD<'_, f64>) -> CosmologyResult<ArrayD<f64>>,
{
    if batch.ndim() == 0 || batch.len_of(Axis(0)) == 0 {
        return Err(CosmologyError::input("empty batch"));
    }
    let rows = batch
        .axis_iter(Axis(0))
        .map(f)
        .collect::<CosmologyResult<Vec<_>>>()?;
    let views: Vec<_> = rows.iter().map(|r| r.view()).collect();
    Ok(ndarray::stack(Axis(0), &views)?)
}

// ─── Helpers ───────────────────────────────────────────────────────────────

fn describe(name: &str, direct: &str, inverse: &str) -> OperationState {
    OperationState {
        name: name.to_string(),
        direct: direct.to_string(),
        inverse: Some(inverse.to_string()),
        locals: BTreeMap::new(),
        settings: BTreeMap::new(),
    }
}

fn not_initialized(name: &str) -> CosmologyError {
    CosmologyError::input(format!("operation '{name}' used before initialize"))
}

fn check_shape(name: &str, v: &ArrayViewD<'_, f64>, expected: &[usize]) -> CosmologyResult<()> {
    if v.shape() != expected {
        return Err(CosmologyError::input(format!(
            "operation '{name}' calibrated on shape {expected:?}, got {:?}",
            v.shape()
        )));
    }
    Ok(())
}

/// Samples count and per-sample shape of a calibration batch.
fn batch_layout(name: &str, batch: &ArrayViewD<'_, f64>) -> CosmologyResult<(usize, Vec<usize>)> {
    if batch.ndim() == 0 || batch.len_of(Axis(0)) == 0 {
        return Err(CosmologyError::input(format!(
            "operation '{name}' needs a non-empty batch"
        )));
    }
    Ok((batch.len_of(Axis(0)), batch.shape()[1..].to_vec()))
}

/// Mean and ddof = 1 standard deviation along the leading axis; degenerate
/// deviations become 1.
fn mean_sigma(batch: &ArrayViewD<'_, f64>) -> CosmologyResult<(ArrayD<f64>, ArrayD<f64>)> {
    let n = batch.len_of(Axis(0));
    let mean = batch
        .mean_axis(Axis(0))
        .ok_or_else(|| CosmologyError::input("mean of an empty batch"))?;
    let mut sigma = if n > 1 {
        batch.std_axis(Axis(0), 1.0)
    } else {
        ArrayD::ones(mean.raw_dim())
    };
    sigma.mapv_inplace(|s| if s == 0.0 || !s.is_finite() { 1.0 } else { s });
    Ok((mean, sigma))
}

fn local<'a>(state: &'a OperationState, key: &str) -> Option<&'a ArrayD<f64>> {
    state.locals.get(key)
}

fn setting(state: &OperationState, key: &str) -> Option<f64> {
    state.settings.get(key).copied()
}

fn to_matrix2(a: &ArrayD<f64>, what: &str) -> CosmologyResult<Array2<f64>> {
    a.clone()
        .into_dimensionality()
        .map_err(|err| CosmologyError::input_from(format!("'{what}' must be two-dimensional"), err))
}

fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// out[.., j, ..] = Σᵢ v[.., i, ..] matrix[i, j], contracting `axis`.
fn contract_axis(v: ArrayViewD<'_, f64>, axis: usize, matrix: &Array2<f64>) -> CosmologyResult<ArrayD<f64>> {
    let ndim = v.ndim();
    let (rows, cols) = matrix.dim();
    if axis >= ndim || v.shape()[axis] != rows {
        return Err(CosmologyError::input(format!(
            "cannot contract axis {axis} of shape {:?} with {rows} basis rows",
            v.shape()
        )));
    }
    let mut order: Vec<usize> = (0..ndim).filter(|a| *a != axis).collect();
    order.push(axis);
    let moved = v.permuted_axes(IxDyn(&order));
    let mut moved_shape = moved.shape().to_vec();
    let outer: usize = moved_shape[..ndim - 1].iter().product();
    let flat = moved.as_standard_layout().into_owned().into_shape((outer, rows))?;
    moved_shape[ndim - 1] = cols;
    let out = flat.dot(matrix).into_shape(IxDyn(&moved_shape))?;
    let mut back: Vec<usize> = (0..ndim - 1).collect();
    back.insert(axis, ndim - 1);
    Ok(out.permuted_axes(IxDyn(&back)).as_standard_layout().into_owned())
}

// ─── Log10 / Arcsinh ───────────────────────────────────────────────────────

/// log₁₀ v, inverse 10^v.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Log10Operation;

impl Operation for Log10Operation {
    fn name(&self) -> &'static str {
        "log10"
    }

    fn direct(&self, v: ArrayViewD<'_, f64>) -> CosmologyResult<ArrayD<f64>> {
        Ok(v.mapv(f64::log10))
    }

    fn inverse(&self, v: ArrayViewD<'_, f64>) -> CosmologyResult<ArrayD<f64>> {
        Ok(v.mapv(|x| 10f64.powf(x)))
    }

    fn state(&self) -> OperationState {
        describe("log10", "log10(v)", "10^v")
    }

    fn boxed_clone(&self) -> Box<dyn Operation> {
        Box::new(*self)
    }
}

/// asinh v, inverse sinh v.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ArcsinhOperation;

impl Operation for ArcsinhOperation {
    fn name(&self) -> &'static str {
        "arcsinh"
    }

    fn direct(&self, v: ArrayViewD<'_, f64>) -> CosmologyResult<ArrayD<f64>> {
        Ok(v.mapv(f64::asinh))
    }

    fn inverse(&self, v: ArrayViewD<'_, f64>) -> CosmologyResult<ArrayD<f64>> {
        Ok(v.mapv(f64::sinh))
    }

    fn state(&self) -> OperationState {
        describe("arcsinh", "arcsinh(v)", "sinh(v)")
    }

    fn boxed_clone(&self) -> Box<dyn Operation> {
        Box::new(*self)
    }
}

// ─── Scale ─────────────────────────────────────────────────────────────────

/// Min-max rescaling to [0, 1].
///
/// Limits not given up front are taken per element from the batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScaleOperation {
    given: (Option<f64>, Option<f64>),
    limits: Option<(ArrayD<f64>, ArrayD<f64>)>,
}

impl ScaleOperation {
    /// Limits from the calibration batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed scalar limits.
    pub fn with_limits(lower: f64, upper: f64) -> Self {
        Self {
            given: (Some(lower), Some(upper)),
            limits: None,
        }
    }

    fn limits(&self) -> CosmologyResult<&(ArrayD<f64>, ArrayD<f64>)> {
        self.limits.as_ref().ok_or_else(|| not_initialized("scale"))
    }
}

impl Operation for ScaleOperation {
    fn name(&self) -> &'static str {
        "scale"
    }

    fn initialize(&mut self, batch: ArrayViewD<'_, f64>) -> CosmologyResult<()> {
        let (_, shape) = batch_layout("scale", &batch)?;
        let shape = IxDyn(&shape);
        let mut lower = match self.given.0 {
            Some(lo) => ArrayD::from_elem(shape.clone(), lo),
            None => batch.fold_axis(Axis(0), f64::INFINITY, |a, b| a.min(*b)),
        };
        let mut upper = match self.given.1 {
            Some(hi) => ArrayD::from_elem(shape, hi),
            None => batch.fold_axis(Axis(0), f64::NEG_INFINITY, |a, b| a.max(*b)),
        };
        Zip::from(&mut lower).and(&mut upper).for_each(|lo, hi| {
            if *lo == *hi {
                *lo = 0.0;
                *hi = 1.0;
            }
        });
        self.limits = Some((lower, upper));
        Ok(())
    }

    fn direct(&self, v: ArrayViewD<'_, f64>) -> CosmologyResult<ArrayD<f64>> {
        let (lower, upper) = self.limits()?;
        check_shape("scale", &v, lower.shape())?;
        Ok((&v - lower) / (upper - lower))
    }

    fn inverse(&self, v: ArrayViewD<'_, f64>) -> CosmologyResult<ArrayD<f64>> {
        let (lower, upper) = self.limits()?;
        check_shape("scale", &v, lower.shape())?;
        Ok(&v * &(upper - lower) + lower)
    }

    fn state(&self) -> OperationState {
        let mut state = describe(
            "scale",
            "(v - lower) / (upper - lower)",
            "v * (upper - lower) + lower",
        );
        if let Some((lower, upper)) = &self.limits {
            state.locals.insert("lower".into(), lower.clone());
            state.locals.insert("upper".into(), upper.clone());
        }
        if let Some(lo) = self.given.0 {
            state.settings.insert("lower".into(), lo);
        }
        if let Some(hi) = self.given.1 {
            state.settings.insert("upper".into(), hi);
        }
        state
    }

    fn boxed_clone(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }
}

// ─── Norm ──────────────────────────────────────────────────────────────────

/// Standardisation by the batch mean and standard deviation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NormOperation {
    moments: Option<(ArrayD<f64>, ArrayD<f64>)>,
}

impl NormOperation {
    /// Uncalibrated.
    pub fn new() -> Self {
        Self::default()
    }

    fn moments(&self) -> CosmologyResult<&(ArrayD<f64>, ArrayD<f64>)> {
        self.moments.as_ref().ok_or_else(|| not_initialized("norm"))
    }
}

impl Operation for NormOperation {
    fn name(&self) -> &'static str {
        "norm"
    }

    fn initialize(&mut self, batch: ArrayViewD<'_, f64>) -> CosmologyResult<()> {
        batch_layout("norm", &batch)?;
        self.moments = Some(mean_sigma(&batch)?);
        Ok(())
    }

    fn direct(&self, v: ArrayViewD<'_, f64>) -> CosmologyResult<ArrayD<f64>> {
        let (mean, sigma) = self.moments()?;
        check_shape("norm", &v, mean.shape())?;
        Ok((&v - mean) / sigma)
    }

    fn inverse(&self, v: ArrayViewD<'_, f64>) -> CosmologyResult<ArrayD<f64>> {
        let (mean, sigma) = self.moments()?;
        check_shape("norm", &v, mean.shape())?;
        Ok(&v * sigma + mean)
    }

    fn state(&self) -> OperationState {
        let mut state = describe("norm", "(v - mean) / sigma", "v * sigma + mean");
        if let Some((mean, sigma)) = &self.moments {
            state.locals.insert("mean".into(), mean.clone());
            state.locals.insert("sigma".into(), sigma.clone());
        }
        state
    }

    fn boxed_clone(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }
}

// ─── PCA ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
struct PcaFit {
    /// Per-sample shape.
    mean: ArrayD<f64>,
    sigma: ArrayD<f64>,
    /// (npcs, elements), rows ordered by decreasing variance.
    components: Array2<f64>,
}

/// Projection of standardised samples on their leading principal components.
#[derive(Clone, Debug, PartialEq)]
pub struct PcaOperation {
    npcs: usize,
    fit: Option<PcaFit>,
}

impl PcaOperation {
    /// Keep `npcs` components.
    pub fn new(npcs: usize) -> Self {
        Self { npcs, fit: None }
    }

    fn fit(&self) -> CosmologyResult<&PcaFit> {
        self.fit.as_ref().ok_or_else(|| not_initialized("pca"))
    }
}

impl Operation for PcaOperation {
    fn name(&self) -> &'static str {
        "pca"
    }

    fn initialize(&mut self, batch: ArrayViewD<'_, f64>) -> CosmologyResult<()> {
        let (n, shape) = batch_layout("pca", &batch)?;
        let m: usize = shape.iter().product();
        if self.npcs == 0 || self.npcs > m {
            return Err(CosmologyError::input(format!(
                "pca asks for {} components of {m} elements",
                self.npcs
            )));
        }
        let (mean, sigma) = mean_sigma(&batch)?;
        let flat = batch.as_standard_layout().into_owned().into_shape((n, m))?;
        let mean_flat = Array1::from_iter(mean.iter().copied());
        let sigma_flat = Array1::from_iter(sigma.iter().copied());
        let z = (&flat - &mean_flat) / &sigma_flat;
        let cov = z.t().dot(&z) / (n.saturating_sub(1).max(1) as f64);
        let eigen = SymmetricEigen::new(to_dmatrix(&cov));
        let mut order: Vec<usize> = (0..m).collect();
        order.sort_by(|a, b| eigen.eigenvalues[*b].total_cmp(&eigen.eigenvalues[*a]));
        let mut components = Array2::zeros((self.npcs, m));
        for (row, &index) in order.iter().take(self.npcs).enumerate() {
            let column = eigen.eigenvectors.column(index);
            // Sign convention: largest-magnitude entry positive.
            let pivot = column.iter().copied().fold(0.0f64, |acc, x| if x.abs() > acc.abs() { x } else { acc });
            let sign = if pivot < 0.0 { -1.0 } else { 1.0 };
            for j in 0..m {
                components[[row, j]] = sign * column[j];
            }
        }
        self.fit = Some(PcaFit {
            mean,
            sigma,
            components,
        });
        Ok(())
    }

    fn direct(&self, v: ArrayViewD<'_, f64>) -> CosmologyResult<ArrayD<f64>> {
        let fit = self.fit()?;
        check_shape("pca", &v, fit.mean.shape())?;
        let z = Array1::from_iter(
            v.iter()
                .zip(fit.mean.iter().zip(fit.sigma.iter()))
                .map(|(x, (mu, s))| (x - mu) / s),
        );
        Ok(fit.components.dot(&z).into_dyn())
    }

    fn inverse(&self, v: ArrayViewD<'_, f64>) -> CosmologyResult<ArrayD<f64>> {
        let fit = self.fit()?;
        check_shape("pca", &v, &[fit.components.nrows()])?;
        let coeffs = Array1::from_iter(v.iter().copied());
        let z = fit.components.t().dot(&coeffs);
        let z = z.into_shape(fit.mean.raw_dim())?;
        Ok(z * &fit.sigma + &fit.mean)
    }

    fn state(&self) -> OperationState {
        let mut state = describe("pca", "components . (v - mean) / sigma", "(components^T . v) * sigma + mean");
        state.settings.insert("npcs".into(), self.npcs as f64);
        if let Some(fit) = &self.fit {
            state.locals.insert("mean".into(), fit.mean.clone());
            state.locals.insert("sigma".into(), fit.sigma.clone());
            state.locals.insert("components".into(), fit.components.clone().into_dyn());
        }
        state
    }

    fn boxed_clone(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }
}

// ─── Chebyshev ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
struct ChebyshevFit {
    /// Normalised contraction axis of one sample.
    axis: usize,
    /// (size, order + 1): T_n evaluated on linspace(−1, 1, size).
    poly: Array2<f64>,
    /// poly (polyᵀ poly)⁻¹.
    proj: Array2<f64>,
}

/// Chebyshev coefficients along one axis, least-squares inverse.
///
/// Numerically fragile once `order > size / 2`.
#[derive(Clone, Debug, PartialEq)]
pub struct ChebyshevOperation {
    order: usize,
    axis: isize,
    fit: Option<ChebyshevFit>,
}

impl ChebyshevOperation {
    /// Basis T₀..T_order along `axis` of one sample (negative counts from the end).
    pub fn new(order: usize, axis: isize) -> Self {
        Self {
            order,
            axis,
            fit: None,
        }
    }

    fn fit(&self) -> CosmologyResult<&ChebyshevFit> {
        self.fit.as_ref().ok_or_else(|| not_initialized("chebyshev"))
    }

    fn basis(order: usize, size: usize) -> Array2<f64> {
        let x = linspace(-1.0, 1.0, size);
        let mut poly = Array2::zeros((size, order + 1));
        for (i, &xi) in x.iter().enumerate() {
            let (mut prev, mut cur) = (1.0, xi);
            poly[[i, 0]] = 1.0;
            for n in 1..=order {
                poly[[i, n]] = cur;
                let next = 2.0 * xi * cur - prev;
                prev = cur;
                cur = next;
            }
        }
        poly
    }
}

impl Operation for ChebyshevOperation {
    fn name(&self) -> &'static str {
        "chebyshev"
    }

    fn initialize(&mut self, batch: ArrayViewD<'_, f64>) -> CosmologyResult<()> {
        let (_, shape) = batch_layout("chebyshev", &batch)?;
        let ndim = shape.len() as isize;
        let axis = if self.axis < 0 { self.axis + ndim } else { self.axis };
        if axis < 0 || axis >= ndim {
            return Err(CosmologyError::input(format!(
                "chebyshev axis {} out of range for samples of shape {shape:?}",
                self.axis
            )));
        }
        let axis = axis as usize;
        let size = shape[axis];
        if self.order > size / 2 {
            warn!(order = self.order, size, "Chebyshev order is unstable for this size");
        }
        let poly = Self::basis(self.order, size);
        let gram = to_dmatrix(&poly.t().dot(&poly));
        let inverse = gram
            .try_inverse()
            .ok_or_else(|| CosmologyError::computation("singular Chebyshev basis"))?;
        let proj = poly.dot(&from_dmatrix(&inverse));
        self.fit = Some(ChebyshevFit { axis, poly, proj });
        Ok(())
    }

    fn direct(&self, v: ArrayViewD<'_, f64>) -> CosmologyResult<ArrayD<f64>> {
        let fit = self.fit()?;
        contract_axis(v, fit.axis, &fit.poly)
    }

    fn inverse(&self, v: ArrayViewD<'_, f64>) -> CosmologyResult<ArrayD<f64>> {
        let fit = self.fit()?;
        contract_axis(v, fit.axis, &fit.proj.t().to_owned())
    }

    fn state(&self) -> OperationState {
        let mut state = describe("chebyshev", "sum(v * poly, axis)", "sum(v * proj, axis + 1)");
        state.settings.insert("order".into(), self.order as f64);
        match &self.fit {
            Some(fit) => {
                state.settings.insert("axis".into(), fit.axis as f64);
                state.locals.insert("poly".into(), fit.poly.clone().into_dyn());
                state.locals.insert("proj".into(), fit.proj.clone().into_dyn());
            }
            None => {
                state.settings.insert("axis".into(), self.axis as f64);
            }
        }
        state
    }

    fn boxed_clone(&self) -> Box<dyn Operation> {
        Box::new(self.clone())
    }
}

// ─── Registry ──────────────────────────────────────────────────────────────

type OperationLoader = fn(&OperationState) -> CosmologyResult<Box<dyn Operation>>;

const OPERATIONS: [(&str, OperationLoader); 6] = [
    ("log10", load_log10),
    ("arcsinh", load_arcsinh),
    ("scale", load_scale),
    ("norm", load_norm),
    ("pca", load_pca),
    ("chebyshev", load_chebyshev),
];

fn load_log10(_: &OperationState) -> CosmologyResult<Box<dyn Operation>> {
    Ok(Box::new(Log10Operation))
}

fn load_arcsinh(_: &OperationState) -> CosmologyResult<Box<dyn Operation>> {
    Ok(Box::new(ArcsinhOperation))
}

fn load_scale(state: &OperationState) -> CosmologyResult<Box<dyn Operation>> {
    let limits = match (local(state, "lower"), local(state, "upper")) {
        (Some(lo), Some(hi)) => Some((lo.clone(), hi.clone())),
        _ => None,
    };
    Ok(Box::new(ScaleOperation {
        given: (setting(state, "lower"), setting(state, "upper")),
        limits,
    }))
}

fn load_norm(state: &OperationState) -> CosmologyResult<Box<dyn Operation>> {
    let moments = match (local(state, "mean"), local(state, "sigma")) {
        (Some(mean), Some(sigma)) => Some((mean.clone(), sigma.clone())),
        _ => None,
    };
    Ok(Box::new(NormOperation { moments }))
}

fn load_pca(state: &OperationState) -> CosmologyResult<Box<dyn Operation>> {
    let npcs = setting(state, "npcs").unwrap_or(1.0) as usize;
    let fit = match (local(state, "mean"), local(state, "sigma"), local(state, "components")) {
        (Some(mean), Some(sigma), Some(components)) => Some(PcaFit {
            mean: mean.clone(),
            sigma: sigma.clone(),
            components: to_matrix2(components, "components")?,
        }),
        _ => None,
    };
    Ok(Box::new(PcaOperation { npcs, fit }))
}

fn load_chebyshev(state: &OperationState) -> CosmologyResult<Box<dyn Operation>> {
    let order = setting(state, "order")
        .ok_or_else(|| CosmologyError::input("chebyshev needs an 'order' setting"))?;
    let axis = setting(state, "axis").unwrap_or(-1.0);
    let fit = match (local(state, "poly"), local(state, "proj")) {
        (Some(poly), Some(proj)) => Some(ChebyshevFit {
            axis: axis.max(0.0) as usize,
            poly: to_matrix2(poly, "poly")?,
            proj: to_matrix2(proj, "proj")?,
        }),
        _ => None,
    };
    Ok(Box::new(ChebyshevOperation {
        order: order as usize,
        axis: axis as isize,
        fit,
    }))
}

/// Rebuild an operation from its state, dispatching on `state.name`.
pub fn operation_from_state(state: &OperationState) -> CosmologyResult<Box<dyn Operation>> {
    let name = state.name.to_ascii_lowercase();
    let (_, load) = OPERATIONS
        .iter()
        .find(|(known, _)| *known == name)
        .ok_or_else(|| CosmologyError::input(format!("unknown operation '{}'", state.name)))?;
    load(state)
}

/// Uncalibrated operation with default settings (`pca` keeps one component;
/// `chebyshev` has no default order and is rejected).
pub fn operation_from_name(name: &str) -> CosmologyResult<Box<dyn Operation>> {
    operation_from_state(&OperationState {
        name: name.to_string(),
        direct: String::new(),
        inverse: None,
        locals: BTreeMap::new(),
        settings: BTreeMap::new(),
    })
}

// ─── KeyedOperation ────────────────────────────────────────────────────────

/// A literal key of a [`KeyedOperation`] is absent from the map it is applied to.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("operation key '{key}' not present")]
pub struct MissingKey {
    /// The absent key.
    pub key: String,
}

/// An [`Operation`] applied to every map entry whose name matches one of
/// `keys` (glob patterns; default `*`), calibrated separately per entry.
#[derive(Clone, Debug)]
pub struct KeyedOperation {
    template: Box<dyn Operation>,
    keys: Vec<String>,
    calibrated: BTreeMap<String, Box<dyn Operation>>,
}

impl KeyedOperation {
    /// Apply `operation` to every entry.
    pub fn new(operation: impl Operation + 'static) -> Self {
        Self::from_boxed(Box::new(operation))
    }

    /// Apply a boxed operation to every entry.
    pub fn from_boxed(operation: Box<dyn Operation>) -> Self {
        Self {
            template: operation,
            keys: vec!["*".to_string()],
            calibrated: BTreeMap::new(),
        }
    }

    /// Restrict to names matching `keys`.
    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Registry name of the wrapped operation.
    pub fn name(&self) -> &'static str {
        self.template.name()
    }

    /// Key patterns.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    fn applies_to(&self, name: &str) -> bool {
        self.keys.iter().any(|key| matches(key, name))
    }

    /// Fail with [`MissingKey`] if a literal key is absent from `entries`.
    pub fn check(&self, entries: &Outputs) -> Result<(), MissingKey> {
        match self
            .keys
            .iter()
            .find(|key| !is_pattern(key) && !entries.contains_key(*key))
        {
            Some(key) => Err(MissingKey { key: key.clone() }),
            None => Ok(()),
        }
    }

    /// Entry names with a calibrated copy.
    pub fn calibrated_names(&self) -> impl Iterator<Item = &str> {
        self.calibrated.keys().map(String::as_str)
    }

    /// Drop the calibrated copies whose entry name fails `keep`.
    pub(crate) fn retain_calibrated(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.calibrated.retain(|name, _| keep(name));
    }

    /// Calibrate one copy per matching entry of `batch`.
    pub fn initialize(&mut self, batch: &Outputs) -> CosmologyResult<()> {
        let matching: Vec<(&String, &ArrayD<f64>)> =
            batch.iter().filter(|(name, _)| self.applies_to(name)).collect();
        for (name, column) in matching {
            let mut operation = self.template.clone();
            operation.initialize(column.view())?;
            self.calibrated.insert(name.clone(), operation);
        }
        Ok(())
    }

    fn apply<F>(&self, sample: &Outputs, f: F) -> CosmologyResult<Outputs>
    where
        F: Fn(&dyn Operation, ArrayViewD<'_, f64>) -> CosmologyResult<ArrayD<f64>>,
    {
        sample
            .iter()
            .map(|(name, value)| {
                // Entries absent at calibration pass through unchanged.
                match self.calibrated.get(name) {
                    Some(operation) if self.applies_to(name) => {
                        Ok((name.clone(), f(operation.as_ref(), value.view())?))
                    }
                    _ => Ok((name.clone(), value.clone())),
                }
            })
            .collect()
    }

    /// Forward transform of one sample.
    pub fn direct(&self, sample: &Outputs) -> CosmologyResult<Outputs> {
        self.apply(sample, |op, v| op.direct(v))
    }

    /// Inverse transform of one sample.
    pub fn inverse(&self, sample: &Outputs) -> CosmologyResult<Outputs> {
        self.apply(sample, |op, v| op.inverse(v))
    }

    /// Forward transform of every sample of a batch.
    pub fn direct_batch(&self, batch: &Outputs) -> CosmologyResult<Outputs> {
        self.apply(batch, |op, v| map_samples(v, |row| op.direct(row)))
    }

    /// Snapshot.
    pub fn state(&self) -> KeyedOperationState {
        KeyedOperationState {
            operation: self.template.state(),
            keys: self.keys.clone(),
            calibrated: self
                .calibrated
                .iter()
                .map(|(name, op)| (name.clone(), op.state()))
                .collect(),
        }
    }

    /// Rebuild from [`Self::state`].
    pub fn from_state(state: &KeyedOperationState) -> CosmologyResult<Self> {
        Ok(Self {
            template: operation_from_state(&state.operation)?,
            keys: state.keys.clone(),
            calibrated: state
                .calibrated
                .iter()
                .map(|(name, op)| Ok((name.clone(), operation_from_state(op)?)))
                .collect::<CosmologyResult<_>>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, arr2, Array};

    fn assert_close(a: &ArrayD<f64>, b: &ArrayD<f64>, tol: f64) {
        assert_eq!(a.shape(), b.shape());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() <= tol * (1.0 + y.abs()), "x={} y={}", x, y);
        }
    }

    fn round_trip(op: &dyn Operation, batch: &ArrayD<f64>, tol: f64) {
        for row in batch.axis_iter(Axis(0)) {
            let back = op.inverse(op.direct(row.view()).unwrap().view()).unwrap();
            assert_close(&back, &row.to_owned(), tol);
        }
    }

    #[test]
    fn test_log10_and_arcsinh_round_trip() {
        let batch = arr2(&[[1e-3, 2.0], [10.0, 5e4]]).into_dyn();
        round_trip(&Log10Operation, &batch, 1e-12);
        round_trip(&ArcsinhOperation, &(-&batch), 1e-12);
        let out = Log10Operation.direct(arr1(&[100.0]).into_dyn().view()).unwrap();
        assert_relative_eq!(out[[0]], 2.0);
    }

    #[test]
    fn test_scale_maps_batch_limits_to_unit_interval() {
        let batch = arr2(&[[0.0, 3.0, 7.0], [1.0, 5.0, 7.0], [0.5, 4.0, 7.0]]).into_dyn();
        let mut op = ScaleOperation::new();
        op.initialize(batch.view()).unwrap();
        let first = op.direct(batch.index_axis(Axis(0), 0)).unwrap();
        let second = op.direct(batch.index_axis(Axis(0), 1)).unwrap();
        assert_eq!(first, arr1(&[0.0, 0.0, 7.0]).into_dyn());
        assert_eq!(second, arr1(&[1.0, 1.0, 7.0]).into_dyn());
        round_trip(&op, &batch, 1e-14);
        assert!(op.direct(arr1(&[1.0]).into_dyn().view()).unwrap_err().is_input());
    }

    #[test]
    fn test_scale_with_fixed_limits() {
        let batch = arr1(&[2.0, 4.0]).into_dyn();
        let mut op = ScaleOperation::with_limits(0.0, 10.0);
        op.initialize(batch.view()).unwrap();
        let v = op.direct(ndarray::arr0(5.0).into_dyn().view()).unwrap();
        assert_relative_eq!(v[[]], 0.5);
    }

    #[test]
    fn test_uncalibrated_use_is_input_error() {
        let v = arr1(&[1.0]).into_dyn();
        assert!(ScaleOperation::new().direct(v.view()).unwrap_err().is_input());
        assert!(NormOperation::new().inverse(v.view()).unwrap_err().is_input());
        assert!(PcaOperation::new(1).direct(v.view()).unwrap_err().is_input());
    }

    #[test]
    fn test_norm_uses_unbiased_std() {
        let batch = arr2(&[[1.0, 5.0], [3.0, 5.0]]).into_dyn();
        let mut op = NormOperation::new();
        op.initialize(batch.view()).unwrap();
        let z = op.direct(batch.index_axis(Axis(0), 0)).unwrap();
        // mean 2, std sqrt(2); the constant column keeps sigma = 1.
        assert_relative_eq!(z[[0]], -1.0 / 2f64.sqrt(), epsilon = 1e-14);
        assert_relative_eq!(z[[1]], 0.0);
        round_trip(&op, &batch, 1e-14);
    }

    #[test]
    fn test_pca_full_rank_round_trip_and_truncation() {
        let batch = Array::from_shape_fn((20, 3), |(i, j)| {
            let t = i as f64 / 19.0;
            [t, 2.0 * t + 0.1 * (7.0 * t).sin(), (3.0 * t).cos()][j]
        })
        .into_dyn();
        let mut full = PcaOperation::new(3);
        full.initialize(batch.view()).unwrap();
        round_trip(&full, &batch, 1e-10);

        let mut one = PcaOperation::new(1);
        one.initialize(batch.view()).unwrap();
        let coeffs = one.direct(batch.index_axis(Axis(0), 4)).unwrap();
        assert_eq!(coeffs.shape(), &[1]);
        assert_eq!(one.inverse(coeffs.view()).unwrap().shape(), &[3]);
        assert!(PcaOperation::new(4).initialize(batch.view()).unwrap_err().is_input());
    }

    #[test]
    fn test_pca_state_restores_projection() {
        let batch = Array::from_shape_fn((10, 4), |(i, j)| ((i * 3 + j * 7) % 11) as f64).into_dyn();
        let mut op = PcaOperation::new(2);
        op.initialize(batch.view()).unwrap();
        let restored = operation_from_state(&op.state()).unwrap();
        let row = batch.index_axis(Axis(0), 3);
        assert_close(&restored.direct(row.view()).unwrap(), &op.direct(row).unwrap(), 1e-14);
    }

    #[test]
    fn test_chebyshev_reproduces_low_order_polynomials() {
        let size = 20;
        let x = linspace(-1.0, 1.0, size);
        let batch = Array::from_shape_fn((3, size), |(i, j)| {
            let xj = x[j];
            1.0 + i as f64 * xj - 0.5 * xj * xj
        })
        .into_dyn();
        let mut op = ChebyshevOperation::new(4, -1);
        op.initialize(batch.view()).unwrap();
        let coeffs = op.direct(batch.index_axis(Axis(0), 2)).unwrap();
        assert_eq!(coeffs.shape(), &[5]);
        round_trip(&op, &batch, 1e-10);
    }

    #[test]
    fn test_chebyshev_contracts_requested_axis() {
        let batch = Array::from_shape_fn((2, 6, 3), |(s, i, j)| (s + i + 2 * j) as f64).into_dyn();
        let mut op = ChebyshevOperation::new(1, 0);
        op.initialize(batch.view()).unwrap();
        let coeffs = op.direct(batch.index_axis(Axis(0), 1)).unwrap();
        assert_eq!(coeffs.shape(), &[2, 3]);
        // Linear along axis 0, so the two-term basis is exact.
        round_trip(&op, &batch, 1e-10);
        let restored = operation_from_state(&op.state()).unwrap();
        assert_close(&restored.direct(batch.index_axis(Axis(0), 0)).unwrap(), &op.direct(batch.index_axis(Axis(0), 0)).unwrap(), 1e-14);
    }

    #[test]
    fn test_registry_dispatch() {
        assert_eq!(operation_from_name("LOG10").unwrap().name(), "log10");
        assert_eq!(operation_from_name("pca").unwrap().name(), "pca");
        assert!(operation_from_name("chebyshev").unwrap_err().is_input());
        assert!(operation_from_name("fft").unwrap_err().is_input());
    }

    #[test]
    fn test_keyed_operation_calibrates_per_key() {
        let mut batch = Outputs::new();
        batch.insert("pk_lin".into(), arr2(&[[0.0, 10.0], [2.0, 30.0]]).into_dyn());
        batch.insert("pk_nl".into(), arr2(&[[5.0, 5.0], [15.0, 6.0]]).into_dyn());
        batch.insert("z".into(), arr2(&[[1.0], [1.0]]).into_dyn());
        let mut op = KeyedOperation::new(ScaleOperation::new()).with_keys(["pk_*"]);
        assert!(op.check(&batch).is_ok());
        op.initialize(&batch).unwrap();
        let out = op.direct_batch(&batch).unwrap();
        assert_eq!(out["pk_lin"], arr2(&[[0.0, 0.0], [1.0, 1.0]]).into_dyn());
        assert_eq!(out["pk_nl"], arr2(&[[0.0, 0.0], [1.0, 1.0]]).into_dyn());
        assert_eq!(out["z"], batch["z"]);

        let restored = KeyedOperation::from_state(&op.state()).unwrap();
        let mut sample = Outputs::new();
        sample.insert("pk_nl".into(), arr1(&[0.5, 0.5]).into_dyn());
        assert_eq!(restored.inverse(&sample).unwrap()["pk_nl"], arr1(&[10.0, 5.5]).into_dyn());
    }

    #[test]
    fn test_keyed_operation_missing_literal_key() {
        let mut entries = Outputs::new();
        entries.insert("a".into(), arr1(&[1.0]).into_dyn());
        let op = KeyedOperation::new(Log10Operation).with_keys(["a", "b", "c*"]);
        assert_eq!(op.check(&entries), Err(MissingKey { key: "b".into() }));
        let op = KeyedOperation::new(Log10Operation).with_keys(["a", "c*"]);
        assert!(op.check(&entries).is_ok());
    }
}
