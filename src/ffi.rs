//! Python FFI bindings via PyO3.
//!
//! Exposes one [`Engine`] as a `Cosmology` class: background distances,
//! σ₈ and the matter power spectrum. Emulation and custom solvers stay on
//! the Rust API.
//!
//! # Building the Python extension
//!
//! ```bash
//! pip install maturin
//! maturin develop --features python-ffi
//! ```
//!
//! # Usage
//!
//! ```python
//! from cosmo_core import Cosmology
//!
//! cosmo = Cosmology(engine="eisenstein_hu", h=0.7, Omega_cdm=0.25, sigma8=0.8)
//! print(cosmo.comoving_radial_distance([0.5, 1.0]))  # Mpc/h
//! print(cosmo.sigma8_m())
//! pk = cosmo.pk_kz([0.01, 0.1], [0.0, 1.0])           # (len k) x (len z)
//! ```

use pyo3::exceptions::{PyRuntimeError, PyTypeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use ndarray::Array1;

use crate::engine::Engine;
use crate::error::CosmologyError;
use crate::params::{CanonicalParameters, ParamMap, ParamValue};
use crate::sections::PerturbationPair;

fn to_py(err: CosmologyError) -> PyErr {
    match err {
        CosmologyError::Input { .. } => PyValueError::new_err(err.to_string()),
        CosmologyError::Computation { .. } => PyRuntimeError::new_err(err.to_string()),
    }
}

fn extract_value(value: &Bound<'_, PyAny>) -> PyResult<ParamValue> {
    // bool first: Python bools also extract as floats.
    if let Ok(flag) = value.extract::<bool>() {
        return Ok(ParamValue::Flag(flag));
    }
    if let Ok(scalar) = value.extract::<f64>() {
        return Ok(ParamValue::Scalar(scalar));
    }
    if let Ok(text) = value.extract::<String>() {
        return Ok(ParamValue::Text(text));
    }
    if let Ok(array) = value.extract::<Vec<f64>>() {
        return Ok(ParamValue::Array(array));
    }
    Err(PyTypeError::new_err(format!(
        "unsupported parameter value {}",
        value.repr()?
    )))
}

// ── Cosmology ─────────────────────────────────────────────────────────────────

/// A cosmology bound to one solver; stages are computed lazily.
///
/// Args:
///     engine: solver registry name (default "eisenstein_hu")
///     **params: canonical parameters (h, Omega_cdm, sigma8, m_ncdm, ...);
///         unknown names are passed to the solver as extra parameters
#[pyclass(name = "Cosmology", unsendable)]
pub struct PyCosmology {
    inner: Engine,
}

#[pymethods]
impl PyCosmology {
    /// Create a new Cosmology.
    #[new]
    #[pyo3(signature = (engine="eisenstein_hu", **params))]
    pub fn new(engine: &str, params: Option<&Bound<'_, PyDict>>) -> PyResult<Self> {
        let mut canonical = ParamMap::new();
        let mut extra = ParamMap::new();
        if let Some(params) = params {
            for (key, value) in params.iter() {
                let key: String = key.extract()?;
                let value = extract_value(&value)?;
                if CanonicalParameters::is_canonical(&key) {
                    canonical.insert(key, value);
                } else {
                    extra.insert(key, value);
                }
            }
        }
        let params = CanonicalParameters::new(canonical).map_err(to_py)?;
        let inner = Engine::from_registry(engine, params, extra).map_err(to_py)?;
        Ok(Self { inner })
    }

    /// Registry name of the solver.
    #[getter]
    pub fn engine(&self) -> &'static str {
        self.inner.solver_name()
    }

    /// E(z) = H(z)/H0 at each redshift.
    pub fn efunc(&mut self, z: Vec<f64>) -> PyResult<Vec<f64>> {
        let background = self.inner.background().map_err(to_py)?;
        Ok(background.efunc(&Array1::from(z)).to_vec())
    }

    /// Comoving radial distance in Mpc/h at each redshift.
    pub fn comoving_radial_distance(&mut self, z: Vec<f64>) -> PyResult<Vec<f64>> {
        let background = self.inner.background().map_err(to_py)?;
        Ok(background.comoving_radial_distance(&Array1::from(z)).to_vec())
    }

    /// Linear matter σ₈ at z = 0.
    pub fn sigma8_m(&mut self) -> PyResult<f64> {
        Ok(self.inner.fourier().map_err(to_py)?.sigma8_m())
    }

    /// Power spectrum in (Mpc/h)³ on the grid `k` (h/Mpc) × `z`.
    ///
    /// Args:
    ///     of: "delta_m", "delta_cb", ... or "delta_m,theta_cb" for a cross spectrum
    #[pyo3(signature = (k, z, non_linear=false, of="delta_m"))]
    pub fn pk_kz(
        &mut self,
        k: Vec<f64>,
        z: Vec<f64>,
        non_linear: bool,
        of: &str,
    ) -> PyResult<Vec<Vec<f64>>> {
        let of: PerturbationPair = of.parse().map_err(to_py)?;
        let fourier = self.inner.fourier().map_err(to_py)?;
        let pk = fourier.pk_kz(&k, &z, non_linear, of).map_err(to_py)?;
        Ok(pk.rows().into_iter().map(|row| row.to_vec()).collect())
    }

    /// Python repr string.
    pub fn __repr__(&self) -> String {
        format!("Cosmology(engine={:?})", self.inner.solver_name())
    }
}

/// Python module entry point.
#[pymodule]
fn cosmo_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyCosmology>()?;
    Ok(())
}
