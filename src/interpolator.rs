//! Tabulated power spectra with a fixed extrapolation policy.
//!
//! Both interpolators store ln P on a ln k grid and interpolate linearly
//! there (log-log in k). The 2D variant interpolates ln P linearly in z and
//! never extrapolates in z.
//!
//! # Invariants
//!
//! - **Immutable**: an interpolator never changes after construction, so it is
//!   `Clone + Send + Sync` and can be shared freely.
//! - **Positive tables**: every tabulated value is finite and strictly positive
//!   (callers pass |P| for cross spectra that change sign).
//! - **Nodes reproduced**: evaluation at a tabulated (k, z) node returns the
//!   tabulated value up to rounding.

use ndarray::{Array2, ArrayBase, Data, Dimension};
use num_traits::Float;

use crate::error::{CosmologyError, CosmologyResult};
use crate::numeric::{bracket, tophat_sigma, try_map_float};

/// Behaviour outside the tabulated k range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Extrapolation {
    /// Continue the end slopes in log-log space.
    #[default]
    PowerLaw,
    /// Hold the end values.
    Constant,
    /// Reject out-of-range wavenumbers with an input error.
    Error,
}

fn check_grid(name: &str, grid: &[f64], min_len: usize) -> CosmologyResult<()> {
    if grid.len() < min_len {
        return Err(CosmologyError::input(format!(
            "{name} grid needs at least {min_len} points, got {}",
            grid.len()
        )));
    }
    if grid.windows(2).any(|w| !(w[1] > w[0])) {
        return Err(CosmologyError::input(format!("{name} grid must be strictly ascending")));
    }
    Ok(())
}

fn log_table(values: impl Iterator<Item = f64>) -> CosmologyResult<Vec<f64>> {
    values
        .map(|p| {
            if p > 0.0 && p.is_finite() {
                Ok(p.ln())
            } else {
                Err(CosmologyError::input(format!(
                    "power spectrum table must be positive and finite, got {p}"
                )))
            }
        })
        .collect()
}

/// Log-log interpolation of a table column at `lnk`.
fn interp_loglog(lnk_grid: &[f64], lnp: &[f64], k: f64, policy: Extrapolation) -> CosmologyResult<f64> {
    let n = lnk_grid.len();
    let lnk = k.ln();
    let outside = lnk < lnk_grid[0] || lnk > lnk_grid[n - 1];
    if outside {
        match policy {
            Extrapolation::Error => {
                return Err(CosmologyError::input(format!(
                    "k = {k} outside the tabulated range [{}, {}]",
                    lnk_grid[0].exp(),
                    lnk_grid[n - 1].exp()
                )))
            }
            Extrapolation::Constant => {
                let end = if lnk < lnk_grid[0] { lnp[0] } else { lnp[n - 1] };
                return Ok(end.exp());
            }
            Extrapolation::PowerLaw => {}
        }
    }
    let i = bracket(lnk_grid, lnk);
    let t = (lnk - lnk_grid[i]) / (lnk_grid[i + 1] - lnk_grid[i]);
    Ok((lnp[i] + t * (lnp[i + 1] - lnp[i])).exp())
}

// ─── 1D ────────────────────────────────────────────────────────────────────

/// P(k) at a single redshift (or a primordial spectrum).
#[derive(Clone, Debug, PartialEq)]
pub struct PowerSpectrumInterpolator1D {
    k: Vec<f64>,
    lnk: Vec<f64>,
    lnp: Vec<f64>,
    extrapolation: Extrapolation,
}

impl PowerSpectrumInterpolator1D {
    /// Build from an ascending k grid and positive power values.
    pub fn new(k: Vec<f64>, pk: Vec<f64>, extrapolation: Extrapolation) -> CosmologyResult<Self> {
        check_grid("k", &k, 2)?;
        if k[0] <= 0.0 {
            return Err(CosmologyError::input("k grid must be positive"));
        }
        if pk.len() != k.len() {
            return Err(CosmologyError::input(format!(
                "power spectrum has {} values for {} wavenumbers",
                pk.len(),
                k.len()
            )));
        }
        Ok(Self {
            lnk: k.iter().map(|k| k.ln()).collect(),
            lnp: log_table(pk.into_iter())?,
            k,
            extrapolation,
        })
    }

    /// Tabulate `f` on `k`.
    pub fn from_callable<F: Fn(f64) -> f64>(
        k: Vec<f64>,
        f: F,
        extrapolation: Extrapolation,
    ) -> CosmologyResult<Self> {
        let pk = k.iter().map(|k| f(*k)).collect();
        Self::new(k, pk, extrapolation)
    }

    /// Tabulated wavenumbers.
    pub fn k(&self) -> &[f64] {
        &self.k
    }

    /// Extrapolation policy.
    pub fn extrapolation(&self) -> Extrapolation {
        self.extrapolation
    }

    /// P at one wavenumber.
    pub fn eval(&self, k: f64) -> CosmologyResult<f64> {
        interp_loglog(&self.lnk, &self.lnp, k, self.extrapolation)
    }

    /// P element-wise over an array of wavenumbers (shape and precision preserved).
    pub fn eval_array<A, S, D>(&self, k: &ArrayBase<S, D>) -> CosmologyResult<ndarray::Array<A, D>>
    where
        A: Float,
        S: Data<Elem = A>,
        D: Dimension,
    {
        try_map_float(k, |k| self.eval(k))
    }

    /// Top-hat RMS fluctuation in a sphere of `radius` (inverse k unit).
    pub fn sigma_r(&self, radius: f64) -> f64 {
        let pk: Vec<f64> = self.lnp.iter().map(|p| p.exp()).collect();
        tophat_sigma(&self.k, &pk, radius)
    }
}

// ─── 2D ────────────────────────────────────────────────────────────────────

/// P(k, z) table.
#[derive(Clone, Debug, PartialEq)]
pub struct PowerSpectrumInterpolator2D {
    k: Vec<f64>,
    lnk: Vec<f64>,
    z: Vec<f64>,
    /// ln P, shape (nk, nz).
    lnp: Array2<f64>,
    extrapolation: Extrapolation,
}

impl PowerSpectrumInterpolator2D {
    /// Build from ascending k and z grids and a (nk, nz) table of positive values.
    pub fn new(
        k: Vec<f64>,
        z: Vec<f64>,
        pk: &Array2<f64>,
        extrapolation: Extrapolation,
    ) -> CosmologyResult<Self> {
        check_grid("k", &k, 2)?;
        check_grid("z", &z, 1)?;
        if k[0] <= 0.0 {
            return Err(CosmologyError::input("k grid must be positive"));
        }
        if pk.dim() != (k.len(), z.len()) {
            return Err(CosmologyError::input(format!(
                "power spectrum table has shape {:?}, expected ({}, {})",
                pk.dim(),
                k.len(),
                z.len()
            )));
        }
        let lnp = Array2::from_shape_vec(pk.raw_dim(), log_table(pk.iter().copied())?)?;
        Ok(Self {
            lnk: k.iter().map(|k| k.ln()).collect(),
            k,
            z,
            lnp,
            extrapolation,
        })
    }

    /// Tabulate `f(k, z)` on the grids.
    pub fn from_callable<F: Fn(f64, f64) -> f64>(
        k: Vec<f64>,
        z: Vec<f64>,
        f: F,
        extrapolation: Extrapolation,
    ) -> CosmologyResult<Self> {
        let pk = Array2::from_shape_fn((k.len(), z.len()), |(ik, iz)| f(k[ik], z[iz]));
        Self::new(k, z, &pk, extrapolation)
    }

    /// Tabulated wavenumbers.
    pub fn k(&self) -> &[f64] {
        &self.k
    }

    /// Tabulated redshifts.
    pub fn z(&self) -> &[f64] {
        &self.z
    }

    /// Extrapolation policy in k.
    pub fn extrapolation(&self) -> Extrapolation {
        self.extrapolation
    }

    /// ln P column at `z`, interpolated linearly between redshift nodes.
    fn column(&self, z: f64) -> CosmologyResult<Vec<f64>> {
        let nz = self.z.len();
        let (zmin, zmax) = (self.z[0], self.z[nz - 1]);
        let tol = 1e-12 * zmax.abs().max(1.0);
        if z < zmin - tol || z > zmax + tol {
            return Err(CosmologyError::input(if nz == 1 {
                format!("power spectrum tabulated at z = {zmin} only, requested z = {z}")
            } else {
                format!("z = {z} outside the tabulated range [{zmin}, {zmax}]")
            }));
        }
        if nz == 1 {
            return Ok(self.lnp.column(0).to_vec());
        }
        let i = bracket(&self.z, z);
        let t = ((z - self.z[i]) / (self.z[i + 1] - self.z[i])).clamp(0.0, 1.0);
        let lo = self.lnp.column(i);
        let hi = self.lnp.column(i + 1);
        Ok(lo.iter().zip(hi.iter()).map(|(a, b)| a + t * (b - a)).collect())
    }

    /// P at one (k, z).
    pub fn eval(&self, k: f64, z: f64) -> CosmologyResult<f64> {
        let column = self.column(z)?;
        interp_loglog(&self.lnk, &column, k, self.extrapolation)
    }

    /// P on the outer product of `k` and `z`, shape (len k, len z).
    pub fn eval_grid(&self, k: &[f64], z: &[f64]) -> CosmologyResult<Array2<f64>> {
        let mut out = Array2::zeros((k.len(), z.len()));
        for (iz, zz) in z.iter().enumerate() {
            let column = self.column(*zz)?;
            for (ik, kk) in k.iter().enumerate() {
                out[[ik, iz]] = interp_loglog(&self.lnk, &column, *kk, self.extrapolation)?;
            }
        }
        Ok(out)
    }

    /// 1D slice at `z`.
    pub fn at_z(&self, z: f64) -> CosmologyResult<PowerSpectrumInterpolator1D> {
        let column = self.column(z)?;
        Ok(PowerSpectrumInterpolator1D {
            k: self.k.clone(),
            lnk: self.lnk.clone(),
            lnp: column,
            extrapolation: self.extrapolation,
        })
    }

    /// Top-hat RMS fluctuation at `z` in a sphere of `radius`.
    pub fn sigma_rz(&self, radius: f64, z: f64) -> CosmologyResult<f64> {
        Ok(self.at_z(z)?.sigma_r(radius))
    }

    /// σ at R = 8 in the table's length unit.
    pub fn sigma8_z(&self, z: f64) -> CosmologyResult<f64> {
        self.sigma_rz(8.0, z)
    }

    /// Growth rate f = d ln σ_R / d ln a from a finite difference of half-width `dz`,
    /// one-sided at the table edges.
    pub fn growth_rate_rz(&self, radius: f64, z: f64, dz: f64) -> CosmologyResult<f64> {
        let nz = self.z.len();
        if nz < 2 {
            return Err(CosmologyError::input(
                "growth rate needs a power spectrum tabulated at two or more redshifts",
            ));
        }
        let lo = (z - dz).max(self.z[0]);
        let hi = (z + dz).min(self.z[nz - 1]);
        if !(hi > lo) {
            return Err(CosmologyError::input(format!("invalid redshift step around z = {z}")));
        }
        let s_lo = self.sigma_rz(radius, lo)?;
        let s_hi = self.sigma_rz(radius, hi)?;
        Ok(-(1.0 + z) * (s_hi.ln() - s_lo.ln()) / (hi - lo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::logspace;

    fn power_law(k: f64) -> f64 {
        1e4 * k.powf(-1.5)
    }

    #[test]
    fn test_power_law_is_exact_in_and_out_of_range() {
        let k = logspace(1e-3, 1.0, 50);
        let interp = PowerSpectrumInterpolator1D::from_callable(k, power_law, Extrapolation::PowerLaw).unwrap();
        for kk in [2e-3, 0.37, 5.0, 1e-4] {
            let v = interp.eval(kk).unwrap();
            assert!((v / power_law(kk) - 1.0).abs() < 1e-10, "k={} v={}", kk, v);
        }
    }

    #[test]
    fn test_extrapolation_policies() {
        let k = logspace(1e-3, 1.0, 10);
        let constant = PowerSpectrumInterpolator1D::from_callable(k.clone(), power_law, Extrapolation::Constant).unwrap();
        assert!((constant.eval(10.0).unwrap() / power_law(1.0) - 1.0).abs() < 1e-12);
        let strict = PowerSpectrumInterpolator1D::from_callable(k, power_law, Extrapolation::Error).unwrap();
        assert!(strict.eval(10.0).unwrap_err().is_input());
    }

    #[test]
    fn test_rejects_non_positive_table() {
        let err = PowerSpectrumInterpolator1D::new(vec![0.1, 0.2], vec![1.0, 0.0], Extrapolation::PowerLaw);
        assert!(err.unwrap_err().is_input());
    }

    #[test]
    fn test_2d_z_range_and_single_z() {
        let k = logspace(1e-3, 1.0, 20);
        let interp = PowerSpectrumInterpolator2D::from_callable(
            k.clone(),
            vec![0.0, 1.0],
            |k, z| power_law(k) / (1.0 + z).powi(2),
            Extrapolation::PowerLaw,
        )
        .unwrap();
        assert!(interp.eval(0.1, 1.5).unwrap_err().is_input());
        let node = interp.eval(k[3], 1.0).unwrap();
        assert!((node / (power_law(k[3]) / 4.0) - 1.0).abs() < 1e-12);

        let single = PowerSpectrumInterpolator2D::from_callable(k, vec![0.5], |k, _| power_law(k), Extrapolation::PowerLaw).unwrap();
        assert!(single.eval(0.1, 0.5).is_ok());
        assert!(single.eval(0.1, 0.0).unwrap_err().is_input());
        assert!(single.growth_rate_rz(8.0, 0.5, 1e-3).is_err());
    }

    #[test]
    fn test_growth_rate_of_scale_free_growth() {
        // σ ∝ 1/(1+z) everywhere ⇒ f = 1.
        let k = logspace(1e-3, 10.0, 100);
        let z: Vec<f64> = (0..=20).map(|i| i as f64 * 0.1).collect();
        let interp = PowerSpectrumInterpolator2D::from_callable(
            k,
            z,
            |k, z| power_law(k) / (1.0 + z).powi(2),
            Extrapolation::PowerLaw,
        )
        .unwrap();
        let f = interp.growth_rate_rz(8.0, 1.0, 1e-3).unwrap();
        assert!((f - 1.0).abs() < 0.01, "f={}", f);
    }
}
