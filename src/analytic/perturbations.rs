//! Linear perturbations of the analytic solver.
//!
//! δ(k, z) = (2/5) k² T(k) D(z) / (Ω_m H₀²) per unit primordial curvature,
//! with T(k) the Eisenstein & Hu (1998) no-wiggle transfer function and D the
//! linear growth factor normalised to D = a deep in matter domination. Velocity
//! divergences follow θ = f δ; the Weyl potential follows the Poisson equation.

use std::any::Any;
use std::sync::Arc;

use ndarray::Array2;

use crate::constants::C_KMS;
use crate::numeric::{interp_linear, logspace};
use crate::solver::{SolverError, SolverResult, TransferData, TransferVariable};
use crate::translate::NativeParams;

use super::background::AnalyticBackground;
use super::AnalyticConfig;

/// Scale factor where the growth integration starts.
const GROWTH_A_INIT: f64 = 1e-5;

/// Eisenstein & Hu (1998) zero-baryon-oscillation transfer function.
///
/// - `k`: wavenumber in 1/Mpc.
/// - `omh2`, `ombh2`: physical matter and baryon densities.
/// - `h`: reduced Hubble constant.
/// - `tcmb`: CMB temperature in K.
pub fn eisenstein_hu_no_wiggle(k: f64, omh2: f64, ombh2: f64, h: f64, tcmb: f64) -> f64 {
    let theta = tcmb / 2.7;
    let fb = ombh2 / omh2;
    let s = 44.5 * (9.83 / omh2).ln() / (1.0 + 10.0 * ombh2.powf(0.75)).sqrt();
    let alpha = 1.0 - 0.328 * (431.0 * omh2).ln() * fb + 0.38 * (22.3 * omh2).ln() * fb * fb;
    let gamma_eff = omh2 / h * (alpha + (1.0 - alpha) / (1.0 + (0.43 * k * s).powi(4)));
    let q = k * theta * theta / (gamma_eff * h);
    let l0 = (2.0 * std::f64::consts::E + 1.8 * q).ln();
    let c0 = 14.2 + 731.0 / (1.0 + 62.5 * q);
    l0 / (l0 + c0 * q * q)
}

/// Linear growth factor D(a) and rate f = d ln D / d ln a, tabulated in ln a.
#[derive(Clone, Debug)]
pub struct GrowthTable {
    lna: Vec<f64>,
    d: Vec<f64>,
    f: Vec<f64>,
}

impl GrowthTable {
    /// Integrate D'' + (2 + ½ d ln E²/d ln a) D' − (3/2) Ω_m(a) D = 0 with RK4.
    pub fn new(background: &AnalyticBackground, steps: usize) -> Self {
        let steps = steps.max(16);
        let x0 = GROWTH_A_INIT.ln();
        let dx = -x0 / steps as f64;
        let omega_m = background.omega_m();
        let rhs = |x: f64, d: f64, dp: f64| -> (f64, f64) {
            let a = x.exp();
            let e2 = background.efunc2_late(a);
            let om_a = omega_m / (a * a * a) / e2;
            let friction = 2.0 + 0.5 * background.dln_efunc2_late(a);
            (dp, -friction * dp + 1.5 * om_a * d)
        };
        let mut lna = Vec::with_capacity(steps + 1);
        let mut d = Vec::with_capacity(steps + 1);
        let mut f = Vec::with_capacity(steps + 1);
        let (mut x, mut y, mut yp) = (x0, GROWTH_A_INIT, GROWTH_A_INIT);
        for i in 0..=steps {
            lna.push(x);
            d.push(y);
            f.push(yp / y);
            if i == steps {
                break;
            }
            let (k1, l1) = rhs(x, y, yp);
            let (k2, l2) = rhs(x + 0.5 * dx, y + 0.5 * dx * k1, yp + 0.5 * dx * l1);
            let (k3, l3) = rhs(x + 0.5 * dx, y + 0.5 * dx * k2, yp + 0.5 * dx * l2);
            let (k4, l4) = rhs(x + dx, y + dx * k3, yp + dx * l3);
            y += dx / 6.0 * (k1 + 2.0 * k2 + 2.0 * k3 + k4);
            yp += dx / 6.0 * (l1 + 2.0 * l2 + 2.0 * l3 + l4);
            x += dx;
        }
        Self { lna, d, f }
    }

    /// D at redshift `z`.
    pub fn growth_factor(&self, z: f64) -> f64 {
        interp_linear(&self.lna, &self.d, -(1.0 + z).ln())
    }

    /// f at redshift `z`.
    pub fn growth_rate(&self, z: f64) -> f64 {
        interp_linear(&self.lna, &self.f, -(1.0 + z).ln())
    }
}

/// Transfer run of the analytic solver.
#[derive(Clone, Debug)]
pub struct AnalyticTransfer {
    pub(crate) background: Arc<AnalyticBackground>,
    /// Wavenumbers, 1/Mpc.
    pub(crate) k: Vec<f64>,
    /// Redshifts, ascending.
    pub(crate) z: Vec<f64>,
    /// T(k).
    pub(crate) tk: Vec<f64>,
    /// D(z_i).
    pub(crate) growth: Vec<f64>,
    /// f(z_i).
    pub(crate) rate: Vec<f64>,
    pub(crate) growth_table: Arc<GrowthTable>,
    pub(crate) lensing: bool,
    omh2: f64,
    ombh2: f64,
    tcmb: f64,
}

impl AnalyticTransfer {
    /// Tabulate transfer functions on the solver's k grid and the requested redshifts.
    pub fn new(
        native: &NativeParams,
        background: Arc<AnalyticBackground>,
        config: &AnalyticConfig,
    ) -> SolverResult<Self> {
        if native.kmax <= config.kmin {
            return Err(SolverError::ParamRange {
                name: "kmax".into(),
                value: native.kmax,
                reason: format!("must exceed kmin = {}", config.kmin),
            });
        }
        let h = native.h();
        let omh2 = background.omega_m() * h * h;
        let k = logspace(config.kmin, native.kmax, config.nk);
        let tk = k
            .iter()
            .map(|k| eisenstein_hu_no_wiggle(*k, omh2, native.ombh2, h, native.tcmb))
            .collect();
        let mut z = native.redshifts.clone();
        z.sort_by(f64::total_cmp);
        let growth_table = Arc::new(GrowthTable::new(&background, config.growth_steps));
        let growth = z.iter().map(|z| growth_table.growth_factor(*z)).collect();
        let rate = z.iter().map(|z| growth_table.growth_rate(*z)).collect();
        Ok(Self {
            background,
            k,
            z,
            tk,
            growth,
            rate,
            growth_table,
            lensing: native.do_lensing,
            omh2,
            ombh2: native.ombh2,
            tcmb: native.tcmb,
        })
    }

    /// T(k) at an arbitrary wavenumber (1/Mpc).
    pub(crate) fn transfer_at(&self, k: f64) -> f64 {
        eisenstein_hu_no_wiggle(k, self.omh2, self.ombh2, self.background.h(), self.tcmb)
    }

    /// H₀/c in 1/Mpc.
    pub(crate) fn h0_mpc(&self) -> f64 {
        100.0 * self.background.h() / C_KMS
    }

    /// Amplitude of `variable` per unit primordial curvature at (k_i, z_j).
    pub(crate) fn amplitude(&self, variable: TransferVariable, ik: usize, iz: usize) -> f64 {
        let k = self.k[ik];
        let h0 = self.h0_mpc();
        let omega_m = self.background.omega_m();
        let delta = 0.4 * k * k * self.tk[ik] * self.growth[iz] / (omega_m * h0 * h0);
        match variable {
            TransferVariable::DeltaCdm
            | TransferVariable::DeltaBaryon
            | TransferVariable::DeltaTot
            | TransferVariable::DeltaNonu => delta,
            TransferVariable::VNewtonianCdm | TransferVariable::VNewtonianBaryon => {
                self.rate[iz] * delta
            }
            TransferVariable::Weyl => -1.5 * omega_m * h0 * h0 * (1.0 + self.z[iz]) * delta,
        }
    }
}

impl TransferData for AnalyticTransfer {
    fn k(&self) -> &[f64] {
        &self.k
    }

    fn redshifts(&self) -> &[f64] {
        &self.z
    }

    fn transfer(&self, variable: TransferVariable) -> SolverResult<Array2<f64>> {
        Ok(Array2::from_shape_fn((self.k.len(), self.z.len()), |(ik, iz)| {
            let k = self.k[ik];
            self.amplitude(variable, ik, iz) / (k * k)
        }))
    }

    fn lensing(&self) -> bool {
        self.lensing
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytic::EisensteinHuSolver;
    use crate::params::CanonicalParameters;
    use crate::translate::translate;

    fn background(inputs: Vec<(&str, f64)>) -> AnalyticBackground {
        let params = CanonicalParameters::new(inputs).unwrap();
        let native = translate(&params, &Default::default(), &EisensteinHuSolver::default()).unwrap();
        AnalyticBackground::new(&native, &AnalyticConfig::default()).unwrap()
    }

    #[test]
    fn test_transfer_limits() {
        let t_low = eisenstein_hu_no_wiggle(1e-5, 0.14, 0.022, 0.67, 2.7255);
        assert!((t_low - 1.0).abs() < 1e-3, "T(k->0)={}", t_low);
        let t_high = eisenstein_hu_no_wiggle(10.0, 0.14, 0.022, 0.67, 2.7255);
        assert!(t_high < 1e-3);
    }

    #[test]
    fn test_growth_matter_era_and_suppression() {
        let bg = background(vec![]);
        let table = GrowthTable::new(&bg, 2000);
        // Matter era: D ≈ a.
        let z = 99.0;
        assert!((table.growth_factor(z) * (1.0 + z) - 1.0).abs() < 0.01);
        // Λ suppresses growth today.
        let d0 = table.growth_factor(0.0);
        assert!(d0 > 0.7 && d0 < 0.85, "D0={}", d0);
        let f0 = table.growth_rate(0.0);
        let approx = bg.omega_m().powf(0.55);
        assert!((f0 - approx).abs() < 0.02, "f0={} approx={}", f0, approx);
    }
}
