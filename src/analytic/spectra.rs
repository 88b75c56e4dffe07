//! Power spectra and CMB angular spectra of the analytic solver.
//!
//! P_XY(k, z) = A_X(k, z) A_Y(k, z) (2π²/k³) P_ℛ(k), with A the per-curvature
//! amplitudes of [`AnalyticTransfer`] and P_ℛ the primordial power law.
//! The temperature spectrum is the Sachs–Wolfe plateau with an exponential
//! damping tail; polarization is a fixed fraction of it. The lensing potential
//! is a Limber integral over the linear Weyl potential.

use std::f64::consts::PI;

use ndarray::Array2;

use crate::constants::C_KMS;
use crate::numeric::{simpson, tophat_sigma};
use crate::solver::{BackgroundData, SolverError, SolverResult, Species, SpectraData, TransferVariable};
use crate::translate::NativeParams;

use super::halofit::{halofit_boost, HalofitFit};
use super::perturbations::AnalyticTransfer;
use super::thermodynamics::{transverse, z_star_fit};

/// Comoving damping length of the temperature anisotropies, Mpc.
const DAMPING_LENGTH: f64 = 7.0;

/// EE/TT ratio at the damping scale.
const POLARIZATION_FRACTION: f64 = 0.05;

/// Correlation coefficient of T and E.
const TE_CORRELATION: f64 = -0.3;

/// Tensor BB/TT ratio per unit r.
const TENSOR_BB_FRACTION: f64 = 0.01;

/// Redshift nodes of the Limber integral.
const LIMBER_STEPS: usize = 256;

/// Power-law-with-running primordial spectrum in native units (1/Mpc).
#[derive(Clone, Copy, Debug, PartialEq)]
struct PrimordialLaw {
    a_s: f64,
    n_s: f64,
    alpha_s: f64,
    beta_s: f64,
    pivot: f64,
    r: f64,
}

impl PrimordialLaw {
    fn scalar(&self, k: f64) -> f64 {
        let x = (k / self.pivot).ln();
        self.a_s * (x * (self.n_s - 1.0 + 0.5 * self.alpha_s * x + self.beta_s / 6.0 * x * x)).exp()
    }
}

/// Spectra of one transfer run at one primordial amplitude.
#[derive(Clone, Debug)]
pub struct AnalyticSpectra {
    transfer: AnalyticTransfer,
    primordial: PrimordialLaw,
    want_tensors: bool,
    alens: f64,
    z_star: f64,
    /// P_nl / P_lin on the (k, z) nodes; `None` for linear runs.
    boost: Option<Array2<f64>>,
    sigma8: Vec<f64>,
}

impl AnalyticSpectra {
    /// Evaluate the spectra of `transfer` for the amplitudes in `native`.
    pub fn new(
        native: &NativeParams,
        transfer: AnalyticTransfer,
        fit: Option<HalofitFit>,
    ) -> SolverResult<Self> {
        let h = native.h();
        let omh2 = transfer.background.omega_m() * h * h;
        let mut spectra = Self {
            primordial: PrimordialLaw {
                a_s: native.a_s,
                n_s: native.ns,
                alpha_s: native.nrun,
                beta_s: native.nrunrun,
                pivot: native.pivot_scalar,
                r: native.r,
            },
            want_tensors: native.want_tensors,
            alens: native.alens,
            z_star: z_star_fit(native.ombh2, omh2),
            boost: None,
            sigma8: Vec::new(),
            transfer,
        };
        let linear = spectra.linear(TransferVariable::DeltaTot, TransferVariable::DeltaTot);
        let radius = 8.0 / h;
        spectra.sigma8 = (0..spectra.transfer.z.len())
            .map(|iz| {
                let column: Vec<f64> = linear.column(iz).to_vec();
                tophat_sigma(&spectra.transfer.k, &column, radius)
            })
            .collect();
        if spectra.sigma8.iter().any(|s| !s.is_finite()) {
            return Err(SolverError::NonFinite("sigma8".into()));
        }
        if let Some(fit) = fit {
            spectra.boost = Some(spectra.boost_table(fit, &linear));
        }
        Ok(spectra)
    }

    /// Linear cross spectrum on the nodes, Mpc³.
    fn linear(&self, var1: TransferVariable, var2: TransferVariable) -> Array2<f64> {
        let t = &self.transfer;
        Array2::from_shape_fn((t.k.len(), t.z.len()), |(ik, iz)| {
            let k = t.k[ik];
            t.amplitude(var1, ik, iz) * t.amplitude(var2, ik, iz) * 2.0 * PI * PI / (k * k * k)
                * self.primordial.scalar(k)
        })
    }

    fn boost_table(&self, fit: HalofitFit, linear: &Array2<f64>) -> Array2<f64> {
        let t = &self.transfer;
        let bg = &t.background;
        let mut boost = Array2::ones(linear.raw_dim());
        for (iz, z) in t.z.iter().enumerate() {
            let delta2: Vec<f64> = t
                .k
                .iter()
                .zip(linear.column(iz))
                .map(|(k, p)| k * k * k * p / (2.0 * PI * PI))
                .collect();
            let e2 = bg.efunc(*z).powi(2);
            let a3 = (1.0 + z).powi(-3);
            let omega_m = bg.omega_m() * a3 / e2;
            let omega_de = bg.omega_species(Species::DarkEnergy, *z) / e2;
            let column = halofit_boost(fit, &t.k, &delta2, omega_m, omega_de, bg.w(*z));
            for (ik, b) in column.into_iter().enumerate() {
                boost[[ik, iz]] = b;
            }
        }
        boost
    }

    /// Dimensionless curvature power Δ²_ℛ(k).
    fn curvature_power(&self, k: f64) -> f64 {
        self.primordial.scalar(k)
    }

    /// Distances to last scattering: (χ*, D_M*), Mpc.
    fn last_scattering(&self) -> (f64, f64) {
        let bg = &self.transfer.background;
        let chi = bg.comoving_radial_distance(self.z_star);
        (chi, transverse(chi, bg.omega_k(), bg.h()))
    }

    /// Limber lensing potential C_ℓ^φφ over the linear Weyl potential.
    fn phi_phi(&self, ell: f64, chi_star: f64) -> f64 {
        let t = &self.transfer;
        let bg = &t.background;
        let h0 = t.h0_mpc();
        let omega_m = bg.omega_m();
        let x_max = (1.0 + self.z_star).ln();
        simpson(
            |x| {
                let z = x.exp() - 1.0;
                let chi = bg.comoving_radial_distance(z);
                if chi <= 0.0 || chi >= chi_star {
                    return 0.0;
                }
                let k = (ell + 0.5) / chi;
                let growth = t.growth_table.growth_factor(z);
                let delta = 0.4 * k * k * t.transfer_at(k) * growth / (omega_m * h0 * h0);
                let p_delta = delta * delta * 2.0 * PI * PI / (k * k * k) * self.curvature_power(k);
                let poisson = 1.5 * omega_m * h0 * h0 * (1.0 + z) / (k * k);
                let p_psi = poisson * poisson * p_delta;
                let kernel = 2.0 * (chi_star - chi) / (chi_star * chi);
                // dχ = (1+z) c/H dx
                let dchi_dx = (1.0 + z) * C_KMS / bg.hubble(z);
                kernel * kernel / (chi * chi) * p_psi * dchi_dx
            },
            1e-3f64.ln_1p(),
            x_max,
            LIMBER_STEPS,
        )
    }
}

impl SpectraData for AnalyticSpectra {
    fn k(&self) -> &[f64] {
        &self.transfer.k
    }

    fn redshifts(&self) -> &[f64] {
        &self.transfer.z
    }

    fn matter_power(
        &self,
        var1: TransferVariable,
        var2: TransferVariable,
        non_linear: bool,
    ) -> SolverResult<Array2<f64>> {
        let linear = self.linear(var1, var2);
        if !non_linear {
            return Ok(linear);
        }
        match &self.boost {
            Some(boost) => Ok(linear * boost),
            None => Err(SolverError::Unsupported(
                "non-linear power requested but no non-linear model configured".into(),
            )),
        }
    }

    fn sigma8(&self) -> Vec<f64> {
        self.sigma8.clone()
    }

    fn has_non_linear(&self) -> bool {
        self.boost.is_some()
    }

    fn lensing(&self) -> bool {
        self.transfer.lensing
    }

    fn unlensed_cls(&self, lmax: usize) -> SolverResult<Array2<f64>> {
        let (_, d_m) = self.last_scattering();
        let ell_damping = d_m / DAMPING_LENGTH;
        let mut cls = Array2::zeros((lmax + 1, 4));
        for ell in 2..=lmax {
            let l = ell as f64;
            let damping = (-(l / ell_damping).powi(2)).exp();
            let tt = 2.0 * PI / (l * (l + 1.0)) * self.curvature_power(l / d_m) / 25.0 * damping;
            let ee = POLARIZATION_FRACTION * (l / ell_damping).powi(2) * tt;
            let bb = if self.want_tensors { TENSOR_BB_FRACTION * self.primordial.r * tt } else { 0.0 };
            cls[[ell, 0]] = tt;
            cls[[ell, 1]] = ee;
            cls[[ell, 2]] = bb;
            cls[[ell, 3]] = TE_CORRELATION * (tt * ee).sqrt();
        }
        if cls.iter().any(|c| !c.is_finite()) {
            return Err(SolverError::NonFinite("unlensed C_ell".into()));
        }
        Ok(cls)
    }

    fn lensed_cls(&self, lmax: usize) -> SolverResult<Array2<f64>> {
        if !self.transfer.lensing {
            return Err(SolverError::Unsupported("lensed C_ell require lensing".into()));
        }
        let mut cls = self.unlensed_cls(lmax)?;
        let potential = self.lens_potential_cls(lmax)?;
        let deflection2: f64 = (2..=lmax)
            .map(|ell| {
                let l = ell as f64;
                (2.0 * l + 1.0) / (4.0 * PI) * l * (l + 1.0) * potential[[ell, 0]]
            })
            .sum();
        for ell in 2..=lmax {
            let l = ell as f64;
            let leak = 1.0 - (-0.5 * l * l * deflection2).exp();
            cls[[ell, 2]] += leak * cls[[ell, 1]];
        }
        Ok(cls)
    }

    fn lens_potential_cls(&self, lmax: usize) -> SolverResult<Array2<f64>> {
        if !self.transfer.lensing {
            return Err(SolverError::Unsupported("lens potential C_ell require lensing".into()));
        }
        let (chi_star, _) = self.last_scattering();
        let mut cls = Array2::zeros((lmax + 1, 3));
        for ell in 2..=lmax {
            cls[[ell, 0]] = self.alens * self.phi_phi(ell as f64, chi_star);
        }
        if cls.iter().any(|c| !c.is_finite()) {
            return Err(SolverError::NonFinite("lens potential C_ell".into()));
        }
        Ok(cls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytic::EisensteinHuSolver;
    use crate::params::{CanonicalParameters, ParamMap, ParamValue};
    use crate::solver::BoltzmannSolver;
    use crate::translate::translate;

    fn spectra(inputs: Vec<(&str, ParamValue)>) -> std::sync::Arc<dyn SpectraData> {
        let solver = EisensteinHuSolver::default();
        let params = CanonicalParameters::new(inputs).unwrap();
        let native = translate(&params, &ParamMap::new(), &solver).unwrap();
        let transfer = solver.transfer(&native).unwrap();
        solver.power_spectra(&native, &transfer).unwrap()
    }

    #[test]
    fn test_sigma8_scales_with_sqrt_amplitude() {
        let a = spectra(vec![("A_s", 2e-9.into())]);
        let b = spectra(vec![("A_s", 8e-9.into())]);
        let ratio = b.sigma8()[0] / a.sigma8()[0];
        assert!((ratio - 2.0).abs() < 1e-10, "ratio={}", ratio);
    }

    #[test]
    fn test_non_linear_boost_at_small_scales() {
        let s = spectra(vec![("non_linear", "halofit".into()), ("z_pk", vec![0.0].into())]);
        assert!(s.has_non_linear());
        let lin = s.matter_power(TransferVariable::DeltaTot, TransferVariable::DeltaTot, false).unwrap();
        let nl = s.matter_power(TransferVariable::DeltaTot, TransferVariable::DeltaTot, true).unwrap();
        let last = lin.nrows() - 1;
        assert!(nl[[last, 0]] > lin[[last, 0]]);
        assert!((nl[[0, 0]] / lin[[0, 0]] - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_non_linear_without_model_is_unsupported() {
        let s = spectra(vec![]);
        let err = s
            .matter_power(TransferVariable::DeltaTot, TransferVariable::DeltaTot, true)
            .unwrap_err();
        assert!(matches!(err, SolverError::Unsupported(_)));
    }

    #[test]
    fn test_cls_shapes_and_lensing_requirement() {
        let s = spectra(vec![("ellmax_cl", 300.0.into())]);
        let cls = s.unlensed_cls(300).unwrap();
        assert_eq!(cls.dim(), (301, 4));
        assert_eq!(cls[[1, 0]], 0.0);
        assert!(cls[[100, 0]] > 0.0);
        assert!(s.lensed_cls(300).is_err());

        let s = spectra(vec![("ellmax_cl", 300.0.into()), ("lensing", true.into())]);
        let pp = s.lens_potential_cls(300).unwrap();
        assert_eq!(pp.dim(), (301, 3));
        assert!(pp[[100, 0]] > 0.0);
        let lensed = s.lensed_cls(300).unwrap();
        assert!(lensed[[300, 2]] > 0.0);
    }
}
