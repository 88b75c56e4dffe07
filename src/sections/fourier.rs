//! Matter power spectra, σ(R, z) and growth rate.
//!
//! Spectra are returned in (Mpc/h)³ against k in h/Mpc, already multiplied
//! by the square of the sigma8 amplitude correction.
//!
//! # Invariants
//!
//! - **Node exactness**: `sigma8_z(z)` at a tabulated redshift uses the same
//!   top-hat quadrature on the same nodes as the solver, so with sigma8 as the
//!   free amplitude `sigma8_z(0)` equals the target up to rounding.
//! - **Synthesised variables**: `theta_cb` is never asked of the solver; it is
//!   the Ω-weighted sum of the CDM and baryon velocity spectra.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use ndarray::{Array1, Array2, Axis};

use crate::engine::Engine;
use crate::error::{CosmologyError, CosmologyResult};
use crate::interpolator::{Extrapolation, PowerSpectrumInterpolator2D};
use crate::sections::{AccessorTable, Section};
use crate::solver::{wrap_solver_error, SpectraData, TransferVariable};
use crate::tasks::Stage;

// ─── Vocabulary ────────────────────────────────────────────────────────────

/// Perturbation whose power spectrum can be requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Perturbation {
    /// Total matter density contrast.
    DeltaM,
    /// CDM + baryon density contrast.
    DeltaCb,
    /// CDM velocity divergence.
    ThetaCdm,
    /// Baryon velocity divergence.
    ThetaB,
    /// CDM + baryon velocity divergence (Ω-weighted).
    ThetaCb,
    /// Sum of the Newtonian-gauge potentials Φ + Ψ.
    PhiPlusPsi,
}

impl Perturbation {
    /// Every perturbation.
    pub const ALL: [Perturbation; 6] = [
        Perturbation::DeltaM,
        Perturbation::DeltaCb,
        Perturbation::ThetaCdm,
        Perturbation::ThetaB,
        Perturbation::ThetaCb,
        Perturbation::PhiPlusPsi,
    ];

    /// Vocabulary spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Perturbation::DeltaM => "delta_m",
            Perturbation::DeltaCb => "delta_cb",
            Perturbation::ThetaCdm => "theta_cdm",
            Perturbation::ThetaB => "theta_b",
            Perturbation::ThetaCb => "theta_cb",
            Perturbation::PhiPlusPsi => "phi_plus_psi",
        }
    }

    /// Native variable, `None` for synthesised ones.
    fn native(self) -> Option<TransferVariable> {
        match self {
            Perturbation::DeltaM => Some(TransferVariable::DeltaTot),
            Perturbation::DeltaCb => Some(TransferVariable::DeltaNonu),
            Perturbation::ThetaCdm => Some(TransferVariable::VNewtonianCdm),
            Perturbation::ThetaB => Some(TransferVariable::VNewtonianBaryon),
            Perturbation::PhiPlusPsi => Some(TransferVariable::Weyl),
            Perturbation::ThetaCb => None,
        }
    }
}

impl fmt::Display for Perturbation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Perturbation {
    type Err = CosmologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Perturbation::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| CosmologyError::input(format!("unknown perturbation '{s}'")))
    }
}

/// Pair of perturbations for a cross spectrum; a single one means its auto spectrum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PerturbationPair(pub Perturbation, pub Perturbation);

impl From<Perturbation> for PerturbationPair {
    fn from(p: Perturbation) -> Self {
        Self(p, p)
    }
}

impl From<(Perturbation, Perturbation)> for PerturbationPair {
    fn from((a, b): (Perturbation, Perturbation)) -> Self {
        Self(a, b)
    }
}

impl Default for PerturbationPair {
    fn default() -> Self {
        Perturbation::DeltaM.into()
    }
}

impl FromStr for PerturbationPair {
    type Err = CosmologyError;

    /// `"delta_m"` or `"delta_m,theta_cdm"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(',') {
            Some((a, b)) => Ok(Self(a.trim().parse()?, b.trim().parse()?)),
            None => Ok(s.trim().parse::<Perturbation>()?.into()),
        }
    }
}

// ─── Table ─────────────────────────────────────────────────────────────────

/// P(k, z) on the solver grid.
#[derive(Clone, Debug, PartialEq)]
pub struct PowerTable {
    /// Wavenumbers, h/Mpc.
    pub k: Array1<f64>,
    /// Redshifts, ascending.
    pub z: Array1<f64>,
    /// Shape (nk, nz), (Mpc/h)³.
    pub pk: Array2<f64>,
}

// ─── Section ───────────────────────────────────────────────────────────────

/// Fourier section.
#[derive(Clone, Debug)]
pub struct Fourier {
    data: Arc<dyn SpectraData>,
    h: f64,
    ratio: f64,
    /// Ω_cdm and Ω_b weights of `theta_cb`.
    weight_cdm: f64,
    weight_b: f64,
}

impl Fourier {
    pub(crate) fn new(engine: &mut Engine) -> CosmologyResult<Self> {
        engine.compute(Stage::Fourier)?;
        let ratio = engine.rescale_sigma8()?;
        let omega_cdm = engine.params().scalar("Omega_cdm")?;
        let omega_b = engine.params().scalar("Omega_b")?;
        Ok(Self {
            data: engine.spectra_handle()?,
            h: engine.native_params().h(),
            ratio,
            weight_cdm: omega_cdm / (omega_cdm + omega_b),
            weight_b: omega_b / (omega_cdm + omega_b),
        })
    }

    /// Whether a non-linear model was applied to the spectra.
    pub fn has_non_linear(&self) -> bool {
        self.data.has_non_linear()
    }

    /// Native (Mpc units) spectrum of a pair, synthesising `theta_cb`.
    fn native_power(
        &self,
        non_linear: bool,
        a: Perturbation,
        b: Perturbation,
    ) -> CosmologyResult<Array2<f64>> {
        if a == Perturbation::ThetaCb {
            return Ok(self.native_power(non_linear, Perturbation::ThetaCdm, b)? * self.weight_cdm
                + self.native_power(non_linear, Perturbation::ThetaB, b)? * self.weight_b);
        }
        if b == Perturbation::ThetaCb {
            return Ok(self.native_power(non_linear, a, Perturbation::ThetaCdm)? * self.weight_cdm
                + self.native_power(non_linear, a, Perturbation::ThetaB)? * self.weight_b);
        }
        let (Some(va), Some(vb)) = (a.native(), b.native()) else {
            return Err(CosmologyError::input(format!("no native variable for {a} x {b}")));
        };
        let mut pk = self
            .data
            .matter_power(va, vb, non_linear)
            .map_err(|err| wrap_solver_error("fourier", err))?;
        // Weyl = k²(Φ+Ψ)/2.
        for p in [a, b] {
            if p == Perturbation::PhiPlusPsi {
                for (mut row, k) in pk.axis_iter_mut(Axis(0)).zip(self.data.k()) {
                    row *= 2.0 / (k * k);
                }
            }
        }
        Ok(pk)
    }

    /// Power spectrum table of `of` (a perturbation or a pair).
    pub fn table(
        &self,
        non_linear: bool,
        of: impl Into<PerturbationPair>,
    ) -> CosmologyResult<PowerTable> {
        if non_linear && !self.data.has_non_linear() {
            return Err(CosmologyError::input(
                "non-linear power requested but no non_linear model is configured",
            ));
        }
        let PerturbationPair(a, b) = of.into();
        let pk = self.native_power(non_linear, a, b)?;
        Ok(PowerTable {
            k: self.data.k().iter().map(|k| k / self.h).collect(),
            z: Array1::from(self.data.redshifts().to_vec()),
            pk: pk * (self.h.powi(3) * self.ratio * self.ratio),
        })
    }

    /// Interpolator of |P(k, z)|.
    pub fn pk_interpolator(
        &self,
        non_linear: bool,
        of: impl Into<PerturbationPair>,
        extrapolation: Extrapolation,
    ) -> CosmologyResult<PowerSpectrumInterpolator2D> {
        let table = self.table(non_linear, of)?;
        PowerSpectrumInterpolator2D::new(
            table.k.to_vec(),
            table.z.to_vec(),
            &table.pk.mapv(f64::abs),
            extrapolation,
        )
    }

    /// |P| on the outer product of `k` (h/Mpc) and `z`, shape (len k, len z).
    pub fn pk_kz(
        &self,
        k: &[f64],
        z: &[f64],
        non_linear: bool,
        of: impl Into<PerturbationPair>,
    ) -> CosmologyResult<Array2<f64>> {
        self.pk_interpolator(non_linear, of, Extrapolation::default())?
            .eval_grid(k, z)
    }

    /// Linear top-hat RMS fluctuation in a sphere of radius `r` (Mpc/h).
    pub fn sigma_rz(&self, r: f64, z: f64, of: impl Into<PerturbationPair>) -> CosmologyResult<f64> {
        self.pk_interpolator(false, of, Extrapolation::default())?
            .sigma_rz(r, z)
    }

    /// σ₈(z) of `of`.
    pub fn sigma8_z(&self, z: f64, of: impl Into<PerturbationPair>) -> CosmologyResult<f64> {
        self.sigma_rz(8.0, z, of)
    }

    /// Solver-reported linear matter σ₈ at the lowest computed redshift.
    pub fn sigma8_m(&self) -> f64 {
        let lowest = self
            .data
            .redshifts()
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        lowest
            .and_then(|i| self.data.sigma8().get(i).copied())
            .map_or(f64::NAN, |s| s * self.ratio)
    }

    /// Growth rate f = d ln σ_r / d ln a at `z`, from a finite difference of half-width `dz`.
    pub fn growth_rate_rz(
        &self,
        r: f64,
        z: f64,
        of: impl Into<PerturbationPair>,
        dz: f64,
    ) -> CosmologyResult<f64> {
        self.pk_interpolator(false, of, Extrapolation::default())?
            .growth_rate_rz(r, z, dz)
    }
}

impl Section for Fourier {
    const NAME: &'static str = "fourier";

    fn accessors() -> &'static AccessorTable<Self> {
        static TABLE: OnceLock<AccessorTable<Fourier>> = OnceLock::new();
        TABLE.get_or_init(|| {
            AccessorTable::<Fourier>::new()
                .with("sigma8_m", |s| s.sigma8_m())
                .try_with("sigma8_cb", |s| s.sigma8_z(0.0, Perturbation::DeltaCb))
                .with("k_max", |s| s.data.k().last().map_or(f64::NAN, |k| k / s.h))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytic::EisensteinHuSolver;
    use crate::params::{CanonicalParameters, ParamMap, ParamValue};
    use approx::assert_relative_eq;

    fn fourier(inputs: Vec<(&str, ParamValue)>) -> Fourier {
        let params = CanonicalParameters::new(inputs).unwrap();
        let mut engine =
            Engine::new(params, ParamMap::new(), Box::new(EisensteinHuSolver::default())).unwrap();
        engine.fourier().unwrap()
    }

    #[test]
    fn test_pair_parsing() {
        let pair: PerturbationPair = "delta_m, theta_cdm".parse().unwrap();
        assert_eq!(pair, PerturbationPair(Perturbation::DeltaM, Perturbation::ThetaCdm));
        assert_eq!("delta_cb".parse::<PerturbationPair>().unwrap(), Perturbation::DeltaCb.into());
        assert!("delta_x".parse::<PerturbationPair>().unwrap_err().is_input());
    }

    #[test]
    fn test_theta_cb_is_weighted_sum() {
        let fo = fourier(vec![("z_pk", vec![0.0, 1.0].into())]);
        let cb = fo.table(false, (Perturbation::ThetaCb, Perturbation::DeltaM)).unwrap();
        let c = fo.table(false, (Perturbation::ThetaCdm, Perturbation::DeltaM)).unwrap();
        let b = fo.table(false, (Perturbation::ThetaB, Perturbation::DeltaM)).unwrap();
        let expected = &c.pk * fo.weight_cdm + &b.pk * fo.weight_b;
        for (x, y) in cb.pk.iter().zip(expected.iter()) {
            assert_relative_eq!(*x, *y, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_phi_plus_psi_rescaled_by_k() {
        let fo = fourier(vec![("z_pk", vec![0.0].into())]);
        let weyl = fo
            .data
            .matter_power(TransferVariable::Weyl, TransferVariable::Weyl, false)
            .unwrap();
        let table = fo.table(false, Perturbation::PhiPlusPsi).unwrap();
        let k = fo.data.k()[10];
        let expected = weyl[[10, 0]] * (2.0 / (k * k)).powi(2) * fo.h.powi(3);
        assert_relative_eq!(table.pk[[10, 0]], expected, max_relative = 1e-12);
    }

    #[test]
    fn test_non_linear_without_model_is_input_error() {
        let fo = fourier(vec![]);
        assert!(fo.table(true, Perturbation::DeltaM).unwrap_err().is_input());
        let fo = fourier(vec![("non_linear", "halofit".into())]);
        let nl = fo.table(true, Perturbation::DeltaM).unwrap();
        let lin = fo.table(false, Perturbation::DeltaM).unwrap();
        let last = nl.k.len() - 1;
        assert!(nl.pk[[last, 0]] > lin.pk[[last, 0]]);
    }

    #[test]
    fn test_single_redshift_rejects_other_z() {
        let fo = fourier(vec![("z_pk", vec![0.5].into())]);
        assert!(fo.pk_kz(&[0.1], &[0.5], false, Perturbation::DeltaM).is_ok());
        let err = fo.pk_kz(&[0.1], &[0.0], false, Perturbation::DeltaM).unwrap_err();
        assert!(err.is_input());
        assert!(fo.growth_rate_rz(8.0, 0.5, Perturbation::DeltaM, 1e-3).unwrap_err().is_input());
    }

    #[test]
    fn test_sigma8_m_matches_interpolator() {
        let fo = fourier(vec![("sigma8", 0.81.into())]);
        assert_relative_eq!(fo.sigma8_m(), 0.81, max_relative = 1e-12);
        assert_relative_eq!(fo.sigma8_z(0.0, Perturbation::DeltaM).unwrap(), 0.81, max_relative = 1e-8);
    }

    #[test]
    fn test_sigma8_cb_scalar_reports_failures() {
        let fo = fourier(vec![("z_pk", vec![0.0, 1.0].into())]);
        let cb = fo.scalar("sigma8_cb").unwrap();
        assert_relative_eq!(cb, fo.sigma8_z(0.0, Perturbation::DeltaCb).unwrap(), max_relative = 1e-12);
        // z = 0 is not tabulated when the only redshift is 0.5.
        let fo = fourier(vec![("z_pk", vec![0.5].into())]);
        assert!(fo.scalar("sigma8_cb").unwrap_err().is_input());
    }

    #[test]
    fn test_growth_rate_matches_omega_m_power_law() {
        let fo = fourier(vec![("z_pk", vec![0.0, 0.5, 1.0].into())]);
        let f = fo.growth_rate_rz(8.0, 0.5, Perturbation::DeltaCb, 1e-3).unwrap();
        assert!(f > 0.6 && f < 0.95, "f={}", f);
    }
}
