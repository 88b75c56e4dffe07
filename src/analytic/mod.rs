//! Built-in fitting-function solver (`eisenstein_hu`).
//!
//! A complete implementation of the [`BoltzmannSolver`] contract built from
//! closed-form fits and small numerical integrations:
//!
//! | Stage | Model |
//! |---|---|
//! | background | numerically integrated Friedmann equation ([`background`]) |
//! | thermodynamics | recombination/drag fits, tanh reionization ([`thermodynamics`]) |
//! | transfer | Eisenstein & Hu no-wiggle T(k), RK4 linear growth ([`perturbations`]) |
//! | fourier | primordial power law × transfer, halofit boost ([`spectra`], [`halofit`]) |
//! | harmonic | Sachs–Wolfe C_ℓ with damping, Limber lensing potential ([`spectra`]) |
//!
//! Numbers are approximate. The solver exists so every part of the engine
//! contract (stage ordering, sigma8 rescaling, units, shapes, error wrapping)
//! runs end to end without an external Boltzmann code.

pub mod background;
pub mod halofit;
pub mod perturbations;
pub mod spectra;
pub mod thermodynamics;

use std::sync::Arc;

use tracing::warn;

use crate::solver::{
    BackgroundData, BoltzmannSolver, SolverError, SolverResult, SpectraData, ThermodynamicsData,
    TransferData,
};
use crate::translate::{HalofitVersion, NativeParams};

pub use background::AnalyticBackground;
pub use halofit::HalofitFit;
pub use perturbations::AnalyticTransfer;
pub use spectra::AnalyticSpectra;
pub use thermodynamics::AnalyticThermodynamics;

/// Extra (non-canonical) parameters the solver accepts and ignores.
const ACCEPTED_EXTRAS: &[&str] = &[
    "AccuracyBoost",
    "lSampleBoost",
    "lAccuracyBoost",
    "DoLateRadTruncation",
    "lens_potential_accuracy",
];

/// Options of the non-linear model configuration.
const NON_LINEAR_KEYWORDS: &[&str] = &["HMCode_A_baryon", "HMCode_eta_baryon", "HMCode_logT_AGN"];

/// Resolution of the analytic solver.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalyticConfig {
    /// Number of log-spaced wavenumbers.
    pub nk: usize,
    /// Smallest wavenumber, 1/Mpc.
    pub kmin: f64,
    /// Points of the background table in ln(1+z).
    pub background_nz: usize,
    /// Largest tabulated redshift; beyond it distances are integrated directly.
    pub background_zmax: f64,
    /// RK4 steps of the growth integration.
    pub growth_steps: usize,
}

impl Default for AnalyticConfig {
    fn default() -> Self {
        Self {
            nk: 200,
            kmin: 1e-4,
            background_nz: 4096,
            background_zmax: 1e4,
            growth_steps: 2000,
        }
    }
}

/// Fitting-function solver registered as `eisenstein_hu`.
#[derive(Clone, Debug, Default)]
pub struct EisensteinHuSolver {
    /// Grid resolution.
    pub config: AnalyticConfig,
}

impl EisensteinHuSolver {
    /// Solver with a custom resolution.
    pub fn new(config: AnalyticConfig) -> Self {
        Self { config }
    }

    /// Halofit variant used for a requested non-linear model.
    pub(crate) fn halofit_fit(version: &HalofitVersion) -> SolverResult<HalofitFit> {
        match version {
            HalofitVersion::Original | HalofitVersion::Bird | HalofitVersion::Peacock => {
                Ok(HalofitFit::Smith)
            }
            HalofitVersion::Takahashi | HalofitVersion::Casarini => Ok(HalofitFit::Takahashi),
            HalofitVersion::Mead | HalofitVersion::Mead2016 | HalofitVersion::Mead2020 => {
                warn!(
                    model = version.as_str(),
                    "halo model not available in the analytic solver, using Takahashi halofit"
                );
                Ok(HalofitFit::Takahashi)
            }
            HalofitVersion::Custom(name) => {
                Err(SolverError::Unsupported(format!("non-linear model '{name}'")))
            }
        }
    }
}

impl BoltzmannSolver for EisensteinHuSolver {
    fn name(&self) -> &'static str {
        "eisenstein_hu"
    }

    fn non_linear_keywords(&self) -> &'static [&'static str] {
        NON_LINEAR_KEYWORDS
    }

    fn validate(&self, native: &NativeParams) -> SolverResult<()> {
        if let Some(name) = native.extra.keys().find(|k| !ACCEPTED_EXTRAS.contains(&k.as_str())) {
            return Err(SolverError::UnknownArgument(name.clone()));
        }
        let ranges = [
            ("H0", native.h0, 20.0, 200.0),
            ("ombh2", native.ombh2, 1e-3, 0.2),
            ("omch2", native.omch2, 0.0, 0.99),
            ("omk", native.omk, -1.0, 1.0),
            ("TCMB", native.tcmb, 1.0, 4.0),
        ];
        for (name, value, lo, hi) in ranges {
            if !(lo..=hi).contains(&value) {
                return Err(SolverError::ParamRange {
                    name: name.into(),
                    value,
                    reason: format!("expected [{lo}, {hi}]"),
                });
            }
        }
        if native.lmax < 2 {
            return Err(SolverError::ParamRange {
                name: "lmax".into(),
                value: native.lmax as f64,
                reason: "at least 2".into(),
            });
        }
        if native.kmax <= self.config.kmin {
            return Err(SolverError::ParamRange {
                name: "kmax".into(),
                value: native.kmax,
                reason: format!("must exceed kmin = {}", self.config.kmin),
            });
        }
        if native.want_vectors {
            return Err(SolverError::Unsupported("vector modes".into()));
        }
        if let Some(HalofitVersion::Custom(name)) = &native.non_linear.version {
            return Err(SolverError::Unsupported(format!("non-linear model '{name}'")));
        }
        Ok(())
    }

    fn background(&self, native: &NativeParams) -> SolverResult<Arc<dyn BackgroundData>> {
        Ok(Arc::new(AnalyticBackground::new(native, &self.config)?))
    }

    fn thermodynamics(
        &self,
        native: &NativeParams,
    ) -> SolverResult<(Arc<dyn BackgroundData>, Arc<dyn ThermodynamicsData>)> {
        let background = Arc::new(AnalyticBackground::new(native, &self.config)?);
        let thermodynamics = AnalyticThermodynamics::new(native, Arc::clone(&background))?;
        Ok((background, Arc::new(thermodynamics)))
    }

    fn transfer(&self, native: &NativeParams) -> SolverResult<Arc<dyn TransferData>> {
        let background = Arc::new(AnalyticBackground::new(native, &self.config)?);
        Ok(Arc::new(AnalyticTransfer::new(native, background, &self.config)?))
    }

    fn power_spectra(
        &self,
        native: &NativeParams,
        transfer: &Arc<dyn TransferData>,
    ) -> SolverResult<Arc<dyn SpectraData>> {
        let transfer = transfer
            .as_any()
            .downcast_ref::<AnalyticTransfer>()
            .ok_or_else(|| {
                SolverError::Unsupported("transfer handle produced by another solver".into())
            })?;
        let fit = match &native.non_linear.version {
            Some(version) => Some(Self::halofit_fit(version)?),
            None => None,
        };
        Ok(Arc::new(AnalyticSpectra::new(native, transfer.clone(), fit)?))
    }

    fn boxed_clone(&self) -> Box<dyn BoltzmannSolver> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{CanonicalParameters, ParamMap};
    use crate::solver::TransferVariable;
    use crate::translate::translate;

    fn native(inputs: Vec<(&str, crate::params::ParamValue)>) -> NativeParams {
        let params = CanonicalParameters::new(inputs).unwrap();
        translate(&params, &ParamMap::new(), &EisensteinHuSolver::default()).unwrap()
    }

    #[test]
    fn test_rejects_unknown_extra() {
        let mut n = native(vec![]);
        n.extra.insert("bogus".into(), 1.0.into());
        let err = EisensteinHuSolver::default().validate(&n).unwrap_err();
        assert_eq!(err, SolverError::UnknownArgument("bogus".into()));
    }

    #[test]
    fn test_rejects_vector_modes() {
        let mut n = native(vec![]);
        n.want_vectors = true;
        assert!(matches!(
            EisensteinHuSolver::default().validate(&n),
            Err(SolverError::Unsupported(_))
        ));
    }

    #[test]
    fn test_full_pipeline_shapes() {
        let solver = EisensteinHuSolver::default();
        let n = native(vec![("z_pk", vec![0.0, 1.0].into())]);
        let transfer = solver.transfer(&n).unwrap();
        let spectra = solver.power_spectra(&n, &transfer).unwrap();
        let pk = spectra
            .matter_power(TransferVariable::DeltaTot, TransferVariable::DeltaTot, false)
            .unwrap();
        assert_eq!(pk.dim(), (solver.config.nk, 2));
        let s8 = spectra.sigma8();
        assert_eq!(s8.len(), 2);
        assert!(s8[0] > s8[1], "sigma8 should decrease with z: {:?}", s8);
        assert!(s8[0] > 0.6 && s8[0] < 1.0, "sigma8(0)={}", s8[0]);
    }
}
