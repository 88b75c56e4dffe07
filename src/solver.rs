//! Capability contract of a Boltzmann solver.
//!
//! The engine never looks inside a solver. It hands over a translated
//! [`NativeParams`] and receives opaque, shareable handles
//! ([`BackgroundData`], [`ThermodynamicsData`], [`TransferData`],
//! [`SpectraData`]) that sections read from. Handles are `Arc`-shared so a
//! section keeps reading the objects that were current when it was built.
//!
//! Solver failures are reported as [`SolverError`] and never reach callers
//! directly: the engine wraps them into
//! [`CosmologyError`](crate::error::CosmologyError).
//!
//! Units follow the native solver convention: lengths in Mpc, wavenumbers in
//! 1/Mpc, H in km/s/Mpc, densities as 8πG a⁴ρ in Mpc⁻².

use std::any::Any;
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;

use ndarray::Array2;
use thiserror::Error;

use crate::analytic::EisensteinHuSolver;
use crate::error::{CosmologyError, CosmologyResult};
use crate::translate::NativeParams;

// ─── Errors ────────────────────────────────────────────────────────────────

/// Solver-native failure.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolverError {
    /// A parameter lies outside the range the solver supports.
    #[error("parameter {name} = {value} is out of range: {reason}")]
    ParamRange {
        /// Native parameter name.
        name: String,
        /// Offending value.
        value: f64,
        /// What the solver expected.
        reason: String,
    },
    /// Inconsistent combination of values.
    #[error("invalid value: {0}")]
    Value(String),
    /// An extra parameter the solver does not recognise.
    #[error("unknown argument '{0}'")]
    UnknownArgument(String),
    /// The request is valid but this solver cannot serve it.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// The run produced a non-finite quantity.
    #[error("non-finite {0}")]
    NonFinite(String),
}

/// Result alias for solver calls.
pub type SolverResult<T> = Result<T, SolverError>;

/// Wrap a solver failure into the caller-facing error kinds.
///
/// Non-finite output is a computation error; every other rejection is an
/// input error, with the solver error kept as source.
pub fn wrap_solver_error(context: &str, err: SolverError) -> CosmologyError {
    match err {
        SolverError::NonFinite(_) => {
            CosmologyError::computation_from(format!("{context}: solver produced non-finite output"), err)
        }
        other => CosmologyError::input_from(format!("{context}: solver rejected the parameters"), other),
    }
}

// ─── Vocabulary ────────────────────────────────────────────────────────────

/// Energy-density component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Species {
    /// Cold dark matter.
    Cdm,
    /// Baryons.
    Baryon,
    /// Photons.
    Photon,
    /// Massless neutrinos / ultra-relativistic species.
    MasslessNeutrino,
    /// Massive neutrinos (all species).
    MassiveNeutrino,
    /// Cosmological constant or dark-energy fluid.
    DarkEnergy,
    /// Spatial curvature.
    Curvature,
}

impl Species {
    /// Every component, curvature included.
    pub const ALL: [Species; 7] = [
        Species::Cdm,
        Species::Baryon,
        Species::Photon,
        Species::MasslessNeutrino,
        Species::MassiveNeutrino,
        Species::DarkEnergy,
        Species::Curvature,
    ];
}

/// Primordial perturbation mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Scalar (curvature) perturbations.
    Scalar,
    /// Vector perturbations.
    Vector,
    /// Tensor perturbations.
    Tensor,
}

impl FromStr for Mode {
    type Err = CosmologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scalar" | "s" => Ok(Mode::Scalar),
            "vector" | "v" => Ok(Mode::Vector),
            "tensor" | "t" => Ok(Mode::Tensor),
            other => Err(CosmologyError::input(format!("unknown mode '{other}'"))),
        }
    }
}

/// Native transfer-function variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransferVariable {
    /// CDM density contrast.
    DeltaCdm,
    /// Baryon density contrast.
    DeltaBaryon,
    /// Total matter density contrast.
    DeltaTot,
    /// CDM + baryon density contrast (no massive neutrinos).
    DeltaNonu,
    /// Weyl potential k²(Φ+Ψ)/2.
    Weyl,
    /// Newtonian-gauge CDM velocity divergence.
    VNewtonianCdm,
    /// Newtonian-gauge baryon velocity divergence.
    VNewtonianBaryon,
}

impl TransferVariable {
    /// Every variable, in table column order.
    pub const ALL: [TransferVariable; 7] = [
        TransferVariable::DeltaCdm,
        TransferVariable::DeltaBaryon,
        TransferVariable::DeltaTot,
        TransferVariable::DeltaNonu,
        TransferVariable::Weyl,
        TransferVariable::VNewtonianCdm,
        TransferVariable::VNewtonianBaryon,
    ];

    /// Native column name.
    pub fn as_str(self) -> &'static str {
        match self {
            TransferVariable::DeltaCdm => "delta_cdm",
            TransferVariable::DeltaBaryon => "delta_baryon",
            TransferVariable::DeltaTot => "delta_tot",
            TransferVariable::DeltaNonu => "delta_nonu",
            TransferVariable::Weyl => "Weyl",
            TransferVariable::VNewtonianCdm => "v_newtonian_cdm",
            TransferVariable::VNewtonianBaryon => "v_newtonian_baryon",
        }
    }
}

// ─── Handles ───────────────────────────────────────────────────────────────

/// Expansion history.
pub trait BackgroundData: Send + Sync + Debug {
    /// Hubble constant in km/s/Mpc.
    fn h0(&self) -> f64;
    /// Curvature density fraction today.
    fn omega_k(&self) -> f64;
    /// H(z) in km/s/Mpc.
    fn hubble(&self, z: f64) -> f64;
    /// Comoving radial distance χ(z) in Mpc.
    fn comoving_radial_distance(&self, z: f64) -> f64;
    /// Cosmic time at z in Gyr.
    fn physical_time(&self, z: f64) -> f64;
    /// 8πG a⁴ ρ_species(z) in Mpc⁻².
    fn density(&self, species: Species, z: f64) -> f64;
}

/// Recombination, drag epoch and reionization quantities.
pub trait ThermodynamicsData: Send + Sync + Debug {
    /// Redshift of last scattering.
    fn z_star(&self) -> f64;
    /// Comoving sound horizon at `z_star`, Mpc.
    fn rs_star(&self) -> f64;
    /// Baryon drag redshift.
    fn z_drag(&self) -> f64;
    /// Comoving sound horizon at `z_drag`, Mpc.
    fn rs_drag(&self) -> f64;
    /// Reionization optical depth.
    fn tau_reio(&self) -> f64;
    /// Mid-point reionization redshift.
    fn z_reio(&self) -> f64;
    /// Helium mass fraction actually used.
    fn yhe(&self) -> f64;
    /// Approximate angular sound horizon θ_MC (radians).
    fn theta_cosmomc(&self) -> f64;
    /// Comoving sound horizon at redshift `z`, Mpc.
    fn sound_horizon(&self, z: f64) -> f64;
}

/// Transfer functions normalised to unit primordial curvature.
pub trait TransferData: Send + Sync + Debug {
    /// Wavenumbers in 1/Mpc, ascending.
    fn k(&self) -> &[f64];
    /// Redshifts, ascending.
    fn redshifts(&self) -> &[f64];
    /// Table of `variable`, shape (nk, nz).
    fn transfer(&self, variable: TransferVariable) -> SolverResult<Array2<f64>>;
    /// Whether lensing was switched on for this run.
    fn lensing(&self) -> bool;
    /// Downcast hook for the solver that produced this handle.
    fn as_any(&self) -> &dyn Any;
}

/// Power spectra computed from a transfer run.
pub trait SpectraData: Send + Sync + Debug {
    /// Wavenumbers in 1/Mpc, ascending.
    fn k(&self) -> &[f64];
    /// Redshifts, ascending.
    fn redshifts(&self) -> &[f64];
    /// Cross power spectrum of two variables, shape (nk, nz), Mpc³.
    fn matter_power(
        &self,
        var1: TransferVariable,
        var2: TransferVariable,
        non_linear: bool,
    ) -> SolverResult<Array2<f64>>;
    /// Linear σ₈ per redshift, in [`SpectraData::redshifts`] order.
    fn sigma8(&self) -> Vec<f64>;
    /// Whether a non-linear model was applied.
    fn has_non_linear(&self) -> bool;
    /// Whether lensing was switched on.
    fn lensing(&self) -> bool;
    /// Dimensionless unlensed C_ℓ, shape (lmax+1, 4): TT, EE, BB, TE.
    fn unlensed_cls(&self, lmax: usize) -> SolverResult<Array2<f64>>;
    /// Dimensionless lensed C_ℓ, shape (lmax+1, 4): TT, EE, BB, TE.
    fn lensed_cls(&self, lmax: usize) -> SolverResult<Array2<f64>>;
    /// Lensing potential C_ℓ, shape (lmax+1, 3): φφ, Tφ, Eφ.
    fn lens_potential_cls(&self, lmax: usize) -> SolverResult<Array2<f64>>;
}

// ─── Solver ────────────────────────────────────────────────────────────────

/// A Boltzmann solver or fitting-function engine.
pub trait BoltzmannSolver: Send + Sync + Debug {
    /// Registry name.
    fn name(&self) -> &'static str;

    /// Keyword names accepted by the solver's non-linear model configuration.
    /// Only these are captured from the extra parameters by the translator.
    fn non_linear_keywords(&self) -> &'static [&'static str];

    /// Check a translated parameter set before any stage runs.
    fn validate(&self, native: &NativeParams) -> SolverResult<()>;

    /// Background-only run.
    fn background(&self, native: &NativeParams) -> SolverResult<Arc<dyn BackgroundData>>;

    /// Background plus thermal history.
    fn thermodynamics(
        &self,
        native: &NativeParams,
    ) -> SolverResult<(Arc<dyn BackgroundData>, Arc<dyn ThermodynamicsData>)>;

    /// Transfer-function run.
    fn transfer(&self, native: &NativeParams) -> SolverResult<Arc<dyn TransferData>>;

    /// Power spectra from an existing transfer run.
    fn power_spectra(
        &self,
        native: &NativeParams,
        transfer: &Arc<dyn TransferData>,
    ) -> SolverResult<Arc<dyn SpectraData>>;

    /// Clone behind a box.
    fn boxed_clone(&self) -> Box<dyn BoltzmannSolver>;
}

impl Clone for Box<dyn BoltzmannSolver> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

// ─── Registry ──────────────────────────────────────────────────────────────

type SolverFactory = fn() -> Box<dyn BoltzmannSolver>;

fn eisenstein_hu() -> Box<dyn BoltzmannSolver> {
    Box::new(EisensteinHuSolver::default())
}

/// Registered solver names and factories.
const SOLVERS: &[(&str, SolverFactory)] = &[("eisenstein_hu", eisenstein_hu)];

/// Names of all registered solvers.
pub fn solver_names() -> Vec<&'static str> {
    SOLVERS.iter().map(|(name, _)| *name).collect()
}

/// Instantiate a registered solver by name.
pub fn solver_from_name(name: &str) -> CosmologyResult<Box<dyn BoltzmannSolver>> {
    SOLVERS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, factory)| factory())
        .ok_or_else(|| {
            CosmologyError::input(format!(
                "unknown solver '{name}' (available: {:?})",
                solver_names()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_registry_lookup() {
        let solver = solver_from_name("eisenstein_hu").unwrap();
        assert_eq!(solver.name(), "eisenstein_hu");
        assert!(solver_from_name("class").unwrap_err().is_input());
    }

    #[test]
    fn test_wrap_non_finite_is_computation() {
        let err = wrap_solver_error("fourier", SolverError::NonFinite("sigma8".into()));
        assert!(err.is_computation());
        let err = wrap_solver_error("fourier", SolverError::UnknownArgument("foo".into()));
        assert!(err.is_input());
        assert_eq!(err.source().map(|s| s.to_string()).as_deref(), Some("unknown argument 'foo'"));
    }
}
