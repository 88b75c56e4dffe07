//! Lazy, dependency-ordered computation of physics stages.
//!
//! An [`Engine`] binds one canonical parameter set to one solver. Callers ask
//! for sections ([`Engine::background`], [`Engine::fourier`], ...); each
//! section first asks the engine to [`compute`](Engine::compute) its stage,
//! which resolves prerequisites and runs only the stages that are not ready.
//!
//! # Invariants
//!
//! - **Exactly once**: a stage's solver call runs at most once until an
//!   explicit invalidation makes it stale again.
//! - **One transition function**: [`ReadyFlags`] change only through
//!   [`ReadyFlags::mark`]. The only downgrade is `harmonic` clearing `fourier`.
//! - **Error boundary**: a [`SolverError`](crate::solver::SolverError) never
//!   escapes; it is wrapped into [`CosmologyError`] with the original as source.
//! - **Single amplitude patch**: the native amplitude is modified at most once,
//!   by the non-linear sigma8 rescaling path.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{CosmologyError, CosmologyResult};
use crate::params::{Amplitude, CanonicalParameters, ParamMap, ParamValue};
use crate::sections::{Background, Fourier, Harmonic, Primordial, Thermodynamics, Transfer};
use crate::solver::{
    solver_from_name, wrap_solver_error, BackgroundData, BoltzmannSolver, SpectraData,
    ThermodynamicsData, TransferData,
};
use crate::tasks::{resolve, Stage, StageSet};
use crate::translate::{translate, NativeParams};

// ─── Configuration ─────────────────────────────────────────────────────────

/// Engine tuning.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    /// Largest |ratio − 1| accepted after the non-linear sigma8 recompute.
    pub sigma8_rtol: f64,
}

impl EngineConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { sigma8_rtol: 1e-3 }
    }
}

// ─── Ready flags ───────────────────────────────────────────────────────────

/// Which stages are up to date.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadyFlags {
    background: bool,
    thermodynamics: bool,
    transfer: bool,
    harmonic: bool,
    lensing: bool,
    fourier: bool,
}

impl ReadyFlags {
    /// Whether `stage` is ready.
    pub fn is_ready(&self, stage: Stage) -> bool {
        match stage {
            Stage::Background => self.background,
            Stage::Thermodynamics => self.thermodynamics,
            Stage::Transfer => self.transfer,
            Stage::Harmonic => self.harmonic,
            Stage::Lensing => self.lensing,
            Stage::Fourier => self.fourier,
        }
    }

    /// All ready stages.
    pub fn stages(&self) -> StageSet {
        Stage::ALL.iter().copied().filter(|s| self.is_ready(*s)).collect()
    }

    /// Record that `stage` has just been executed.
    pub(crate) fn mark(&mut self, stage: Stage) {
        match stage {
            Stage::Background => self.background = true,
            Stage::Thermodynamics => {
                self.background = true;
                self.thermodynamics = true;
            }
            Stage::Transfer => self.transfer = true,
            Stage::Harmonic => {
                self.harmonic = true;
                // Spectra must be recomputed against the harmonic configuration.
                self.fourier = false;
            }
            Stage::Lensing => {
                self.lensing = true;
                self.fourier = true;
            }
            Stage::Fourier => self.fourier = true,
        }
    }
}

// ─── Engine ────────────────────────────────────────────────────────────────

/// One cosmology bound to one solver.
#[derive(Debug)]
pub struct Engine {
    solver: Box<dyn BoltzmannSolver>,
    params: CanonicalParameters,
    extra: ParamMap,
    native: NativeParams,
    config: EngineConfig,
    ready: ReadyFlags,
    background: Option<Arc<dyn BackgroundData>>,
    thermodynamics: Option<Arc<dyn ThermodynamicsData>>,
    transfer: Option<Arc<dyn TransferData>>,
    spectra: Option<Arc<dyn SpectraData>>,
    sigma8_ratio: Option<f64>,
}

impl Engine {
    /// Translate `params` (with `extra` on top) for `solver`.
    ///
    /// Fails with an input error if the solver rejects the translated set.
    pub fn new(
        params: CanonicalParameters,
        extra: ParamMap,
        solver: Box<dyn BoltzmannSolver>,
    ) -> CosmologyResult<Self> {
        let native = translate(&params, &extra, solver.as_ref())?;
        debug!(solver = solver.name(), "engine initialised");
        Ok(Self {
            solver,
            params,
            extra,
            native,
            config: EngineConfig::default(),
            ready: ReadyFlags::default(),
            background: None,
            thermodynamics: None,
            transfer: None,
            spectra: None,
            sigma8_ratio: None,
        })
    }

    /// Look the solver up in the registry by name.
    pub fn from_registry(
        name: &str,
        params: CanonicalParameters,
        extra: ParamMap,
    ) -> CosmologyResult<Self> {
        Self::new(params, extra, solver_from_name(name)?)
    }

    /// Replace the engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// New engine with `overrides` applied to the canonical parameters; same
    /// solver, extra parameters and configuration, nothing computed.
    pub fn clone_with<K, V, I>(&self, overrides: I) -> CosmologyResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ParamValue>,
    {
        let params = self.params.clone_with(overrides)?;
        Ok(Self::new(params, self.extra.clone(), self.solver.clone())?.with_config(self.config.clone()))
    }

    // ── Accessors ──

    /// Canonical parameters.
    pub fn params(&self) -> &CanonicalParameters {
        &self.params
    }

    /// Extra-parameter overlay.
    pub fn extra_params(&self) -> &ParamMap {
        &self.extra
    }

    /// Translated solver-native parameters.
    pub fn native_params(&self) -> &NativeParams {
        &self.native
    }

    /// Registry name of the solver.
    pub fn solver_name(&self) -> &'static str {
        self.solver.name()
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current ready flags.
    pub fn ready(&self) -> &ReadyFlags {
        &self.ready
    }

    // ── Computation ──

    /// Run every stage needed for `stages` that is not ready yet.
    pub fn compute(&mut self, stages: impl Into<StageSet>) -> CosmologyResult<()> {
        let stages = resolve(stages.into());
        for stage in stages.iter() {
            if self.ready.is_ready(stage) {
                continue;
            }
            debug!(stage = %stage, solver = self.solver.name(), "computing stage");
            self.run(stage)
                .map_err(|err| wrap_solver_error(stage.as_str(), err))?;
            self.ready.mark(stage);
        }
        Ok(())
    }

    fn run(&mut self, stage: Stage) -> crate::solver::SolverResult<()> {
        match stage {
            Stage::Background => {
                self.background = Some(self.solver.background(&self.native)?);
            }
            Stage::Thermodynamics => {
                let (background, thermodynamics) = self.solver.thermodynamics(&self.native)?;
                self.background = Some(background);
                self.thermodynamics = Some(thermodynamics);
            }
            Stage::Transfer => {
                self.transfer = Some(self.solver.transfer(&self.native)?);
            }
            Stage::Harmonic => {}
            Stage::Lensing => {
                self.native.do_lensing = true;
                self.native.want_cmb_lensing = true;
                let transfer = self.solver.transfer(&self.native)?;
                self.spectra = Some(self.solver.power_spectra(&self.native, &transfer)?);
                self.transfer = Some(transfer);
            }
            Stage::Fourier => {
                let transfer = self.transfer_or_run()?;
                self.spectra = Some(self.solver.power_spectra(&self.native, &transfer)?);
            }
        }
        Ok(())
    }

    fn transfer_or_run(&mut self) -> crate::solver::SolverResult<Arc<dyn TransferData>> {
        match &self.transfer {
            Some(transfer) => Ok(Arc::clone(transfer)),
            None => {
                let transfer = self.solver.transfer(&self.native)?;
                self.transfer = Some(Arc::clone(&transfer));
                self.ready.mark(Stage::Transfer);
                Ok(transfer)
            }
        }
    }

    // ── Sigma8 rescaling ──

    /// Linear σ₈ at the lowest computed redshift, as reported by the solver.
    fn measured_sigma8(&self) -> CosmologyResult<f64> {
        let spectra = self.spectra_handle()?;
        let sigma8 = spectra.sigma8();
        let lowest = spectra
            .redshifts()
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .ok_or_else(|| CosmologyError::computation("power spectra have no redshift"))?;
        match sigma8.get(lowest) {
            Some(s) if s.is_finite() && *s > 0.0 => Ok(*s),
            other => Err(CosmologyError::computation(format!(
                "solver reported an invalid sigma8: {other:?}"
            ))),
        }
    }

    /// Amplitude correction that reproduces the target σ₈ (1 when `A_s` is free).
    ///
    /// Computed once per engine. With a non-linear model the primordial
    /// amplitude is patched by ratio² and the spectra recomputed, since a
    /// non-linear spectrum cannot be rescaled after the fact; the returned
    /// ratio is then the re-measured one (≈ 1).
    pub fn rescale_sigma8(&mut self) -> CosmologyResult<f64> {
        if let Some(ratio) = self.sigma8_ratio {
            return Ok(ratio);
        }
        let ratio = match self.params.amplitude() {
            Amplitude::AS(_) => 1.0,
            Amplitude::Sigma8(target) => {
                self.compute(Stage::Fourier)?;
                let measured = self.measured_sigma8()?;
                let mut ratio = target / measured;
                if self.native.non_linear.is_enabled() {
                    self.native.a_s *= ratio * ratio;
                    let transfer = self.transfer_or_run().map_err(|e| wrap_solver_error("fourier", e))?;
                    self.spectra = Some(
                        self.solver
                            .power_spectra(&self.native, &transfer)
                            .map_err(|e| wrap_solver_error("fourier", e))?,
                    );
                    let remeasured = self.measured_sigma8()?;
                    ratio = target / remeasured;
                    if (ratio - 1.0).abs() > self.config.sigma8_rtol {
                        return Err(CosmologyError::computation(format!(
                            "sigma8 rescaling did not converge: target {target}, got {remeasured}"
                        )));
                    }
                }
                info!(target, measured, ratio, a_s = self.native.a_s, "sigma8 rescaled");
                ratio
            }
        };
        self.sigma8_ratio = Some(ratio);
        Ok(ratio)
    }

    // ── Handles ──

    fn missing(stage: Stage) -> CosmologyError {
        CosmologyError::computation(format!("stage '{stage}' has not produced its solver output"))
    }

    pub(crate) fn background_handle(&self) -> CosmologyResult<Arc<dyn BackgroundData>> {
        self.background.clone().ok_or_else(|| Self::missing(Stage::Background))
    }

    pub(crate) fn thermodynamics_handle(&self) -> CosmologyResult<Arc<dyn ThermodynamicsData>> {
        self.thermodynamics
            .clone()
            .ok_or_else(|| Self::missing(Stage::Thermodynamics))
    }

    pub(crate) fn transfer_handle(&self) -> CosmologyResult<Arc<dyn TransferData>> {
        self.transfer.clone().ok_or_else(|| Self::missing(Stage::Transfer))
    }

    pub(crate) fn spectra_handle(&self) -> CosmologyResult<Arc<dyn SpectraData>> {
        self.spectra.clone().ok_or_else(|| Self::missing(Stage::Fourier))
    }

    // ── Sections ──

    /// Background section.
    pub fn background(&mut self) -> CosmologyResult<Background> {
        Background::new(self)
    }

    /// Thermodynamics section.
    pub fn thermodynamics(&mut self) -> CosmologyResult<Thermodynamics> {
        Thermodynamics::new(self)
    }

    /// Transfer section.
    pub fn transfer(&mut self) -> CosmologyResult<Transfer> {
        Transfer::new(self)
    }

    /// Primordial section.
    pub fn primordial(&mut self) -> CosmologyResult<Primordial> {
        Primordial::new(self)
    }

    /// Harmonic section.
    pub fn harmonic(&mut self) -> CosmologyResult<Harmonic> {
        Harmonic::new(self)
    }

    /// Fourier section.
    pub fn fourier(&mut self) -> CosmologyResult<Fourier> {
        Fourier::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytic::EisensteinHuSolver;

    fn engine(inputs: Vec<(&str, ParamValue)>) -> Engine {
        let params = CanonicalParameters::new(inputs).unwrap();
        Engine::new(params, ParamMap::new(), Box::new(EisensteinHuSolver::default())).unwrap()
    }

    // ── ReadyFlags ──

    #[test]
    fn test_thermodynamics_marks_background() {
        let mut flags = ReadyFlags::default();
        flags.mark(Stage::Thermodynamics);
        assert!(flags.is_ready(Stage::Background));
        assert!(flags.is_ready(Stage::Thermodynamics));
    }

    #[test]
    fn test_harmonic_clears_fourier_and_lensing_restores_it() {
        let mut flags = ReadyFlags::default();
        flags.mark(Stage::Fourier);
        flags.mark(Stage::Harmonic);
        assert!(!flags.is_ready(Stage::Fourier));
        flags.mark(Stage::Lensing);
        assert!(flags.is_ready(Stage::Fourier));
        assert!(flags.is_ready(Stage::Lensing));
    }

    // ── Engine ──

    #[test]
    fn test_initial_state_all_false() {
        let e = engine(vec![]);
        assert!(e.ready().stages().is_empty());
    }

    #[test]
    fn test_compute_fourier_runs_transfer() {
        let mut e = engine(vec![]);
        e.compute(Stage::Fourier).unwrap();
        assert!(e.ready().is_ready(Stage::Transfer));
        assert!(e.ready().is_ready(Stage::Fourier));
        assert!(!e.ready().is_ready(Stage::Background));
    }

    #[test]
    fn test_lensing_gives_new_transfer_identity() {
        let mut e = engine(vec![]);
        e.compute(Stage::Fourier).unwrap();
        let before = e.transfer_handle().unwrap();
        e.compute(Stage::Lensing).unwrap();
        let after = e.transfer_handle().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(after.lensing());
        assert!(e.native_params().do_lensing);
    }

    #[test]
    fn test_from_registry_unknown_name() {
        let err = Engine::from_registry("nope", CanonicalParameters::fiducial(), ParamMap::new()).unwrap_err();
        assert!(err.is_input());
    }

    #[test]
    fn test_rejected_extra_is_input_error() {
        let mut extra = ParamMap::new();
        extra.insert("not_a_key".into(), 1.0.into());
        let err = Engine::new(CanonicalParameters::fiducial(), extra, Box::new(EisensteinHuSolver::default()))
            .unwrap_err();
        assert!(err.is_input());
    }

    #[test]
    fn test_rescale_is_one_for_free_a_s_and_cached() {
        let mut e = engine(vec![]);
        assert_eq!(e.rescale_sigma8().unwrap(), 1.0);
        assert!(!e.ready().is_ready(Stage::Fourier));

        let mut e = engine(vec![("sigma8", 0.8.into())]);
        let first = e.rescale_sigma8().unwrap();
        let second = e.rescale_sigma8().unwrap();
        assert_eq!(first, second);
        assert!(first > 0.0);
    }

    #[test]
    fn test_non_linear_rescale_patches_amplitude() {
        let mut e = engine(vec![("sigma8", 0.7.into()), ("non_linear", "halofit".into())]);
        let a_s = e.native_params().a_s;
        let ratio = e.rescale_sigma8().unwrap();
        assert!((ratio - 1.0).abs() < 1e-3, "ratio={}", ratio);
        assert!(e.native_params().a_s != a_s);
    }

    #[test]
    fn test_clone_with_starts_fresh() {
        let mut e = engine(vec![]);
        e.compute(Stage::Background).unwrap();
        let c = e.clone_with([("h", 0.7)]).unwrap();
        assert!(c.ready().stages().is_empty());
        assert!((c.native_params().h0 - 70.0).abs() < 1e-12);
    }
}
