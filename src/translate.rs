//! Canonical → solver-native parameter translation.
//!
//! The native convention is the one of CAMB-style solvers: physical densities
//! (`ombh2`, `omch2`), `H0` in km/s/Mpc, wavenumbers in 1/Mpc, redshifts sorted
//! in decreasing order, neutrinos described by degeneracy factors and mass
//! fractions rather than per-species temperatures.
//!
//! # Invariants
//!
//! - **Overlay wins**: the extra-parameter overlay is merged on top of the
//!   canonical values before anything is read.
//! - **Consumed keys vanish**: every key with a native meaning is removed from
//!   the working map; whatever remains is passed through verbatim in
//!   [`NativeParams::extra`] for the solver to accept or reject.
//! - **One error kind**: any rejection surfaces as
//!   [`CosmologyError::Input`], with the solver's error as source.

use std::collections::BTreeMap;

use tracing::warn;

use crate::constants::FIDUCIAL_A_S;
use crate::error::{CosmologyError, CosmologyResult};
use crate::params::{
    ncdm_physical_density, neutrino_degeneracy, CanonicalParameters, ParamMap, ParamValue,
};
use crate::solver::{wrap_solver_error, BoltzmannSolver};

// ─── Native structure ──────────────────────────────────────────────────────

/// Dark-energy model selected from `w0_fld`, `wa_fld`, `cs2_fld`, `use_ppf`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DarkEnergy {
    /// Cosmological constant.
    Lambda,
    /// Fluid with sound speed `cs2`.
    Fluid {
        /// w₀.
        w: f64,
        /// wₐ.
        wa: f64,
        /// Rest-frame sound speed squared.
        cs2: f64,
    },
    /// Parametrised post-Friedmann fluid (allows crossing w = −1).
    Ppf {
        /// w₀.
        w: f64,
        /// wₐ.
        wa: f64,
    },
}

impl DarkEnergy {
    /// (w₀, wₐ) of the model.
    pub fn w0_wa(&self) -> (f64, f64) {
        match *self {
            DarkEnergy::Lambda => (-1.0, 0.0),
            DarkEnergy::Fluid { w, wa, .. } | DarkEnergy::Ppf { w, wa } => (w, wa),
        }
    }
}

/// Non-linear model identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HalofitVersion {
    /// Smith et al. (2003).
    Original,
    /// Bird et al. (2012).
    Bird,
    /// Peacock fit.
    Peacock,
    /// Takahashi et al. (2012).
    Takahashi,
    /// HMCode (Mead et al. 2015).
    Mead,
    /// HMCode 2016.
    Mead2016,
    /// HMCode 2020.
    Mead2020,
    /// Casarini et al.
    Casarini,
    /// Any other name, passed through.
    Custom(String),
}

impl HalofitVersion {
    /// Map the canonical `non_linear` switch. Empty means linear only.
    pub fn from_switch(switch: &str) -> Option<Self> {
        let version = match switch {
            "" => return None,
            "mead" | "hmcode" => Self::Mead,
            "halofit" | "original" => Self::Original,
            "bird" => Self::Bird,
            "peacock" => Self::Peacock,
            "takahashi" => Self::Takahashi,
            "mead2016" => Self::Mead2016,
            "mead2020" => Self::Mead2020,
            "casarini" => Self::Casarini,
            other => Self::Custom(other.to_string()),
        };
        Some(version)
    }

    /// Native identifier.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Original => "original",
            Self::Bird => "bird",
            Self::Peacock => "peacock",
            Self::Takahashi => "takahashi",
            Self::Mead => "mead",
            Self::Mead2016 => "mead2016",
            Self::Mead2020 => "mead2020",
            Self::Casarini => "casarini",
            Self::Custom(name) => name,
        }
    }
}

/// Non-linear configuration: model plus the options its configuration accepts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NonLinear {
    /// `None` for linear-only runs.
    pub version: Option<HalofitVersion>,
    /// Captured model options (only names the solver declares).
    pub options: BTreeMap<String, ParamValue>,
}

impl NonLinear {
    /// Whether a non-linear model is configured.
    pub fn is_enabled(&self) -> bool {
        self.version.is_some()
    }
}

/// Reionization settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Reionization {
    /// Fixed optical depth; the solver finds the redshift.
    Tau(f64),
    /// Fixed mid-point redshift; the solver computes the optical depth.
    Redshift(f64),
}

/// Solver-native parameter structure.
#[derive(Clone, Debug, PartialEq)]
pub struct NativeParams {
    /// Ω_b h².
    pub ombh2: f64,
    /// Ω_cdm h².
    pub omch2: f64,
    /// Hubble constant, km/s/Mpc.
    pub h0: f64,
    /// Curvature density fraction.
    pub omk: f64,
    /// Reionization history input.
    pub reionization: Reionization,
    /// Width of the tanh reionization transition in redshift.
    pub reion_delta_redshift: f64,
    /// CMB temperature, K.
    pub tcmb: f64,
    /// Lensing amplitude scaling.
    pub alens: f64,
    /// Scalar spectral index.
    pub ns: f64,
    /// Scalar running.
    pub nrun: f64,
    /// Running of running.
    pub nrunrun: f64,
    /// Tensor-to-scalar ratio at the pivot.
    pub r: f64,
    /// Tensor index.
    pub nt: f64,
    /// Tensor running.
    pub ntrun: f64,
    /// Helium fraction; `None` means the solver's BBN prediction.
    pub yhe: Option<f64>,
    /// Effective number of relativistic species.
    pub nnu: f64,
    /// Primordial scalar amplitude (patched by sigma8 rescaling).
    pub a_s: f64,
    /// Scalar pivot, 1/Mpc.
    pub pivot_scalar: f64,
    /// Tensor pivot, 1/Mpc.
    pub pivot_tensor: f64,
    /// Dark-energy model.
    pub dark_energy: DarkEnergy,
    /// Compute the CMB lensing potential.
    pub want_cmb_lensing: bool,
    /// Apply lensing to the CMB spectra.
    pub do_lensing: bool,
    /// Maximum multipole.
    pub lmax: usize,
    /// Output redshifts, decreasing.
    pub redshifts: Vec<f64>,
    /// Maximum wavenumber, 1/Mpc.
    pub kmax: f64,
    /// Non-linear model.
    pub non_linear: NonLinear,
    /// Accuracy of the lensing potential (non-linear lensing runs).
    pub lens_potential_accuracy: f64,
    /// Σ ω_ncdm.
    pub omnuh2: f64,
    /// Massless species count.
    pub num_nu_massless: f64,
    /// Massive species count.
    pub num_nu_massive: usize,
    /// Distinct mass eigenstates.
    pub nu_mass_eigenstates: usize,
    /// Species per eigenstate.
    pub nu_mass_numbers: Vec<u32>,
    /// Fraction of Σ ω_ncdm in each eigenstate.
    pub nu_mass_fractions: Vec<f64>,
    /// Degeneracy factor per eigenstate.
    pub nu_mass_degeneracies: Vec<f64>,
    /// Always `false`: species temperatures are set explicitly.
    pub share_delta_neff: bool,
    /// Scalar modes requested.
    pub want_scalars: bool,
    /// Vector modes requested.
    pub want_vectors: bool,
    /// Tensor modes requested.
    pub want_tensors: bool,
    /// Keys with no native meaning, passed through verbatim.
    pub extra: ParamMap,
}

impl NativeParams {
    /// Reduced Hubble constant.
    pub fn h(&self) -> f64 {
        self.h0 / 100.0
    }
}

// ─── Working map ───────────────────────────────────────────────────────────

/// Mutable view over the merged parameters that removes keys as they are read.
struct Consume {
    map: ParamMap,
}

impl Consume {
    fn take(&mut self, name: &str) -> Option<ParamValue> {
        self.map.remove(name)
    }

    fn scalar(&mut self, name: &str) -> CosmologyResult<f64> {
        self.opt_scalar(name)?
            .ok_or_else(|| CosmologyError::input(format!("missing parameter '{name}'")))
    }

    fn opt_scalar(&mut self, name: &str) -> CosmologyResult<Option<f64>> {
        match self.take(name) {
            None => Ok(None),
            Some(v) => v.as_scalar().map(Some).ok_or_else(|| {
                CosmologyError::input(format!("parameter '{name}' must be a scalar, got {v:?}"))
            }),
        }
    }

    fn array(&mut self, name: &str) -> CosmologyResult<Vec<f64>> {
        match self.take(name) {
            None => Ok(Vec::new()),
            Some(v) => v.as_array().ok_or_else(|| {
                CosmologyError::input(format!("parameter '{name}' must be numeric, got {v:?}"))
            }),
        }
    }

    fn flag(&mut self, name: &str, default: bool) -> CosmologyResult<bool> {
        match self.take(name) {
            None => Ok(default),
            Some(v) => v.as_flag().ok_or_else(|| {
                CosmologyError::input(format!("parameter '{name}' must be a boolean, got {v:?}"))
            }),
        }
    }

    fn text(&mut self, name: &str, default: &str) -> CosmologyResult<String> {
        match self.take(name) {
            None => Ok(default.to_string()),
            Some(v) => v.as_text().map(str::to_string).ok_or_else(|| {
                CosmologyError::input(format!("parameter '{name}' must be a string, got {v:?}"))
            }),
        }
    }
}

// ─── Translation ───────────────────────────────────────────────────────────

/// Degeneracy factors and mass fractions for a list of massive species.
///
/// - `masses`: per-species masses in eV.
/// - `t_ratios`: per-species `T_ncdm / T_cmb`.
///
/// Fractions are 1/3 per species when the total mass is zero, whatever the
/// number of species.
pub fn neutrino_eigenstates(masses: &[f64], t_ratios: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let degeneracies = t_ratios.iter().map(|t| neutrino_degeneracy(*t)).collect();
    let total: f64 = masses.iter().sum();
    let fractions = if total == 0.0 {
        vec![1.0 / 3.0; masses.len()]
    } else {
        masses.iter().map(|m| m / total).collect()
    };
    (degeneracies, fractions)
}

/// Translate `params` (with `extra` merged on top) into the native structure
/// expected by `solver`, then let the solver validate it.
pub fn translate(
    params: &CanonicalParameters,
    extra: &ParamMap,
    solver: &dyn BoltzmannSolver,
) -> CosmologyResult<NativeParams> {
    let mut map = params.to_map();
    map.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    let mut work = Consume { map };

    let h = work.scalar("h")?;
    let ombh2 = work.scalar("Omega_b")? * h * h;
    let omch2 = work.scalar("Omega_cdm")? * h * h;

    let reionization = match (work.opt_scalar("z_reio")?, work.opt_scalar("tau_reio")?) {
        (Some(z), _) => Reionization::Redshift(z),
        (None, Some(tau)) => Reionization::Tau(tau),
        (None, None) => return Err(CosmologyError::input("one of tau_reio, z_reio is required")),
    };
    let reion_delta_redshift = work.scalar("reionization_width")?;

    let yhe = match work.take("YHe") {
        Some(ParamValue::Text(rule)) if rule == "BBN" => None,
        Some(v) => Some(v.as_scalar().ok_or_else(|| {
            CosmologyError::input(format!("YHe must be a number or 'BBN', got {v:?}"))
        })?),
        None => None,
    };

    let a_s = work.opt_scalar("A_s")?.unwrap_or(FIDUCIAL_A_S);
    work.take("sigma8");
    let k_pivot = work.scalar("k_pivot")?;

    // Dark energy.
    let w = work.scalar("w0_fld")?;
    let wa = work.scalar("wa_fld")?;
    let cs2 = work.scalar("cs2_fld")?;
    let use_ppf = work.flag("use_ppf", true)?;
    let dark_energy = if w != -1.0 || wa != 0.0 {
        if use_ppf && cs2 == 1.0 {
            DarkEnergy::Ppf { w, wa }
        } else {
            DarkEnergy::Fluid { w, wa, cs2 }
        }
    } else {
        DarkEnergy::Lambda
    };
    if work.take("Omega_Lambda").is_some() && dark_energy != DarkEnergy::Lambda {
        warn!(
            w0 = w,
            wa = wa,
            "Omega_Lambda is set together with dynamical dark energy; the fluid takes the remaining density"
        );
    }

    let lensing = work.flag("lensing", false)?;
    let lmax = work.scalar("ellmax_cl")? as usize;
    let mut redshifts = work.array("z_pk")?;
    redshifts.sort_by(|a, b| b.total_cmp(a));
    redshifts.dedup();
    let kmax = work.scalar("kmax_pk")? * h;

    // Neutrinos.
    let masses = work.array("m_ncdm")?;
    let t_ratios = work.array("T_ncdm_over_cmb")?;
    let num_nu_massless = work.scalar("N_ur")?;
    work.take("neutrino_hierarchy");
    let (nu_mass_degeneracies, nu_mass_fractions) = neutrino_eigenstates(&masses, &t_ratios);
    let omnuh2: f64 = masses
        .iter()
        .zip(&t_ratios)
        .map(|(m, t)| ncdm_physical_density(*m, *t))
        .sum();
    let nnu = num_nu_massless + nu_mass_degeneracies.iter().sum::<f64>();

    let modes = work.text("modes", "s")?;

    // Non-linear model and its options.
    let switch = work.text("non_linear", "")?;
    let mut non_linear = NonLinear {
        version: HalofitVersion::from_switch(&switch),
        options: BTreeMap::new(),
    };
    let mut lens_potential_accuracy = work.opt_scalar("lens_potential_accuracy")?;
    if non_linear.is_enabled() {
        for keyword in solver.non_linear_keywords() {
            if let Some(value) = work.take(keyword) {
                non_linear.options.insert((*keyword).to_string(), value);
            }
        }
        if lensing && lens_potential_accuracy.is_none() {
            lens_potential_accuracy = Some(1.0);
        }
    }

    let native = NativeParams {
        ombh2,
        omch2,
        h0: 100.0 * h,
        omk: work.scalar("Omega_k")?,
        reionization,
        reion_delta_redshift,
        tcmb: work.scalar("T_cmb")?,
        alens: work.scalar("A_L")?,
        ns: work.scalar("n_s")?,
        nrun: work.scalar("alpha_s")?,
        nrunrun: work.scalar("beta_s")?,
        r: work.scalar("r")?,
        nt: work.scalar("n_t")?,
        ntrun: work.scalar("alpha_t")?,
        yhe,
        nnu,
        a_s,
        pivot_scalar: k_pivot,
        pivot_tensor: k_pivot,
        dark_energy,
        want_cmb_lensing: lensing,
        do_lensing: lensing,
        lmax,
        redshifts,
        kmax,
        non_linear,
        lens_potential_accuracy: lens_potential_accuracy.unwrap_or(0.0),
        omnuh2,
        num_nu_massless,
        num_nu_massive: masses.len(),
        nu_mass_eigenstates: masses.len(),
        nu_mass_numbers: vec![1; masses.len()],
        nu_mass_fractions,
        nu_mass_degeneracies,
        share_delta_neff: false,
        want_scalars: modes.contains('s'),
        want_vectors: modes.contains('v'),
        want_tensors: modes.contains('t'),
        extra: work.map,
    };

    solver
        .validate(&native)
        .map_err(|err| wrap_solver_error("parameter translation", err))?;
    Ok(native)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytic::EisensteinHuSolver;
    use crate::constants::standard_neutrino_temperature_ratio;

    fn solver() -> EisensteinHuSolver {
        EisensteinHuSolver::default()
    }

    fn translate_with(
        inputs: Vec<(&str, ParamValue)>,
        extra: Vec<(&str, ParamValue)>,
    ) -> CosmologyResult<NativeParams> {
        let params = CanonicalParameters::new(inputs)?;
        let extra: ParamMap = extra.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        translate(&params, &extra, &solver())
    }

    #[test]
    fn test_physical_densities_and_units() {
        let native = translate_with(
            vec![("h", 0.7.into()), ("Omega_b", 0.05.into()), ("Omega_cdm", 0.25.into())],
            vec![],
        )
        .unwrap();
        assert!((native.ombh2 - 0.05 * 0.49).abs() < 1e-15);
        assert!((native.omch2 - 0.25 * 0.49).abs() < 1e-15);
        assert!((native.h0 - 70.0).abs() < 1e-12);
        assert!((native.kmax - 7.0).abs() < 1e-12);
        assert_eq!(native.pivot_scalar, native.pivot_tensor);
        assert_eq!(native.yhe, None);
    }

    #[test]
    fn test_redshifts_sorted_descending() {
        let native = translate_with(vec![("z_pk", vec![0.5, 0.0, 2.0].into())], vec![]).unwrap();
        assert_eq!(native.redshifts, vec![2.0, 0.5, 0.0]);
    }

    #[test]
    fn test_overlay_wins() {
        let native = translate_with(vec![("h", 0.7.into())], vec![("h", 0.6.into())]).unwrap();
        assert!((native.h0 - 60.0).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_extra_is_input_error() {
        let err = translate_with(vec![], vec![("not_a_solver_key", 1.0.into())]).unwrap_err();
        assert!(err.is_input(), "{err}");
    }

    #[test]
    fn test_accuracy_extras_pass_through() {
        let native = translate_with(vec![], vec![("AccuracyBoost", 2.0.into())]).unwrap();
        assert_eq!(native.extra.get("AccuracyBoost"), Some(&ParamValue::Scalar(2.0)));
    }

    #[test]
    fn test_non_linear_mapping_and_keyword_capture() {
        let native = translate_with(
            vec![("non_linear", "hmcode".into()), ("lensing", true.into())],
            vec![("HMCode_A_baryon", 3.13.into())],
        )
        .unwrap();
        assert_eq!(native.non_linear.version, Some(HalofitVersion::Mead));
        assert_eq!(
            native.non_linear.options.get("HMCode_A_baryon"),
            Some(&ParamValue::Scalar(3.13))
        );
        assert!(native.extra.is_empty());
        assert_eq!(native.lens_potential_accuracy, 1.0);

        let native = translate_with(vec![("non_linear", "halofit".into())], vec![]).unwrap();
        assert_eq!(native.non_linear.version, Some(HalofitVersion::Original));
        assert_eq!(native.lens_potential_accuracy, 0.0);
    }

    #[test]
    fn test_dark_energy_selection() {
        let native = translate_with(vec![("w0_fld", (-0.9).into())], vec![]).unwrap();
        assert_eq!(native.dark_energy, DarkEnergy::Ppf { w: -0.9, wa: 0.0 });
        let native = translate_with(
            vec![("w0_fld", (-0.9).into()), ("cs2_fld", 0.5.into())],
            vec![],
        )
        .unwrap();
        assert_eq!(native.dark_energy, DarkEnergy::Fluid { w: -0.9, wa: 0.0, cs2: 0.5 });
        let native = translate_with(vec![], vec![]).unwrap();
        assert_eq!(native.dark_energy, DarkEnergy::Lambda);
    }

    #[test]
    fn test_standard_temperature_degeneracy_is_one() {
        let t = standard_neutrino_temperature_ratio();
        let (g, _) = neutrino_eigenstates(&[0.06], &[t]);
        assert!((g[0] - 1.0).abs() < 1e-8, "g={}", g[0]);
    }

    #[test]
    fn test_equal_masses_give_thirds() {
        let (_, f) = neutrino_eigenstates(&[0.02, 0.02, 0.02], &[0.716; 3]);
        for fi in &f {
            assert!((fi - 1.0 / 3.0).abs() < 1e-15);
        }
        let (_, f) = neutrino_eigenstates(&[0.0, 0.0, 0.0], &[0.716; 3]);
        assert_eq!(f, vec![1.0 / 3.0; 3]);
    }

    #[test]
    fn test_massless_fractions_are_thirds_for_any_count() {
        let (g, f) = neutrino_eigenstates(&[0.0, 0.0], &[0.71611; 2]);
        assert_eq!(g.len(), 2);
        assert_eq!(f, vec![1.0 / 3.0; 2]);
        let (_, f) = neutrino_eigenstates(&[0.0], &[0.71611]);
        assert_eq!(f, vec![1.0 / 3.0]);
    }

    #[test]
    fn test_neutrino_bookkeeping() {
        let native = translate_with(
            vec![
                ("m_ncdm", vec![0.02, 0.03, 0.05].into()),
                ("T_ncdm_over_cmb", 0.71611.into()),
            ],
            vec![],
        )
        .unwrap();
        assert_eq!(native.num_nu_massive, 3);
        assert_eq!(native.nu_mass_numbers, vec![1, 1, 1]);
        assert!((native.nu_mass_fractions[2] - 0.5).abs() < 1e-12);
        assert!((native.nnu - crate::constants::NEFF).abs() < 1e-10, "nnu={}", native.nnu);
        assert!(!native.share_delta_neff);
    }

    #[test]
    fn test_modes() {
        let native = translate_with(vec![("modes", "st".into())], vec![]).unwrap();
        assert!(native.want_scalars && native.want_tensors && !native.want_vectors);
    }
}
