//! Canonical, engine-independent cosmological parameters.
//!
//! One fixed naming and unit convention: density fractions (not physical
//! densities), dimensionless `h`, neutrino masses in eV per species, `k_pivot`
//! in 1/Mpc, `kmax_pk` in h/Mpc.
//!
//! # Invariants
//!
//! - **Single free amplitude**: exactly one of `A_s`, `ln_1e10_A_s`, `sigma8`
//!   is free. `ln_1e10_A_s` is folded into `A_s` at construction; supplying two
//!   is an input error.
//! - **Immutability**: a set is never mutated after construction. Derived
//!   cosmologies are built with [`CanonicalParameters::clone_with`].
//! - **Closed schema**: unknown names are rejected; solver-specific keys belong in
//!   the engine's extra-parameter overlay instead.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{
    standard_neutrino_temperature_ratio, DELTA_M2_21, DELTA_M2_31_NORMAL, DELTA_M2_32_INVERTED,
    FIDUCIAL_A_S, NCDM_MASS_PER_OMEGA_EV, NEFF, T_NCDM_OVER_CMB,
};
use crate::error::{CosmologyError, CosmologyResult};

// ─── Values ────────────────────────────────────────────────────────────────

/// A single parameter value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean switch.
    Flag(bool),
    /// Real scalar.
    Scalar(f64),
    /// Per-species or per-redshift list.
    Array(Vec<f64>),
    /// Free-form string (model names, modes).
    Text(String),
}

impl ParamValue {
    /// Scalar view; a one-element array also qualifies.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            Self::Array(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }

    /// Array view; a scalar becomes a one-element list.
    pub fn as_array(&self) -> Option<Vec<f64>> {
        match self {
            Self::Scalar(v) => Some(vec![*v]),
            Self::Array(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// String view.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean view.
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Scalar(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Scalar(f64::from(v))
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Flag(v)
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(v: Vec<f64>) -> Self {
        Self::Array(v)
    }
}

impl From<&[f64]> for ParamValue {
    fn from(v: &[f64]) -> Self {
        Self::Array(v.to_vec())
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Free-form name → value mapping, used for raw inputs and for the engine's
/// extra-parameter overlay.
pub type ParamMap = BTreeMap<String, ParamValue>;

// ─── Schema ────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Scalar,
    Array,
    Text,
    Flag,
    /// Scalar, or a named rule such as `YHe = 'BBN'`.
    ScalarOrText,
}

/// Names that may be left unset (no default).
const OPTIONAL: &[(&str, Kind)] = &[
    ("z_reio", Kind::Scalar),
    ("Omega_Lambda", Kind::Scalar),
    ("N_ur", Kind::Scalar),
];

/// The three amplitude parameters; at most one may be supplied.
pub const AMPLITUDE_NAMES: [&str; 3] = ["A_s", "ln_1e10_A_s", "sigma8"];

fn default_table() -> Vec<(&'static str, Kind, ParamValue)> {
    vec![
        ("h", Kind::Scalar, 0.6766.into()),
        ("Omega_b", Kind::Scalar, 0.048_975.into()),
        ("Omega_cdm", Kind::Scalar, 0.260_66.into()),
        ("Omega_k", Kind::Scalar, 0.0.into()),
        ("T_cmb", Kind::Scalar, 2.7255.into()),
        ("m_ncdm", Kind::Array, vec![0.06].into()),
        ("T_ncdm_over_cmb", Kind::Array, vec![T_NCDM_OVER_CMB].into()),
        ("neutrino_hierarchy", Kind::Text, "".into()),
        ("tau_reio", Kind::Scalar, 0.0544.into()),
        ("reionization_width", Kind::Scalar, 0.5.into()),
        ("YHe", Kind::ScalarOrText, "BBN".into()),
        ("n_s", Kind::Scalar, 0.9665.into()),
        ("alpha_s", Kind::Scalar, 0.0.into()),
        ("beta_s", Kind::Scalar, 0.0.into()),
        ("r", Kind::Scalar, 0.0.into()),
        ("n_t", Kind::Scalar, 0.0.into()),
        ("alpha_t", Kind::Scalar, 0.0.into()),
        ("k_pivot", Kind::Scalar, 0.05.into()),
        ("w0_fld", Kind::Scalar, (-1.0).into()),
        ("wa_fld", Kind::Scalar, 0.0.into()),
        ("cs2_fld", Kind::Scalar, 1.0.into()),
        ("use_ppf", Kind::Flag, true.into()),
        ("lensing", Kind::Flag, false.into()),
        ("A_L", Kind::Scalar, 1.0.into()),
        ("ellmax_cl", Kind::Scalar, 2500.0.into()),
        (
            "z_pk",
            Kind::Array,
            vec![0.0, 0.25, 0.5, 0.75, 1.0, 1.5, 2.0, 2.5, 3.0, 4.0, 5.0, 7.0, 10.0].into(),
        ),
        ("kmax_pk", Kind::Scalar, 10.0.into()),
        ("non_linear", Kind::Text, "".into()),
        ("modes", Kind::Text, "s".into()),
    ]
}

fn kind_of(name: &str) -> Option<Kind> {
    if AMPLITUDE_NAMES.contains(&name) {
        return Some(Kind::Scalar);
    }
    if let Some((_, kind)) = OPTIONAL.iter().find(|(n, _)| *n == name) {
        return Some(*kind);
    }
    default_table()
        .into_iter()
        .find(|(n, _, _)| *n == name)
        .map(|(_, kind, _)| kind)
}

fn coerce(name: &str, kind: Kind, value: ParamValue) -> CosmologyResult<ParamValue> {
    let bad = || {
        CosmologyError::input(format!(
            "parameter '{name}' has the wrong type: expected {kind:?}, got {value:?}"
        ))
    };
    match kind {
        Kind::Scalar => value.as_scalar().map(ParamValue::Scalar).ok_or_else(bad),
        Kind::Array => value.as_array().map(ParamValue::Array).ok_or_else(bad),
        Kind::Text => value
            .as_text()
            .map(|s| ParamValue::Text(s.to_string()))
            .ok_or_else(bad),
        Kind::Flag => value.as_flag().map(ParamValue::Flag).ok_or_else(bad),
        Kind::ScalarOrText => match &value {
            ParamValue::Text(_) => Ok(value.clone()),
            _ => value.as_scalar().map(ParamValue::Scalar).ok_or_else(bad),
        },
    }
}

// ─── Amplitude ─────────────────────────────────────────────────────────────

/// Which amplitude parameter is free.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Amplitude {
    /// Raw primordial scalar amplitude.
    AS(f64),
    /// Target present-day σ₈; the primordial amplitude is solved for.
    Sigma8(f64),
}

// ─── Neutrino hierarchy ────────────────────────────────────────────────────

/// Mass ordering used to split a total neutrino mass into three species.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NeutrinoHierarchy {
    /// m₁ < m₂ < m₃.
    Normal,
    /// m₃ < m₁ < m₂.
    Inverted,
    /// Three equal masses.
    Degenerate,
}

impl std::str::FromStr for NeutrinoHierarchy {
    type Err = CosmologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "inverted" => Ok(Self::Inverted),
            "degenerate" => Ok(Self::Degenerate),
            other => Err(CosmologyError::input(format!(
                "unknown neutrino hierarchy '{other}' (expected normal, inverted or degenerate)"
            ))),
        }
    }
}

impl NeutrinoHierarchy {
    /// Three masses (eV) as a function of the lightest one.
    fn masses(self, lightest: f64) -> [f64; 3] {
        let l2 = lightest * lightest;
        match self {
            Self::Normal => [
                lightest,
                (l2 + DELTA_M2_21).sqrt(),
                (l2 + DELTA_M2_31_NORMAL).sqrt(),
            ],
            Self::Inverted => [
                lightest,
                (l2 + DELTA_M2_32_INVERTED - DELTA_M2_21).sqrt(),
                (l2 + DELTA_M2_32_INVERTED).sqrt(),
            ],
            Self::Degenerate => [lightest; 3],
        }
    }

    /// Smallest total mass the ordering allows.
    pub fn minimum_total(self) -> f64 {
        self.masses(0.0).iter().sum()
    }

    /// Split `total` (eV) into three ascending masses.
    ///
    /// Returns an input error when `total` is below [`Self::minimum_total`].
    pub fn split(self, total: f64) -> CosmologyResult<[f64; 3]> {
        if let Self::Degenerate = self {
            return Ok([total / 3.0; 3]);
        }
        let minimum = self.minimum_total();
        if total < minimum {
            return Err(CosmologyError::input(format!(
                "total neutrino mass {total} eV is below the {self:?} hierarchy minimum {minimum:.5} eV"
            )));
        }
        let (mut lo, mut hi) = (0.0f64, total);
        for _ in 0..200 {
            let mid = 0.5 * (lo + hi);
            if self.masses(mid).iter().sum::<f64>() > total {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        let mut masses = self.masses(0.5 * (lo + hi));
        masses.sort_by(f64::total_cmp);
        Ok(masses)
    }
}

// ─── CanonicalParameters ───────────────────────────────────────────────────

/// A validated canonical parameter set.
///
/// Build with [`CanonicalParameters::new`] from any iterator of
/// `(name, value)` pairs; missing names take the fiducial defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanonicalParameters {
    /// The caller's raw inputs, kept for [`CanonicalParameters::clone_with`].
    inputs: ParamMap,
    /// Resolved values (defaults filled, amplitude folded, neutrinos split).
    values: ParamMap,
    amplitude: Amplitude,
}

impl CanonicalParameters {
    /// Validate `inputs` against the schema and fill defaults.
    pub fn new<K, V, I>(inputs: I) -> CosmologyResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ParamValue>,
    {
        let raw: ParamMap = inputs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::from_map(raw)
    }

    /// Whether `name` is part of the canonical vocabulary.
    pub fn is_canonical(name: &str) -> bool {
        kind_of(name).is_some()
    }

    /// Fiducial cosmology (all defaults, `A_s = 2.1e-9`).
    pub fn fiducial() -> Self {
        // Defaults always validate.
        Self::from_map(ParamMap::new()).unwrap_or_else(|_| unreachable!("fiducial defaults are valid"))
    }

    fn from_map(raw: ParamMap) -> CosmologyResult<Self> {
        let mut values = ParamMap::new();
        for (name, _, value) in default_table() {
            values.insert(name.to_string(), value);
        }
        let mut given = ParamMap::new();
        for (name, value) in &raw {
            let kind = kind_of(name).ok_or_else(|| {
                CosmologyError::input(format!(
                    "unknown canonical parameter '{name}' (solver-specific keys go in extra_params)"
                ))
            })?;
            given.insert(name.clone(), coerce(name, kind, value.clone())?);
        }

        // Amplitude.
        let supplied: Vec<&str> = AMPLITUDE_NAMES
            .iter()
            .copied()
            .filter(|n| given.contains_key(*n))
            .collect();
        if supplied.len() > 1 {
            return Err(CosmologyError::input(format!(
                "only one amplitude parameter may be free, got {supplied:?}"
            )));
        }
        let amplitude = match supplied.first().copied() {
            Some("sigma8") => Amplitude::Sigma8(scalar_of(&given, "sigma8")?),
            Some("ln_1e10_A_s") => Amplitude::AS(scalar_of(&given, "ln_1e10_A_s")?.exp() * 1e-10),
            Some(_) => Amplitude::AS(scalar_of(&given, "A_s")?),
            None => Amplitude::AS(FIDUCIAL_A_S),
        };
        for name in AMPLITUDE_NAMES {
            given.remove(name);
        }
        match amplitude {
            Amplitude::AS(a) if !(a > 0.0 && a.is_finite()) => {
                return Err(CosmologyError::input(format!("A_s must be positive, got {a}")));
            }
            Amplitude::Sigma8(s) if !(s > 0.0 && s.is_finite()) => {
                return Err(CosmologyError::input(format!("sigma8 must be positive, got {s}")));
            }
            Amplitude::AS(a) => {
                values.insert("A_s".into(), a.into());
            }
            Amplitude::Sigma8(s) => {
                values.insert("sigma8".into(), s.into());
            }
        }

        // Reionization: one of tau_reio / z_reio.
        if given.contains_key("z_reio") {
            if given.contains_key("tau_reio") {
                return Err(CosmologyError::input(
                    "give either tau_reio or z_reio, not both",
                ));
            }
            values.remove("tau_reio");
        }

        values.extend(given);
        resolve_neutrinos(&mut values)?;
        validate(&values)?;

        Ok(Self {
            inputs: raw,
            values,
            amplitude,
        })
    }

    /// New set with `overrides` applied on top of this set's inputs.
    ///
    /// An override naming a different amplitude parameter (or `z_reio` versus
    /// `tau_reio`) replaces the previously free one.
    pub fn clone_with<K, V, I>(&self, overrides: I) -> CosmologyResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ParamValue>,
    {
        let overrides: ParamMap = overrides
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let mut merged = self.inputs.clone();
        if overrides.keys().any(|k| AMPLITUDE_NAMES.contains(&k.as_str())) {
            for name in AMPLITUDE_NAMES {
                merged.remove(name);
            }
        }
        if overrides.contains_key("z_reio") {
            merged.remove("tau_reio");
        }
        if overrides.contains_key("tau_reio") {
            merged.remove("z_reio");
        }
        merged.extend(overrides);
        Self::from_map(merged)
    }

    // ── Accessors ──

    /// Raw value lookup.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// Whether `name` is set (including defaults).
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// All resolved values, in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Resolved values as a map.
    pub fn to_map(&self) -> ParamMap {
        self.values.clone()
    }

    /// Scalar lookup; input error if missing or not a scalar.
    pub fn scalar(&self, name: &str) -> CosmologyResult<f64> {
        scalar_of(&self.values, name)
    }

    /// Array lookup; input error if missing or not numeric.
    pub fn array(&self, name: &str) -> CosmologyResult<Vec<f64>> {
        self.values
            .get(name)
            .and_then(ParamValue::as_array)
            .ok_or_else(|| CosmologyError::input(format!("parameter '{name}' is not set")))
    }

    /// Text lookup; input error if missing or not a string.
    pub fn text(&self, name: &str) -> CosmologyResult<&str> {
        self.values
            .get(name)
            .and_then(ParamValue::as_text)
            .ok_or_else(|| CosmologyError::input(format!("parameter '{name}' is not set")))
    }

    /// Flag lookup; input error if missing or not boolean.
    pub fn flag(&self, name: &str) -> CosmologyResult<bool> {
        self.values
            .get(name)
            .and_then(ParamValue::as_flag)
            .ok_or_else(|| CosmologyError::input(format!("parameter '{name}' is not set")))
    }

    /// The free amplitude parameter.
    pub fn amplitude(&self) -> Amplitude {
        self.amplitude
    }

    /// Reduced Hubble constant.
    pub fn h(&self) -> f64 {
        self.scalar("h").unwrap_or(0.0)
    }

    /// Number of massive neutrino species.
    pub fn n_ncdm(&self) -> usize {
        self.array("m_ncdm").map(|m| m.len()).unwrap_or(0)
    }

    /// Physical density ω_ncdm = Ω_ncdm h² per massive species.
    pub fn omega_ncdm(&self) -> Vec<f64> {
        let masses = self.array("m_ncdm").unwrap_or_default();
        let temps = self.array("T_ncdm_over_cmb").unwrap_or_default();
        masses
            .iter()
            .zip(temps.iter())
            .map(|(m, t)| ncdm_physical_density(*m, *t))
            .collect()
    }

    /// Total Ω_ncdm today (non-relativistic limit).
    pub fn omega_ncdm_tot(&self) -> f64 {
        let h = self.h();
        self.omega_ncdm().iter().sum::<f64>() / (h * h)
    }

    /// Ω_m = Ω_b + Ω_cdm + Ω_ncdm.
    pub fn omega_m(&self) -> f64 {
        self.scalar("Omega_b").unwrap_or(0.0)
            + self.scalar("Omega_cdm").unwrap_or(0.0)
            + self.omega_ncdm_tot()
    }

    /// Effective number of relativistic species, N_ur + Σ gᵢ.
    pub fn n_eff(&self) -> f64 {
        let n_ur = self.scalar("N_ur").unwrap_or(0.0);
        let temps = self.array("T_ncdm_over_cmb").unwrap_or_default();
        n_ur + temps.iter().map(|t| neutrino_degeneracy(*t)).sum::<f64>()
    }

    /// Whether dark energy is dynamical (w₀ ≠ −1 or wₐ ≠ 0).
    pub fn has_fld(&self) -> bool {
        self.scalar("w0_fld").unwrap_or(-1.0) != -1.0 || self.scalar("wa_fld").unwrap_or(0.0) != 0.0
    }
}

impl Default for CanonicalParameters {
    fn default() -> Self {
        Self::fiducial()
    }
}

/// Degeneracy factor g such that a species at temperature ratio `t_ratio`
/// (relative to T_cmb) has effective temperature g^(1/4) × T_ν,standard.
pub fn neutrino_degeneracy(t_ratio: f64) -> f64 {
    (t_ratio / standard_neutrino_temperature_ratio()).powi(4)
}

/// Physical density ω = Ω h² of one massive species of mass `mass` (eV) at
/// temperature ratio `t_ratio`.
pub fn ncdm_physical_density(mass: f64, t_ratio: f64) -> f64 {
    mass / NCDM_MASS_PER_OMEGA_EV * (t_ratio / T_NCDM_OVER_CMB).powi(3)
}

fn scalar_of(map: &ParamMap, name: &str) -> CosmologyResult<f64> {
    map.get(name)
        .and_then(ParamValue::as_scalar)
        .ok_or_else(|| CosmologyError::input(format!("parameter '{name}' is not set or not a scalar")))
}

fn resolve_neutrinos(values: &mut ParamMap) -> CosmologyResult<()> {
    let mut masses = values
        .get("m_ncdm")
        .and_then(ParamValue::as_array)
        .unwrap_or_default();
    let hierarchy = values
        .get("neutrino_hierarchy")
        .and_then(ParamValue::as_text)
        .unwrap_or("")
        .to_string();
    if !hierarchy.is_empty() {
        let ordering: NeutrinoHierarchy = hierarchy.parse()?;
        match masses.len() {
            1 => masses = ordering.split(masses[0])?.to_vec(),
            3 => {}
            n => {
                return Err(CosmologyError::input(format!(
                    "neutrino_hierarchy needs one total mass, got {n} masses"
                )))
            }
        }
    }
    if masses.iter().any(|m| !(*m >= 0.0)) {
        return Err(CosmologyError::input(format!(
            "neutrino masses must be non-negative, got {masses:?}"
        )));
    }
    let mut temps = values
        .get("T_ncdm_over_cmb")
        .and_then(ParamValue::as_array)
        .unwrap_or_default();
    if temps.len() == 1 && masses.len() != 1 {
        temps = vec![temps[0]; masses.len()];
    }
    if temps.len() != masses.len() {
        return Err(CosmologyError::input(format!(
            "T_ncdm_over_cmb has {} entries for {} massive species",
            temps.len(),
            masses.len()
        )));
    }
    if !values.contains_key("N_ur") {
        let g: f64 = temps.iter().map(|t| neutrino_degeneracy(*t)).sum();
        values.insert("N_ur".into(), (NEFF - g).max(0.0).into());
    }
    values.insert("m_ncdm".into(), masses.into());
    values.insert("T_ncdm_over_cmb".into(), temps.into());
    Ok(())
}

fn validate(values: &ParamMap) -> CosmologyResult<()> {
    let positive = ["h", "Omega_b", "T_cmb", "kmax_pk", "k_pivot"];
    for name in positive {
        let v = scalar_of(values, name)?;
        if !(v > 0.0 && v.is_finite()) {
            return Err(CosmologyError::input(format!("{name} must be positive, got {v}")));
        }
    }
    for name in ["Omega_cdm", "N_ur", "reionization_width"] {
        let v = scalar_of(values, name)?;
        if !(v >= 0.0) {
            return Err(CosmologyError::input(format!("{name} must be non-negative, got {v}")));
        }
    }
    let ellmax = scalar_of(values, "ellmax_cl")?;
    if ellmax < 2.0 || ellmax.fract() != 0.0 {
        return Err(CosmologyError::input(format!(
            "ellmax_cl must be an integer >= 2, got {ellmax}"
        )));
    }
    let z_pk = values
        .get("z_pk")
        .and_then(ParamValue::as_array)
        .unwrap_or_default();
    if z_pk.is_empty() || z_pk.iter().any(|z| !(*z >= 0.0)) {
        return Err(CosmologyError::input(format!(
            "z_pk must be a non-empty list of non-negative redshifts, got {z_pk:?}"
        )));
    }
    let modes = values
        .get("modes")
        .and_then(ParamValue::as_text)
        .unwrap_or("");
    if modes.is_empty() || modes.chars().any(|c| !matches!(c, 's' | 'v' | 't')) {
        return Err(CosmologyError::input(format!(
            "modes must be a combination of 's', 'v', 't', got '{modes}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_canonical_vocabulary() {
        assert!(CanonicalParameters::is_canonical("h"));
        assert!(CanonicalParameters::is_canonical("sigma8"));
        assert!(CanonicalParameters::is_canonical("z_reio"));
        assert!(!CanonicalParameters::is_canonical("halofit_k_per_decade"));
    }

    #[test]
    fn test_fiducial_defaults() {
        let p = CanonicalParameters::fiducial();
        assert_eq!(p.amplitude(), Amplitude::AS(2.1e-9));
        assert_eq!(p.n_ncdm(), 1);
        let n_eff = p.n_eff();
        assert!((n_eff - NEFF).abs() < 1e-12, "n_eff={}", n_eff);
    }

    #[test]
    fn test_ln_amplitude_is_folded() {
        let p = CanonicalParameters::new([("ln_1e10_A_s", 3.044)]).unwrap();
        match p.amplitude() {
            Amplitude::AS(a) => assert!((a - 3.044f64.exp() * 1e-10).abs() < 1e-20),
            other => panic!("unexpected amplitude {other:?}"),
        }
        assert!(p.get("ln_1e10_A_s").is_none());
    }

    #[test]
    fn test_two_amplitudes_rejected() {
        let err = CanonicalParameters::new([("A_s", 2e-9), ("sigma8", 0.8)]).unwrap_err();
        assert!(err.is_input());
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        let err = CanonicalParameters::new([("omega_foo", 1.0)]).unwrap_err();
        assert!(err.is_input(), "{err}");
    }

    #[test]
    fn test_clone_with_switches_amplitude() {
        let p = CanonicalParameters::new([("A_s", 2e-9), ("h", 0.7)]).unwrap();
        let q = p.clone_with([("sigma8", 0.8)]).unwrap();
        assert_eq!(q.amplitude(), Amplitude::Sigma8(0.8));
        assert_eq!(q.scalar("h").unwrap(), 0.7);
        // The original is untouched.
        assert_eq!(p.amplitude(), Amplitude::AS(2e-9));
    }

    #[test]
    fn test_z_reio_replaces_tau() {
        let p = CanonicalParameters::new([("z_reio", 7.5)]).unwrap();
        assert!(p.get("tau_reio").is_none());
        let q = p.clone_with([("tau_reio", 0.06)]).unwrap();
        assert!(q.get("z_reio").is_none());
        assert_eq!(q.scalar("tau_reio").unwrap(), 0.06);
    }

    #[test]
    fn test_normal_hierarchy_split() {
        let p = CanonicalParameters::new([
            ("m_ncdm", ParamValue::from(0.1)),
            ("neutrino_hierarchy", ParamValue::from("normal")),
        ])
        .unwrap();
        let m = p.array("m_ncdm").unwrap();
        assert_eq!(m.len(), 3);
        assert!((m.iter().sum::<f64>() - 0.1).abs() < 1e-10);
        assert!(((m[1] * m[1] - m[0] * m[0]) - DELTA_M2_21).abs() < 1e-10);
        assert!(((m[2] * m[2] - m[0] * m[0]) - DELTA_M2_31_NORMAL).abs() < 1e-10);
    }

    #[test]
    fn test_hierarchy_below_minimum() {
        let err = NeutrinoHierarchy::Inverted.split(0.05).unwrap_err();
        assert!(err.is_input());
        for m in NeutrinoHierarchy::Degenerate.split(0.3).unwrap() {
            assert_relative_eq!(m, 0.1, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_standard_temperature_gives_unit_degeneracy() {
        let g = neutrino_degeneracy(standard_neutrino_temperature_ratio());
        assert!((g - 1.0).abs() < 1e-12, "g={}", g);
    }

    #[test]
    fn test_wrong_type_rejected() {
        let err = CanonicalParameters::new([("h", "seventy")]).unwrap_err();
        assert!(err.is_input());
    }
}
