//! Expansion history: densities, Hubble rate, distances and age.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use ndarray::{Array, ArrayBase, Data, Dimension, Zip};
use num_traits::Float;
use tracing::warn;

use crate::constants::{C_KMS, RHO_CRIT_MSUNPH_PER_MPCPH3};
use crate::engine::Engine;
use crate::error::{CosmologyError, CosmologyResult};
use crate::numeric::{from_f64, map_float};
use crate::sections::{AccessorTable, Section};
use crate::solver::{BackgroundData, Species};
use crate::tasks::Stage;

/// Density component as named in `Omega_<name>` / `rho_<name>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Component {
    /// `k`: spatial curvature.
    Curvature,
    /// `cdm`: cold dark matter.
    Cdm,
    /// `b`: baryons.
    Baryon,
    /// `g`: photons.
    Photon,
    /// `ur`: ultra-relativistic species.
    Ultrarelativistic,
    /// `ncdm_tot`: all massive neutrinos.
    NcdmTot,
    /// `de`: cosmological constant or dark-energy fluid.
    DarkEnergy,
    /// `m`: CDM, baryons and massive neutrinos.
    Matter,
}

impl Component {
    /// Every component.
    pub const ALL: [Component; 8] = [
        Component::Curvature,
        Component::Cdm,
        Component::Baryon,
        Component::Photon,
        Component::Ultrarelativistic,
        Component::NcdmTot,
        Component::DarkEnergy,
        Component::Matter,
    ];

    /// Suffix used in quantity names.
    pub fn as_str(self) -> &'static str {
        match self {
            Component::Curvature => "k",
            Component::Cdm => "cdm",
            Component::Baryon => "b",
            Component::Photon => "g",
            Component::Ultrarelativistic => "ur",
            Component::NcdmTot => "ncdm_tot",
            Component::DarkEnergy => "de",
            Component::Matter => "m",
        }
    }

    fn species(self) -> &'static [Species] {
        match self {
            Component::Curvature => &[Species::Curvature],
            Component::Cdm => &[Species::Cdm],
            Component::Baryon => &[Species::Baryon],
            Component::Photon => &[Species::Photon],
            Component::Ultrarelativistic => &[Species::MasslessNeutrino],
            Component::NcdmTot => &[Species::MassiveNeutrino],
            Component::DarkEnergy => &[Species::DarkEnergy],
            Component::Matter => &[Species::Cdm, Species::Baryon, Species::MassiveNeutrino],
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Component {
    type Err = CosmologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Component::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| CosmologyError::input(format!("unknown density component '{s}'")))
    }
}

/// Background section.
#[derive(Clone, Debug)]
pub struct Background {
    data: Arc<dyn BackgroundData>,
    h: f64,
    /// Curvature K in (h/Mpc)².
    k: f64,
    /// ρ_crit,0 in 10¹⁰ M☉/h / (Mpc/h)³ per unit of solver density × a⁻¹.
    rho_unit: f64,
}

impl Background {
    pub(crate) fn new(engine: &mut Engine) -> CosmologyResult<Self> {
        engine.compute(Stage::Background)?;
        Ok(Self::from_handle(engine.background_handle()?))
    }

    pub(crate) fn from_handle(data: Arc<dyn BackgroundData>) -> Self {
        let h0 = data.h0();
        let h = h0 / 100.0;
        let k = -data.omega_k() * (100.0 / C_KMS).powi(2);
        let rho_unit = RHO_CRIT_MSUNPH_PER_MPCPH3 * (C_KMS / h0).powi(2) / 3.0;
        Self { data, h, k, rho_unit }
    }

    // ── Scalars ──

    /// Reduced Hubble constant.
    pub fn h(&self) -> f64 {
        self.h
    }

    /// Hubble constant in km/s/Mpc.
    pub fn h0(&self) -> f64 {
        100.0 * self.h
    }

    /// Curvature K = −Ω_k (H₀/c)² in (h/Mpc)².
    pub fn curvature(&self) -> f64 {
        self.k
    }

    /// Age of the universe today in Gyr.
    pub fn age(&self) -> f64 {
        self.data.physical_time(0.0)
    }

    // ── Point evaluations ──

    fn omega_at(&self, component: Component, z: f64) -> f64 {
        let total: f64 = Species::ALL.iter().map(|s| self.data.density(*s, z)).sum();
        let part: f64 = component.species().iter().map(|s| self.data.density(*s, z)).sum();
        part / total
    }

    fn rho_at(&self, component: Component, z: f64) -> f64 {
        let part: f64 = component.species().iter().map(|s| self.data.density(*s, z)).sum();
        part * self.rho_unit * (1.0 + z)
    }

    pub(crate) fn chi_at(&self, z: f64) -> f64 {
        self.data.comoving_radial_distance(z) * self.h
    }

    /// Comoving transverse distance (Mpc/h) for a radial distance χ (Mpc/h).
    pub(crate) fn transverse(&self, chi: f64) -> f64 {
        if self.k > 0.0 {
            let s = self.k.sqrt();
            (s * chi).sin() / s
        } else if self.k < 0.0 {
            let s = (-self.k).sqrt();
            (s * chi).sinh() / s
        } else {
            chi
        }
    }

    // ── Arrays ──

    /// Ω_X(z): the component's share of the total density.
    pub fn omega<A, S, D>(&self, component: Component, z: &ArrayBase<S, D>) -> Array<A, D>
    where
        A: Float,
        S: Data<Elem = A>,
        D: Dimension,
    {
        map_float(z, |z| self.omega_at(component, z))
    }

    /// Comoving density ρ_X(z) in 10¹⁰ M☉/h / (Mpc/h)³.
    pub fn rho<A, S, D>(&self, component: Component, z: &ArrayBase<S, D>) -> Array<A, D>
    where
        A: Float,
        S: Data<Elem = A>,
        D: Dimension,
    {
        map_float(z, |z| self.rho_at(component, z))
    }

    /// E(z) = H(z)/H₀.
    pub fn efunc<A, S, D>(&self, z: &ArrayBase<S, D>) -> Array<A, D>
    where
        A: Float,
        S: Data<Elem = A>,
        D: Dimension,
    {
        let h0 = self.h0();
        map_float(z, |z| self.data.hubble(z) / h0)
    }

    /// H(z) in km/s/Mpc.
    pub fn hubble_function<A, S, D>(&self, z: &ArrayBase<S, D>) -> Array<A, D>
    where
        A: Float,
        S: Data<Elem = A>,
        D: Dimension,
    {
        map_float(z, |z| self.data.hubble(z))
    }

    /// Cosmic time in Gyr.
    pub fn time<A, S, D>(&self, z: &ArrayBase<S, D>) -> Array<A, D>
    where
        A: Float,
        S: Data<Elem = A>,
        D: Dimension,
    {
        map_float(z, |z| self.data.physical_time(z))
    }

    /// Comoving radial distance χ(z) in Mpc/h.
    pub fn comoving_radial_distance<A, S, D>(&self, z: &ArrayBase<S, D>) -> Array<A, D>
    where
        A: Float,
        S: Data<Elem = A>,
        D: Dimension,
    {
        map_float(z, |z| self.chi_at(z))
    }

    /// Comoving angular (transverse) distance in Mpc/h.
    pub fn comoving_angular_distance<A, S, D>(&self, z: &ArrayBase<S, D>) -> Array<A, D>
    where
        A: Float,
        S: Data<Elem = A>,
        D: Dimension,
    {
        map_float(z, |z| self.transverse(self.chi_at(z)))
    }

    /// Angular diameter distance in Mpc/h.
    pub fn angular_diameter_distance<A, S, D>(&self, z: &ArrayBase<S, D>) -> Array<A, D>
    where
        A: Float,
        S: Data<Elem = A>,
        D: Dimension,
    {
        map_float(z, |z| self.transverse(self.chi_at(z)) / (1.0 + z))
    }

    /// Luminosity distance in Mpc/h.
    pub fn luminosity_distance<A, S, D>(&self, z: &ArrayBase<S, D>) -> Array<A, D>
    where
        A: Float,
        S: Data<Elem = A>,
        D: Dimension,
    {
        map_float(z, |z| self.transverse(self.chi_at(z)) * (1.0 + z))
    }

    /// Angular diameter distance of a source at `z2` seen from `z1`, Mpc/h.
    ///
    /// Built from the one-point radial distances and K, never from a solver
    /// two-point call. `z2 < z1` is computed (giving a negative distance)
    /// with a warning.
    pub fn angular_diameter_distance_2<A, S1, S2, D>(
        &self,
        z1: &ArrayBase<S1, D>,
        z2: &ArrayBase<S2, D>,
    ) -> CosmologyResult<Array<A, D>>
    where
        A: Float,
        S1: Data<Elem = A>,
        S2: Data<Elem = A>,
        D: Dimension,
    {
        if z1.shape() != z2.shape() {
            return Err(CosmologyError::input(format!(
                "z1 and z2 must have the same shape, got {:?} and {:?}",
                z1.shape(),
                z2.shape()
            )));
        }
        if Zip::from(z1).and(z2).fold(false, |any, a, b| any || *b < *a) {
            warn!("angular_diameter_distance_2 called with z2 < z1");
        }
        Ok(Zip::from(z1).and(z2).map_collect(|a, b| {
            let (z1, z2) = (a.to_f64().unwrap_or(f64::NAN), b.to_f64().unwrap_or(f64::NAN));
            let d12 = self.transverse(self.chi_at(z2) - self.chi_at(z1));
            from_f64(d12 / (1.0 + z2))
        }))
    }
}

impl Section for Background {
    const NAME: &'static str = "background";

    fn accessors() -> &'static AccessorTable<Self> {
        static TABLE: OnceLock<AccessorTable<Background>> = OnceLock::new();
        TABLE.get_or_init(|| {
            AccessorTable::<Background>::new()
                .with("h", |s| s.h)
                .with("H0", |s| s.h0())
                .with("K", |s| s.k)
                .with("age", |s| s.age())
                .with("Omega0_k", |s| s.omega_at(Component::Curvature, 0.0))
                .with("Omega0_cdm", |s| s.omega_at(Component::Cdm, 0.0))
                .with("Omega0_b", |s| s.omega_at(Component::Baryon, 0.0))
                .with("Omega0_g", |s| s.omega_at(Component::Photon, 0.0))
                .with("Omega0_ur", |s| s.omega_at(Component::Ultrarelativistic, 0.0))
                .with("Omega0_ncdm_tot", |s| s.omega_at(Component::NcdmTot, 0.0))
                .with("Omega0_de", |s| s.omega_at(Component::DarkEnergy, 0.0))
                .with("Omega0_m", |s| s.omega_at(Component::Matter, 0.0))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytic::EisensteinHuSolver;
    use crate::params::{CanonicalParameters, ParamMap, ParamValue};
    use approx::assert_relative_eq;
    use ndarray::{arr0, arr1, Array2};

    fn background(inputs: Vec<(&str, ParamValue)>) -> Background {
        let params = CanonicalParameters::new(inputs).unwrap();
        let mut engine =
            Engine::new(params, ParamMap::new(), Box::new(EisensteinHuSolver::default())).unwrap();
        engine.background().unwrap()
    }

    #[test]
    fn test_omegas_sum_to_one() {
        let ba = background(vec![("Omega_k", 0.1.into())]);
        let z = arr1(&[0.0, 1.0, 1000.0]);
        let mut total = Array::<f64, _>::zeros(3);
        for c in Component::ALL.iter().filter(|c| **c != Component::Matter) {
            total = total + ba.omega(*c, &z);
        }
        for t in total.iter() {
            assert_relative_eq!(*t, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_shape_and_precision_preserved() {
        let ba = background(vec![]);
        let z = Array2::<f32>::from_elem((2, 3), 0.5);
        let d = ba.comoving_radial_distance(&z);
        assert_eq!(d.shape(), &[2, 3]);
        let scalar = ba.efunc(&arr0(0.0f64));
        assert_eq!(scalar.ndim(), 0);
        assert_relative_eq!(scalar[()], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_distance_relations() {
        let ba = background(vec![("Omega_k", (-0.05).into())]);
        let z = arr1(&[0.5, 2.0]);
        let da = ba.angular_diameter_distance(&z);
        let dl = ba.luminosity_distance(&z);
        for i in 0..2 {
            let zp1 = 1.0 + z[i];
            assert_relative_eq!(dl[i], da[i] * zp1 * zp1, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_distance_2_from_zero_matches_one_point() {
        let ba = background(vec![("Omega_k", 0.05.into())]);
        let z2 = arr1(&[0.3, 1.2]);
        let z1 = arr1(&[0.0, 0.0]);
        let d12 = ba.angular_diameter_distance_2(&z1, &z2).unwrap();
        let da = ba.angular_diameter_distance(&z2);
        for i in 0..2 {
            assert_relative_eq!(d12[i], da[i], max_relative = 1e-10);
        }
    }

    #[test]
    fn test_distance_2_flat_closed_form_and_reversed_order() {
        let ba = background(vec![]);
        let z1 = arr1(&[0.5, 2.0]);
        let z2 = arr1(&[1.5, 1.0]);
        let d12 = ba.angular_diameter_distance_2(&z1, &z2).unwrap();
        let chi1 = ba.comoving_radial_distance(&z1);
        let chi2 = ba.comoving_radial_distance(&z2);
        for i in 0..2 {
            assert_eq!(d12[i], (chi2[i] - chi1[i]) / (1.0 + z2[i]));
        }
        assert!(d12[1] < 0.0);
    }

    #[test]
    fn test_distance_2_shape_mismatch() {
        let ba = background(vec![]);
        let err = ba
            .angular_diameter_distance_2(&arr1(&[0.0, 1.0]), &arr1(&[1.0]))
            .unwrap_err();
        assert!(err.is_input());
    }

    #[test]
    fn test_scalar_table() {
        let ba = background(vec![("h", 0.7.into())]);
        assert_relative_eq!(ba.scalar("H0").unwrap(), 70.0, epsilon = 1e-12);
        assert_eq!(ba.scalar("K").unwrap(), 0.0);
        let age = ba.scalar("age").unwrap();
        assert!(age > 12.0 && age < 15.0, "age={}", age);
        assert!(ba.scalar("nope").unwrap_err().is_input());
        assert!(ba.names().contains(&"Omega0_m"));
    }

    #[test]
    fn test_rho_matter_is_constant_in_comoving_units() {
        let ba = background(vec![]);
        let z = arr1(&[0.0, 3.0]);
        let rho = ba.rho(Component::Cdm, &z);
        assert_relative_eq!(rho[0], rho[1], max_relative = 1e-10);
        let expected = ba.scalar("Omega0_cdm").unwrap() * RHO_CRIT_MSUNPH_PER_MPCPH3;
        assert_relative_eq!(rho[0], expected, max_relative = 1e-10);
    }
}
