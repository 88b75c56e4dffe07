//! Expansion history of the analytic solver.
//!
//! Components: CDM, baryons, photons, massless neutrinos, massive neutrinos
//! (interpolating between the relativistic and non-relativistic limits as
//! √(ρ_rel² + ρ_nr²)), curvature, and a w₀wₐ dark-energy fluid or Λ.
//! Distances and cosmic time are tabulated once on a grid in ln(1+z).

use crate::constants::{C_KMS, HUBBLE_DISTANCE_H, MPC_OVER_KMS_GYR, OMEGA_GAMMA_H2, T_CMB_REFERENCE};
use crate::numeric::{cumulative_trapezoid, interp_linear, linspace, simpson};
use crate::solver::{BackgroundData, SolverError, SolverResult, Species};
use crate::translate::NativeParams;

use super::AnalyticConfig;

/// (7/8)(4/11)^(4/3): energy density of one neutrino species relative to photons.
pub(crate) fn neutrino_photon_ratio() -> f64 {
    7.0 / 8.0 * (4.0f64 / 11.0).powf(4.0 / 3.0)
}

/// One massive species: density today (in units of ρ_crit) in each limit.
#[derive(Clone, Copy, Debug)]
struct MassiveSpecies {
    relativistic: f64,
    non_relativistic: f64,
}

impl MassiveSpecies {
    /// ρ(a)/ρ_crit,0.
    fn density(&self, a: f64) -> f64 {
        let rel = self.relativistic / (a * a * a * a);
        let nr = self.non_relativistic / (a * a * a);
        (rel * rel + nr * nr).sqrt()
    }
}

/// Background cosmology with precomputed distance and time tables.
#[derive(Clone, Debug)]
pub struct AnalyticBackground {
    h: f64,
    omega_cdm: f64,
    omega_b: f64,
    omega_g: f64,
    omega_ur: f64,
    omega_k: f64,
    omega_de: f64,
    w0: f64,
    wa: f64,
    massive: Vec<MassiveSpecies>,
    /// ln(1+z) grid.
    x: Vec<f64>,
    /// χ on the grid, Mpc.
    chi: Vec<f64>,
    /// Cosmic time on the grid, Gyr.
    time: Vec<f64>,
}

impl AnalyticBackground {
    /// Build from native parameters; fails if the dark-energy density would
    /// be negative or the expansion rate non-positive.
    pub fn new(native: &NativeParams, config: &AnalyticConfig) -> SolverResult<Self> {
        let h = native.h();
        let h2 = h * h;
        let omega_g = OMEGA_GAMMA_H2 * (native.tcmb / T_CMB_REFERENCE).powi(4) / h2;
        let per_species = neutrino_photon_ratio() * omega_g;
        let omega_ur = native.num_nu_massless * per_species;
        let massive: Vec<MassiveSpecies> = native
            .nu_mass_degeneracies
            .iter()
            .zip(&native.nu_mass_fractions)
            .map(|(g, f)| MassiveSpecies {
                relativistic: g * per_species,
                non_relativistic: native.omnuh2 * f / h2,
            })
            .collect();
        let omega_ncdm: f64 = massive.iter().map(|m| m.density(1.0)).sum();
        let omega_cdm = native.omch2 / h2;
        let omega_b = native.ombh2 / h2;
        let omega_de =
            1.0 - omega_cdm - omega_b - omega_g - omega_ur - omega_ncdm - native.omk;
        if omega_de < 0.0 {
            return Err(SolverError::ParamRange {
                name: "omk".into(),
                value: native.omk,
                reason: format!("implies negative dark-energy density {omega_de:.4}"),
            });
        }
        let (w0, wa) = native.dark_energy.w0_wa();

        let mut background = Self {
            h,
            omega_cdm,
            omega_b,
            omega_g,
            omega_ur,
            omega_k: native.omk,
            omega_de,
            w0,
            wa,
            massive,
            x: Vec::new(),
            chi: Vec::new(),
            time: Vec::new(),
        };
        background.tabulate(config)?;
        Ok(background)
    }

    fn tabulate(&mut self, config: &AnalyticConfig) -> SolverResult<()> {
        let x = linspace(0.0, (1.0 + config.background_zmax).ln(), config.background_nz);
        let mut inv_e = Vec::with_capacity(x.len());
        let mut inv_h = Vec::with_capacity(x.len());
        for xi in &x {
            let z = xi.exp() - 1.0;
            let e = self.efunc(z);
            if !(e > 0.0 && e.is_finite()) {
                return Err(SolverError::ParamRange {
                    name: "H(z)".into(),
                    value: e,
                    reason: format!("expansion rate must stay positive (z = {z:.3})"),
                });
            }
            inv_e.push((1.0 + z) / e);
            inv_h.push(1.0 / (100.0 * self.h * e));
        }
        let dh = HUBBLE_DISTANCE_H / self.h;
        self.chi = cumulative_trapezoid(&x, &inv_e)
            .into_iter()
            .map(|c| c * dh)
            .collect();

        // t(z) = ∫_x^∞ dx' / H; radiation-era tail beyond the grid.
        let to_high = cumulative_trapezoid(&x, &inv_h);
        let total = to_high.last().copied().unwrap_or(0.0);
        let tail = 0.5 * inv_h.last().copied().unwrap_or(0.0);
        self.time = to_high
            .iter()
            .map(|t| (total - t + tail) * MPC_OVER_KMS_GYR)
            .collect();
        self.x = x;
        Ok(())
    }

    /// Reduced Hubble constant.
    pub fn h(&self) -> f64 {
        self.h
    }

    /// Ω_m today: CDM, baryons and the non-relativistic massive-neutrino density.
    pub fn omega_m(&self) -> f64 {
        self.omega_cdm + self.omega_b + self.massive.iter().map(|m| m.non_relativistic).sum::<f64>()
    }

    /// Ω_cdm + Ω_b today.
    pub fn omega_cb(&self) -> f64 {
        self.omega_cdm + self.omega_b
    }

    /// Ω_b today.
    pub fn omega_b(&self) -> f64 {
        self.omega_b
    }

    /// Total radiation density today (photons + massless + relativistic limit of massive).
    pub fn omega_r(&self) -> f64 {
        self.omega_g + self.omega_ur + self.massive.iter().map(|m| m.relativistic).sum::<f64>()
    }

    /// Dark-energy equation of state w(a) = w₀ + wₐ(1 − a).
    pub fn w(&self, z: f64) -> f64 {
        let a = 1.0 / (1.0 + z);
        self.w0 + self.wa * (1.0 - a)
    }

    fn de_scaling(&self, a: f64) -> f64 {
        a.powf(-3.0 * (1.0 + self.w0 + self.wa)) * (-3.0 * self.wa * (1.0 - a)).exp()
    }

    /// ρ_species(z) / ρ_crit,0.
    pub fn omega_species(&self, species: Species, z: f64) -> f64 {
        let a = 1.0 / (1.0 + z);
        match species {
            Species::Cdm => self.omega_cdm / (a * a * a),
            Species::Baryon => self.omega_b / (a * a * a),
            Species::Photon => self.omega_g / (a * a * a * a),
            Species::MasslessNeutrino => self.omega_ur / (a * a * a * a),
            Species::MassiveNeutrino => self.massive.iter().map(|m| m.density(a)).sum(),
            Species::DarkEnergy => self.omega_de * self.de_scaling(a),
            Species::Curvature => self.omega_k / (a * a),
        }
    }

    /// E(z) = H(z)/H₀.
    pub fn efunc(&self, z: f64) -> f64 {
        Species::ALL
            .iter()
            .map(|s| self.omega_species(*s, z))
            .sum::<f64>()
            .sqrt()
    }

    /// E²(a) restricted to the clustering components and dark energy,
    /// used by the growth equation.
    pub fn efunc2_late(&self, a: f64) -> f64 {
        self.omega_m() / (a * a * a) + self.omega_k / (a * a) + self.omega_de * self.de_scaling(a)
    }

    /// d ln E² / d ln a for [`Self::efunc2_late`].
    pub fn dln_efunc2_late(&self, a: f64) -> f64 {
        let m = self.omega_m() / (a * a * a);
        let k = self.omega_k / (a * a);
        let de = self.omega_de * self.de_scaling(a);
        let w = self.w0 + self.wa * (1.0 - a);
        (-3.0 * m - 2.0 * k - 3.0 * (1.0 + w) * de) / (m + k + de)
    }

    fn chi_between(&self, x0: f64, x1: f64) -> f64 {
        let dh = HUBBLE_DISTANCE_H / self.h;
        let n = (((x1 - x0).abs() / 1e-3) as usize).clamp(16, 20_000);
        dh * simpson(
            |x| {
                let z = x.exp() - 1.0;
                (1.0 + z) / self.efunc(z)
            },
            x0,
            x1,
            n,
        )
    }
}

impl BackgroundData for AnalyticBackground {
    fn h0(&self) -> f64 {
        100.0 * self.h
    }

    fn omega_k(&self) -> f64 {
        self.omega_k
    }

    fn hubble(&self, z: f64) -> f64 {
        100.0 * self.h * self.efunc(z)
    }

    fn comoving_radial_distance(&self, z: f64) -> f64 {
        let x = (1.0 + z).ln();
        let xmax = self.x.last().copied().unwrap_or(0.0);
        if x < 0.0 {
            self.chi_between(0.0, x)
        } else if x > xmax {
            self.chi.last().copied().unwrap_or(0.0) + self.chi_between(xmax, x)
        } else {
            interp_linear(&self.x, &self.chi, x)
        }
    }

    fn physical_time(&self, z: f64) -> f64 {
        let x = (1.0 + z).ln();
        let xmax = self.x.last().copied().unwrap_or(0.0);
        if x > xmax {
            // Radiation era: t = 1 / (2H).
            return 0.5 / self.hubble(z) * MPC_OVER_KMS_GYR;
        }
        interp_linear(&self.x, &self.time, x)
    }

    fn density(&self, species: Species, z: f64) -> f64 {
        let a = 1.0 / (1.0 + z);
        let h0_mpc = 100.0 * self.h / C_KMS;
        3.0 * h0_mpc * h0_mpc * self.omega_species(species, z) * a.powi(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::CanonicalParameters;
    use crate::translate::translate;
    use crate::analytic::EisensteinHuSolver;

    fn background(inputs: Vec<(&str, f64)>) -> AnalyticBackground {
        let params = CanonicalParameters::new(inputs).unwrap();
        let native = translate(&params, &Default::default(), &EisensteinHuSolver::default()).unwrap();
        AnalyticBackground::new(&native, &AnalyticConfig::default()).unwrap()
    }

    #[test]
    fn test_efunc_is_one_today() {
        let bg = background(vec![]);
        assert!((bg.efunc(0.0) - 1.0).abs() < 1e-12, "E(0)={}", bg.efunc(0.0));
    }

    #[test]
    fn test_distance_matches_direct_quadrature() {
        let bg = background(vec![("Omega_k", 0.05)]);
        let direct = bg.chi_between(0.0, (1.0f64 + 1.3).ln());
        let tab = bg.comoving_radial_distance(1.3);
        assert!((direct - tab).abs() / direct < 1e-5, "direct={} tab={}", direct, tab);
    }

    #[test]
    fn test_age_is_reasonable() {
        let bg = background(vec![]);
        let age = bg.physical_time(0.0);
        assert!(age > 13.0 && age < 14.5, "age={}", age);
    }

    #[test]
    fn test_negative_dark_energy_rejected() {
        let params = CanonicalParameters::new([("Omega_k", 0.9)]).unwrap();
        let native = translate(&params, &Default::default(), &EisensteinHuSolver::default()).unwrap();
        assert!(AnalyticBackground::new(&native, &AnalyticConfig::default()).is_err());
    }
}
