//! Thermal history of the analytic solver.
//!
//! Fitting formulae: Hu & Sugiyama (1996) for the last-scattering redshift,
//! Eisenstein & Hu (1998) for the drag redshift, a BBN fit for the helium
//! fraction, and a tanh reionization history whose optical depth is integrated
//! numerically. Sound horizons are integrated against the tabulated background.

use std::sync::Arc;

use crate::constants::{
    C_KMS, HELIUM_HYDROGEN_MASS_RATIO, MPC_M, NEFF, OMEGA_GAMMA_H2, PROTON_MASS,
    RHO_CRIT_H2_KG_M3, SIGMA_THOMSON, T_CMB_REFERENCE,
};
use crate::numeric::{bisect, simpson};
use crate::solver::{BackgroundData, SolverError, SolverResult, ThermodynamicsData};
use crate::translate::{NativeParams, Reionization};

use super::background::AnalyticBackground;

/// Redshift above which the sound-horizon integrand is replaced by its
/// radiation-era closed form.
const SOUND_HORIZON_ZMAX: f64 = 1e6;

/// Redshift and width of helium second reionization.
const HELIUM_REIONIZATION: (f64, f64) = (3.5, 0.5);

/// Helium mass fraction from a BBN fit in (ω_b, ΔN_eff).
pub fn yhe_bbn(ombh2: f64, nnu: f64) -> f64 {
    let dn = nnu - NEFF;
    let w = ombh2;
    0.2311 + 0.9502 * w - 11.27 * w * w
        + dn * (0.01356 + 0.008581 * w - 0.1810 * w * w)
        + dn * dn * (-0.0009795 - 0.001370 * w + 0.01746 * w * w)
}

/// Hu & Sugiyama last-scattering redshift.
pub fn z_star_fit(ombh2: f64, omh2: f64) -> f64 {
    let g1 = 0.0783 * ombh2.powf(-0.238) / (1.0 + 39.5 * ombh2.powf(0.763));
    let g2 = 0.560 / (1.0 + 21.1 * ombh2.powf(1.81));
    1048.0 * (1.0 + 0.00124 * ombh2.powf(-0.738)) * (1.0 + g1 * omh2.powf(g2))
}

/// Eisenstein & Hu drag redshift.
pub fn z_drag_fit(ombh2: f64, omh2: f64) -> f64 {
    let b1 = 0.313 * omh2.powf(-0.419) * (1.0 + 0.607 * omh2.powf(0.674));
    let b2 = 0.238 * omh2.powf(0.223);
    1291.0 * omh2.powf(0.251) / (1.0 + 0.659 * omh2.powf(0.828)) * (1.0 + b1 * ombh2.powf(b2))
}

/// Thermal history derived from an [`AnalyticBackground`].
#[derive(Clone, Debug)]
pub struct AnalyticThermodynamics {
    background: Arc<AnalyticBackground>,
    ombh2: f64,
    omegah2_gamma: f64,
    yhe: f64,
    z_star: f64,
    rs_star: f64,
    z_drag: f64,
    rs_drag: f64,
    z_reio: f64,
    tau_reio: f64,
    theta_cosmomc: f64,
}

impl AnalyticThermodynamics {
    /// Evaluate the thermal history for `native` on top of `background`.
    pub fn new(native: &NativeParams, background: Arc<AnalyticBackground>) -> SolverResult<Self> {
        let h = native.h();
        let omh2 = background.omega_m() * h * h;
        let yhe = native.yhe.unwrap_or_else(|| yhe_bbn(native.ombh2, native.nnu));
        if !(0.0..1.0).contains(&yhe) {
            return Err(SolverError::ParamRange {
                name: "YHe".into(),
                value: yhe,
                reason: "helium fraction must lie in [0, 1)".into(),
            });
        }
        let mut thermo = Self {
            background,
            ombh2: native.ombh2,
            omegah2_gamma: OMEGA_GAMMA_H2 * (native.tcmb / T_CMB_REFERENCE).powi(4),
            yhe,
            z_star: z_star_fit(native.ombh2, omh2),
            rs_star: 0.0,
            z_drag: z_drag_fit(native.ombh2, omh2),
            rs_drag: 0.0,
            z_reio: 0.0,
            tau_reio: 0.0,
            theta_cosmomc: 0.0,
        };
        thermo.rs_star = thermo.sound_horizon(thermo.z_star);
        thermo.rs_drag = thermo.sound_horizon(thermo.z_drag);
        let chi_star = thermo.background.comoving_radial_distance(thermo.z_star);
        thermo.theta_cosmomc = thermo.rs_star / transverse(chi_star, thermo.background.omega_k(), h);

        let width = native.reion_delta_redshift;
        match native.reionization {
            Reionization::Redshift(z) => {
                thermo.z_reio = z;
                thermo.tau_reio = thermo.optical_depth(z, width);
            }
            Reionization::Tau(tau) => {
                let floor = thermo.optical_depth(0.0, width);
                let z = bisect(|z| thermo.optical_depth(z, width) - tau, 0.0, 50.0, 1e-8)
                    .ok_or_else(|| SolverError::ParamRange {
                        name: "tau".into(),
                        value: tau,
                        reason: format!("optical depth must lie between {floor:.4} and τ(z=50)"),
                    })?;
                thermo.z_reio = z;
                thermo.tau_reio = tau;
            }
        }
        Ok(thermo)
    }

    /// Photon-baryon momentum ratio R = 3ρ_b / 4ρ_γ.
    fn baryon_loading(&self, z: f64) -> f64 {
        0.75 * self.ombh2 / self.omegah2_gamma / (1.0 + z)
    }

    fn sound_speed(&self, z: f64) -> f64 {
        C_KMS / (3.0 * (1.0 + self.baryon_loading(z))).sqrt()
    }

    /// Free-electron fraction per hydrogen atom after recombination.
    fn ionization_fraction(&self, z: f64, z_reio: f64, width: f64) -> f64 {
        let f_he = self.yhe / (HELIUM_HYDROGEN_MASS_RATIO * (1.0 - self.yhe));
        let y = |z: f64| (1.0 + z).powf(1.5);
        let dy = 1.5 * (1.0 + z_reio).sqrt() * width.max(1e-4);
        let hydrogen = 0.5 * (1.0 + f_he) * (1.0 + ((y(z_reio) - y(z)) / dy).tanh());
        let (z_he, w_he) = HELIUM_REIONIZATION;
        let helium = 0.5 * f_he * (1.0 + ((z_he - z) / w_he).tanh());
        hydrogen + helium
    }

    /// τ(z_reio) for a tanh history of the given width.
    pub fn optical_depth(&self, z_reio: f64, width: f64) -> f64 {
        let h = self.background.h();
        let n_h0 = (1.0 - self.yhe) * self.ombh2 * RHO_CRIT_H2_KG_M3 / PROTON_MASS;
        let hubble_length_m = C_KMS / (100.0 * h) * MPC_M;
        let zmax = z_reio + 10.0 * width.max(0.1) + 10.0;
        let integral = simpson(
            |z| {
                self.ionization_fraction(z, z_reio, width) * (1.0 + z) * (1.0 + z)
                    / self.background.efunc(z)
            },
            0.0,
            zmax,
            4000,
        );
        SIGMA_THOMSON * n_h0 * hubble_length_m * integral
    }
}

/// Comoving transverse distance from χ (Mpc) and Ω_k.
pub(crate) fn transverse(chi: f64, omega_k: f64, h: f64) -> f64 {
    let k = -omega_k * (100.0 * h / C_KMS).powi(2);
    if k > 0.0 {
        (k.sqrt() * chi).sin() / k.sqrt()
    } else if k < 0.0 {
        ((-k).sqrt() * chi).sinh() / (-k).sqrt()
    } else {
        chi
    }
}

impl ThermodynamicsData for AnalyticThermodynamics {
    fn z_star(&self) -> f64 {
        self.z_star
    }

    fn rs_star(&self) -> f64 {
        self.rs_star
    }

    fn z_drag(&self) -> f64 {
        self.z_drag
    }

    fn rs_drag(&self) -> f64 {
        self.rs_drag
    }

    fn tau_reio(&self) -> f64 {
        self.tau_reio
    }

    fn z_reio(&self) -> f64 {
        self.z_reio
    }

    fn yhe(&self) -> f64 {
        self.yhe
    }

    fn theta_cosmomc(&self) -> f64 {
        self.theta_cosmomc
    }

    fn sound_horizon(&self, z: f64) -> f64 {
        let x0 = (1.0 + z).ln();
        let x1 = (1.0 + SOUND_HORIZON_ZMAX).ln();
        if x0 >= x1 {
            return self.sound_speed(z) * (1.0 + z) / self.background.hubble(z);
        }
        let body = simpson(
            |x| {
                let zz = x.exp() - 1.0;
                self.sound_speed(zz) * (1.0 + zz) / self.background.hubble(zz)
            },
            x0,
            x1,
            4000,
        );
        // Integrand ∝ 1/(1+z) deep in radiation domination.
        let tail =
            self.sound_speed(SOUND_HORIZON_ZMAX) * (1.0 + SOUND_HORIZON_ZMAX) / self.background.hubble(SOUND_HORIZON_ZMAX);
        body + tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytic::{AnalyticConfig, EisensteinHuSolver};
    use crate::params::CanonicalParameters;
    use crate::translate::translate;

    fn thermo(inputs: Vec<(&str, f64)>) -> AnalyticThermodynamics {
        let params = CanonicalParameters::new(inputs).unwrap();
        let native = translate(&params, &Default::default(), &EisensteinHuSolver::default()).unwrap();
        let bg = Arc::new(AnalyticBackground::new(&native, &AnalyticConfig::default()).unwrap());
        AnalyticThermodynamics::new(&native, bg).unwrap()
    }

    #[test]
    fn test_planck_like_values() {
        let th = thermo(vec![]);
        assert!(th.z_star() > 1080.0 && th.z_star() < 1100.0, "z*={}", th.z_star());
        assert!(th.z_drag() > 1010.0 && th.z_drag() < 1035.0, "zd={}", th.z_drag());
        assert!(th.rs_drag() > 140.0 && th.rs_drag() < 155.0, "rd={}", th.rs_drag());
        assert!(th.rs_drag() > th.rs_star());
        assert!(th.yhe() > 0.24 && th.yhe() < 0.25, "YHe={}", th.yhe());
    }

    #[test]
    fn test_tau_and_z_reio_are_consistent() {
        let th = thermo(vec![("tau_reio", 0.06)]);
        assert!((th.tau_reio() - 0.06).abs() < 1e-12);
        let z = th.z_reio();
        assert!(z > 5.0 && z < 12.0, "z_reio={}", z);
        let back = thermo(vec![("z_reio", z)]);
        assert!((back.tau_reio() - 0.06).abs() < 1e-6, "tau={}", back.tau_reio());
    }

    #[test]
    fn test_sound_horizon_decreases_with_redshift() {
        let th = thermo(vec![]);
        assert!(th.sound_horizon(500.0) > th.sound_horizon(1000.0));
    }
}
