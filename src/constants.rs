//! Physical constants and fiducial values shared by the translator, the
//! analytic solver and the sections.

/// Speed of light in km/s.
pub const C_KMS: f64 = 299_792.458;

/// Hubble distance for h = 1, in Mpc (c / 100 km/s/Mpc).
pub const HUBBLE_DISTANCE_H: f64 = C_KMS / 100.0;

/// Critical density today in units of 10¹⁰ M☉/h / (Mpc/h)³.
pub const RHO_CRIT_MSUNPH_PER_MPCPH3: f64 = 27.754_999_346_023_17;

/// One Mpc/(km/s) expressed in gigayears.
pub const MPC_OVER_KMS_GYR: f64 = 977.792_221_673_3;

/// Effective number of relativistic species in the Standard Model.
pub const NEFF: f64 = 3.044;

/// Standard neutrino-to-photon temperature ratio, (4/11)^(1/3).
pub fn standard_neutrino_temperature_ratio() -> f64 {
    (4.0f64 / 11.0).powf(1.0 / 3.0)
}

/// Default `T_ncdm_over_cmb`, slightly above the instantaneous-decoupling value
/// so that one massless-limit species contributes 3.044 / 3 to N_eff.
pub const T_NCDM_OVER_CMB: f64 = 0.716_11;

/// Mass (eV) per unit ω_ncdm for a species at [`T_NCDM_OVER_CMB`].
pub const NCDM_MASS_PER_OMEGA_EV: f64 = 93.14;

/// Photon density today, Ω_γ h², at T_cmb = 2.7255 K.
pub const OMEGA_GAMMA_H2: f64 = 2.472_82e-5;

/// Reference CMB temperature for [`OMEGA_GAMMA_H2`], in K.
pub const T_CMB_REFERENCE: f64 = 2.7255;

/// Solar oscillation splitting Δm²₂₁ in eV².
pub const DELTA_M2_21: f64 = 7.49e-5;

/// Atmospheric splitting |Δm²₃₁| for the normal hierarchy, in eV².
pub const DELTA_M2_31_NORMAL: f64 = 2.484e-3;

/// Atmospheric splitting |Δm²₃₂| for the inverted hierarchy, in eV².
pub const DELTA_M2_32_INVERTED: f64 = 2.45e-3;

/// Thomson cross-section in m².
pub const SIGMA_THOMSON: f64 = 6.652_458_7e-29;

/// Proton mass in kg.
pub const PROTON_MASS: f64 = 1.672_621_9e-27;

/// Critical density for h = 1, in kg/m³.
pub const RHO_CRIT_H2_KG_M3: f64 = 1.878_34e-26;

/// One megaparsec in metres.
pub const MPC_M: f64 = 3.085_677_581_49e22;

/// He-4 to hydrogen mass ratio.
pub const HELIUM_HYDROGEN_MASS_RATIO: f64 = 3.9715;

/// Fiducial provisional scalar amplitude when sigma8 is the free parameter.
pub const FIDUCIAL_A_S: f64 = 2.1e-9;
