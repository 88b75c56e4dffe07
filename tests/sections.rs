//! Integration tests for the section views over a computed engine.
//!
//! Every array-valued accessor keeps the caller's shape and float precision;
//! scalar tables are looked up by name.

use approx::assert_relative_eq;
use ndarray::{arr1, Array3, ArrayD, IxDyn};

use cosmo_core::constants::standard_neutrino_temperature_ratio;
use cosmo_core::sections::{Component, Section};
use cosmo_core::solver::Mode;
use cosmo_core::{CanonicalParameters, Engine, ParamMap, ParamValue};

// ─── helpers ─────────────────────────────────────────────────────────────────

fn engine(inputs: Vec<(&str, ParamValue)>) -> Engine {
    let params = CanonicalParameters::new(inputs).unwrap();
    Engine::from_registry("eisenstein_hu", params, ParamMap::new()).unwrap()
}

// ─── shape and precision ─────────────────────────────────────────────────────

#[test]
fn test_background_arrays_keep_shape_and_f32() {
    let ba = engine(vec![]).background().unwrap();
    let z = Array3::<f32>::from_shape_fn((2, 3, 4), |(i, j, k)| (i + j + k) as f32 * 0.25);
    let outputs: Vec<Array3<f32>> = vec![
        ba.efunc(&z),
        ba.hubble_function(&z),
        ba.time(&z),
        ba.comoving_radial_distance(&z),
        ba.comoving_angular_distance(&z),
        ba.angular_diameter_distance(&z),
        ba.luminosity_distance(&z),
        ba.omega(Component::Matter, &z),
        ba.rho(Component::Cdm, &z),
    ];
    for out in &outputs {
        assert_eq!(out.shape(), z.shape());
        assert_eq!(std::mem::size_of_val(&out[[0, 0, 0]]), std::mem::size_of::<f32>());
    }
    assert_eq!(outputs[0][[0, 0, 0]], 1.0);
}

#[test]
fn test_dynamic_rank_input() {
    let ba = engine(vec![]).background().unwrap();
    let z = ArrayD::<f64>::from_elem(IxDyn(&[5]), 1.0);
    let chi = ba.comoving_radial_distance(&z);
    assert_eq!(chi.shape(), &[5]);
    assert!(chi.iter().all(|c| *c > 2100.0 && *c < 2500.0), "chi={:?}", chi);
}

#[test]
fn test_thermodynamics_and_primordial_keep_shape() {
    let mut e = engine(vec![("r", 0.1.into())]);
    let th = e.thermodynamics().unwrap();
    let z = Array3::<f32>::from_elem((1, 2, 2), 10.0);
    assert_eq!(th.rs_z(&z).shape(), &[1, 2, 2]);

    let pm = e.primordial().unwrap();
    let k = arr1(&[1e-3f32, 1e-2, 1e-1]);
    let scalar = pm.pk_k(&k, Mode::Scalar);
    let tensor = pm.pk_k(&k, Mode::Tensor);
    assert_eq!(scalar.len(), 3);
    assert!(tensor.iter().zip(scalar.iter()).all(|(t, s)| t < s));
}

// ─── two-redshift distance ───────────────────────────────────────────────────

#[test]
fn test_angular_diameter_distance_2_closed_form() {
    let ba = engine(vec![]).background().unwrap();
    let z1 = arr1(&[0.1, 0.5, 3.0]);
    let z2 = arr1(&[0.2, 2.0, 1.0]);
    let d12 = ba.angular_diameter_distance_2(&z1, &z2).unwrap();
    let chi1 = ba.comoving_radial_distance(&z1);
    let chi2 = ba.comoving_radial_distance(&z2);
    for i in 0..3 {
        assert_eq!(d12[i], (chi2[i] - chi1[i]) / (1.0 + z2[i]), "i={}", i);
    }
    // z2 < z1 computes and is negative.
    assert!(d12[2] < 0.0, "d12={}", d12[2]);
}

// ─── scalars ─────────────────────────────────────────────────────────────────

#[test]
fn test_scalar_tables() {
    let mut e = engine(vec![("h", 0.7.into()), ("Omega_k", 0.0.into())]);
    let ba = e.background().unwrap();
    assert_relative_eq!(ba.scalar("h").unwrap(), 0.7, epsilon = 1e-14);
    let omega_m = ba.scalar("Omega0_m").unwrap();
    assert!(omega_m > 0.25 && omega_m < 0.4, "Omega0_m={}", omega_m);
    assert!(ba.scalar("Omega_m").unwrap_err().is_input());

    let th = e.thermodynamics().unwrap();
    let rs = th.rs_drag();
    assert!(rs > 90.0 && rs < 115.0, "rs_drag={}", rs);
}

// ─── neutrinos ───────────────────────────────────────────────────────────────

#[test]
fn test_equal_masses_give_equal_fractions_and_unit_degeneracy() {
    let t = standard_neutrino_temperature_ratio();
    let e = engine(vec![
        ("m_ncdm", vec![0.05, 0.05, 0.05].into()),
        ("T_ncdm_over_cmb", vec![t, t, t].into()),
    ]);
    let native = e.native_params();
    assert_eq!(native.nu_mass_fractions.len(), 3);
    for f in &native.nu_mass_fractions {
        assert_relative_eq!(*f, 1.0 / 3.0, max_relative = 1e-12);
    }
    for g in &native.nu_mass_degeneracies {
        assert_relative_eq!(*g, 1.0, max_relative = 1e-8);
    }
}
