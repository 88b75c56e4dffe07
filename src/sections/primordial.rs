//! Primordial power spectra.
//!
//! P(k) = A_s (k/k_p)^(n_s − 1 + α_s/2 ln(k/k_p) + β_s/6 ln²(k/k_p)) for scalars,
//! r A_s (k/k_p)^(n_t + α_t/2 ln(k/k_p)) for tensors, zero for vectors.
//! Public wavenumbers are in h/Mpc and spectra in (Mpc/h)³ (the dimensionless
//! spectrum times h³).

use std::sync::OnceLock;

use ndarray::{Array, ArrayBase, Data, Dimension};
use num_traits::Float;

use crate::engine::Engine;
use crate::error::{CosmologyError, CosmologyResult};
use crate::interpolator::{Extrapolation, PowerSpectrumInterpolator1D};
use crate::numeric::{logspace, map_float};
use crate::sections::{AccessorTable, Section};
use crate::solver::Mode;

/// Primordial section.
#[derive(Clone, Debug, PartialEq)]
pub struct Primordial {
    h: f64,
    /// Amplitude with the sigma8 correction folded in.
    a_s: f64,
    n_s: f64,
    alpha_s: f64,
    beta_s: f64,
    r: f64,
    n_t: f64,
    alpha_t: f64,
    /// Pivot, 1/Mpc.
    pivot: f64,
}

impl Primordial {
    pub(crate) fn new(engine: &mut Engine) -> CosmologyResult<Self> {
        let ratio = engine.rescale_sigma8()?;
        let native = engine.native_params();
        Ok(Self {
            h: native.h(),
            a_s: native.a_s * ratio * ratio,
            n_s: native.ns,
            alpha_s: native.nrun,
            beta_s: native.nrunrun,
            r: native.r,
            n_t: native.nt,
            alpha_t: native.ntrun,
            pivot: native.pivot_scalar,
        })
    }

    /// Scalar amplitude at the pivot.
    pub fn a_s(&self) -> f64 {
        self.a_s
    }

    /// Pivot scale in h/Mpc.
    pub fn k_pivot(&self) -> f64 {
        self.pivot / self.h
    }

    /// Dimensionless spectrum at k in 1/Mpc.
    fn power(&self, k: f64, mode: Mode) -> f64 {
        let x = (k / self.pivot).ln();
        match mode {
            Mode::Scalar => {
                self.a_s * (x * (self.n_s - 1.0 + 0.5 * self.alpha_s * x + self.beta_s / 6.0 * x * x)).exp()
            }
            Mode::Tensor => self.r * self.a_s * (x * (self.n_t + 0.5 * self.alpha_t * x)).exp(),
            Mode::Vector => 0.0,
        }
    }

    /// Primordial spectrum at k (h/Mpc), in (Mpc/h)³.
    pub fn pk_k<A, S, D>(&self, k: &ArrayBase<S, D>, mode: Mode) -> Array<A, D>
    where
        A: Float,
        S: Data<Elem = A>,
        D: Dimension,
    {
        let h3 = self.h.powi(3);
        map_float(k, |k| h3 * self.power(k * self.h, mode))
    }

    /// Log-log interpolator of [`Self::pk_k`] over 1e-6 ≤ k ≤ 1e2 h/Mpc.
    pub fn pk_interpolator(&self, mode: Mode) -> CosmologyResult<PowerSpectrumInterpolator1D> {
        if mode == Mode::Vector {
            return Err(CosmologyError::input("vector modes have no primordial spectrum"));
        }
        if mode == Mode::Tensor && self.r <= 0.0 {
            return Err(CosmologyError::input("tensor spectrum requested with r = 0"));
        }
        let h3 = self.h.powi(3);
        PowerSpectrumInterpolator1D::from_callable(
            logspace(1e-6, 1e2, 500),
            |k| h3 * self.power(k * self.h, mode),
            Extrapolation::PowerLaw,
        )
    }
}

impl Section for Primordial {
    const NAME: &'static str = "primordial";

    fn accessors() -> &'static AccessorTable<Self> {
        static TABLE: OnceLock<AccessorTable<Primordial>> = OnceLock::new();
        TABLE.get_or_init(|| {
            AccessorTable::<Primordial>::new()
                .with("A_s", |s| s.a_s)
                .with("ln_1e10_A_s", |s| (1e10 * s.a_s).ln())
                .with("n_s", |s| s.n_s)
                .with("alpha_s", |s| s.alpha_s)
                .with("beta_s", |s| s.beta_s)
                .with("r", |s| s.r)
                .with("n_t", |s| s.n_t)
                .with("alpha_t", |s| s.alpha_t)
                .with("k_pivot", |s| s.k_pivot())
        })
    }
}
