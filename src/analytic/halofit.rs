//! Halofit non-linear correction (Smith et al. 2003; Takahashi et al. 2012).
//!
//! The boost is computed per redshift from the tabulated linear
//! dimensionless power Δ²_L(k) = k³P(k)/(2π²). When the linear variance never
//! reaches unity on the tabulated range (high redshift, small kmax) the
//! spectrum is returned unchanged.

use crate::numeric::{bisect, trapezoid};

/// Halofit calibration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HalofitFit {
    /// Smith et al. (2003).
    Smith,
    /// Takahashi et al. (2012) revision.
    Takahashi,
}

/// Spectral quantities at the non-linear scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NonLinearScale {
    /// k_σ with σ(1/k_σ) = 1, same unit as the input k.
    pub k_sigma: f64,
    /// Effective spectral index at k_σ.
    pub n_eff: f64,
    /// Spectral curvature at k_σ.
    pub curvature: f64,
}

/// Gaussian-filtered moments ∫ Δ² y^{2m} e^{−y²} d ln k, y = kR, for m = 0, 1, 2.
fn moments(lnk: &[f64], k: &[f64], delta2: &[f64], radius: f64) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (m, slot) in out.iter_mut().enumerate() {
        let integrand: Vec<f64> = k
            .iter()
            .zip(delta2)
            .map(|(k, d)| {
                let y2 = (k * radius).powi(2);
                d * y2.powi(m as i32) * (-y2).exp()
            })
            .collect();
        *slot = trapezoid(lnk, &integrand);
    }
    out
}

/// Locate the non-linear scale of a linear Δ² table; `None` if σ < 1 everywhere.
pub fn non_linear_scale(k: &[f64], delta2: &[f64]) -> Option<NonLinearScale> {
    let lnk: Vec<f64> = k.iter().map(|k| k.ln()).collect();
    let (kmin, kmax) = (k.first().copied()?, k.last().copied()?);
    let ln_r = bisect(
        |ln_r| moments(&lnk, k, delta2, ln_r.exp())[0].ln(),
        (0.1 / kmax).ln(),
        (10.0 / kmin).ln(),
        1e-10,
    )?;
    let radius = ln_r.exp();
    let [s1, s2, s3] = moments(&lnk, k, delta2, radius);
    let d1 = -2.0 * s2 / s1;
    Some(NonLinearScale {
        k_sigma: 1.0 / radius,
        n_eff: -3.0 - d1,
        curvature: d1 * d1 + 4.0 * (s2 - s3) / s1,
    })
}

/// Fit coefficients at one redshift.
struct Coefficients {
    a: f64,
    b: f64,
    c: f64,
    gamma: f64,
    alpha: f64,
    beta: f64,
    mu: f64,
    nu: f64,
    f1: f64,
    f2: f64,
    f3: f64,
}

impl Coefficients {
    fn new(fit: HalofitFit, scale: &NonLinearScale, omega_m: f64, omega_de: f64, w: f64) -> Self {
        let n = scale.n_eff;
        let c = scale.curvature;
        let n2 = n * n;
        let n3 = n2 * n;
        let n4 = n3 * n;
        match fit {
            HalofitFit::Smith => {
                // Interpolate between open and flat Λ omega-dependences.
                let frac = if omega_m < 1.0 { omega_de / (1.0 - omega_m) } else { 0.0 };
                let blend = |open: f64, flat: f64| frac * flat + (1.0 - frac) * open;
                Self {
                    a: 10f64.powf(
                        1.4861 + 1.8369 * n + 1.6762 * n2 + 0.7940 * n3 + 0.1670 * n4 - 0.6206 * c,
                    ),
                    b: 10f64.powf(0.9463 + 0.9466 * n + 0.3084 * n2 - 0.940 * c),
                    c: 10f64.powf(-0.2807 + 0.6669 * n + 0.3214 * n2 - 0.0793 * c),
                    gamma: 0.8649 + 0.2989 * n + 0.1631 * c,
                    alpha: 1.3884 + 0.3700 * n - 0.1452 * n2,
                    beta: 0.8291 + 0.9854 * n + 0.3401 * n2,
                    mu: 10f64.powf(-3.5442 + 0.1908 * n),
                    nu: 10f64.powf(0.9589 + 1.2857 * n),
                    f1: blend(omega_m.powf(-0.0732), omega_m.powf(-0.0307)),
                    f2: blend(omega_m.powf(-0.1423), omega_m.powf(-0.0585)),
                    f3: blend(omega_m.powf(0.0725), omega_m.powf(0.0743)),
                }
            }
            HalofitFit::Takahashi => {
                let de = omega_de * (1.0 + w);
                Self {
                    a: 10f64.powf(
                        1.5222 + 2.8553 * n + 2.3706 * n2 + 0.9903 * n3 + 0.2250 * n4
                            - 0.6038 * c
                            + 0.1749 * de,
                    ),
                    b: 10f64.powf(-0.5642 + 0.5864 * n + 0.5716 * n2 - 1.5474 * c + 0.2279 * de),
                    c: 10f64.powf(0.3698 + 2.0404 * n + 0.8161 * n2 + 0.5869 * c),
                    gamma: 0.1971 - 0.0843 * n + 0.8460 * c,
                    alpha: (6.0835 + 1.3373 * n - 0.1959 * n2 - 5.5274 * c).abs(),
                    beta: 2.0379 - 0.7354 * n + 0.3157 * n2 + 1.2490 * n3 + 0.3980 * n4
                        - 0.1682 * c,
                    mu: 0.0,
                    nu: 10f64.powf(5.2105 + 3.6902 * n),
                    f1: omega_m.powf(-0.0307),
                    f2: omega_m.powf(-0.0585),
                    f3: omega_m.powf(0.0743),
                }
            }
        }
    }

    fn delta2_non_linear(&self, y: f64, delta2_lin: f64) -> f64 {
        let fy = y / 4.0 + y * y / 8.0;
        let quasi = delta2_lin * (1.0 + delta2_lin).powf(self.beta) / (1.0 + self.alpha * delta2_lin)
            * (-fy).exp();
        let halo_prime = self.a * y.powf(3.0 * self.f1)
            / (1.0 + self.b * y.powf(self.f2) + (self.c * self.f3 * y).powf(3.0 - self.gamma));
        let halo = halo_prime / (1.0 + self.mu / y + self.nu / (y * y));
        quasi + halo
    }
}

/// Ratio P_nl/P_lin on the nodes of a linear Δ² table.
///
/// - `omega_m`, `omega_de`: density fractions at the table's redshift.
/// - `w`: dark-energy equation of state at that redshift.
pub fn halofit_boost(
    fit: HalofitFit,
    k: &[f64],
    delta2: &[f64],
    omega_m: f64,
    omega_de: f64,
    w: f64,
) -> Vec<f64> {
    let Some(scale) = non_linear_scale(k, delta2) else {
        return vec![1.0; k.len()];
    };
    let coefficients = Coefficients::new(fit, &scale, omega_m, omega_de, w);
    k.iter()
        .zip(delta2)
        .map(|(k, d)| {
            if *d <= 0.0 {
                return 1.0;
            }
            coefficients.delta2_non_linear(k / scale.k_sigma, *d) / d
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::logspace;

    /// Δ² of a smooth CDM-like spectrum with a turnover.
    fn toy_delta2(k: &[f64], amplitude: f64) -> Vec<f64> {
        k.iter()
            .map(|k| {
                let t = 1.0 / (1.0 + (k / 0.02).powf(2.0)).powf(0.5) * (1.0 + k).ln().max(1e-12) / k;
                amplitude * k.powi(4) * t * t
            })
            .collect()
    }

    #[test]
    fn test_scale_found_and_boost_exceeds_one() {
        let k = logspace(1e-4, 20.0, 400);
        let d2 = toy_delta2(&k, 5e4);
        let scale = non_linear_scale(&k, &d2).unwrap();
        assert!(scale.k_sigma > 1e-3 && scale.k_sigma < 20.0, "k_sigma={}", scale.k_sigma);
        for fit in [HalofitFit::Smith, HalofitFit::Takahashi] {
            let boost = halofit_boost(fit, &k, &d2, 0.3, 0.7, -1.0);
            assert!(boost[0] > 0.95 && boost[0] < 1.05, "large-scale boost={}", boost[0]);
            let last = *boost.last().unwrap();
            assert!(last > 1.0, "{:?} small-scale boost={}", fit, last);
        }
    }

    #[test]
    fn test_linear_when_sigma_below_one() {
        let k = logspace(1e-4, 1.0, 100);
        let d2 = vec![1e-6; k.len()];
        assert!(non_linear_scale(&k, &d2).is_none());
        assert!(halofit_boost(HalofitFit::Takahashi, &k, &d2, 0.3, 0.7, -1.0)
            .iter()
            .all(|b| *b == 1.0));
    }
}
