//! Small quadrature, interpolation and root-finding helpers.

use ndarray::{Array, ArrayBase, Data, Dimension};
use num_traits::Float;

use crate::error::CosmologyResult;

/// Apply a scalar `f64` function element-wise, keeping shape and element type.
pub fn map_float<A, S, D, F>(x: &ArrayBase<S, D>, f: F) -> Array<A, D>
where
    A: Float,
    S: Data<Elem = A>,
    D: Dimension,
    F: Fn(f64) -> f64,
{
    x.mapv(|v| from_f64(f(v.to_f64().unwrap_or(f64::NAN))))
}

/// Fallible [`map_float`]: stops at the first error.
pub fn try_map_float<A, S, D, F>(x: &ArrayBase<S, D>, f: F) -> CosmologyResult<Array<A, D>>
where
    A: Float,
    S: Data<Elem = A>,
    D: Dimension,
    F: Fn(f64) -> CosmologyResult<f64>,
{
    let values = x
        .iter()
        .map(|v| f(v.to_f64().unwrap_or(f64::NAN)).map(from_f64))
        .collect::<CosmologyResult<Vec<A>>>()?;
    Ok(Array::from_shape_vec(x.raw_dim(), values)?)
}

/// Cast an `f64` into the target float type (NaN when unrepresentable).
pub fn from_f64<A: Float>(v: f64) -> A {
    A::from(v).unwrap_or_else(A::nan)
}

/// `n` points evenly spaced on `[start, stop]`.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// `n` points evenly spaced in log on `[start, stop]` (both positive).
pub fn logspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    linspace(start.ln(), stop.ln(), n)
        .into_iter()
        .map(f64::exp)
        .collect()
}

/// Composite Simpson rule of `f` on `[a, b]` with `n` (rounded up to even) intervals.
pub fn simpson<F: Fn(f64) -> f64>(f: F, a: f64, b: f64, n: usize) -> f64 {
    let n = (n.max(2) + 1) & !1;
    let h = (b - a) / n as f64;
    let mut sum = f(a) + f(b);
    for i in 1..n {
        let x = a + h * i as f64;
        sum += if i % 2 == 1 { 4.0 * f(x) } else { 2.0 * f(x) };
    }
    sum * h / 3.0
}

/// Trapezoid rule over tabulated `(x, y)`.
pub fn trapezoid(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xw, yw)| 0.5 * (xw[1] - xw[0]) * (yw[0] + yw[1]))
        .sum()
}

/// Running trapezoid integral, starting at zero.
pub fn cumulative_trapezoid(x: &[f64], y: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(x.len());
    let mut acc = 0.0;
    out.push(acc);
    for i in 1..x.len() {
        acc += 0.5 * (x[i] - x[i - 1]) * (y[i] + y[i - 1]);
        out.push(acc);
    }
    out
}

/// Index `i` such that `grid[i] <= x < grid[i + 1]`, clamped to the valid
/// interval range. `grid` must be ascending with at least two points.
pub fn bracket(grid: &[f64], x: f64) -> usize {
    let n = grid.len();
    if n < 2 || x <= grid[0] {
        return 0;
    }
    if x >= grid[n - 1] {
        return n - 2;
    }
    grid.partition_point(|g| *g <= x).saturating_sub(1).min(n - 2)
}

/// Linear interpolation (linear extrapolation from the end intervals).
pub fn interp_linear(grid: &[f64], values: &[f64], x: f64) -> f64 {
    if grid.len() == 1 {
        return values[0];
    }
    let i = bracket(grid, x);
    let t = (x - grid[i]) / (grid[i + 1] - grid[i]);
    values[i] + t * (values[i + 1] - values[i])
}

/// Bisection root of a monotonic `f` on `[lo, hi]`; `None` without a sign change.
pub fn bisect<F: Fn(f64) -> f64>(f: F, mut lo: f64, mut hi: f64, tol: f64) -> Option<f64> {
    let (mut flo, fhi) = (f(lo), f(hi));
    if flo == 0.0 {
        return Some(lo);
    }
    if fhi == 0.0 {
        return Some(hi);
    }
    if flo.signum() == fhi.signum() {
        return None;
    }
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        let fmid = f(mid);
        if fmid.signum() == flo.signum() {
            lo = mid;
            flo = fmid;
        } else {
            hi = mid;
        }
        if (hi - lo).abs() <= tol * mid.abs().max(1.0) {
            break;
        }
    }
    Some(0.5 * (lo + hi))
}

/// Spherical top-hat window W(x) = 3 (sin x − x cos x) / x³, series near 0.
pub fn tophat_window(x: f64) -> f64 {
    if x < 1e-3 {
        1.0 - x * x / 10.0
    } else {
        3.0 * (x.sin() - x * x.cos()) / (x * x * x)
    }
}

/// σ(R) of a tabulated power spectrum with a top-hat window.
///
/// - `k`: ascending wavenumbers, units of 1/length.
/// - `pk`: power at `k`, units of length³.
/// - `radius`: top-hat radius in the matching length unit.
///
/// Trapezoid in ln k, so the result is invariant under a common rescaling of
/// the length unit (Mpc vs Mpc/h).
pub fn tophat_sigma(k: &[f64], pk: &[f64], radius: f64) -> f64 {
    let lnk: Vec<f64> = k.iter().map(|k| k.ln()).collect();
    let integrand: Vec<f64> = k
        .iter()
        .zip(pk)
        .map(|(k, p)| {
            let w = tophat_window(k * radius);
            k * k * k * p * w * w / (2.0 * std::f64::consts::PI * std::f64::consts::PI)
        })
        .collect();
    trapezoid(&lnk, &integrand).max(0.0).sqrt()
}
