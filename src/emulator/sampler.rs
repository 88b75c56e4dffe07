//! Drive a calculator over a parameter box.
//!
//! Points are dealt round-robin over ranks (point `i` runs on rank
//! `i % size`), outputs are gathered on rank 0 and assembled into
//! [`Samples`] with `X.<param>` and `Y.<output>` columns. Only rank 0 gets
//! `Some(samples)`; a failure on any rank fails every rank.

use std::collections::BTreeMap;

use ndarray::arr0;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::emulator::comm::{broadcast, from_wire, gather, to_wire, WireArray};
use crate::emulator::{Calculator, Communicator, Outputs, Params, Samples};
use crate::error::{CosmologyError, CosmologyResult};
use crate::numeric::linspace;

/// Ordered `(name, (lower, upper))` parameter limits.
pub type ParamLimits = Vec<(String, (f64, f64))>;

type RankResult = Result<Vec<(usize, BTreeMap<String, WireArray>)>, String>;

/// Evaluate `points` and assemble them on rank 0.
pub(crate) fn run_points(
    points: &[Params],
    calculator: &dyn Calculator,
    comm: &dyn Communicator,
) -> CosmologyResult<Option<Samples>> {
    let (rank, size) = (comm.rank(), comm.size());
    let mine: RankResult = points
        .iter()
        .enumerate()
        .filter(|(i, _)| i % size == rank)
        .map(|(i, params)| {
            calculator
                .evaluate(params)
                .map(|outputs| (i, to_wire(&outputs)))
                .map_err(|err| format!("point {i}: {err}"))
        })
        .collect();
    debug!(rank, points = points.len(), "evaluated local share of sampling points");

    let assembled = gather(comm, &mine, 0)?.map(|all| assemble(points, all));
    let verdict = assembled.as_ref().map(|result| match result {
        Ok(_) => Ok(()),
        Err(message) => Err(message.clone()),
    });
    let verdict: Result<(), String> = broadcast(comm, verdict, 0)?;
    if let Err(message) = verdict {
        return Err(CosmologyError::computation(format!("sampling failed at {message}")));
    }
    match assembled {
        Some(Ok(samples)) => Ok(Some(samples)),
        _ => Ok(None),
    }
}

fn assemble(points: &[Params], gathered: Vec<RankResult>) -> Result<Samples, String> {
    let mut evaluated: Vec<Option<Outputs>> = vec![None; points.len()];
    for result in gathered {
        for (i, wire) in result? {
            evaluated[i] = Some(from_wire(wire).map_err(|err| err.to_string())?);
        }
    }
    let records = evaluated
        .into_iter()
        .zip(points)
        .enumerate()
        .map(|(i, (outputs, params))| {
            let outputs = outputs.ok_or_else(|| format!("point {i}: never evaluated"))?;
            let mut record: Outputs = params
                .iter()
                .map(|(name, value)| (format!("X.{name}"), arr0(*value).into_dyn()))
                .collect();
            record.extend(outputs.into_iter().map(|(name, value)| (format!("Y.{name}"), value)));
            Ok(record)
        })
        .collect::<Result<Vec<_>, String>>()?;
    Samples::from_records(&records).map_err(|err| err.to_string())
}

pub(crate) fn check_limits(limits: &ParamLimits) -> CosmologyResult<()> {
    if limits.is_empty() {
        return Err(CosmologyError::input("sampling needs at least one parameter"));
    }
    for (name, (lo, hi)) in limits {
        if !(lo.is_finite() && hi.is_finite()) || lo > hi {
            return Err(CosmologyError::input(format!(
                "invalid limits [{lo}, {hi}] for '{name}'"
            )));
        }
    }
    Ok(())
}

// ─── Grid ──────────────────────────────────────────────────────────────────

/// Regular grid with `size` points per axis; one point means the box centre.
#[derive(Clone, Debug, PartialEq)]
pub struct GridSampler {
    limits: ParamLimits,
    size: usize,
}

impl GridSampler {
    /// Grid over `limits`.
    pub fn new(limits: ParamLimits, size: usize) -> Self {
        Self {
            limits,
            size: size.max(1),
        }
    }

    /// Grid points, last parameter varying fastest.
    pub fn points(&self) -> Vec<Params> {
        let axes: Vec<Vec<f64>> = self
            .limits
            .iter()
            .map(|(_, (lo, hi))| {
                if self.size == 1 {
                    vec![0.5 * (lo + hi)]
                } else {
                    linspace(*lo, *hi, self.size)
                }
            })
            .collect();
        let total = self.size.pow(axes.len() as u32);
        (0..total)
            .map(|mut flat| {
                let mut point = vec![0.0; axes.len()];
                for (d, axis) in axes.iter().enumerate().rev() {
                    point[d] = axis[flat % self.size];
                    flat /= self.size;
                }
                self.limits
                    .iter()
                    .map(|(name, _)| name.clone())
                    .zip(point)
                    .collect()
            })
            .collect()
    }

    /// Evaluate every grid point.
    pub fn run(&self, calculator: &dyn Calculator, comm: &dyn Communicator) -> CosmologyResult<Option<Samples>> {
        check_limits(&self.limits)?;
        run_points(&self.points(), calculator, comm)
    }
}

// ─── Quasi-Monte Carlo ─────────────────────────────────────────────────────

/// Radical inverse of `index` in `base`.
fn halton(mut index: u64, base: u64) -> f64 {
    let (mut result, mut f) = (0.0, 1.0);
    while index > 0 {
        f /= base as f64;
        result += f * (index % base) as f64;
        index /= base;
    }
    result
}

fn primes(n: usize) -> Vec<u64> {
    let mut found: Vec<u64> = Vec::with_capacity(n);
    let mut candidate = 2;
    while found.len() < n {
        if found.iter().take_while(|p| *p * *p <= candidate).all(|p| candidate % p != 0) {
            found.push(candidate);
        }
        candidate += 1;
    }
    found
}

/// Randomly shifted Halton sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct QmcSampler {
    limits: ParamLimits,
    nsamples: usize,
    seed: u64,
}

impl QmcSampler {
    /// `nsamples` points over `limits`, seed 42.
    pub fn new(limits: ParamLimits, nsamples: usize) -> Self {
        Self {
            limits,
            nsamples,
            seed: 42,
        }
    }

    /// Seed of the random shift.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sequence points, identical on every rank.
    pub fn points(&self) -> Vec<Params> {
        let bases = primes(self.limits.len());
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let shifts: Vec<f64> = bases.iter().map(|_| rng.gen::<f64>()).collect();
        (0..self.nsamples as u64)
            .map(|i| {
                self.limits
                    .iter()
                    .zip(bases.iter().zip(&shifts))
                    .map(|((name, (lo, hi)), (base, shift))| {
                        let u = (halton(i + 1, *base) + shift).fract();
                        (name.clone(), lo + u * (hi - lo))
                    })
                    .collect()
            })
            .collect()
    }

    /// Evaluate every sequence point.
    pub fn run(&self, calculator: &dyn Calculator, comm: &dyn Communicator) -> CosmologyResult<Option<Samples>> {
        check_limits(&self.limits)?;
        run_points(&self.points(), calculator, comm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::{FnCalculator, LocalGroup, SingleProcess};
    use ndarray::arr1;

    fn limits() -> ParamLimits {
        vec![("a".into(), (0.0, 1.0)), ("b".into(), (-1.0, 1.0))]
    }

    fn sum_calculator() -> FnCalculator<impl Fn(&Params) -> CosmologyResult<Outputs>> {
        FnCalculator::new(|p: &Params| {
            let mut out = Outputs::new();
            out.insert("s".into(), arr1(&[p["a"] + p["b"], 1.0]).into_dyn());
            Ok(out)
        })
    }

    #[test]
    fn test_grid_points_and_centre() {
        let grid = GridSampler::new(limits(), 3).points();
        assert_eq!(grid.len(), 9);
        assert_eq!(grid[0]["a"], 0.0);
        assert_eq!(grid[1]["b"], 0.0);
        assert_eq!(grid[8]["a"], 1.0);
        let centre = GridSampler::new(limits(), 1).points();
        assert_eq!(centre.len(), 1);
        assert_eq!(centre[0]["a"], 0.5);
        assert_eq!(centre[0]["b"], 0.0);
    }

    #[test]
    fn test_halton_first_terms() {
        assert_eq!(halton(1, 2), 0.5);
        assert_eq!(halton(2, 2), 0.25);
        assert_eq!(halton(3, 2), 0.75);
        assert!((halton(1, 3) - 1.0 / 3.0).abs() < 1e-15);
        assert_eq!(primes(5), vec![2, 3, 5, 7, 11]);
    }

    #[test]
    fn test_qmc_points_inside_box_and_seeded() {
        let sampler = QmcSampler::new(limits(), 64);
        let points = sampler.points();
        assert_eq!(points.len(), 64);
        for p in &points {
            assert!((0.0..=1.0).contains(&p["a"]), "a={}", p["a"]);
            assert!((-1.0..=1.0).contains(&p["b"]), "b={}", p["b"]);
        }
        assert_eq!(points, sampler.points());
        assert_ne!(points, sampler.clone().with_seed(7).points());
    }

    #[test]
    fn test_run_assembles_columns() {
        let samples = GridSampler::new(limits(), 2)
            .run(&sum_calculator(), &SingleProcess)
            .unwrap()
            .unwrap();
        assert_eq!(samples.len(), 4);
        assert_eq!(samples.columns("X.*"), vec!["X.a".to_string(), "X.b".to_string()]);
        let s = samples.require("Y.s").unwrap();
        assert_eq!(s.shape(), &[4, 2]);
        assert_eq!(s[[3, 0]], 2.0);
    }

    #[test]
    fn test_run_spreads_points_over_ranks() {
        let results = LocalGroup::run(3, |comm| {
            QmcSampler::new(limits(), 10).run(&sum_calculator(), &comm).unwrap()
        });
        assert!(results[1].is_none() && results[2].is_none());
        let samples = results[0].as_ref().unwrap();
        assert_eq!(samples.len(), 10);
        let reference = QmcSampler::new(limits(), 10)
            .run(&sum_calculator(), &SingleProcess)
            .unwrap()
            .unwrap();
        assert_eq!(samples, &reference);
    }

    #[test]
    fn test_failure_on_one_rank_fails_all() {
        let results = LocalGroup::run(2, |comm| {
            let calc = FnCalculator::new(|p: &Params| {
                if p["a"] > 0.5 {
                    Err(CosmologyError::input("out of range"))
                } else {
                    Ok(Outputs::new())
                }
            });
            GridSampler::new(limits(), 2).run(&calc, &comm).is_err()
        });
        assert_eq!(results, vec![true, true]);
    }
}
