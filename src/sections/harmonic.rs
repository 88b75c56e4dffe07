//! CMB angular power spectra.

use std::sync::{Arc, OnceLock};

use ndarray::{Array1, Array2, ArrayView1};

use crate::engine::Engine;
use crate::error::{CosmologyError, CosmologyResult};
use crate::sections::{AccessorTable, Section};
use crate::solver::{wrap_solver_error, SpectraData};
use crate::tasks::Stage;

const CMB_COLUMNS: [&str; 4] = ["tt", "ee", "bb", "te"];
const POTENTIAL_COLUMNS: [&str; 3] = ["pp", "tp", "ep"];

/// Dimensionless C_ℓ from ℓ = 0 to ℓmax, one column per spectrum.
#[derive(Clone, Debug, PartialEq)]
pub struct AngularSpectra {
    /// Multipoles 0..=ℓmax.
    pub ell: Array1<usize>,
    /// Column names.
    pub names: Vec<&'static str>,
    /// Shape (ℓmax + 1, names.len()).
    pub cls: Array2<f64>,
}

impl AngularSpectra {
    /// Column by name (`tt`, `ee`, `bb`, `te`, `pp`, `tp`, `ep`).
    pub fn get(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        let index = self.names.iter().position(|n| *n == name)?;
        Some(self.cls.column(index))
    }
}

/// Harmonic section.
#[derive(Clone, Debug)]
pub struct Harmonic {
    data: Arc<dyn SpectraData>,
    ellmax_cl: usize,
    /// Square of the sigma8 amplitude correction.
    ratio2: f64,
}

impl Harmonic {
    pub(crate) fn new(engine: &mut Engine) -> CosmologyResult<Self> {
        engine.compute(Stage::Harmonic)?;
        let ratio = engine.rescale_sigma8()?;
        Ok(Self {
            data: engine.spectra_handle()?,
            ellmax_cl: engine.native_params().lmax,
            ratio2: ratio * ratio,
        })
    }

    /// Largest computed multipole.
    pub fn ellmax_cl(&self) -> usize {
        self.ellmax_cl
    }

    /// Resolve a requested ℓmax; negative values count back from `ellmax_cl`
    /// (−1 is `ellmax_cl` itself).
    fn resolve_ellmax(&self, ellmax: i64) -> CosmologyResult<usize> {
        let resolved = if ellmax < 0 {
            self.ellmax_cl as i64 + 1 + ellmax
        } else {
            ellmax
        };
        if resolved < 0 || resolved as usize > self.ellmax_cl {
            return Err(CosmologyError::input(format!(
                "ellmax = {ellmax} outside the computed range [0, {}]",
                self.ellmax_cl
            )));
        }
        Ok(resolved as usize)
    }

    fn assemble(&self, names: &[&'static str], cls: Array2<f64>) -> AngularSpectra {
        let lmax = cls.nrows().saturating_sub(1);
        AngularSpectra {
            ell: (0..=lmax).collect(),
            names: names.to_vec(),
            cls: cls * self.ratio2,
        }
    }

    /// Unlensed TT, EE, BB, TE.
    pub fn unlensed_cl(&self, ellmax: i64) -> CosmologyResult<AngularSpectra> {
        let lmax = self.resolve_ellmax(ellmax)?;
        let cls = self
            .data
            .unlensed_cls(lmax)
            .map_err(|err| wrap_solver_error("harmonic", err))?;
        Ok(self.assemble(&CMB_COLUMNS, cls))
    }

    /// Lensed TT, EE, BB, TE; requires the `lensing` parameter.
    pub fn lensed_cl(&self, ellmax: i64) -> CosmologyResult<AngularSpectra> {
        self.require_lensing("lensed_cl")?;
        let lmax = self.resolve_ellmax(ellmax)?;
        let cls = self
            .data
            .lensed_cls(lmax)
            .map_err(|err| wrap_solver_error("harmonic", err))?;
        Ok(self.assemble(&CMB_COLUMNS, cls))
    }

    /// Lensing potential φφ, Tφ, Eφ; requires the `lensing` parameter.
    pub fn lens_potential_cl(&self, ellmax: i64) -> CosmologyResult<AngularSpectra> {
        self.require_lensing("lens_potential_cl")?;
        let lmax = self.resolve_ellmax(ellmax)?;
        let cls = self
            .data
            .lens_potential_cls(lmax)
            .map_err(|err| wrap_solver_error("harmonic", err))?;
        Ok(self.assemble(&POTENTIAL_COLUMNS, cls))
    }

    fn require_lensing(&self, what: &str) -> CosmologyResult<()> {
        if self.data.lensing() {
            Ok(())
        } else {
            Err(CosmologyError::input(format!(
                "{what} requires lensing; set the 'lensing' parameter to true"
            )))
        }
    }
}

impl Section for Harmonic {
    const NAME: &'static str = "harmonic";

    fn accessors() -> &'static AccessorTable<Self> {
        static TABLE: OnceLock<AccessorTable<Harmonic>> = OnceLock::new();
        TABLE.get_or_init(|| {
            AccessorTable::<Harmonic>::new().with("ellmax_cl", |s| s.ellmax_cl as f64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytic::EisensteinHuSolver;
    use crate::params::{CanonicalParameters, ParamMap, ParamValue};

    fn harmonic(inputs: Vec<(&str, ParamValue)>) -> Harmonic {
        let mut inputs = inputs;
        inputs.push(("ellmax_cl", 500.0.into()));
        let params = CanonicalParameters::new(inputs).unwrap();
        let mut engine =
            Engine::new(params, ParamMap::new(), Box::new(EisensteinHuSolver::default())).unwrap();
        engine.harmonic().unwrap()
    }

    #[test]
    fn test_negative_ellmax_counts_from_end() {
        let hr = harmonic(vec![]);
        let cl = hr.unlensed_cl(-1).unwrap();
        assert_eq!(cl.cls.dim(), (501, 4));
        assert_eq!(hr.unlensed_cl(-101).unwrap().cls.nrows(), 401);
        assert!(hr.unlensed_cl(501).unwrap_err().is_input());
        assert!(hr.unlensed_cl(-502).unwrap_err().is_input());
        assert_eq!(cl.ell[500], 500);
        assert!(cl.get("tt").unwrap()[100] > 0.0);
    }

    #[test]
    fn test_lensed_requires_lensing() {
        let hr = harmonic(vec![]);
        assert!(hr.lensed_cl(-1).unwrap_err().is_input());
        assert!(hr.lens_potential_cl(-1).unwrap_err().is_input());

        let hr = harmonic(vec![("lensing", true.into())]);
        let lensed = hr.lensed_cl(-1).unwrap();
        let unlensed = hr.unlensed_cl(-1).unwrap();
        assert!(lensed.get("bb").unwrap()[400] > unlensed.get("bb").unwrap()[400]);
        let pp = hr.lens_potential_cl(200).unwrap();
        assert_eq!(pp.names, vec!["pp", "tp", "ep"]);
        assert!(pp.get("pp").unwrap()[100] > 0.0);
    }

    #[test]
    fn test_scaled_by_sigma8_ratio() {
        let a = harmonic(vec![("sigma8", 0.8.into())]);
        let b = harmonic(vec![("sigma8", 0.4.into())]);
        let ta = a.unlensed_cl(100).unwrap();
        let tb = b.unlensed_cl(100).unwrap();
        let ratio = ta.get("tt").unwrap()[50] / tb.get("tt").unwrap()[50];
        assert!((ratio - 4.0).abs() < 1e-8, "ratio={}", ratio);
    }
}
