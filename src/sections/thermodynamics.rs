//! Recombination, baryon drag and reionization.

use std::sync::{Arc, OnceLock};

use ndarray::{Array, ArrayBase, Data, Dimension};
use num_traits::Float;

use crate::engine::Engine;
use crate::error::CosmologyResult;
use crate::numeric::map_float;
use crate::sections::{AccessorTable, Background, Section};
use crate::solver::ThermodynamicsData;
use crate::tasks::Stage;

/// Thermodynamics section. Sound horizons are in Mpc/h.
#[derive(Clone, Debug)]
pub struct Thermodynamics {
    data: Arc<dyn ThermodynamicsData>,
    background: Background,
}

impl Thermodynamics {
    pub(crate) fn new(engine: &mut Engine) -> CosmologyResult<Self> {
        engine.compute(Stage::Thermodynamics)?;
        Ok(Self {
            data: engine.thermodynamics_handle()?,
            background: Background::from_handle(engine.background_handle()?),
        })
    }

    /// Comoving sound horizon at the drag epoch.
    pub fn rs_drag(&self) -> f64 {
        self.data.rs_drag() * self.background.h()
    }

    /// Comoving sound horizon at last scattering.
    pub fn rs_star(&self) -> f64 {
        self.data.rs_star() * self.background.h()
    }

    /// Angular size of the sound horizon at last scattering, radians.
    pub fn theta_star(&self) -> f64 {
        let chi = self.background.chi_at(self.data.z_star());
        self.rs_star() / self.background.transverse(chi)
    }

    /// Comoving sound horizon at each redshift.
    pub fn rs_z<A, S, D>(&self, z: &ArrayBase<S, D>) -> Array<A, D>
    where
        A: Float,
        S: Data<Elem = A>,
        D: Dimension,
    {
        let h = self.background.h();
        map_float(z, |z| self.data.sound_horizon(z) * h)
    }
}

impl Section for Thermodynamics {
    const NAME: &'static str = "thermodynamics";

    fn accessors() -> &'static AccessorTable<Self> {
        static TABLE: OnceLock<AccessorTable<Thermodynamics>> = OnceLock::new();
        TABLE.get_or_init(|| {
            AccessorTable::<Thermodynamics>::new()
                .with("rs_drag", |s| s.rs_drag())
                .with("z_drag", |s| s.data.z_drag())
                .with("rs_star", |s| s.rs_star())
                .with("z_star", |s| s.data.z_star())
                .with("tau_reio", |s| s.data.tau_reio())
                .with("z_reio", |s| s.data.z_reio())
                .with("YHe", |s| s.data.yhe())
                .with("theta_cosmomc", |s| s.data.theta_cosmomc())
                .with("theta_star", |s| s.theta_star())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytic::EisensteinHuSolver;
    use crate::params::{CanonicalParameters, ParamMap};
    use approx::assert_relative_eq;
    use ndarray::arr1;

    fn thermodynamics() -> (Engine, Thermodynamics) {
        let mut engine = Engine::new(
            CanonicalParameters::fiducial(),
            ParamMap::new(),
            Box::new(EisensteinHuSolver::default()),
        )
        .unwrap();
        let th = engine.thermodynamics().unwrap();
        (engine, th)
    }

    #[test]
    fn test_marks_background_ready() {
        let (engine, _) = thermodynamics();
        assert!(engine.ready().is_ready(Stage::Background));
        assert!(engine.ready().is_ready(Stage::Thermodynamics));
    }

    #[test]
    fn test_sound_horizons_in_h_units() {
        let (_, th) = thermodynamics();
        let rs_drag = th.scalar("rs_drag").unwrap();
        // ~147 Mpc × h.
        assert!(rs_drag > 85.0 && rs_drag < 115.0, "rs_drag={}", rs_drag);
        assert!(th.scalar("z_drag").unwrap() < th.scalar("z_star").unwrap());
        let rs = th.rs_z(&arr1(&[th.scalar("z_drag").unwrap()]));
        assert_relative_eq!(rs[0], rs_drag, max_relative = 1e-2);
    }

    #[test]
    fn test_theta_star_close_to_cosmomc() {
        let (_, th) = thermodynamics();
        let theta = th.scalar("theta_star").unwrap();
        let cosmomc = th.scalar("theta_cosmomc").unwrap();
        assert_relative_eq!(theta, cosmomc, max_relative = 2e-2);
    }
}
