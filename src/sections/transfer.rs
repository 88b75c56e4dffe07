//! Raw transfer-function tables.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use ndarray::{Array1, Array2};

use crate::engine::Engine;
use crate::error::CosmologyResult;
use crate::sections::{AccessorTable, Section};
use crate::solver::{wrap_solver_error, TransferData, TransferVariable};
use crate::tasks::Stage;

/// Transfer functions on the solver grid.
#[derive(Clone, Debug, PartialEq)]
pub struct TransferTable {
    /// Wavenumbers, h/Mpc.
    pub k: Array1<f64>,
    /// Redshifts, ascending.
    pub z: Array1<f64>,
    /// One (nk, nz) table per native variable, normalised to unit primordial curvature.
    pub columns: BTreeMap<&'static str, Array2<f64>>,
}

impl TransferTable {
    /// Column by native name.
    pub fn get(&self, name: &str) -> Option<&Array2<f64>> {
        self.columns.get(name)
    }
}

/// Transfer section.
#[derive(Clone, Debug)]
pub struct Transfer {
    data: Arc<dyn TransferData>,
    h: f64,
}

impl Transfer {
    pub(crate) fn new(engine: &mut Engine) -> CosmologyResult<Self> {
        engine.compute(Stage::Transfer)?;
        Ok(Self {
            data: engine.transfer_handle()?,
            h: engine.native_params().h(),
        })
    }

    /// Whether lensing was on for the run this section reads.
    pub fn lensing(&self) -> bool {
        self.data.lensing()
    }

    /// All transfer variables on the solver's (k, z) grid.
    pub fn table(&self) -> CosmologyResult<TransferTable> {
        let mut columns = BTreeMap::new();
        for variable in TransferVariable::ALL {
            let values = self
                .data
                .transfer(variable)
                .map_err(|err| wrap_solver_error("transfer", err))?;
            columns.insert(variable.as_str(), values);
        }
        Ok(TransferTable {
            k: self.data.k().iter().map(|k| k / self.h).collect(),
            z: Array1::from(self.data.redshifts().to_vec()),
            columns,
        })
    }
}

impl Section for Transfer {
    const NAME: &'static str = "transfer";

    fn accessors() -> &'static AccessorTable<Self> {
        static TABLE: OnceLock<AccessorTable<Transfer>> = OnceLock::new();
        TABLE.get_or_init(|| {
            AccessorTable::<Transfer>::new()
                .with("k_min", |s| s.data.k().first().map_or(f64::NAN, |k| k / s.h))
                .with("k_max", |s| s.data.k().last().map_or(f64::NAN, |k| k / s.h))
        })
    }
}
