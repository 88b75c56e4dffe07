//! Column store for training samples.
//!
//! Inputs live under `X.<param>` and outputs under `Y.<output>`; every column
//! shares the same leading (sample) axis.

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{ArrayD, ArrayViewD, Axis};
use serde::{Deserialize, Serialize};

use crate::emulator::{matches, Outputs};
use crate::error::{CosmologyError, CosmologyResult};

/// Named arrays sharing a leading sample axis, plus free-form attributes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Samples {
    columns: BTreeMap<String, ArrayD<f64>>,
    #[serde(default)]
    attrs: BTreeMap<String, serde_json::Value>,
}

impl Samples {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stack per-sample records (one map per sample) along a new leading axis.
    /// Every record must carry the same names with the same shapes.
    pub fn from_records(records: &[Outputs]) -> CosmologyResult<Self> {
        let mut samples = Self::new();
        let Some(first) = records.first() else {
            return Ok(samples);
        };
        for name in first.keys() {
            let views = records
                .iter()
                .enumerate()
                .map(|(i, record)| {
                    record.get(name).map(|a| a.view()).ok_or_else(|| {
                        CosmologyError::input(format!("record {i} lacks '{name}'"))
                    })
                })
                .collect::<CosmologyResult<Vec<ArrayViewD<'_, f64>>>>()?;
            let stacked = ndarray::stack(Axis(0), &views)
                .map_err(|err| CosmologyError::input_from(format!("records disagree on the shape of '{name}'"), err))?;
            samples.insert(name.clone(), stacked)?;
        }
        Ok(samples)
    }

    /// Add or replace a column; its leading length must match the others.
    pub fn insert(&mut self, name: impl Into<String>, values: ArrayD<f64>) -> CosmologyResult<()> {
        let name = name.into();
        if values.ndim() == 0 {
            return Err(CosmologyError::input(format!(
                "column '{name}' needs a leading sample axis"
            )));
        }
        let others = self.columns.iter().find(|(other, _)| **other != name);
        if let Some((other, column)) = others {
            if column.len_of(Axis(0)) != values.len_of(Axis(0)) {
                return Err(CosmologyError::input(format!(
                    "column '{name}' has {} samples, '{other}' has {}",
                    values.len_of(Axis(0)),
                    column.len_of(Axis(0))
                )));
            }
        }
        self.columns.insert(name, values);
        Ok(())
    }

    /// Column by exact name.
    pub fn get(&self, name: &str) -> Option<&ArrayD<f64>> {
        self.columns.get(name)
    }

    /// Column by exact name, or an input error.
    pub fn require(&self, name: &str) -> CosmologyResult<&ArrayD<f64>> {
        self.get(name)
            .ok_or_else(|| CosmologyError::input(format!("samples have no column '{name}'")))
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.columns
            .values()
            .next()
            .map_or(0, |column| column.len_of(Axis(0)))
    }

    /// `true` without samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All column names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.columns.keys()
    }

    /// Column names matching a glob pattern (`X.*`, `Y.pk_*`).
    pub fn columns(&self, pattern: &str) -> Vec<String> {
        self.columns
            .keys()
            .filter(|name| matches(pattern, name))
            .cloned()
            .collect()
    }

    /// Iterate over `(name, column)`.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArrayD<f64>)> {
        self.columns.iter()
    }

    /// Rows `indices` of every column.
    pub fn select(&self, indices: &[usize]) -> CosmologyResult<Self> {
        let len = self.len();
        if let Some(bad) = indices.iter().find(|i| **i >= len) {
            return Err(CosmologyError::input(format!(
                "row {bad} outside {len} samples"
            )));
        }
        Ok(Self {
            columns: self
                .columns
                .iter()
                .map(|(name, column)| (name.clone(), column.select(Axis(0), indices)))
                .collect(),
            attrs: self.attrs.clone(),
        })
    }

    /// Free-form attributes.
    pub fn attrs(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.attrs
    }

    /// Mutable attributes.
    pub fn attrs_mut(&mut self) -> &mut BTreeMap<String, serde_json::Value> {
        &mut self.attrs
    }

    /// Write as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> CosmologyResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec(self)?)?;
        Ok(())
    }

    /// Read what [`Self::save`] wrote.
    pub fn load(path: impl AsRef<Path>) -> CosmologyResult<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
