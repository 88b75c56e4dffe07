//! Stage vocabulary and dependency resolution.
//!
//! A request such as "fourier" expands to the ordered set of prerequisite
//! stages. Three fixed rules, already transitively closed:
//!
//! - `thermodynamics` drops `background` (thermodynamics subsumes it);
//! - `harmonic` adds `fourier`;
//! - `fourier` adds `transfer`.
//!
//! # Invariants
//!
//! - **Idempotence**: `resolve(resolve(s)) == resolve(s)`.
//! - **Order independence**: the input is a set; the output iterates in
//!   execution order regardless of insertion order.

use std::fmt;
use std::str::FromStr;

use crate::error::CosmologyError;

/// One computation phase of an engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Expansion history and distances.
    Background,
    /// Recombination, drag epoch, reionization (includes background).
    Thermodynamics,
    /// Transfer functions.
    Transfer,
    /// CMB angular power spectra.
    Harmonic,
    /// Lensing toggle: recomputes transfer and spectra with lensing on.
    Lensing,
    /// Matter power spectra.
    Fourier,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 6] = [
        Stage::Background,
        Stage::Thermodynamics,
        Stage::Transfer,
        Stage::Harmonic,
        Stage::Lensing,
        Stage::Fourier,
    ];

    /// Exact vocabulary spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Background => "background",
            Stage::Thermodynamics => "thermodynamics",
            Stage::Transfer => "transfer",
            Stage::Harmonic => "harmonic",
            Stage::Lensing => "lensing",
            Stage::Fourier => "fourier",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = CosmologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| CosmologyError::input(format!("unknown stage '{s}'")))
    }
}

// ─── StageSet ──────────────────────────────────────────────────────────────

/// A set of stages, iterated in execution order.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StageSet(u8);

impl StageSet {
    /// The empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Set containing a single stage.
    pub fn single(stage: Stage) -> Self {
        Self(stage.bit())
    }

    /// Parse a list of stage names.
    pub fn parse<'a, I>(names: I) -> Result<Self, CosmologyError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut set = Self::empty();
        for name in names {
            set.insert(name.parse()?);
        }
        Ok(set)
    }

    /// Add `stage`.
    pub fn insert(&mut self, stage: Stage) {
        self.0 |= stage.bit();
    }

    /// Remove `stage`.
    pub fn remove(&mut self, stage: Stage) {
        self.0 &= !stage.bit();
    }

    /// Membership test.
    pub fn contains(&self, stage: Stage) -> bool {
        self.0 & stage.bit() != 0
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Stages in execution order.
    pub fn iter(&self) -> impl Iterator<Item = Stage> + '_ {
        Stage::ALL.into_iter().filter(move |s| self.contains(*s))
    }
}

impl From<Stage> for StageSet {
    fn from(stage: Stage) -> Self {
        Self::single(stage)
    }
}

impl<const N: usize> From<[Stage; N]> for StageSet {
    fn from(stages: [Stage; N]) -> Self {
        stages.into_iter().collect()
    }
}

impl FromIterator<Stage> for StageSet {
    fn from_iter<I: IntoIterator<Item = Stage>>(iter: I) -> Self {
        let mut set = Self::empty();
        for stage in iter {
            set.insert(stage);
        }
        set
    }
}

impl fmt::Debug for StageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(Stage::as_str)).finish()
    }
}

// ─── Resolution ────────────────────────────────────────────────────────────

/// Expand `requested` into the minimal set of stages to execute.
pub fn resolve(requested: StageSet) -> StageSet {
    let mut out = requested;
    if out.contains(Stage::Thermodynamics) {
        out.remove(Stage::Background);
    }
    if out.contains(Stage::Harmonic) {
        out.insert(Stage::Fourier);
    }
    if out.contains(Stage::Fourier) {
        out.insert(Stage::Transfer);
    }
    out
}
