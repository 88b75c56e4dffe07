//! Typed read-only views over an engine's solver output.
//!
//! | Section | Stage | What it exposes |
//! |---|---|---|
//! | [`Background`] | background | densities, expansion rate, distances, age |
//! | [`Thermodynamics`] | thermodynamics | recombination, drag epoch, reionization |
//! | [`Transfer`] | transfer | raw transfer-function tables |
//! | [`Primordial`] | (none) | primordial power spectra |
//! | [`Harmonic`] | harmonic | CMB angular power spectra |
//! | [`Fourier`] | fourier | matter power spectra, σ(R, z), growth rate |
//!
//! A section is a snapshot: it holds `Arc` clones of the solver handles that
//! were current when it was built, plus a few scalars derived once. Later
//! engine recomputations never change an existing section.
//!
//! Units are the public h-scaled ones: lengths in Mpc/h, wavenumbers in h/Mpc,
//! power spectra in (Mpc/h)³.
//!
//! # Invariants
//!
//! - **Shape and precision**: array functions return an owned array with the
//!   input's shape and element type (a 0-d input gives a 0-d output).
//! - **Fixed vocabulary**: each section's named scalars come from one static
//!   table, listed by [`Section::names`] in declaration order.

pub mod background;
pub mod fourier;
pub mod harmonic;
pub mod primordial;
pub mod thermodynamics;
pub mod transfer;

use hashbrown::HashMap;

use crate::error::{CosmologyError, CosmologyResult};

pub use background::{Background, Component};
pub use fourier::{Fourier, Perturbation, PerturbationPair, PowerTable};
pub use harmonic::{AngularSpectra, Harmonic};
pub use primordial::Primordial;
pub use thermodynamics::Thermodynamics;
pub use transfer::{Transfer, TransferTable};

// ─── Accessor table ────────────────────────────────────────────────────────

/// Reads one named scalar off a section.
pub enum Getter<S> {
    /// Always defined once the section exists.
    Value(fn(&S) -> f64),
    /// Derived on demand; failures reach the caller.
    Fallible(fn(&S) -> CosmologyResult<f64>),
}

/// Name → getter table of a section's scalars.
pub struct AccessorTable<S> {
    order: Vec<&'static str>,
    getters: HashMap<&'static str, Getter<S>>,
}

impl<S> AccessorTable<S> {
    pub(crate) fn new() -> Self {
        Self {
            order: Vec::new(),
            getters: HashMap::new(),
        }
    }

    pub(crate) fn with(self, name: &'static str, getter: fn(&S) -> f64) -> Self {
        self.insert(name, Getter::Value(getter))
    }

    pub(crate) fn try_with(
        self,
        name: &'static str,
        getter: fn(&S) -> CosmologyResult<f64>,
    ) -> Self {
        self.insert(name, Getter::Fallible(getter))
    }

    fn insert(mut self, name: &'static str, getter: Getter<S>) -> Self {
        if self.getters.insert(name, getter).is_none() {
            self.order.push(name);
        }
        self
    }

    /// Names in declaration order.
    pub fn names(&self) -> &[&'static str] {
        &self.order
    }

    fn get(&self, section_name: &str, section: &S, name: &str) -> CosmologyResult<f64> {
        match self.getters.get(name) {
            Some(Getter::Value(getter)) => Ok(getter(section)),
            Some(Getter::Fallible(getter)) => getter(section),
            None => Err(CosmologyError::input(format!(
                "{section_name} has no quantity '{name}' (available: {:?})",
                self.order
            ))),
        }
    }
}

// ─── Section ───────────────────────────────────────────────────────────────

/// Common interface of the section types.
pub trait Section: Sized + 'static {
    /// Section name used in messages.
    const NAME: &'static str;

    /// The section's static scalar table.
    fn accessors() -> &'static AccessorTable<Self>;

    /// Named scalar lookup; unknown names are input errors.
    fn scalar(&self, name: &str) -> CosmologyResult<f64> {
        Self::accessors().get(Self::NAME, self, name)
    }

    /// All scalar names.
    fn names(&self) -> &'static [&'static str] {
        Self::accessors().names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(f64);

    #[test]
    fn test_table_keeps_declaration_order_and_rejects_unknown() {
        let table = AccessorTable::<Dummy>::new()
            .with("b", |d| d.0)
            .with("a", |d| 2.0 * d.0)
            .with("b", |d| -d.0);
        assert_eq!(table.names(), &["b", "a"]);
        let d = Dummy(1.5);
        assert_eq!(table.get("Dummy", &d, "a").unwrap(), 3.0);
        assert_eq!(table.get("Dummy", &d, "b").unwrap(), -1.5);
        assert!(table.get("Dummy", &d, "c").unwrap_err().is_input());
    }

    #[test]
    fn test_fallible_getter_propagates_error() {
        let table = AccessorTable::<Dummy>::new().try_with("root", |d| {
            if d.0 >= 0.0 {
                Ok(d.0.sqrt())
            } else {
                Err(CosmologyError::computation(format!("sqrt of {}", d.0)))
            }
        });
        assert_eq!(table.get("Dummy", &Dummy(4.0), "root").unwrap(), 2.0);
        let err = table.get("Dummy", &Dummy(-1.0), "root").unwrap_err();
        assert!(err.is_computation(), "err={}", err);
    }
}
