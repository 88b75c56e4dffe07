//! # cosmo-core
//!
//! One API over cosmological solvers: lazy staged computation, parameter
//! translation, sigma8 targeting and emulation.
//!
//! ---
//!
//! ## The pipeline
//!
//! ```text
//! inputs → CanonicalParameters → translate → NativeParams → BoltzmannSolver
//!                                                              ↓
//!                     Engine (stages: background → thermodynamics → transfer
//!                                      → harmonic / fourier, primordial)
//!                                                              ↓
//!             Background · Thermodynamics · Primordial · Transfer · Harmonic · Fourier
//!                                                              ↓
//!                                           PowerSpectrumInterpolator1D / 2D
//! ```
//!
//! Any calculator of named scalars → named arrays (an engine wrapped in a
//! closure, for instance) can be replaced by an [`Emulator`] fitted on samples.
//!
//! ## Module overview
//!
//! | Module | Key types | What it does |
//! |--------|-----------|--------------|
//! | [`params`] | [`CanonicalParameters`], [`ParamValue`] | Canonical parameter schema, defaults, amplitude and neutrino handling |
//! | [`translate`] | [`NativeParams`] | Canonical → solver-native parameters, extra-parameter overlay |
//! | [`solver`] | [`BoltzmannSolver`], [`SolverError`] | Solver trait, data traits and registry |
//! | [`analytic`] | [`EisensteinHuSolver`] | Built-in analytic solver (Eisenstein-Hu transfer, Halofit) |
//! | [`tasks`] | [`Stage`], [`StageSet`] | Stage vocabulary and dependency resolution |
//! | [`engine`] | [`Engine`], [`EngineConfig`] | Lazy stage computation, sigma8 rescaling |
//! | [`sections`] | [`Background`], [`Fourier`], [`Harmonic`], ... | Unit-converted, read-only views of computed stages |
//! | [`interpolator`] | [`PowerSpectrumInterpolator2D`] | log-log P(k, z) interpolation, σ(R, z), growth rate |
//! | [`emulator`] | [`Emulator`], [`Samples`], [`Communicator`] | Sampling, operations, engines, fit and predict |
//! | [`error`] | [`CosmologyError`] | The two caller-facing error kinds |
//! | [`constants`] | — | Physical constants and conversion factors |
//!
//! ## Logging
//!
//! Every module logs through [`tracing`]; install any subscriber to see stage
//! execution (`debug`), sigma8 rescaling and emulator progress (`info`) and
//! non-finite samples (`warn`).
//!
//! ## Python
//!
//! Enable the `python-ffi` feature for a `Cosmology` class (see `ffi`).

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod analytic;
pub mod constants;
pub mod emulator;
pub mod engine;
pub mod error;
pub mod interpolator;
pub mod params;
pub mod sections;
pub mod solver;
pub mod tasks;
pub mod translate;

mod numeric;

#[cfg(feature = "python-ffi")]
pub mod ffi;

pub use analytic::{AnalyticConfig, EisensteinHuSolver};
pub use emulator::{
    Calculator, Communicator, EmulatedCalculator, Emulator, EmulatorEngine, EmulatorState,
    FnCalculator, KeyedOperation, Outputs, Params, Samples,
};
pub use engine::{Engine, EngineConfig, ReadyFlags};
pub use error::{CosmologyError, CosmologyResult};
pub use interpolator::{Extrapolation, PowerSpectrumInterpolator1D, PowerSpectrumInterpolator2D};
pub use params::{CanonicalParameters, ParamMap, ParamValue};
pub use sections::{
    Background, Fourier, Harmonic, Perturbation, PerturbationPair, Primordial, Thermodynamics,
    Transfer,
};
pub use solver::{solver_from_name, solver_names, BoltzmannSolver, SolverError};
pub use tasks::{Stage, StageSet};
pub use translate::NativeParams;
