//! Caller-facing error boundary.
//!
//! Exactly two kinds cross the [`Engine`](crate::engine::Engine) / section
//! boundary:
//!
//! - [`CosmologyError::Input`]: invalid or contradictory parameters, a solver
//!   rejection of the translated parameter set, or a request for a feature that
//!   was not computed (lensed spectra without lensing, non-linear power without a
//!   non-linear model). Recoverable by changing the inputs.
//! - [`CosmologyError::Computation`]: the solver ran but returned something
//!   non-finite or inconsistent, or an emulator finiteness check failed.
//!
//! Solver-native failures ([`SolverError`](crate::solver::SolverError)) are
//! always wrapped, with the original kept as [`std::error::Error::source`].

use thiserror::Error;

/// Boxed underlying cause.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used across the crate.
pub type CosmologyResult<T> = Result<T, CosmologyError>;

/// The two user-facing failure kinds.
#[derive(Debug, Error)]
pub enum CosmologyError {
    /// Parameters are invalid, contradictory, or rejected by the solver.
    #[error("input error: {message}")]
    Input {
        /// Human-readable reason.
        message: String,
        /// Original cause, if any.
        #[source]
        source: Option<BoxedSource>,
    },
    /// A solver or fit produced a non-finite or inconsistent result.
    #[error("computation error: {message}")]
    Computation {
        /// Human-readable reason.
        message: String,
        /// Original cause, if any.
        #[source]
        source: Option<BoxedSource>,
    },
}

impl CosmologyError {
    /// Input error without an underlying cause.
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
            source: None,
        }
    }

    /// Input error wrapping `source`.
    pub fn input_from(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Input {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Computation error without an underlying cause.
    pub fn computation(message: impl Into<String>) -> Self {
        Self::Computation {
            message: message.into(),
            source: None,
        }
    }

    /// Computation error wrapping `source`.
    pub fn computation_from(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Computation {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// `true` for [`CosmologyError::Input`].
    pub fn is_input(&self) -> bool {
        matches!(self, Self::Input { .. })
    }

    /// `true` for [`CosmologyError::Computation`].
    pub fn is_computation(&self) -> bool {
        matches!(self, Self::Computation { .. })
    }
}

impl From<serde_json::Error> for CosmologyError {
    fn from(err: serde_json::Error) -> Self {
        Self::input_from("malformed serialized state", err)
    }
}

impl From<std::io::Error> for CosmologyError {
    fn from(err: std::io::Error) -> Self {
        Self::input_from("could not access state file", err)
    }
}

impl From<ndarray::ShapeError> for CosmologyError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::input_from("array shape mismatch", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_input_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = CosmologyError::input_from("bad file", io);
        assert!(err.is_input());
        assert!(!err.is_computation());
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("missing"));
    }

    #[test]
    fn test_display_prefixes_kind() {
        let err = CosmologyError::computation("sigma8 did not converge");
        assert_eq!(err.to_string(), "computation error: sigma8 did not converge");
        assert!(err.source().is_none());
    }
}
