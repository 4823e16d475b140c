//! Error types for the MNA engine.
//!
//! Every failure carries a [`ErrorKind`] so callers can decide on their own
//! policy (for example retrying an iterative solve with a direct one).

use thiserror::Error;

use crate::solver::Strategy;

/// Result type alias using [`SimError`].
pub type Result<T> = std::result::Result<T, SimError>;

/// Coarse failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Floating node, missing ground path or source loop (singular matrix).
    Structural,
    /// Iterative solver stopped without meeting the tolerance.
    Convergence,
    /// Invalid request or solver option, detected before any solve.
    Configuration,
    /// Assembled dimensions disagree with the unknown count.
    Shape,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    // ============ Structural ============
    /// Zero (or numerically zero) pivot, or an empty matrix row
    #[error("singular system matrix: {reason}")]
    Singular { reason: String },

    // ============ Convergence ============
    #[error("{strategy} did not converge after {iterations} iterations (relative residual {residual:.3e})")]
    NoConvergence {
        strategy: Strategy,
        iterations: usize,
        residual: f64,
    },

    #[error("{strategy} breakdown at iteration {iteration}: {reason}")]
    Breakdown {
        strategy: Strategy,
        iteration: usize,
        reason: String,
    },

    // ============ Configuration ============
    #[error("matrix is not symmetric but SPD was assumed (max asymmetry {asymmetry:.3e})")]
    NotSymmetric { asymmetry: f64 },

    #[error("matrix is not positive definite but SPD was assumed")]
    NotPositiveDefinite,

    #[error("invalid solver option: {0}")]
    InvalidOption(String),

    #[error("invalid DC sweep: {0}")]
    InvalidSweep(String),

    #[error("invalid transient parameters: {0}")]
    InvalidTransient(String),

    #[error("invalid frequency sweep: {0}")]
    InvalidFrequency(String),

    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("unknown independent source '{0}'")]
    UnknownSource(String),

    #[error("invalid element '{name}': {reason}")]
    InvalidElement { name: String, reason: String },

    #[error("duplicate element name '{0}'")]
    DuplicateElement(String),

    #[error("invalid node table: {0}")]
    InvalidNodeTable(String),

    // ============ Shape ============
    #[error("dimension mismatch in {context}: expected {expected}, found {found}")]
    Shape {
        context: &'static str,
        expected: usize,
        found: usize,
    },
}

impl SimError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SimError::Singular { .. } => ErrorKind::Structural,
            SimError::NoConvergence { .. } | SimError::Breakdown { .. } => ErrorKind::Convergence,
            SimError::NotSymmetric { .. }
            | SimError::NotPositiveDefinite
            | SimError::InvalidOption(_)
            | SimError::InvalidSweep(_)
            | SimError::InvalidTransient(_)
            | SimError::InvalidFrequency(_)
            | SimError::UnknownNode(_)
            | SimError::UnknownSource(_)
            | SimError::InvalidElement { .. }
            | SimError::DuplicateElement(_)
            | SimError::InvalidNodeTable(_) => ErrorKind::Configuration,
            SimError::Shape { .. } => ErrorKind::Shape,
        }
    }

    pub(crate) fn singular(reason: impl Into<String>) -> Self {
        SimError::Singular {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_element(name: &str, reason: impl Into<String>) -> Self {
        SimError::InvalidElement {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
