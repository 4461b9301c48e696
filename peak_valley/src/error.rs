//! Error types shared by the detectors.
//!
//! Only structurally invalid configuration and the failure of every
//! detection strategy reach the caller. Short, flat or non-finite input is
//! answered with an empty result instead.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DetectionError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectionError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("insufficient data: need at least {needed} points, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("non-finite value at index {index}")]
    NonFiniteInput { index: usize },

    #[error("{method} failed: {reason}")]
    AlgorithmFailure {
        method: &'static str,
        reason: String,
    },

    #[error("{method} exceeded its time budget after {elapsed_ms} ms")]
    Timeout {
        method: &'static str,
        elapsed_ms: u128,
    },

    #[error("all detection strategies failed:\n{}", .0.join("\n"))]
    AllStrategiesFailed(Vec<String>),

    #[error("failed to read input: {0}")]
    Io(String),

    #[error("cannot parse line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

impl DetectionError {
    pub(crate) fn failure(method: &'static str, reason: impl Into<String>) -> Self {
        DetectionError::AlgorithmFailure {
            method,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        DetectionError::InvalidConfig(reason.into())
    }

    /// Errors a fallback strategy can recover from.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DetectionError::InsufficientData { .. }
                | DetectionError::NonFiniteInput { .. }
                | DetectionError::AlgorithmFailure { .. }
                | DetectionError::Timeout { .. }
        )
    }
}
