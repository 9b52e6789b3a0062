//! Error types for tabrecon

use crate::reconcile::ReconcilePhase;
use thiserror::Error;

/// Result type used throughout the reconciliation engine
pub type Result<T> = std::result::Result<T, ReconError>;

/// Errors raised by the reconciliation engine
#[derive(Error, Debug)]
pub enum ReconError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Reconciliation cancelled during {phase}")]
    Cancelled { phase: ReconcilePhase },

    #[error("{side} dataset has {rows} rows, exceeding the configured limit of {limit}")]
    ResourceLimit {
        side: String,
        rows: usize,
        limit: usize,
    },

    #[error("Cannot normalize value '{value}': {reason}")]
    Normalization { value: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReconError {
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn normalization<V: Into<String>, R: Into<String>>(value: V, reason: R) -> Self {
        Self::Normalization {
            value: value.into(),
            reason: reason.into(),
        }
    }
}
