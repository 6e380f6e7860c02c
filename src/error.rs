//! Error taxonomy for the churn pipeline
//!
//! Fatal errors (schema mismatch, invalid identity, exhausted strategies) are
//! typed so callers can tell them apart. Non-fatal conditions (unknown
//! categories, unavailable strategies, degraded parses) are carried as values
//! on the results they affect instead of being raised.

use std::time::Duration;
use thiserror::Error;

/// Errors produced while running a single model against a canonical vector.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PredictionError {
    #[error("schema mismatch for model '{model}': expected {expected} features, got {actual}")]
    SchemaMismatch {
        model: String,
        expected: usize,
        actual: usize,
    },

    #[error("feature order mismatch for model '{model}' at position {position}: expected '{expected}', got '{actual}'")]
    FeatureOrderMismatch {
        model: String,
        position: usize,
        expected: String,
        actual: String,
    },

    #[error("model '{0}' is not loaded")]
    UnknownModel(String),

    #[error("inference failed for model '{model}': {reason}")]
    Inference { model: String, reason: String },
}

/// Errors produced by the attribution engine.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AttributionError {
    #[error(transparent)]
    Prediction(#[from] PredictionError),

    #[error("no explainer registered for model '{0}'")]
    NoExplainer(String),

    #[error("explainer for model '{model}' failed: {reason}")]
    Explainer { model: String, reason: String },
}

/// Errors surfaced synchronously by the selection manager.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("identity fields are all blank; selection rejected")]
    InvalidIdentity,

    #[error("selection payload contains no customer record")]
    EmptyPayload,

    #[error("selection payload is not a record: {0}")]
    MalformedPayload(String),

    #[error("no customer is selected")]
    NoSelection,
}

/// Per-strategy failure recorded by the insight chain. Never raised on its own.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StrategyError {
    #[error("strategy '{0}' is unavailable")]
    Unavailable(String),

    #[error("strategy '{strategy}' timed out after {elapsed:?}")]
    Timeout { strategy: String, elapsed: Duration },

    #[error("strategy '{0}' returned an empty response")]
    EmptyResponse(String),

    #[error("strategy '{0}' is not registered")]
    NotRegistered(String),

    #[error("strategy '{strategy}' failed: {reason}")]
    Failed { strategy: String, reason: String },
}

impl StrategyError {
    /// Name of the strategy this failure belongs to.
    pub fn strategy(&self) -> &str {
        match self {
            StrategyError::Unavailable(name)
            | StrategyError::EmptyResponse(name)
            | StrategyError::NotRegistered(name) => name,
            StrategyError::Timeout { strategy, .. } | StrategyError::Failed { strategy, .. } => {
                strategy
            }
        }
    }
}

/// Raised when every strategy in the requested order failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InsightError {
    #[error("all insight strategies failed ({} attempted)", failures.len())]
    Exhausted { failures: Vec<StrategyError> },
}

/// Errors from the pipeline facade when insights are requested.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error("no model produced a prediction for this record")]
    NoPrediction,

    #[error(transparent)]
    Insight(#[from] InsightError),
}

/// Configuration validation errors detected at load time.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("category domain '{0}' has no default code")]
    MissingCategoryDefault(String),

    #[error("category domain '{domain}' maps label '{label}' to both {first} and {second}")]
    ConflictingCategoryLabel {
        domain: String,
        label: String,
        first: i64,
        second: i64,
    },

    #[error("category domain '{domain}' contains a blank label")]
    BlankCategoryLabel { domain: String },

    #[error("risk cut points must satisfy 0 <= medium <= high <= 1 (medium={medium}, high={high})")]
    InvalidCutPoints { medium: f64, high: f64 },

    #[error("decision threshold {0} is outside [0, 1]")]
    InvalidThreshold(f64),

    #[error("feature schema is empty")]
    EmptySchema,

    #[error("feature schema lists '{0}' more than once")]
    DuplicateFeature(String),
}
