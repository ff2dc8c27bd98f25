//! Error taxonomy for the churn pipeline

use thiserror::Error;

/// Errors raised by the loader, feature engineer, balancer, trainer and
/// inference adapter.
#[derive(Debug, Error)]
pub enum ChurnError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("malformed numeric value {value:?} in field {field}")]
    MalformedNumber { field: String, value: String },

    #[error("malformed customer record: {0}")]
    MalformedRecord(String),

    #[error("malformed churn label {0:?}: expected \"Yes\" or \"No\"")]
    MalformedLabel(String),

    #[error("input contains no customer records")]
    EmptyInput,

    #[error("reference column list is empty")]
    EmptySchema,

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error(
        "minority class has {available} samples but SMOTE needs more than k_neighbors = {k_neighbors}"
    )]
    InsufficientMinority { available: usize, k_neighbors: usize },

    #[error("only one class present in the labels; nothing to balance or classify")]
    SingleClass,

    #[error("nearest-neighbour search failed: {0}")]
    NearestNeighbour(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{model} failed to fit: {reason}")]
    ModelFit { model: String, reason: String },

    #[error("plotting failed: {0}")]
    Plot(String),

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Polars(#[from] polars::prelude::PolarsError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChurnError {
    pub(crate) fn missing(field: &str) -> Self {
        ChurnError::MissingField(field.to_string())
    }

    pub(crate) fn malformed(field: &str, value: &str) -> Self {
        ChurnError::MalformedNumber {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub(crate) fn fit(model: impl Into<String>, reason: impl ToString) -> Self {
        ChurnError::ModelFit {
            model: model.into(),
            reason: reason.to_string(),
        }
    }
}
