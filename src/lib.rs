//! churnscope: telecom customer churn prediction
//!
//! Loads customer accounts from CSV, engineers features against a fixed
//! reference schema, balances classes with SMOTE, then fits and evaluates
//! logistic regression, bagged decision trees and gradient boosting. A
//! trained model scores single new customers through the same feature rules.

pub mod balance;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod evaluate;
pub mod features;
pub mod inference;
pub mod model;
pub mod pipeline;
pub mod viz;

// Re-export public items for easier access
pub use cli::Args;
pub use config::PipelineConfig;
pub use data::{load_customers, CustomerRecord};
pub use error::ChurnError;
pub use features::{FeatureSchema, FeatureTable};
pub use inference::{predict_churn, ChurnPrediction};
pub use model::{ModelKind, TrainedModel};
pub use pipeline::{train_and_evaluate, TrainingRun};
pub use viz::create_feature_importance_chart;

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, ChurnError>;
