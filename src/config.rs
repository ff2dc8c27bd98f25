//! Pipeline configuration: split, balancing, cross-validation and per-model
//! hyper-parameters. Every key is optional in the TOML file.

use crate::error::ChurnError;
use config::{Config, File};
use serde::Deserialize;
use std::path::Path;

/// Train/test split settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SplitConfig {
    /// Fraction of rows held out for testing
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
        }
    }
}

/// SMOTE settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BalanceConfig {
    /// Number of minority neighbours to interpolate towards
    pub k_neighbors: usize,
    pub seed: u64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            k_neighbors: 5,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct CrossValidationConfig {
    pub folds: usize,
}

impl Default for CrossValidationConfig {
    fn default() -> Self {
        Self { folds: 5 }
    }
}

/// Logistic regression settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LinearConfig {
    pub max_iterations: u64,
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
        }
    }
}

/// Bagged decision tree settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BaggedConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub seed: u64,
}

impl Default for BaggedConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 10,
            seed: 42,
        }
    }
}

/// Gradient boosting settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BoostedConfig {
    pub iterations: usize,
    pub max_depth: u32,
    pub learning_rate: f32,
}

impl Default for BoostedConfig {
    fn default() -> Self {
        Self {
            iterations: 100,
            max_depth: 3,
            learning_rate: 0.1,
        }
    }
}

/// Top-level pipeline configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub split: SplitConfig,
    pub balance: BalanceConfig,
    pub cv: CrossValidationConfig,
    pub linear: LinearConfig,
    pub bagged: BaggedConfig,
    pub boosted: BoostedConfig,
}

impl PipelineConfig {
    /// Load configuration from a TOML file, filling absent keys with defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let config: PipelineConfig = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a later stage meaningless
    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |msg: &str| Err(ChurnError::InvalidConfig(msg.to_string()));

        if !(self.split.test_fraction > 0.0 && self.split.test_fraction < 1.0) {
            return invalid("split.test_fraction must be strictly between 0 and 1");
        }
        if self.balance.k_neighbors == 0 {
            return invalid("balance.k_neighbors must be at least 1");
        }
        if self.cv.folds < 2 {
            return invalid("cv.folds must be at least 2");
        }
        if self.linear.max_iterations == 0 {
            return invalid("linear.max_iterations must be at least 1");
        }
        if self.bagged.n_trees == 0 || self.bagged.max_depth == 0 {
            return invalid("bagged.n_trees and bagged.max_depth must be at least 1");
        }
        if self.boosted.iterations == 0 || self.boosted.max_depth == 0 {
            return invalid("boosted.iterations and boosted.max_depth must be at least 1");
        }
        if !(self.boosted.learning_rate > 0.0) {
            return invalid("boosted.learning_rate must be positive");
        }
        Ok(())
    }
}
