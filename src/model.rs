//! Classifier variants: logistic regression, bagged decision trees and
//! gradient boosted trees behind a shared capability interface

use crate::config::PipelineConfig;
use crate::error::ChurnError;
use gbdt::config::Config as GbdtConfig;
use gbdt::decision_tree::{Data, DataVec};
use gbdt::gradient_boost::GBDT;
use linfa::prelude::*;
use linfa_logistic::{FittedLogisticRegression, LogisticRegression};
use linfa_preprocessing::linear_scaling::LinearScaler;
use linfa_trees::{DecisionTree, SplitQuality};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::debug;

/// Every model can label rows
pub trait Classifier {
    /// Number of input columns the model was fitted on
    fn n_features(&self) -> usize;

    fn predict(&self, x: &Array2<f64>) -> crate::Result<Array1<usize>>;
}

/// Models that estimate the churn probability
pub trait ProbabilisticClassifier: Classifier {
    /// Probability of label 1 for every row, each in [0, 1]
    fn predict_probability(&self, x: &Array2<f64>) -> crate::Result<Array1<f64>>;
}

/// Models exposing per-feature importance scores
pub trait FeatureImportance {
    /// Non-negative scores in column order, summing to 1
    fn feature_importance(&self) -> Array1<f64>;
}

fn check_width(expected: usize, x: &Array2<f64>) -> crate::Result<()> {
    if x.ncols() != expected {
        return Err(ChurnError::SchemaMismatch(format!(
            "model expects {} columns, got {}",
            expected,
            x.ncols()
        )));
    }
    Ok(())
}

/// The three classifier variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Linear,
    Bagged,
    Boosted,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [ModelKind::Linear, ModelKind::Bagged, ModelKind::Boosted];

    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Linear => "Logistic Regression",
            ModelKind::Bagged => "Random Forest",
            ModelKind::Boosted => "Gradient Boosting",
        }
    }

    /// Fit a fresh model of this kind. Panics raised inside the underlying
    /// learners are reported as `ChurnError::ModelFit`.
    pub fn fit(
        &self,
        config: &PipelineConfig,
        x: &Array2<f64>,
        y: &Array1<usize>,
    ) -> crate::Result<TrainedModel> {
        if x.nrows() != y.len() {
            return Err(ChurnError::SchemaMismatch(format!(
                "{} feature rows but {} labels",
                x.nrows(),
                y.len()
            )));
        }
        if x.nrows() == 0 {
            return Err(ChurnError::EmptyInput);
        }

        isolate_panic(self.name(), || match self {
            ModelKind::Linear => LinearModel::fit(config, x, y).map(TrainedModel::Linear),
            ModelKind::Bagged => BaggedForest::fit(config, x, y).map(TrainedModel::Bagged),
            ModelKind::Boosted => BoostedTrees::fit(config, x, y).map(TrainedModel::Boosted),
        })
    }
}

/// Run `f`, turning a panic raised inside a learner into `ChurnError::ModelFit`
pub(crate) fn isolate_panic<T>(
    model: &str,
    f: impl FnOnce() -> crate::Result<T>,
) -> crate::Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<String>()
                .cloned()
                .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
                .unwrap_or_else(|| "learner panicked".to_string());
            Err(ChurnError::fit(model, reason))
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fitted model of one of the three variants
pub enum TrainedModel {
    Linear(LinearModel),
    Bagged(BaggedForest),
    Boosted(BoostedTrees),
}

impl TrainedModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            TrainedModel::Linear(_) => ModelKind::Linear,
            TrainedModel::Bagged(_) => ModelKind::Bagged,
            TrainedModel::Boosted(_) => ModelKind::Boosted,
        }
    }

    pub fn classifier(&self) -> &dyn ProbabilisticClassifier {
        match self {
            TrainedModel::Linear(m) => m,
            TrainedModel::Bagged(m) => m,
            TrainedModel::Boosted(m) => m,
        }
    }

    /// Only the bagged forest reports feature importance
    pub fn importance(&self) -> Option<&dyn FeatureImportance> {
        match self {
            TrainedModel::Bagged(m) => Some(m),
            TrainedModel::Linear(_) | TrainedModel::Boosted(_) => None,
        }
    }
}

impl fmt::Debug for TrainedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrainedModel")
            .field("kind", &self.kind())
            .field("n_features", &self.classifier().n_features())
            .finish()
    }
}

/// Logistic regression on standardised features
pub struct LinearModel {
    scaler: LinearScaler<f64>,
    model: FittedLogisticRegression<f64, usize>,
}

impl LinearModel {
    fn fit(config: &PipelineConfig, x: &Array2<f64>, y: &Array1<usize>) -> crate::Result<Self> {
        let scaler = LinearScaler::<f64>::standard()
            .fit(&Dataset::new(x.clone(), y.clone()))
            .map_err(|e| ChurnError::fit(ModelKind::Linear.name(), e))?;
        let dataset = Dataset::new(scaler.transform(x.to_owned()), y.clone());
        let model = LogisticRegression::default()
            .max_iterations(config.linear.max_iterations)
            .fit(&dataset)
            .map_err(|e| ChurnError::fit(ModelKind::Linear.name(), e))?;
        Ok(Self { scaler, model })
    }
}

impl Classifier for LinearModel {
    fn n_features(&self) -> usize {
        self.scaler.offsets().len()
    }

    fn predict(&self, x: &Array2<f64>) -> crate::Result<Array1<usize>> {
        check_width(self.n_features(), x)?;
        Ok(self.model.predict(&self.scaler.transform(x.to_owned())))
    }
}

impl ProbabilisticClassifier for LinearModel {
    fn predict_probability(&self, x: &Array2<f64>) -> crate::Result<Array1<f64>> {
        check_width(self.n_features(), x)?;
        let p = self.model.predict_probabilities(&self.scaler.transform(x.to_owned()));
        // linfa reports the probability of whichever class it chose as positive
        if self.model.labels().pos.class == 1 {
            Ok(p)
        } else {
            Ok(p.mapv(|v| 1.0 - v))
        }
    }
}

/// Bootstrap-aggregated CART trees; probability is the share of churn votes
pub struct BaggedForest {
    trees: Vec<DecisionTree<f64, usize>>,
    n_features: usize,
}

impl BaggedForest {
    fn fit(config: &PipelineConfig, x: &Array2<f64>, y: &Array1<usize>) -> crate::Result<Self> {
        let params = &config.bagged;
        let mut rng = StdRng::seed_from_u64(params.seed);
        let n = x.nrows();

        let mut trees = Vec::with_capacity(params.n_trees);
        for _ in 0..params.n_trees {
            let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let dataset = Dataset::new(x.select(Axis(0), &sample), y.select(Axis(0), &sample));
            let tree = DecisionTree::params()
                .split_quality(SplitQuality::Gini)
                .max_depth(Some(params.max_depth))
                .fit(&dataset)
                .map_err(|e| ChurnError::fit(ModelKind::Bagged.name(), e))?;
            trees.push(tree);
        }
        debug!(trees = trees.len(), "fitted bagged forest");

        Ok(Self {
            trees,
            n_features: x.ncols(),
        })
    }

    fn churn_votes(&self, x: &Array2<f64>) -> Array1<f64> {
        let mut votes = Array1::<f64>::zeros(x.nrows());
        for tree in &self.trees {
            let predicted: Array1<usize> = tree.predict(x);
            votes.zip_mut_with(&predicted, |v, &p| *v += p as f64);
        }
        votes / self.trees.len() as f64
    }
}

impl Classifier for BaggedForest {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict(&self, x: &Array2<f64>) -> crate::Result<Array1<usize>> {
        let p = self.predict_probability(x)?;
        Ok(p.mapv(|v| usize::from(v >= 0.5)))
    }
}

impl ProbabilisticClassifier for BaggedForest {
    fn predict_probability(&self, x: &Array2<f64>) -> crate::Result<Array1<f64>> {
        check_width(self.n_features, x)?;
        Ok(self.churn_votes(x))
    }
}

impl FeatureImportance for BaggedForest {
    fn feature_importance(&self) -> Array1<f64> {
        let mut total = Array1::<f64>::zeros(self.n_features);
        for tree in &self.trees {
            for (acc, &score) in total.iter_mut().zip(tree.feature_importance().iter()) {
                // single-leaf trees report 0/0
                if score.is_finite() && score > 0.0 {
                    *acc += score;
                }
            }
        }
        normalise(total)
    }
}

fn normalise(scores: Array1<f64>) -> Array1<f64> {
    let sum = scores.sum();
    if sum > 0.0 {
        scores / sum
    } else if scores.is_empty() {
        scores
    } else {
        let n = scores.len() as f64;
        Array1::from_elem(scores.len(), 1.0 / n)
    }
}

/// Gradient boosted trees with log-likelihood loss
pub struct BoostedTrees {
    model: GBDT,
    n_features: usize,
}

impl BoostedTrees {
    fn fit(config: &PipelineConfig, x: &Array2<f64>, y: &Array1<usize>) -> crate::Result<Self> {
        let params = &config.boosted;
        let mut gbdt_config = GbdtConfig::new();
        gbdt_config.set_feature_size(x.ncols());
        gbdt_config.set_shrinkage(params.learning_rate);
        gbdt_config.set_max_depth(params.max_depth);
        gbdt_config.set_iterations(params.iterations);
        gbdt_config.set_debug(false);
        gbdt_config.set_training_optimization_level(2);
        gbdt_config.set_loss("LogLikelyhood");

        // log-likelihood loss expects labels in {-1, 1}
        let mut train: DataVec = x
            .outer_iter()
            .zip(y.iter())
            .map(|(row, &label)| {
                let target = if label == 1 { 1.0 } else { -1.0 };
                Data::new_training_data(to_f32(row), 1.0, target, None)
            })
            .collect();

        let mut model = GBDT::new(&gbdt_config);
        model.fit(&mut train);

        Ok(Self {
            model,
            n_features: x.ncols(),
        })
    }
}

fn to_f32(row: ArrayView1<f64>) -> Vec<f32> {
    row.iter().map(|&v| v as f32).collect()
}

impl Classifier for BoostedTrees {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict(&self, x: &Array2<f64>) -> crate::Result<Array1<usize>> {
        let p = self.predict_probability(x)?;
        Ok(p.mapv(|v| usize::from(v >= 0.5)))
    }
}

impl ProbabilisticClassifier for BoostedTrees {
    fn predict_probability(&self, x: &Array2<f64>) -> crate::Result<Array1<f64>> {
        check_width(self.n_features, x)?;
        let test: DataVec = x
            .outer_iter()
            .map(|row| Data::new_training_data(to_f32(row), 1.0, 0.0, None))
            .collect();
        let predicted = self.model.predict(&test);
        Ok(predicted
            .into_iter()
            .map(|p| f64::from(p).clamp(0.0, 1.0))
            .collect())
    }
}
