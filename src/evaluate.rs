//! Model evaluation: train/test split, classification metrics, ROC-AUC and
//! stratified k-fold cross-validation

use crate::config::PipelineConfig;
use crate::error::ChurnError;
use crate::model::{ModelKind, TrainedModel};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::debug;

/// Held-out split of a feature matrix
#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    pub x_train: Array2<f64>,
    pub y_train: Array1<usize>,
    pub x_test: Array2<f64>,
    pub y_test: Array1<usize>,
}

/// Shuffle rows with a fixed seed and hold out `test_fraction` of them
pub fn train_test_split(
    x: &Array2<f64>,
    y: &Array1<usize>,
    test_fraction: f64,
    seed: u64,
) -> crate::Result<TrainTestSplit> {
    let n = x.nrows();
    if n != y.len() {
        return Err(ChurnError::SchemaMismatch(format!(
            "{} feature rows but {} labels",
            n,
            y.len()
        )));
    }
    if n < 2 {
        return Err(ChurnError::InvalidConfig(format!(
            "need at least two rows to split, got {}",
            n
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));

    let n_test = ((n as f64 * test_fraction).round() as usize).clamp(1, n - 1);
    let (test, train) = indices.split_at(n_test);

    Ok(TrainTestSplit {
        x_train: x.select(Axis(0), train),
        y_train: y.select(Axis(0), train),
        x_test: x.select(Axis(0), test),
        y_test: y.select(Axis(0), test),
    })
}

/// Binary confusion matrix, label 1 is the positive (churn) class.
/// Every row is counted, including rows whose true label the model never
/// predicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub true_negative: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub true_positive: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(truth: &Array1<usize>, predicted: &Array1<usize>) -> Self {
        let mut cm = ConfusionMatrix::default();
        for (&t, &p) in truth.iter().zip(predicted.iter()) {
            match (t, p) {
                (0, 0) => cm.true_negative += 1,
                (0, _) => cm.false_positive += 1,
                (_, 0) => cm.false_negative += 1,
                _ => cm.true_positive += 1,
            }
        }
        cm
    }

    /// Rows are true labels, columns predicted labels: `[[tn, fp], [fn, tp]]`
    pub fn matrix(&self) -> [[usize; 2]; 2] {
        [
            [self.true_negative, self.false_positive],
            [self.false_negative, self.true_positive],
        ]
    }

    pub fn total(&self) -> usize {
        self.true_negative + self.false_positive + self.false_negative + self.true_positive
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_negative + self.true_positive, self.total())
    }

    /// Precision, recall, F1 and support for one label
    pub fn class_metrics(&self, label: usize) -> ClassMetrics {
        let (tp, fp, fn_) = if label == 1 {
            (self.true_positive, self.false_positive, self.false_negative)
        } else {
            (self.true_negative, self.false_negative, self.false_positive)
        };
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        ClassMetrics {
            precision,
            recall,
            f1,
            support: tp + fn_,
        }
    }
}

/// Undefined ratios report zero
fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class metrics plus accuracy and averages
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    /// Indexed by label value
    pub classes: [ClassMetrics; 2],
    pub accuracy: f64,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

impl ClassificationReport {
    pub fn from_confusion(cm: &ConfusionMatrix) -> Self {
        let classes = [cm.class_metrics(0), cm.class_metrics(1)];
        let total = cm.total();

        let averaged = |weights: [f64; 2]| {
            let mut avg = ClassMetrics {
                support: total,
                ..ClassMetrics::default()
            };
            for (c, w) in classes.iter().zip(weights) {
                avg.precision += w * c.precision;
                avg.recall += w * c.recall;
                avg.f1 += w * c.f1;
            }
            avg
        };

        Self {
            classes,
            accuracy: cm.accuracy(),
            macro_avg: averaged([0.5, 0.5]),
            weighted_avg: averaged([
                ratio(classes[0].support, total),
                ratio(classes[1].support, total),
            ]),
        }
    }
}

/// F1 score of the churn class
pub fn f1_score(truth: &Array1<usize>, predicted: &Array1<usize>) -> f64 {
    ConfusionMatrix::from_predictions(truth, predicted)
        .class_metrics(1)
        .f1
}

/// Area under the ROC curve from churn probabilities (Mann-Whitney rank
/// statistic, tied scores share their average rank). `None` when only one
/// class is present.
pub fn roc_auc(truth: &Array1<usize>, scores: &Array1<f64>) -> Option<f64> {
    let n_pos = truth.iter().filter(|&&t| t == 1).count();
    let n_neg = truth.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // ranks are 1-based; the tie group i..=j shares the mean rank
        let mean_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if truth[idx] == 1 {
                rank_sum_pos += mean_rank;
            }
        }
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    let u = rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0;
    Some(u / (n_pos * n_neg as f64))
}

/// Test-fold indices for stratified k-fold: the members of each class are
/// dealt to folds in order, so every fold keeps the class ratio
pub fn stratified_folds(labels: &Array1<usize>, k: usize) -> crate::Result<Vec<Vec<usize>>> {
    if k < 2 {
        return Err(ChurnError::InvalidConfig("cv.folds must be at least 2".to_string()));
    }
    let mut folds = vec![Vec::new(); k];
    for class in 0..2 {
        let members: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|&(_, &l)| l == class)
            .map(|(i, _)| i)
            .collect();
        if members.len() < k {
            return Err(ChurnError::InvalidConfig(format!(
                "class {} has {} samples, fewer than cv.folds = {}",
                class,
                members.len(),
                k
            )));
        }
        for (pos, idx) in members.into_iter().enumerate() {
            folds[pos % k].push(idx);
        }
    }
    for fold in &mut folds {
        fold.sort_unstable();
    }
    Ok(folds)
}

/// Per-fold F1 scores and their mean
#[derive(Debug, Clone, PartialEq)]
pub struct CrossValidation {
    pub fold_scores: Vec<f64>,
    pub mean: f64,
}

/// Fit `kind` on k-1 folds and score F1 on the remaining one, for every fold.
/// Folds are independent and fitted in parallel.
pub fn cross_validate(
    kind: ModelKind,
    config: &PipelineConfig,
    x: &Array2<f64>,
    y: &Array1<usize>,
) -> crate::Result<CrossValidation> {
    let folds = stratified_folds(y, config.cv.folds)?;

    let fold_scores = folds
        .par_iter()
        .map(|test_idx| {
            let train_idx: Vec<usize> = (0..y.len())
                .filter(|i| test_idx.binary_search(i).is_err())
                .collect();
            let model = kind.fit(
                config,
                &x.select(Axis(0), &train_idx),
                &y.select(Axis(0), &train_idx),
            )?;
            let predicted = model.classifier().predict(&x.select(Axis(0), test_idx))?;
            Ok(f1_score(&y.select(Axis(0), test_idx), &predicted))
        })
        .collect::<crate::Result<Vec<f64>>>()?;

    let mean = fold_scores.iter().sum::<f64>() / fold_scores.len() as f64;
    Ok(CrossValidation { fold_scores, mean })
}

/// Full evaluation of one variant
#[derive(Debug, Clone)]
pub struct ModelReport {
    pub kind: ModelKind,
    pub confusion: ConfusionMatrix,
    pub report: ClassificationReport,
    /// `None` when the test split holds a single class
    pub roc_auc: Option<f64>,
    pub cross_validation: CrossValidation,
    /// Ranked descending; only for variants exposing importance
    pub feature_importance: Option<Vec<(String, f64)>>,
}

/// Result of fitting and scoring one variant
#[derive(Debug)]
pub enum VariantOutcome {
    Evaluated {
        report: ModelReport,
        model: TrainedModel,
    },
    Failed {
        kind: ModelKind,
        reason: String,
    },
}

impl VariantOutcome {
    pub fn kind(&self) -> ModelKind {
        match self {
            VariantOutcome::Evaluated { report, .. } => report.kind,
            VariantOutcome::Failed { kind, .. } => *kind,
        }
    }

    pub fn model(&self) -> Option<&TrainedModel> {
        match self {
            VariantOutcome::Evaluated { model, .. } => Some(model),
            VariantOutcome::Failed { .. } => None,
        }
    }

    pub fn report(&self) -> Option<&ModelReport> {
        match self {
            VariantOutcome::Evaluated { report, .. } => Some(report),
            VariantOutcome::Failed { .. } => None,
        }
    }
}

/// Fit on the train split, score on the test split, then cross-validate on
/// the whole balanced set
pub fn evaluate_variant(
    kind: ModelKind,
    config: &PipelineConfig,
    split: &TrainTestSplit,
    x_all: &Array2<f64>,
    y_all: &Array1<usize>,
    feature_names: &[String],
) -> crate::Result<(ModelReport, TrainedModel)> {
    let model = kind.fit(config, &split.x_train, &split.y_train)?;
    let classifier = model.classifier();

    let predicted = classifier.predict(&split.x_test)?;
    let confusion = ConfusionMatrix::from_predictions(&split.y_test, &predicted);
    let report = ClassificationReport::from_confusion(&confusion);

    let probabilities = classifier.predict_probability(&split.x_test)?;
    let roc_auc = roc_auc(&split.y_test, &probabilities);

    let cross_validation = cross_validate(kind, config, x_all, y_all)?;
    debug!(model = %kind, cv_mean = cross_validation.mean, "cross-validation finished");

    let feature_importance = model
        .importance()
        .map(|source| rank_importance(feature_names, &source.feature_importance()));

    Ok((
        ModelReport {
            kind,
            confusion,
            report,
            roc_auc,
            cross_validation,
            feature_importance,
        },
        model,
    ))
}

/// Pair scores with column names, highest first
pub fn rank_importance(feature_names: &[String], scores: &Array1<f64>) -> Vec<(String, f64)> {
    let mut ranked: Vec<(String, f64)> = feature_names
        .iter()
        .cloned()
        .zip(scores.iter().copied())
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(v: &[usize]) -> Array1<usize> {
        Array1::from_vec(v.to_vec())
    }

    #[test]
    fn test_confusion_and_report() {
        let truth = labels(&[0, 0, 0, 0, 1, 1, 1, 1]);
        let predicted = labels(&[0, 0, 0, 1, 1, 1, 0, 1]);
        let cm = ConfusionMatrix::from_predictions(&truth, &predicted);

        assert_eq!(cm.matrix(), [[3, 1], [1, 3]]);
        assert_eq!(cm.accuracy(), 0.75);

        let report = ClassificationReport::from_confusion(&cm);
        assert_eq!(report.classes[1].precision, 0.75);
        assert_eq!(report.classes[1].recall, 0.75);
        assert_eq!(report.classes[0].support, 4);
        assert!((report.macro_avg.f1 - 0.75).abs() < 1e-12);
        assert_eq!(report.weighted_avg.support, 8);
    }

    #[test]
    fn test_zero_division_reports_zero() {
        let truth = labels(&[0, 0, 1]);
        let predicted = labels(&[0, 0, 0]);
        let cm = ConfusionMatrix::from_predictions(&truth, &predicted);
        let churn = cm.class_metrics(1);
        assert_eq!(churn.precision, 0.0);
        assert_eq!(churn.f1, 0.0);

        // the churner nobody predicted still counts against accuracy
        assert_eq!(cm.matrix(), [[2, 0], [1, 0]]);
        assert_eq!(cm.total(), 3);
        assert!((cm.accuracy() - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(churn.support, 1);
    }

    #[test]
    fn test_roc_auc() {
        let truth = labels(&[0, 0, 1, 1]);
        let perfect = Array1::from_vec(vec![0.1, 0.2, 0.8, 0.9]);
        assert_eq!(roc_auc(&truth, &perfect), Some(1.0));

        let inverted = Array1::from_vec(vec![0.9, 0.8, 0.2, 0.1]);
        assert_eq!(roc_auc(&truth, &inverted), Some(0.0));

        let tied = Array1::from_vec(vec![0.5; 4]);
        assert_eq!(roc_auc(&truth, &tied), Some(0.5));

        // sklearn: roc_auc_score([0,0,1,1], [0.1,0.4,0.35,0.8]) == 0.75
        let mixed = Array1::from_vec(vec![0.1, 0.4, 0.35, 0.8]);
        assert_eq!(roc_auc(&truth, &mixed), Some(0.75));

        assert_eq!(roc_auc(&labels(&[1, 1]), &Array1::from_vec(vec![0.2, 0.3])), None);
    }

    #[test]
    fn test_split_sizes_and_determinism() {
        let x = Array2::from_shape_fn((10, 2), |(i, j)| (i * 2 + j) as f64);
        let y = Array1::from_shape_fn(10, |i| i % 2);
        let a = train_test_split(&x, &y, 0.2, 42).unwrap();
        let b = train_test_split(&x, &y, 0.2, 42).unwrap();

        assert_eq!(a.x_test.nrows(), 2);
        assert_eq!(a.x_train.nrows(), 8);
        assert_eq!(a.x_test, b.x_test);
        assert_eq!(a.y_train, b.y_train);
    }

    #[test]
    fn test_stratified_folds() {
        let y = Array1::from_shape_fn(20, |i| usize::from(i >= 10));
        let folds = stratified_folds(&y, 5).unwrap();

        assert_eq!(folds.len(), 5);
        let mut all: Vec<usize> = folds.iter().flatten().copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..20).collect::<Vec<_>>());
        for fold in &folds {
            assert_eq!(fold.len(), 4);
            assert_eq!(fold.iter().filter(|&&i| y[i] == 1).count(), 2);
        }

        let few = Array1::from_vec(vec![0, 0, 0, 0, 0, 1, 1]);
        assert!(stratified_folds(&few, 5).is_err());
    }

    #[test]
    fn test_cross_validate_on_separable_data() {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| {
            let sign = if i % 2 == 0 { -1.0 } else { 1.0 };
            if j == 0 {
                sign * (2.0 + (i % 7) as f64 * 0.1)
            } else {
                (i % 3) as f64
            }
        });
        let y = Array1::from_shape_fn(40, |i| i % 2);
        let mut config = PipelineConfig::default();
        config.bagged.n_trees = 10;

        let cv = cross_validate(ModelKind::Bagged, &config, &x, &y).unwrap();
        assert_eq!(cv.fold_scores.len(), 5);
        assert!(cv.mean > 0.9);
    }

    #[test]
    fn test_rank_importance() {
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let ranked = rank_importance(&names, &Array1::from_vec(vec![0.2, 0.5, 0.3]));
        let order: Vec<&str> = ranked.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }
}
