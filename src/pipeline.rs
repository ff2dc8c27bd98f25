//! Training run orchestration: engineer, balance, split, then fit and
//! evaluate every variant independently

use crate::balance::{smote, BalancedSet};
use crate::config::PipelineConfig;
use crate::data::CustomerRecord;
use crate::evaluate::{evaluate_variant, train_test_split, ModelReport, VariantOutcome};
use crate::features::{FeatureSchema, FeatureTable};
use crate::model::{isolate_panic, ModelKind, TrainedModel};
use tracing::{info, warn};

/// Everything produced by one training run, held in memory only
#[derive(Debug)]
pub struct TrainingRun {
    pub schema: FeatureSchema,
    /// Label counts before balancing, indexed by label
    pub original_counts: [usize; 2],
    pub balanced: BalancedSet,
    /// One entry per variant, in [`ModelKind::ALL`] order
    pub outcomes: Vec<VariantOutcome>,
}

impl TrainingRun {
    pub fn model(&self, kind: ModelKind) -> Option<&TrainedModel> {
        self.outcomes
            .iter()
            .find(|o| o.kind() == kind)
            .and_then(VariantOutcome::model)
    }

    /// The bagged forest when it fitted, otherwise the first variant that did
    pub fn preferred_model(&self) -> Option<&TrainedModel> {
        self.model(ModelKind::Bagged)
            .or_else(|| self.outcomes.iter().find_map(VariantOutcome::model))
    }
}

/// Run the whole training pipeline over loaded records
///
/// Data, schema and balancing errors abort the run. A variant that fails
/// to fit or evaluate is recorded as [`VariantOutcome::Failed`] and the
/// remaining variants still run.
pub fn train_and_evaluate(
    records: &[CustomerRecord],
    config: &PipelineConfig,
) -> crate::Result<TrainingRun> {
    config.validate()?;

    let table = FeatureTable::from_records(records)?;
    let x = table.to_matrix()?;
    let original_counts = [
        table.labels.iter().filter(|&&l| l == 0).count(),
        table.labels.iter().filter(|&&l| l == 1).count(),
    ];
    info!(
        customers = table.len(),
        features = table.schema.width(),
        stayed = original_counts[0],
        churned = original_counts[1],
        "engineered feature table"
    );

    let balanced = smote(&x, &table.labels, &config.balance)?;
    let split = train_test_split(
        &balanced.records,
        &balanced.labels,
        config.split.test_fraction,
        config.split.seed,
    )?;

    let outcomes = collect_outcomes(|kind| {
        evaluate_variant(
            kind,
            config,
            &split,
            &balanced.records,
            &balanced.labels,
            &table.schema.columns,
        )
    });

    Ok(TrainingRun {
        schema: table.schema,
        original_counts,
        balanced,
        outcomes,
    })
}

/// Evaluate every variant in [`ModelKind::ALL`] order. An error or a panic
/// anywhere in one variant's evaluation becomes its `Failed` outcome.
fn collect_outcomes<F>(evaluate: F) -> Vec<VariantOutcome>
where
    F: Fn(ModelKind) -> crate::Result<(ModelReport, TrainedModel)>,
{
    ModelKind::ALL
        .iter()
        .map(|&kind| match isolate_panic(kind.name(), || evaluate(kind)) {
            Ok((report, model)) => {
                info!(model = %kind, accuracy = report.report.accuracy, "variant evaluated");
                VariantOutcome::Evaluated { report, model }
            }
            Err(e) => {
                warn!(model = %kind, error = %e, "variant failed");
                VariantOutcome::Failed {
                    kind,
                    reason: e.to_string(),
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChurnError;
    use crate::evaluate::TrainTestSplit;
    use ndarray::{Array1, Array2};

    fn separable_split() -> (TrainTestSplit, Array2<f64>, Array1<usize>) {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| {
            let sign = if i % 2 == 0 { -1.0 } else { 1.0 };
            if j == 0 {
                sign * (2.0 + (i % 7) as f64 * 0.1)
            } else {
                (i % 3) as f64
            }
        });
        let y = Array1::from_shape_fn(40, |i| i % 2);
        let split = train_test_split(&x, &y, 0.25, 7).unwrap();
        (split, x, y)
    }

    fn small_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.bagged.n_trees = 10;
        config.boosted.iterations = 20;
        config
    }

    fn assert_only_boosted_failed(outcomes: &[VariantOutcome], expected_reason: &str) {
        assert_eq!(outcomes.len(), 3);
        for outcome in outcomes {
            match (outcome.kind(), outcome) {
                (ModelKind::Boosted, VariantOutcome::Failed { reason, .. }) => {
                    assert!(reason.contains(expected_reason), "reason: {}", reason)
                }
                (ModelKind::Boosted, _) => panic!("gradient boosting should have failed"),
                (kind, VariantOutcome::Evaluated { report, .. }) => {
                    assert_eq!(report.kind, kind);
                    assert_eq!(report.cross_validation.fold_scores.len(), 5);
                }
                (kind, VariantOutcome::Failed { reason, .. }) => {
                    panic!("{} failed alongside boosting: {}", kind, reason)
                }
            }
        }
    }

    #[test]
    fn test_failed_variant_leaves_siblings_evaluated() {
        let (split, x, y) = separable_split();
        let config = small_config();
        let names = vec!["signal".to_string(), "noise".to_string()];

        let outcomes = collect_outcomes(|kind| match kind {
            ModelKind::Boosted => Err(ChurnError::fit(kind.name(), "did not converge")),
            _ => evaluate_variant(kind, &config, &split, &x, &y, &names),
        });

        assert_only_boosted_failed(&outcomes, "did not converge");
        let forest = outcomes[1].report().unwrap();
        assert_eq!(forest.feature_importance.as_ref().unwrap()[0].0, "signal");
    }

    #[test]
    fn test_panic_during_evaluation_is_isolated() {
        let (split, x, y) = separable_split();
        let config = small_config();
        let names = vec!["signal".to_string(), "noise".to_string()];

        let outcomes = collect_outcomes(|kind| {
            let evaluated = evaluate_variant(kind, &config, &split, &x, &y, &names)?;
            if kind == ModelKind::Boosted {
                panic!("prediction tree count mismatch");
            }
            Ok(evaluated)
        });

        assert_only_boosted_failed(&outcomes, "prediction tree count mismatch");
        assert!(outcomes
            .iter()
            .filter_map(VariantOutcome::model)
            .all(|m| m.kind() != ModelKind::Boosted));
    }
}
