//! Single-customer scoring against a trained schema and model

use crate::data::CustomerRecord;
use crate::error::ChurnError;
use crate::features::{EngineeredRecord, FeatureSchema};
use crate::model::ProbabilisticClassifier;
use ndarray::Array2;
use std::collections::HashMap;
use std::fmt;

/// Churn estimate for one customer
#[derive(Debug, Clone, PartialEq)]
pub struct ChurnPrediction {
    /// Feature row aligned to the reference columns, `None` where missing
    pub row: Vec<Option<f64>>,
    /// Probability of churn in [0, 1]
    pub probability: f64,
}

impl fmt::Display for ChurnPrediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Customer Churn Probability: {:.2}%", self.probability * 100.0)
    }
}

/// Engineer one raw record and align it to the reference columns
pub fn align_record(
    fields: &HashMap<String, String>,
    schema: &FeatureSchema,
) -> crate::Result<Vec<Option<f64>>> {
    if schema.columns.is_empty() {
        return Err(ChurnError::EmptySchema);
    }
    let record = CustomerRecord::from_fields(fields)?;
    schema.align(&EngineeredRecord::from_record(&record))
}

/// Score one raw new-customer record
///
/// # Arguments
/// * `fields` - Raw `field -> value` pairs; `tenure`, `total_charges`,
///   `contract_type` and `internet_service` are required
/// * `schema` - Reference columns fixed at training time
/// * `model` - Any fitted probabilistic variant
pub fn predict_churn(
    fields: &HashMap<String, String>,
    schema: &FeatureSchema,
    model: &dyn ProbabilisticClassifier,
) -> crate::Result<ChurnPrediction> {
    let row = align_record(fields, schema)?;
    if model.n_features() != row.len() {
        return Err(ChurnError::SchemaMismatch(format!(
            "model was fitted on {} columns but the reference schema has {}",
            model.n_features(),
            row.len()
        )));
    }

    let input = Array2::from_shape_vec((1, row.len()), schema.impute(&row))?;
    let probability = model.predict_probability(&input)?[0];

    Ok(ChurnPrediction { row, probability })
}
