//! Command-line interface definitions and argument parsing

use crate::error::ChurnError;
use clap::Parser;
use std::collections::HashMap;

/// Customer churn prediction CLI: SMOTE-balanced logistic regression,
/// random forest and gradient boosting on telecom account data
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input CSV file
    #[arg(short, long, default_value = "data.csv")]
    pub input: String,

    /// Output path for the feature-importance chart
    #[arg(short, long, default_value = "feature_importance.png")]
    pub output: String,

    /// Optional TOML file overriding pipeline settings
    #[arg(short, long)]
    pub config: Option<String>,

    /// Score one new customer after training, given as key=value pairs
    /// Example: --predict "tenure=5,total_charges=250,contract_type=month-to-month,internet_service=fiber optic"
    #[arg(short, long)]
    pub predict: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Parse the predict string into raw customer fields
    /// Expected format: "key=value,key=value,..."; values may be empty
    pub fn parse_customer_fields(&self) -> crate::Result<Option<HashMap<String, String>>> {
        let Some(ref predict_str) = self.predict else {
            return Ok(None);
        };

        let mut fields = HashMap::new();
        for pair in predict_str.split(',').filter(|p| !p.trim().is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ChurnError::MalformedRecord(format!("expected key=value, got {:?}", pair.trim()))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(ChurnError::MalformedRecord(format!(
                    "empty field name in {:?}",
                    pair.trim()
                )));
            }
            fields.insert(key.to_string(), value.trim().to_string());
        }

        if fields.is_empty() {
            return Err(ChurnError::MalformedRecord(
                "predict record has no fields".to_string(),
            ));
        }
        Ok(Some(fields))
    }
}
