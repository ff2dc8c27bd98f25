//! Data loading: raw customer records from CSV using Polars

use crate::error::ChurnError;
use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CUSTOMER_ID: &str = "customer_id";
pub const TENURE: &str = "tenure";
pub const TOTAL_CHARGES: &str = "total_charges";
pub const CONTRACT_TYPE: &str = "contract_type";
pub const INTERNET_SERVICE: &str = "internet_service";
pub const CHURN: &str = "churn";

/// Raw columns the training file must provide
const TRAINING_COLUMNS: [&str; 6] = [
    CUSTOMER_ID,
    TENURE,
    TOTAL_CHARGES,
    CONTRACT_TYPE,
    INTERNET_SERVICE,
    CHURN,
];

/// One customer as read from the source, before feature engineering
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRecord {
    /// Opaque identifier; absent for inference input
    pub customer_id: Option<String>,
    /// Months with the provider, may be zero
    pub tenure: u32,
    pub total_charges: f64,
    pub contract_type: String,
    /// `None` when the source value was blank
    pub internet_service: Option<String>,
    /// `Some(true)` for "Yes"; absent for inference input
    pub churn: Option<bool>,
}

impl CustomerRecord {
    /// Build a record from loosely-typed `field -> value` pairs, as used for
    /// single-record inference. `tenure`, `total_charges`, `contract_type`
    /// and `internet_service` must be present as keys; an empty
    /// `internet_service` value means the category is missing.
    pub fn from_fields(fields: &HashMap<String, String>) -> crate::Result<Self> {
        let required = |name: &str| {
            fields
                .get(name)
                .map(|v| v.trim())
                .ok_or_else(|| ChurnError::missing(name))
        };

        let tenure = parse_tenure(required(TENURE)?)?;
        let total_charges = parse_charges(required(TOTAL_CHARGES)?)?;
        let contract_type = required(CONTRACT_TYPE)?;
        if contract_type.is_empty() {
            return Err(ChurnError::missing(CONTRACT_TYPE));
        }
        let internet_service = required(INTERNET_SERVICE)?;

        let churn = match fields.get(CHURN) {
            Some(label) => Some(parse_label(label)?),
            None => None,
        };

        Ok(Self {
            customer_id: fields.get(CUSTOMER_ID).cloned(),
            tenure,
            total_charges,
            contract_type: contract_type.to_string(),
            internet_service: non_blank(Some(internet_service)),
            churn,
        })
    }
}

/// Parse tenure in months; must be a non-negative integer
pub fn parse_tenure(value: &str) -> crate::Result<u32> {
    let trimmed = value.trim();
    if let Ok(months) = trimmed.parse::<u32>() {
        return Ok(months);
    }
    // Polars renders integral floats as "12.0"
    match trimmed.parse::<f64>() {
        Ok(v) if v >= 0.0 && v.fract() == 0.0 && v <= u32::MAX as f64 => Ok(v as u32),
        _ => Err(ChurnError::malformed(TENURE, value)),
    }
}

/// Parse a non-negative monetary amount
pub fn parse_charges(value: &str) -> crate::Result<f64> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err(ChurnError::malformed(TOTAL_CHARGES, value)),
    }
}

/// Map the raw churn label: "No" -> false, "Yes" -> true
pub fn parse_label(value: &str) -> crate::Result<bool> {
    match value.trim() {
        "Yes" => Ok(true),
        "No" => Ok(false),
        other => Err(ChurnError::MalformedLabel(other.to_string())),
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Load the training file into customer records
///
/// # Arguments
/// * `file_path` - Path to a comma-delimited file with a header row
///
/// # Returns
/// * One `CustomerRecord` per data row, in file order
pub fn load_customers<P: AsRef<Path>>(file_path: P) -> crate::Result<Vec<CustomerRecord>> {
    let path = file_path.as_ref();
    if std::fs::metadata(path)?.len() == 0 {
        return Err(ChurnError::EmptyInput);
    }

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(1000))
        .try_into_reader_with_file_path(Some(PathBuf::from(path)))?
        .finish()?;

    info!(rows = df.height(), columns = df.width(), "loaded {}", path.display());
    records_from_frame(&df)
}

/// Convert a raw frame into customer records, validating every required column
pub fn records_from_frame(df: &DataFrame) -> crate::Result<Vec<CustomerRecord>> {
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();

    for required in TRAINING_COLUMNS {
        if !names.iter().any(|n| n == required) {
            return Err(ChurnError::missing(required));
        }
    }
    for extra in names.iter().filter(|n| !TRAINING_COLUMNS.contains(&n.as_str())) {
        debug!(column = %extra, "ignoring column not used by the feature engineer");
    }

    if df.height() == 0 {
        return Err(ChurnError::EmptyInput);
    }

    let ids = string_column(df, CUSTOMER_ID)?;
    let tenures = string_column(df, TENURE)?;
    let charges = string_column(df, TOTAL_CHARGES)?;
    let contracts = string_column(df, CONTRACT_TYPE)?;
    let internet = string_column(df, INTERNET_SERVICE)?;
    let labels = string_column(df, CHURN)?;

    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let tenure = tenures[i]
            .as_deref()
            .ok_or_else(|| ChurnError::malformed(TENURE, ""))
            .and_then(parse_tenure)?;
        let total_charges = charges[i]
            .as_deref()
            .ok_or_else(|| ChurnError::malformed(TOTAL_CHARGES, ""))
            .and_then(parse_charges)?;
        let contract_type =
            non_blank(contracts[i].as_deref()).ok_or_else(|| ChurnError::missing(CONTRACT_TYPE))?;
        let churn = labels[i]
            .as_deref()
            .ok_or_else(|| ChurnError::MalformedLabel(String::new()))
            .and_then(parse_label)?;

        records.push(CustomerRecord {
            customer_id: non_blank(ids[i].as_deref()),
            tenure,
            total_charges,
            contract_type,
            internet_service: non_blank(internet[i].as_deref()),
            churn: Some(churn),
        });
    }

    Ok(records)
}

/// Read a column as optional strings regardless of the dtype Polars inferred
fn string_column(df: &DataFrame, name: &str) -> crate::Result<Vec<Option<String>>> {
    let values = df
        .column(name)?
        .cast(&DataType::String)?
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect();
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "customer_id,tenure,total_charges,contract_type,internet_service,monthly_charges,churn").unwrap();
        writeln!(file, "C-001,12,1200.5,month-to-month,dsl,100.0,Yes").unwrap();
        writeln!(file, "C-002,0,0,two-year,,20.0,No").unwrap();
        writeln!(file, "C-003,24,480,one-year,fiber optic,20.0,No").unwrap();
        file
    }

    #[test]
    fn test_load_customers() {
        let file = create_test_csv();
        let records = load_customers(file.path()).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].customer_id.as_deref(), Some("C-001"));
        assert_eq!(records[0].tenure, 12);
        assert_eq!(records[0].total_charges, 1200.5);
        assert_eq!(records[0].churn, Some(true));
        assert_eq!(records[1].tenure, 0);
        assert_eq!(records[1].internet_service, None);
        assert_eq!(records[2].internet_service.as_deref(), Some("fiber optic"));
    }

    #[test]
    fn test_empty_file() {
        let file = NamedTempFile::new().unwrap();
        assert!(matches!(
            load_customers(file.path()),
            Err(ChurnError::EmptyInput)
        ));
    }

    #[test]
    fn test_missing_column() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "customer_id,tenure,total_charges,internet_service,churn").unwrap();
        writeln!(file, "C-001,12,1200.5,dsl,Yes").unwrap();

        match load_customers(file.path()) {
            Err(ChurnError::MissingField(field)) => assert_eq!(field, CONTRACT_TYPE),
            other => panic!("expected missing field, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_values() {
        assert!(parse_tenure("-3").is_err());
        assert!(parse_tenure("abc").is_err());
        assert_eq!(parse_tenure("7.0").unwrap(), 7);
        assert!(parse_charges(" ").is_err());
        assert!(parse_charges("-1").is_err());
        assert!(matches!(
            parse_label("maybe"),
            Err(ChurnError::MalformedLabel(_))
        ));
    }

    #[test]
    fn test_from_fields_requires_keys() {
        let mut fields: HashMap<String, String> = [
            (TENURE, "5"),
            (TOTAL_CHARGES, "250"),
            (INTERNET_SERVICE, ""),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        assert!(matches!(
            CustomerRecord::from_fields(&fields),
            Err(ChurnError::MissingField(f)) if f == CONTRACT_TYPE
        ));

        fields.insert(CONTRACT_TYPE.to_string(), "one-year".to_string());
        let record = CustomerRecord::from_fields(&fields).unwrap();
        assert_eq!(record.internet_service, None);
        assert_eq!(record.churn, None);
    }
}
