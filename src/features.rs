//! Feature engineering shared by the training and inference paths
//!
//! Raw customers become a fixed, ordered feature row:
//! `tenure, total_charges, avg_monthly_charge, is_short_contract`, followed by
//! drop-first indicator columns for `contract_type` and `internet_service`.
//! The ordered column list is frozen in a [`FeatureSchema`] at training time
//! and every later record is aligned to it.

use crate::data::{CustomerRecord, CHURN, CONTRACT_TYPE, INTERNET_SERVICE, TENURE, TOTAL_CHARGES};
use crate::error::ChurnError;
use ndarray::{Array1, Array2};
use std::collections::{BTreeSet, HashMap};

pub const SCHEMA_VERSION: u32 = 1;
pub const AVG_MONTHLY_CHARGE: &str = "avg_monthly_charge";
pub const IS_SHORT_CONTRACT: &str = "is_short_contract";
pub const SHORT_CONTRACT: &str = "month-to-month";
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Numeric columns that precede the indicator block
pub const BASE_COLUMNS: [&str; 4] = [TENURE, TOTAL_CHARGES, AVG_MONTHLY_CHARGE, IS_SHORT_CONTRACT];

/// A customer after the per-record transformation rules have been applied
#[derive(Debug, Clone, PartialEq)]
pub struct EngineeredRecord {
    pub tenure: f64,
    pub total_charges: f64,
    /// `None` when tenure is zero
    pub avg_monthly_charge: Option<f64>,
    pub is_short_contract: bool,
    pub contract_type: String,
    /// Blank values are replaced by [`UNKNOWN_CATEGORY`]
    pub internet_service: String,
}

impl EngineeredRecord {
    /// Apply the transformation rules to one raw customer
    pub fn from_record(record: &CustomerRecord) -> Self {
        let contract_type = record.contract_type.trim().to_string();
        let internet_service = record
            .internet_service
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(UNKNOWN_CATEGORY)
            .to_string();

        let avg_monthly_charge = if record.tenure == 0 {
            None
        } else {
            Some(record.total_charges / f64::from(record.tenure))
        };

        Self {
            tenure: f64::from(record.tenure),
            total_charges: record.total_charges,
            avg_monthly_charge,
            is_short_contract: contract_type == SHORT_CONTRACT,
            contract_type,
            internet_service,
        }
    }

    /// Named values for this record alone: base columns plus one indicator
    /// for each category the record carries. Indicators for categories the
    /// record does not carry are simply absent.
    pub fn named_values(&self) -> HashMap<String, Option<f64>> {
        let mut values = HashMap::with_capacity(BASE_COLUMNS.len() + 2);
        values.insert(TENURE.to_string(), Some(self.tenure));
        values.insert(TOTAL_CHARGES.to_string(), Some(self.total_charges));
        values.insert(AVG_MONTHLY_CHARGE.to_string(), self.avg_monthly_charge);
        values.insert(
            IS_SHORT_CONTRACT.to_string(),
            Some(if self.is_short_contract { 1.0 } else { 0.0 }),
        );
        values.insert(indicator_name(CONTRACT_TYPE, &self.contract_type), Some(1.0));
        values.insert(
            indicator_name(INTERNET_SERVICE, &self.internet_service),
            Some(1.0),
        );
        values
    }
}

/// Indicator column name, pandas style: `<field>_<category>`
pub fn indicator_name(field: &str, category: &str) -> String {
    format!("{}_{}", field, category)
}

/// Drop-first encoding of one categorical field
#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalEncoding {
    pub field: String,
    /// The dropped category; unknown when the schema was rebuilt from column names
    pub reference: Option<String>,
    /// Categories that own an indicator column, in column order
    pub indicators: Vec<String>,
}

impl CategoricalEncoding {
    /// Sort the observed categories and drop the first one
    fn fit<'a>(field: &str, observed: impl Iterator<Item = &'a str>) -> Self {
        let sorted: BTreeSet<&str> = observed.collect();
        let mut categories = sorted.into_iter().map(str::to_string);
        let reference = categories.next();
        Self {
            field: field.to_string(),
            reference,
            indicators: categories.collect(),
        }
    }

    fn column_names(&self) -> impl Iterator<Item = String> + '_ {
        self.indicators
            .iter()
            .map(move |category| indicator_name(&self.field, category))
    }
}

/// Versioned, ordered feature schema decided once at training time
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    pub version: u32,
    /// Reference columns, in model input order
    pub columns: Vec<String>,
    pub contract_type: CategoricalEncoding,
    pub internet_service: CategoricalEncoding,
    /// Value substituted for a missing `avg_monthly_charge` in model input
    pub avg_charge_fill: f64,
}

impl FeatureSchema {
    /// Fix the schema from the engineered training records
    pub fn fit(records: &[EngineeredRecord]) -> crate::Result<Self> {
        if records.is_empty() {
            return Err(ChurnError::EmptyInput);
        }

        let contract_type =
            CategoricalEncoding::fit(CONTRACT_TYPE, records.iter().map(|r| r.contract_type.as_str()));
        let internet_service = CategoricalEncoding::fit(
            INTERNET_SERVICE,
            records.iter().map(|r| r.internet_service.as_str()),
        );

        let observed: Vec<f64> = records.iter().filter_map(|r| r.avg_monthly_charge).collect();
        let avg_charge_fill = median(observed).unwrap_or(0.0);

        let columns = BASE_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(contract_type.column_names())
            .chain(internet_service.column_names())
            .collect();

        Ok(Self {
            version: SCHEMA_VERSION,
            columns,
            contract_type,
            internet_service,
            avg_charge_fill,
        })
    }

    /// Rebuild a schema from a bare reference-column list. Reference
    /// categories cannot be recovered, so decoding an all-zero indicator
    /// block yields `None`.
    pub fn from_reference_columns(columns: Vec<String>, avg_charge_fill: f64) -> crate::Result<Self> {
        if columns.is_empty() {
            return Err(ChurnError::EmptySchema);
        }
        for base in BASE_COLUMNS {
            if !columns.iter().any(|c| c == base) {
                return Err(ChurnError::SchemaMismatch(format!(
                    "reference columns lack base column {}",
                    base
                )));
            }
        }

        let indicators_for = |field: &str| {
            let prefix = format!("{}_", field);
            CategoricalEncoding {
                field: field.to_string(),
                reference: None,
                indicators: columns
                    .iter()
                    .filter_map(|c| c.strip_prefix(prefix.as_str()).map(str::to_string))
                    .collect(),
            }
        };
        let contract_type = indicators_for(CONTRACT_TYPE);
        let internet_service = indicators_for(INTERNET_SERVICE);

        Ok(Self {
            version: SCHEMA_VERSION,
            columns,
            contract_type,
            internet_service,
            avg_charge_fill,
        })
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Select exactly the reference columns, in order; indicators the
    /// record does not carry default to 0 and columns outside the schema
    /// (such as an unseen category) are dropped.
    pub fn align(&self, record: &EngineeredRecord) -> crate::Result<Vec<Option<f64>>> {
        if self.columns.is_empty() {
            return Err(ChurnError::EmptySchema);
        }
        let mut values = record.named_values();
        Ok(self
            .columns
            .iter()
            .map(|column| match values.remove(column) {
                Some(value) => value,
                None => Some(0.0),
            })
            .collect())
    }

    /// Numeric model input for an aligned row; missing values take the fill
    pub fn impute(&self, row: &[Option<f64>]) -> Vec<f64> {
        row.iter()
            .map(|v| v.unwrap_or(self.avg_charge_fill))
            .collect()
    }

    /// Recover the category of `field` from an aligned row. All-zero
    /// indicators map to the reference category.
    pub fn decode_category(&self, field: &str, row: &[Option<f64>]) -> Option<String> {
        let encoding = match field {
            CONTRACT_TYPE => &self.contract_type,
            INTERNET_SERVICE => &self.internet_service,
            _ => return None,
        };
        encoding
            .indicators
            .iter()
            .find(|category| {
                let name = indicator_name(field, category);
                self.columns
                    .iter()
                    .position(|c| *c == name)
                    .and_then(|idx| row.get(idx).copied().flatten())
                    == Some(1.0)
            })
            .cloned()
            .or_else(|| encoding.reference.clone())
    }
}

/// Engineered training table
#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub schema: FeatureSchema,
    /// Aligned rows with missing values kept as `None`
    pub rows: Vec<Vec<Option<f64>>>,
    /// 0 = stayed, 1 = churned
    pub labels: Array1<usize>,
}

impl FeatureTable {
    /// Engineer every record, fix the schema and encode the labels
    pub fn from_records(records: &[CustomerRecord]) -> crate::Result<Self> {
        let engineered: Vec<EngineeredRecord> =
            records.iter().map(EngineeredRecord::from_record).collect();
        let schema = FeatureSchema::fit(&engineered)?;

        let rows = engineered
            .iter()
            .map(|r| schema.align(r))
            .collect::<crate::Result<Vec<_>>>()?;

        let labels = records
            .iter()
            .map(|r| match r.churn {
                Some(true) => Ok(1),
                Some(false) => Ok(0),
                None => Err(ChurnError::missing(CHURN)),
            })
            .collect::<crate::Result<Array1<usize>>>()?;

        Ok(Self {
            schema,
            rows,
            labels,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Dense model input with missing values imputed
    pub fn to_matrix(&self) -> crate::Result<Array2<f64>> {
        let width = self.schema.width();
        let flat: Vec<f64> = self
            .rows
            .iter()
            .flat_map(|row| self.schema.impute(row))
            .collect();
        Ok(Array2::from_shape_vec((self.rows.len(), width), flat)?)
    }

    /// Column of raw values, `None` where missing
    pub fn column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.schema.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|row| row[idx]).collect())
    }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tenure: u32, total: f64, contract: &str, internet: Option<&str>, churn: bool) -> CustomerRecord {
        CustomerRecord {
            customer_id: None,
            tenure,
            total_charges: total,
            contract_type: contract.to_string(),
            internet_service: internet.map(str::to_string),
            churn: Some(churn),
        }
    }

    fn training_records() -> Vec<CustomerRecord> {
        vec![
            record(10, 500.0, "month-to-month", Some("dsl"), true),
            record(20, 800.0, "one-year", Some("fiber optic"), false),
            record(30, 900.0, "two-year", None, false),
            record(0, 0.0, "month-to-month", Some("fiber optic"), true),
        ]
    }

    #[test]
    fn test_zero_tenure_is_missing_average() {
        let engineered = EngineeredRecord::from_record(&record(0, 0.0, "one-year", None, false));
        assert_eq!(engineered.avg_monthly_charge, None);
        assert_eq!(engineered.internet_service, UNKNOWN_CATEGORY);
    }

    #[test]
    fn test_short_contract_indicator() {
        for (contract, expected) in [
            ("month-to-month", true),
            ("one-year", false),
            ("two-year", false),
            ("Month-to-month", false),
        ] {
            let engineered = EngineeredRecord::from_record(&record(3, 30.0, contract, None, false));
            assert_eq!(engineered.is_short_contract, expected, "{}", contract);
        }
    }

    #[test]
    fn test_schema_columns_drop_first() {
        let table = FeatureTable::from_records(&training_records()).unwrap();
        assert_eq!(
            table.schema.columns,
            vec![
                "tenure",
                "total_charges",
                "avg_monthly_charge",
                "is_short_contract",
                "contract_type_one-year",
                "contract_type_two-year",
                "internet_service_fiber optic",
                "internet_service_unknown",
            ]
        );
        assert_eq!(table.schema.contract_type.reference.as_deref(), Some("month-to-month"));
        assert_eq!(table.schema.internet_service.reference.as_deref(), Some("dsl"));
        assert_eq!(table.labels.to_vec(), vec![1, 0, 0, 1]);
        // median of 50, 40, 30
        assert_eq!(table.schema.avg_charge_fill, 40.0);
    }

    #[test]
    fn test_missing_average_is_imputed_in_matrix_only() {
        let table = FeatureTable::from_records(&training_records()).unwrap();
        let avg = table.column(AVG_MONTHLY_CHARGE).unwrap();
        assert_eq!(avg[3], None);

        let matrix = table.to_matrix().unwrap();
        assert_eq!(matrix.shape(), &[4, 8]);
        assert_eq!(matrix[[3, 2]], 40.0);
        assert_eq!(matrix[[0, 2]], 50.0);
    }

    #[test]
    fn test_decode_recovers_categories() {
        let table = FeatureTable::from_records(&training_records()).unwrap();
        let schema = &table.schema;
        for (raw, row) in training_records().iter().zip(table.rows.iter()) {
            let engineered = EngineeredRecord::from_record(raw);
            assert_eq!(
                schema.decode_category(CONTRACT_TYPE, row).as_deref(),
                Some(engineered.contract_type.as_str())
            );
            assert_eq!(
                schema.decode_category(INTERNET_SERVICE, row).as_deref(),
                Some(engineered.internet_service.as_str())
            );
        }
    }

    #[test]
    fn test_unseen_category_is_all_zero() {
        let table = FeatureTable::from_records(&training_records()).unwrap();
        let unseen = EngineeredRecord::from_record(&record(5, 50.0, "weekly", Some("satellite"), false));
        let row = table.schema.align(&unseen).unwrap();

        assert_eq!(row.len(), table.schema.width());
        assert!(row[4..].iter().all(|v| *v == Some(0.0)));
        assert_eq!(
            table.schema.decode_category(CONTRACT_TYPE, &row).as_deref(),
            Some("month-to-month")
        );
    }

    #[test]
    fn test_reference_columns_rebuild() {
        assert!(matches!(
            FeatureSchema::from_reference_columns(Vec::new(), 0.0),
            Err(ChurnError::EmptySchema)
        ));

        let table = FeatureTable::from_records(&training_records()).unwrap();
        let rebuilt =
            FeatureSchema::from_reference_columns(table.schema.columns.clone(), 40.0).unwrap();
        assert_eq!(rebuilt.internet_service.indicators, vec!["fiber optic", "unknown"]);
        assert_eq!(rebuilt.contract_type.reference, None);
    }
}
