use crate::error::{Result, UsageError};
use crate::utils::diff_month;
use chrono::{Datelike, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

pub const COL_DATE: &str = "Date";
pub const COL_QUANTITY: &str = "Quantity";
pub const COL_COST: &str = "Cost";
pub const COL_SOURCE_FILE: &str = "SourceFile";
pub const COL_SUBSCRIPTION_GUID: &str = "SubscriptionGuid";
pub const COL_SUBSCRIPTION_NAME: &str = "SubscriptionName";
pub const COL_SERVICE_TYPE: &str = "ServiceType";
pub const COL_SERVICE_NAME: &str = "ServiceName";
pub const COL_SERVICE_RESOURCE: &str = "ServiceResource";

// EduHub export schema
pub const COL_HANDOUT_NAME: &str = "HandoutName";
pub const COL_LAB_NAME: &str = "LabName";
pub const COL_COURSE_NAME: &str = "CourseName";

/// Columns every usage record carries, in export order.
pub const STANDARD_COLUMNS: [&str; 8] = [
    COL_DATE,
    COL_QUANTITY,
    COL_COST,
    COL_SUBSCRIPTION_GUID,
    COL_SUBSCRIPTION_NAME,
    COL_SERVICE_TYPE,
    COL_SERVICE_NAME,
    COL_SERVICE_RESOURCE,
];

/// Calendar month label, rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

/// One service line item for one day, as reported by an export drop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub date: NaiveDate,
    pub quantity: f64,
    pub cost: f64,
    pub subscription_guid: String,
    /// Display name; may change over time for the same guid.
    pub subscription_name: String,
    pub service_type: String,
    pub service_name: String,
    pub service_resource: String,
    /// Provenance only, never part of record identity.
    pub source_file: String,
    /// Non-standard columns passed through untouched; blank cells are omitted.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl UsageRecord {
    pub fn date_str(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    pub fn year_month(&self) -> YearMonth {
        YearMonth::of(self.date)
    }
}

/// A set of usage records plus the column names they were read with.
///
/// A table with no columns is "schema-less": it stands for "no data at all"
/// (absent directory, no eligible files) and is distinct from a table that
/// has columns but zero rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageTable {
    columns: Vec<String>,
    records: Vec<UsageRecord>,
}

impl UsageTable {
    pub fn schemaless() -> Self {
        Self::default()
    }

    pub fn new(columns: Vec<String>, records: Vec<UsageRecord>) -> Self {
        Self { columns, records }
    }

    pub fn is_schemaless(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[UsageRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<UsageRecord> {
        self.records
    }

    /// Row-wise concatenation. Columns are the union of all inputs, in order
    /// of first appearance.
    pub fn concat<I>(tables: I) -> UsageTable
    where
        I: IntoIterator<Item = UsageTable>,
    {
        let mut columns: Vec<String> = Vec::new();
        let mut records = Vec::new();

        for table in tables {
            for column in table.columns {
                if !columns.contains(&column) {
                    columns.push(column);
                }
            }
            records.extend(table.records);
        }

        UsageTable { columns, records }
    }

    /// Rows with `date_from <= date <= date_to`.
    pub fn filter_dates(&self, date_from: NaiveDate, date_to: NaiveDate) -> UsageTable {
        self.filter(|r| r.date >= date_from && r.date <= date_to)
    }

    pub fn filter<F>(&self, predicate: F) -> UsageTable
    where
        F: Fn(&UsageRecord) -> bool,
    {
        UsageTable {
            columns: self.columns.clone(),
            records: self.records.iter().filter(|r| predicate(r)).cloned().collect(),
        }
    }

    pub fn total_cost(&self) -> f64 {
        self.records.iter().map(|r| r.cost).sum()
    }

    pub fn total_quantity(&self) -> f64 {
        self.records.iter().map(|r| r.quantity).sum()
    }

    /// Earliest and latest record dates.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let min = self.records.iter().map(|r| r.date).min()?;
        let max = self.records.iter().map(|r| r.date).max()?;
        Some((min, max))
    }
}

/// Inclusive analysis period, e.g. a financial year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReportingWindow {
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
}

impl ReportingWindow {
    pub fn new(date_from: NaiveDate, date_to: NaiveDate) -> Result<Self> {
        let window = Self { date_from, date_to };
        window.validate()?;
        Ok(window)
    }

    pub fn validate(&self) -> Result<()> {
        if self.date_to < self.date_from {
            return Err(UsageError::InvalidWindow(format!(
                "end {} is before start {}",
                self.date_to, self.date_from
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Budget {
    #[schemars(description = "Human readable budget name, e.g. the project or grant it funds")]
    pub name: String,

    #[schemars(description = "First day (inclusive) the budget may be spent, YYYY-MM-DD")]
    pub dt_from: NaiveDate,

    #[schemars(description = "Last day (inclusive) the budget may be spent, YYYY-MM-DD")]
    pub dt_to: NaiveDate,

    #[schemars(description = "Total amount available over the validity window")]
    pub amount: f64,

    #[schemars(description = "Currency code. Informational only, no conversion is performed")]
    pub currency: String,
}

impl Budget {
    pub fn new(
        name: impl Into<String>,
        dt_from: NaiveDate,
        dt_to: NaiveDate,
        amount: f64,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            dt_from,
            dt_to,
            amount,
            currency: currency.into(),
        }
    }

    pub fn overlaps(&self, window: &ReportingWindow) -> bool {
        !(self.dt_to < window.date_from || self.dt_from > window.date_to)
    }

    pub fn validity_days(&self) -> i64 {
        (self.dt_to - self.dt_from).num_days()
    }

    pub fn validity_months(&self) -> i32 {
        diff_month(self.dt_to, self.dt_from)
    }

    pub fn validate(&self) -> Result<()> {
        if self.validity_days() <= 0 || self.validity_months() <= 0 {
            return Err(UsageError::DegenerateBudget {
                name: self.name.clone(),
                dt_from: self.dt_from,
                dt_to: self.dt_to,
            });
        }
        if self.amount < 0.0 {
            return Err(UsageError::InvalidConfig(format!(
                "budget '{}' has negative amount {}",
                self.name, self.amount
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SponsorshipPool {
    #[schemars(description = "Start of the sponsorship analysis period, YYYY-MM-DD")]
    pub date_from: NaiveDate,

    #[schemars(description = "End of the sponsorship analysis period (inclusive), YYYY-MM-DD")]
    pub date_to: NaiveDate,

    #[schemars(description = "Sponsorship amount granted for the period")]
    pub amount: f64,

    #[serde(default)]
    #[schemars(description = "Currency code. Informational only")]
    pub currency: String,
}

impl SponsorshipPool {
    pub fn window(&self) -> ReportingWindow {
        ReportingWindow {
            date_from: self.date_from,
            date_to: self.date_to,
        }
    }
}

/// Externally supplied budget configuration for both funding pools.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FundingConfig {
    #[serde(default)]
    #[schemars(description = "The sponsorship pool, if one is tracked")]
    pub sponsorship: Option<SponsorshipPool>,

    #[serde(default)]
    #[schemars(description = "Ordered list of EA budgets, each with its own validity window")]
    pub ea_budgets: Vec<Budget>,
}

impl FundingConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: FundingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(pool) = &self.sponsorship {
            pool.window().validate()?;
            if pool.amount < 0.0 {
                return Err(UsageError::InvalidConfig(format!(
                    "sponsorship amount {} is negative",
                    pool.amount
                )));
            }
        }
        for budget in &self.ea_budgets {
            budget.validate()?;
        }
        Ok(())
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(FundingConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::generate_json_schema())
    }
}

/// One calendar month of a budget projection. Exactly one of the two costs
/// is set: `ideal_cost` for elapsed months, `avail_cost` for the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmortizationRow {
    pub year_month: YearMonth,
    pub ideal_cost: Option<f64>,
    pub avail_cost: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(date: NaiveDate, cost: f64) -> UsageRecord {
        UsageRecord {
            date,
            quantity: 1.0,
            cost,
            subscription_guid: "{A}".to_string(),
            subscription_name: "Sub A".to_string(),
            service_type: "Storage".to_string(),
            service_name: "Blob".to_string(),
            service_resource: "LRS".to_string(),
            source_file: "2019-10-01-2019-09-15.csv".to_string(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_year_month_label() {
        let ym = YearMonth::of(NaiveDate::from_ymd_opt(2019, 3, 17).unwrap());
        assert_eq!(ym.label(), "2019-03");
        assert!(YearMonth::new(2019, 12) < YearMonth::new(2020, 1));
    }

    #[test]
    fn test_concat_unions_columns() {
        let a = UsageTable::new(
            vec!["Date".to_string(), "Cost".to_string()],
            vec![record(NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(), 1.0)],
        );
        let b = UsageTable::new(
            vec!["Cost".to_string(), "Region".to_string()],
            vec![record(NaiveDate::from_ymd_opt(2019, 1, 2).unwrap(), 2.0)],
        );

        let joined = UsageTable::concat(vec![a, UsageTable::schemaless(), b]);
        assert_eq!(joined.columns(), &["Date", "Cost", "Region"]);
        assert_eq!(joined.len(), 2);
        assert!((joined.total_cost() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_schemaless_is_distinct_from_empty() {
        let schemaless = UsageTable::schemaless();
        let typed = UsageTable::new(vec![COL_DATE.to_string()], vec![]);
        assert!(schemaless.is_schemaless() && schemaless.is_empty());
        assert!(!typed.is_schemaless() && typed.is_empty());
    }

    #[test]
    fn test_budget_validation() {
        let ok = Budget::new(
            "LwM",
            NaiveDate::from_ymd_opt(2019, 4, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            1000.0,
            "GBP",
        );
        assert!(ok.validate().is_ok());
        assert_eq!(ok.validity_months(), 59);

        let same_month = Budget::new(
            "Short",
            NaiveDate::from_ymd_opt(2019, 4, 1).unwrap(),
            NaiveDate::from_ymd_opt(2019, 4, 20).unwrap(),
            1000.0,
            "GBP",
        );
        assert!(matches!(
            same_month.validate(),
            Err(UsageError::DegenerateBudget { .. })
        ));
    }

    #[test]
    fn test_funding_config_from_json() {
        let json = r#"{
            "sponsorship": {
                "date_from": "2019-10-01",
                "date_to": "2020-09-30",
                "amount": 1000000.0
            },
            "ea_budgets": [
                {
                    "name": "ASG",
                    "dt_from": "2019-01-01",
                    "dt_to": "2020-03-31",
                    "amount": 250000.0,
                    "currency": "GBP"
                }
            ]
        }"#;

        let config = FundingConfig::from_json_str(json).unwrap();
        assert_eq!(config.ea_budgets.len(), 1);
        assert_eq!(config.ea_budgets[0].name, "ASG");
        assert_eq!(config.sponsorship.unwrap().currency, "");
    }

    #[test]
    fn test_funding_config_rejects_inverted_window() {
        let json = r#"{
            "sponsorship": {
                "date_from": "2020-10-01",
                "date_to": "2019-09-30",
                "amount": 10.0
            }
        }"#;
        assert!(matches!(
            FundingConfig::from_json_str(json),
            Err(UsageError::InvalidWindow(_))
        ));
    }

    #[test]
    fn test_schema_generation() {
        let schema_json = FundingConfig::schema_as_json().unwrap();
        assert!(schema_json.contains("ea_budgets"));
        assert!(schema_json.contains("dt_from"));
        assert!(schema_json.contains("sponsorship"));
    }
}
