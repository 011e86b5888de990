use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UsageError {
    #[error("Unparseable date column in {file}: value '{value}' matched none of [{tried}]")]
    DateColumn {
        file: String,
        value: String,
        tried: String,
    },

    #[error("Missing column '{column}' in {file}")]
    MissingColumn { file: String, column: String },

    #[error("Invalid number '{value}' in column '{column}' of {file} (row {row})")]
    InvalidNumber {
        file: String,
        column: String,
        row: usize,
        value: String,
    },

    #[error("Invalid reporting window: {0}")]
    InvalidWindow(String),

    #[error("Budget '{name}' has a degenerate validity window {dt_from} to {dt_to}")]
    DegenerateBudget {
        name: String,
        dt_from: NaiveDate,
        dt_to: NaiveDate,
    },

    #[error("Projection for budget '{budget}' is misaligned: expected months [{expected}], got [{found}]")]
    MisalignedProjection {
        budget: String,
        expected: String,
        found: String,
    },

    #[error("Invalid budget configuration: {0}")]
    InvalidConfig(String),

    #[error("Cannot export an empty ledger")]
    EmptyLedger,

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl UsageError {
    /// Errors that must abort a whole directory scan rather than skip one file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, UsageError::DateColumn { .. })
    }
}

pub type Result<T> = std::result::Result<T, UsageError>;
