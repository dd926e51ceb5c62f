use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger source '{source_id}' is unreachable: {reason}")]
    Unreachable { source_id: String, reason: String },

    #[error("Required field '{field}' not found in header row (looked for: {candidates})")]
    SchemaMismatch { field: String, candidates: String },

    #[error("Malformed sheet: {0}")]
    MalformedSheet(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    pub fn unreachable(source_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unreachable {
            source_id: source_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
