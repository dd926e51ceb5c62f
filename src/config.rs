use crate::error::{LedgerError, Result};
use crate::schema::LedgerSchema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CACHE_TTL_SECS: u64 = 600;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, JsonSchema)]
pub struct ReconciliationConfig {
    /// Absolute exposure at or below which a contract counts as Balanced.
    /// Zero keeps exact-equality classification.
    #[serde(default)]
    #[schemars(
        description = "Absolute exposure (MT) at or below which a contract is classified Balanced. 0.0 means exact equality."
    )]
    pub balance_tolerance: f64,
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct DashboardConfig {
    #[serde(default)]
    #[schemars(description = "Column mapping used to read the ledger")]
    pub schema: LedgerSchema,

    #[serde(default)]
    pub reconciliation: ReconciliationConfig,

    #[serde(default = "default_cache_ttl_secs")]
    #[schemars(description = "How long a loaded ledger may be reused before it is read again, in seconds")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_fetch_timeout_secs")]
    #[schemars(description = "Timeout applied to remote ledger fetches, in seconds")]
    pub fetch_timeout_secs: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            schema: LedgerSchema::default(),
            reconciliation: ReconciliationConfig::default(),
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
        }
    }
}

impl DashboardConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: DashboardConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        self.schema.validate()?;

        let tolerance = self.reconciliation.balance_tolerance;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(LedgerError::InvalidConfig(format!(
                "Balance tolerance {} must be a finite, non-negative number",
                tolerance
            )));
        }

        if self.fetch_timeout_secs == 0 {
            return Err(LedgerError::InvalidConfig(
                "Fetch timeout must be at least one second".to_string(),
            ));
        }

        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}
