use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One retained row of the export-contract ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRecord {
    pub contract_id: String,
    pub commit_date: NaiveDate,
    pub container_qty: Option<f64>,
    pub sale_qty_mt: f64,
    /// Already resolved through the schema's purchase quantity fallback.
    pub purchase_qty_mt: Option<f64>,
    pub sale_rate_per_mt: f64,
    pub purchase_rate_per_mt: f64,
    pub status: Option<String>,
    pub gross_margin_override: Option<f64>,
    pub margin_per_mt_override: Option<f64>,
}

/// Validated rows returned by the loader. Row order follows the source sheet.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LedgerTable {
    pub rows: Vec<ContractRecord>,
}

impl LedgerTable {
    pub fn new(rows: Vec<ContractRecord>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ContractRecord> {
        self.rows.iter()
    }
}

impl FromIterator<ContractRecord> for LedgerTable {
    fn from_iter<I: IntoIterator<Item = ContractRecord>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedRecord {
    #[serde(flatten)]
    pub record: ContractRecord,
    pub revenue: f64,
    pub cost: f64,
    pub margin: f64,
}

impl DerivedRecord {
    /// Margin per metric ton as reported by the source, if it carries one.
    pub fn margin_per_mt(&self) -> Option<f64> {
        self.record.margin_per_mt_override
    }
}

/// Ledger rows with revenue, cost and margin attached.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DerivedTable {
    pub rows: Vec<DerivedRecord>,
}

impl DerivedTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DerivedRecord> {
        self.rows.iter()
    }

    /// The underlying ledger rows without derived columns.
    pub fn to_ledger(&self) -> LedgerTable {
        self.rows.iter().map(|r| r.record.clone()).collect()
    }
}

impl FromIterator<DerivedRecord> for DerivedTable {
    fn from_iter<I: IntoIterator<Item = DerivedRecord>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}
