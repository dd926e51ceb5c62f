use crate::error::{LedgerError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Current version of the ledger schema descriptor.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Physical row holding the column names. Row 0 of every exported ledger is a
/// decorative title row.
pub const DEFAULT_HEADER_ROW: usize = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LogicalField {
    #[schemars(description = "Sales contract identifier (SC#). Not unique across rows.")]
    ContractId,

    #[schemars(description = "Date the row is attributable to, used for monthly bucketing.")]
    CommitDate,

    #[schemars(description = "Physical containers shipped for the row.")]
    ContainerQty,

    #[schemars(description = "Quantity sold in metric tons.")]
    SaleQty,

    #[schemars(description = "Quantity purchased in metric tons.")]
    PurchaseQty,

    #[schemars(description = "Unit sale price per metric ton.")]
    SaleRate,

    #[schemars(description = "Unit purchase price per metric ton.")]
    PurchaseRate,

    #[schemars(description = "Free-form lifecycle tag such as 'Completed' or 'Pending'.")]
    Status,

    #[schemars(description = "Pre-computed gross margin that takes precedence over revenue - cost.")]
    MarginOverride,

    #[schemars(description = "Pre-computed gross margin per metric ton.")]
    MarginPerMtOverride,
}

impl LogicalField {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalField::ContractId => "contract_id",
            LogicalField::CommitDate => "commit_date",
            LogicalField::ContainerQty => "container_qty",
            LogicalField::SaleQty => "sale_qty_mt",
            LogicalField::PurchaseQty => "purchase_qty_mt",
            LogicalField::SaleRate => "sale_rate_per_mt",
            LogicalField::PurchaseRate => "purchase_rate_per_mt",
            LogicalField::Status => "status",
            LogicalField::MarginOverride => "gross_margin_override",
            LogicalField::MarginPerMtOverride => "margin_per_mt_override",
        }
    }
}

impl fmt::Display for LogicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum Presence {
    #[schemars(
        description = "The column must exist in the header row, and rows whose value is missing or fails coercion are dropped."
    )]
    Required,

    #[schemars(description = "The column may be absent; missing values stay missing.")]
    Optional,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum PurchaseQtyFallback {
    #[default]
    #[schemars(
        description = "When the ledger does not track purchase quantity (column absent or cell empty), use the sold quantity."
    )]
    SaleQty,

    #[schemars(description = "Leave purchase quantity missing; it then contributes nothing to the order book.")]
    Missing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct FieldSpec {
    #[schemars(description = "The logical field this entry maps")]
    pub field: LogicalField,

    #[schemars(
        description = "Candidate source column names, tried in order. Matching ignores case and surrounding/repeated whitespace."
    )]
    pub columns: Vec<String>,

    #[schemars(description = "Whether the field is required for a row to be kept")]
    pub presence: Presence,
}

impl FieldSpec {
    pub fn required(field: LogicalField, columns: &[&str]) -> Self {
        Self {
            field,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            presence: Presence::Required,
        }
    }

    pub fn optional(field: LogicalField, columns: &[&str]) -> Self {
        Self {
            field,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            presence: Presence::Optional,
        }
    }
}

fn default_header_row() -> usize {
    DEFAULT_HEADER_ROW
}

fn default_date_formats() -> Vec<String> {
    [
        "%Y-%m-%d",
        "%Y-%m-%d %H:%M:%S",
        "%Y/%m/%d",
        "%m/%d/%Y",
        "%d-%b-%Y",
        "%d %b %Y",
        "%b %d, %Y",
    ]
    .iter()
    .map(|f| f.to_string())
    .collect()
}

fn default_true() -> bool {
    true
}

/// Declared mapping from logical ledger fields to source columns.
///
/// Resolved once against the header row at load time; nothing downstream
/// checks for column presence again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct LedgerSchema {
    #[schemars(description = "Descriptor version. 1 = legacy sheet without purchase quantity, 2 = current.")]
    pub version: u32,

    #[serde(default = "default_header_row")]
    #[schemars(
        description = "0-based physical row holding the column names. Rows above it (the decorative title row) are skipped. Defaults to 1."
    )]
    pub header_row: usize,

    #[schemars(description = "Mapping from logical field to source column candidates")]
    pub fields: Vec<FieldSpec>,

    #[serde(default)]
    #[schemars(description = "How to fill purchase quantity when the source does not track it")]
    pub purchase_qty_fallback: PurchaseQtyFallback,

    #[serde(default = "default_date_formats")]
    #[schemars(description = "chrono format strings tried in order when coercing dates")]
    pub date_formats: Vec<String>,

    #[serde(default = "default_true")]
    #[schemars(description = "Accept spreadsheet serial day numbers (days since 1899-12-30) as dates")]
    pub accept_excel_serial_dates: bool,
}

impl Default for LedgerSchema {
    fn default() -> Self {
        Self {
            version: CURRENT_SCHEMA_VERSION,
            header_row: DEFAULT_HEADER_ROW,
            fields: vec![
                FieldSpec::required(LogicalField::ContractId, &["SC#", "SC No", "Contract"]),
                FieldSpec::required(LogicalField::CommitDate, &["PC Date", "Date"]),
                FieldSpec::optional(LogicalField::ContainerQty, &["Container Qty", "Containers"]),
                FieldSpec::required(LogicalField::SaleQty, &["SC Qty (MT)", "Sold Qty (MT)"]),
                FieldSpec::optional(
                    LogicalField::PurchaseQty,
                    &["PC Qty (MT)", "Purchase Qty (MT)"],
                ),
                FieldSpec::required(LogicalField::SaleRate, &["Sales Rate/MT (USD)", "Sale Rate/MT"]),
                FieldSpec::required(
                    LogicalField::PurchaseRate,
                    &["Purchase Rate/MT (USD)", "Purchase Rate/MT"],
                ),
                FieldSpec::optional(LogicalField::Status, &["Status"]),
                FieldSpec::optional(
                    LogicalField::MarginOverride,
                    &["Gross Margin", "Gross Margin (USD)"],
                ),
                FieldSpec::optional(
                    LogicalField::MarginPerMtOverride,
                    &["Margin/MT (USD)", "Gross Margin/MT", "Margin/MT"],
                ),
            ],
            purchase_qty_fallback: PurchaseQtyFallback::SaleQty,
            date_formats: default_date_formats(),
            accept_excel_serial_dates: true,
        }
    }
}

impl LedgerSchema {
    /// First-generation "Contracts Traded" sheet: no purchase quantity, status or
    /// margin columns.
    pub fn legacy() -> Self {
        Self {
            version: 1,
            fields: vec![
                FieldSpec::required(LogicalField::ContractId, &["SC#"]),
                FieldSpec::required(LogicalField::CommitDate, &["PC Date"]),
                FieldSpec::optional(LogicalField::ContainerQty, &["Container Qty"]),
                FieldSpec::required(LogicalField::SaleQty, &["SC Qty (MT)"]),
                FieldSpec::required(LogicalField::SaleRate, &["Sales Rate/MT (USD)"]),
                FieldSpec::required(LogicalField::PurchaseRate, &["Purchase Rate/MT (USD)"]),
            ],
            ..Self::default()
        }
    }

    pub fn field(&self, field: LogicalField) -> Option<&FieldSpec> {
        self.fields.iter().find(|spec| spec.field == field)
    }

    pub fn is_required(&self, field: LogicalField) -> bool {
        self.field(field)
            .map(|spec| spec.presence == Presence::Required)
            .unwrap_or(false)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for spec in &self.fields {
            if !seen.insert(spec.field) {
                return Err(LedgerError::InvalidConfig(format!(
                    "Logical field '{}' is mapped more than once",
                    spec.field
                )));
            }
            if spec.columns.iter().all(|c| c.trim().is_empty()) {
                return Err(LedgerError::InvalidConfig(format!(
                    "Logical field '{}' has no candidate column names",
                    spec.field
                )));
            }
        }

        // The record model cannot represent a row without these.
        for field in [
            LogicalField::ContractId,
            LogicalField::CommitDate,
            LogicalField::SaleQty,
            LogicalField::SaleRate,
            LogicalField::PurchaseRate,
        ] {
            if !self.is_required(field) {
                return Err(LedgerError::InvalidConfig(format!(
                    "Logical field '{}' must be mapped as Required",
                    field
                )));
            }
        }

        if self.date_formats.is_empty() && !self.accept_excel_serial_dates {
            return Err(LedgerError::InvalidConfig(
                "No date formats configured and serial dates disabled".to_string(),
            ));
        }

        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let schema: LedgerSchema = serde_json::from_str(json)?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(LedgerSchema)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}
