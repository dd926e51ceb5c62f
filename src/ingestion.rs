use crate::config::DashboardConfig;
use crate::error::{LedgerError, Result};
use crate::ledger::{ContractRecord, LedgerTable};
use crate::schema::{LedgerSchema, LogicalField, Presence, PurchaseQtyFallback};
use crate::utils::{
    excel_serial_to_date, normalize_header, parse_date, parse_number, parse_quantity,
};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Where a ledger export lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LedgerSource {
    Local(PathBuf),
    Remote(String),
}

impl LedgerSource {
    pub fn parse(location: &str) -> Self {
        let trimmed = location.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            LedgerSource::Remote(trimmed.to_string())
        } else {
            LedgerSource::Local(PathBuf::from(trimmed))
        }
    }

    pub fn local(path: impl AsRef<Path>) -> Self {
        LedgerSource::Local(path.as_ref().to_path_buf())
    }
}

impl FromStr for LedgerSource {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for LedgerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerSource::Local(path) => write!(f, "{}", path.display()),
            LedgerSource::Remote(url) => f.write_str(url),
        }
    }
}

/// Stateless ledger loader: fetch, parse, coerce, filter.
pub struct LedgerLoader {
    schema: LedgerSchema,
    fetch_timeout: Duration,
}

impl LedgerLoader {
    pub fn new(schema: LedgerSchema, fetch_timeout: Duration) -> Self {
        Self {
            schema,
            fetch_timeout,
        }
    }

    pub fn from_config(config: &DashboardConfig) -> Self {
        Self::new(config.schema.clone(), config.fetch_timeout())
    }

    pub fn load(&self, source: &LedgerSource) -> Result<LedgerTable> {
        info!("Loading contract ledger from {}", source);
        let bytes = fetch_bytes(source, self.fetch_timeout)?;
        let table = parse_ledger(&bytes, &self.schema)?;
        info!("Loaded {} ledger rows from {}", table.len(), source);
        Ok(table)
    }
}

pub fn load(source: &LedgerSource, config: &DashboardConfig) -> Result<LedgerTable> {
    LedgerLoader::from_config(config).load(source)
}

pub fn fetch_bytes(source: &LedgerSource, timeout: Duration) -> Result<Vec<u8>> {
    match source {
        LedgerSource::Local(path) => std::fs::read(path).map_err(|e| {
            warn!("Could not read ledger file {}: {}", path.display(), e);
            LedgerError::unreachable(path.display().to_string(), e)
        }),
        LedgerSource::Remote(url) => fetch_remote(url, timeout),
    }
}

#[cfg(feature = "remote")]
fn fetch_remote(url: &str, timeout: Duration) -> Result<Vec<u8>> {
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LedgerError::unreachable(url, e))?;

    let response = client.get(url).send().map_err(|e| {
        warn!("Ledger fetch from {} failed: {}", url, e);
        LedgerError::unreachable(url, e)
    })?;

    let status = response.status();
    if !status.is_success() {
        warn!("Ledger fetch from {} returned status {}", url, status);
        return Err(LedgerError::unreachable(
            url,
            format!("HTTP status {}", status),
        ));
    }

    let body = response
        .bytes()
        .map_err(|e| LedgerError::unreachable(url, e))?;
    debug!("Fetched {} bytes from {}", body.len(), url);
    Ok(body.to_vec())
}

#[cfg(not(feature = "remote"))]
fn fetch_remote(url: &str, _timeout: Duration) -> Result<Vec<u8>> {
    Err(LedgerError::unreachable(
        url,
        "remote sources require the `remote` feature",
    ))
}

/// Logical field -> column index, resolved once per sheet.
#[derive(Debug, Clone, Default)]
pub struct ResolvedColumns {
    columns: HashMap<LogicalField, usize>,
}

impl ResolvedColumns {
    pub fn resolve(header: &[String], schema: &LedgerSchema) -> Result<Self> {
        let normalized: Vec<String> = header.iter().map(|h| normalize_header(h)).collect();
        let mut columns = HashMap::new();

        for spec in &schema.fields {
            let found = spec.columns.iter().find_map(|candidate| {
                let wanted = normalize_header(candidate);
                normalized.iter().position(|h| *h == wanted)
            });

            match (found, spec.presence) {
                (Some(index), _) => {
                    debug!(
                        "Mapped {} to column '{}' (#{})",
                        spec.field, header[index], index
                    );
                    columns.insert(spec.field, index);
                }
                (None, Presence::Required) => {
                    return Err(LedgerError::SchemaMismatch {
                        field: spec.field.to_string(),
                        candidates: spec.columns.join(", "),
                    });
                }
                (None, Presence::Optional) => {
                    debug!("Optional field {} not present in sheet", spec.field);
                }
            }
        }

        Ok(Self { columns })
    }

    pub fn index_of(&self, field: LogicalField) -> Option<usize> {
        self.columns.get(&field).copied()
    }
}

/// Container format of a ledger export, told apart by its leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    /// Comma-separated text export.
    Delimited,
    /// Spreadsheet workbook (xlsx/xlsm/xlsb zip container or legacy xls).
    Workbook,
}

impl SheetFormat {
    const ZIP_MAGIC: &'static [u8] = b"PK\x03\x04";
    const OLE_MAGIC: &'static [u8] = b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1";

    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(Self::ZIP_MAGIC) || bytes.starts_with(Self::OLE_MAGIC) {
            SheetFormat::Workbook
        } else {
            SheetFormat::Delimited
        }
    }
}

/// One sheet row with its zero-based physical row number.
type SheetRow = (usize, Vec<String>);

/// Parses raw sheet bytes into validated ledger rows.
///
/// Workbooks are read from their first worksheet, anything else as CSV.
/// Rows above `schema.header_row` are skipped, the header row is resolved
/// against the schema, and every following row is coerced cell by cell.
/// Rows missing any required field are dropped.
pub fn parse_ledger(bytes: &[u8], schema: &LedgerSchema) -> Result<LedgerTable> {
    schema.validate()?;

    match SheetFormat::detect(bytes) {
        SheetFormat::Workbook => {
            let rows = workbook_rows(bytes)?;
            build_table(rows.into_iter().map(Ok), schema)
        }
        SheetFormat::Delimited => {
            let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
            build_table(delimited_rows(bytes), schema)
        }
    }
}

fn build_table<I>(rows: I, schema: &LedgerSchema) -> Result<LedgerTable>
where
    I: IntoIterator<Item = Result<SheetRow>>,
{
    let mut rows = rows.into_iter();

    let resolved = loop {
        match rows.next() {
            Some(row) => {
                let (physical_row, cells) = row?;
                if physical_row < schema.header_row {
                    continue;
                }
                debug!("Header found at sheet row {}", physical_row + 1);
                break ResolvedColumns::resolve(&cells, schema)?;
            }
            None => {
                return Err(LedgerError::MalformedSheet(format!(
                    "Sheet has no header at row {}",
                    schema.header_row
                )));
            }
        }
    };

    let mut records = Vec::new();
    let mut dropped = 0usize;

    for row in rows {
        let (_, cells) = row?;
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }

        match build_record(&cells, &resolved, schema) {
            Some(record) => records.push(record),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        warn!(
            "Dropped {} ledger rows missing required fields ({} kept)",
            dropped,
            records.len()
        );
    }

    Ok(LedgerTable::new(records))
}

/// CSV rows keyed by the line they start on, so blank lines (which the
/// reader skips) still count toward the header offset.
fn delimited_rows(bytes: &[u8]) -> impl Iterator<Item = Result<SheetRow>> + '_ {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes)
        .into_byte_records()
        .enumerate()
        .map(|(index, result)| -> Result<SheetRow> {
            let record = result.map_err(|e| LedgerError::MalformedSheet(e.to_string()))?;
            let physical_row = record
                .position()
                .and_then(|p| (p.line() as usize).checked_sub(1))
                .unwrap_or(index);
            let cells = record
                .iter()
                .map(|cell| String::from_utf8_lossy(cell).into_owned())
                .collect();
            Ok((physical_row, cells))
        })
}

/// Rows of the first worksheet. The used range may start below row 1 when
/// leading rows are empty, so physical rows are offset by its start.
fn workbook_rows(bytes: &[u8]) -> Result<Vec<SheetRow>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| LedgerError::MalformedSheet(format!("Unreadable workbook: {}", e)))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| LedgerError::MalformedSheet("Workbook has no worksheets".to_string()))?
        .map_err(|e| LedgerError::MalformedSheet(format!("Unreadable worksheet: {}", e)))?;

    let first_row = range.start().map(|(row, _)| row as usize).unwrap_or(0);
    debug!(
        "Worksheet range starts at row {} with {} rows",
        first_row + 1,
        range.height()
    );

    Ok(range
        .rows()
        .enumerate()
        .map(|(i, row)| (first_row + i, row.iter().map(cell_text).collect()))
        .collect())
}

/// Renders a workbook cell the way a CSV export would show it. Date cells
/// become ISO dates so they parse whatever text formats are configured.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(text) | Data::DateTimeIso(text) => text.clone(),
        Data::Float(value) => value.to_string(),
        Data::Int(value) => value.to_string(),
        Data::Bool(value) => value.to_string(),
        Data::DateTime(value) => excel_serial_to_date(value.as_f64())
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        _ => String::new(),
    }
}

fn build_record(
    cells: &[String],
    resolved: &ResolvedColumns,
    schema: &LedgerSchema,
) -> Option<ContractRecord> {
    let cell = |field: LogicalField| {
        resolved
            .index_of(field)
            .and_then(|i| cells.get(i))
            .map(|c| c.as_str().trim())
            .filter(|c| !c.is_empty())
    };

    // Every cell is coerced on its own; a failure only makes that field missing.
    let contract_id = cell(LogicalField::ContractId).map(str::to_string);
    let commit_date = cell(LogicalField::CommitDate).and_then(|raw| {
        parse_date(raw, &schema.date_formats, schema.accept_excel_serial_dates)
    });
    let container_qty = cell(LogicalField::ContainerQty).and_then(parse_quantity);
    let sale_qty_mt = cell(LogicalField::SaleQty).and_then(parse_quantity);
    let purchase_qty_mt = cell(LogicalField::PurchaseQty).and_then(parse_quantity);
    let sale_rate_per_mt = cell(LogicalField::SaleRate).and_then(parse_number);
    let purchase_rate_per_mt = cell(LogicalField::PurchaseRate).and_then(parse_number);
    let status = cell(LogicalField::Status).map(str::to_string);
    let gross_margin_override = cell(LogicalField::MarginOverride).and_then(parse_number);
    let margin_per_mt_override = cell(LogicalField::MarginPerMtOverride).and_then(parse_number);

    let configurable_fields = [
        (LogicalField::ContainerQty, container_qty.is_some()),
        (LogicalField::PurchaseQty, purchase_qty_mt.is_some()),
        (LogicalField::Status, status.is_some()),
        (LogicalField::MarginOverride, gross_margin_override.is_some()),
        (LogicalField::MarginPerMtOverride, margin_per_mt_override.is_some()),
    ];
    if configurable_fields
        .iter()
        .any(|(field, present)| schema.is_required(*field) && !present)
    {
        return None;
    }

    let contract_id = contract_id?;
    let commit_date = commit_date?;
    let sale_qty_mt = sale_qty_mt?;
    let sale_rate_per_mt = sale_rate_per_mt?;
    let purchase_rate_per_mt = purchase_rate_per_mt?;

    let purchase_qty_mt = match (purchase_qty_mt, schema.purchase_qty_fallback) {
        (Some(qty), _) => Some(qty),
        (None, PurchaseQtyFallback::SaleQty) => Some(sale_qty_mt),
        (None, PurchaseQtyFallback::Missing) => None,
    };

    Some(ContractRecord {
        contract_id,
        commit_date,
        container_qty,
        sale_qty_mt,
        purchase_qty_mt,
        sale_rate_per_mt,
        purchase_rate_per_mt,
        status,
        gross_margin_override,
        margin_per_mt_override,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const SHEET: &str = "\
WHL Exports - Contracts Traded,,,,,,
SC#,PC Date,Container Qty,SC Qty (MT),Sales Rate/MT (USD),Purchase Rate/MT (USD),Status
SC1,2024-01-10,2,10,100,80,Completed
SC1,2024-02-05,1,5,110,90,Pending
SC2,,1,7,100,90,Pending
SC3,2024-02-20,abc,4,120,100,
";

    #[test]
    fn test_source_parse() {
        assert_eq!(
            LedgerSource::parse("https://example.com/ledger.csv"),
            LedgerSource::Remote("https://example.com/ledger.csv".to_string())
        );
        assert_eq!(
            LedgerSource::parse("Contracts Traded.csv"),
            LedgerSource::Local(PathBuf::from("Contracts Traded.csv"))
        );
        let parsed: LedgerSource = "HTTP://host/x.csv".parse().unwrap();
        assert!(matches!(parsed, LedgerSource::Remote(_)));
    }

    #[test]
    fn test_header_offset_and_filter() {
        let table = parse_ledger(SHEET.as_bytes(), &LedgerSchema::default()).unwrap();

        // SC2 has no commit date and is dropped entirely.
        assert_eq!(table.len(), 3);
        assert!(table.iter().all(|r| r.contract_id != "SC2"));

        let first = &table.rows[0];
        assert_eq!(first.contract_id, "SC1");
        assert_eq!(first.commit_date, NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
        assert_eq!(first.container_qty, Some(2.0));
        assert_eq!(first.status.as_deref(), Some("Completed"));
    }

    #[test]
    fn test_optional_coercion_failure_keeps_row() {
        let table = parse_ledger(SHEET.as_bytes(), &LedgerSchema::default()).unwrap();
        let sc3 = table.iter().find(|r| r.contract_id == "SC3").unwrap();
        assert_eq!(sc3.container_qty, None);
        assert_eq!(sc3.status, None);
    }

    #[test]
    fn test_purchase_qty_falls_back_to_sale_qty() {
        let table = parse_ledger(SHEET.as_bytes(), &LedgerSchema::default()).unwrap();
        assert!(table.iter().all(|r| r.purchase_qty_mt == Some(r.sale_qty_mt)));

        let mut schema = LedgerSchema::default();
        schema.purchase_qty_fallback = PurchaseQtyFallback::Missing;
        let table = parse_ledger(SHEET.as_bytes(), &schema).unwrap();
        assert!(table.iter().all(|r| r.purchase_qty_mt.is_none()));
    }

    #[test]
    fn test_header_matching_is_normalized() {
        let sheet = "title\n sc# , pc  date ,SC QTY (MT),sales rate/mt (usd),PURCHASE RATE/MT (USD)\nA,2024-05-01,3,10,9\n";
        let table = parse_ledger(sheet.as_bytes(), &LedgerSchema::legacy()).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0].sale_qty_mt, 3.0);
    }

    #[test]
    fn test_missing_required_column_is_schema_mismatch() {
        let sheet = "title\nSC#,PC Date,SC Qty (MT),Sales Rate/MT (USD)\nA,2024-05-01,3,10\n";
        let err = parse_ledger(sheet.as_bytes(), &LedgerSchema::legacy()).unwrap_err();
        assert!(matches!(err, LedgerError::SchemaMismatch { ref field, .. } if field == "purchase_rate_per_mt"));
    }

    #[test]
    fn test_header_only_sheet_is_empty_table() {
        let sheet = "title\nSC#,PC Date,SC Qty (MT),Sales Rate/MT (USD),Purchase Rate/MT (USD)\n";
        let table = parse_ledger(sheet.as_bytes(), &LedgerSchema::legacy()).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_sheet_without_header_is_malformed() {
        let err = parse_ledger(b"only a title row\n", &LedgerSchema::legacy()).unwrap_err();
        assert!(matches!(err, LedgerError::MalformedSheet(_)));
    }

    #[test]
    fn test_blank_title_line_still_counts_as_a_row() {
        let sheet = "\nSC#,PC Date,SC Qty (MT),Sales Rate/MT (USD),Purchase Rate/MT (USD)\nA,2024-05-01,3,10,9\n";
        let table = parse_ledger(sheet.as_bytes(), &LedgerSchema::legacy()).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0].contract_id, "A");
    }

    #[test]
    fn test_header_offset_counts_blank_lines() {
        let sheet = "title\n\nSC#,PC Date,SC Qty (MT),Sales Rate/MT (USD),Purchase Rate/MT (USD)\nA,2024-05-01,3,10,9\n";
        let mut schema = LedgerSchema::legacy();
        schema.header_row = 2;
        let table = parse_ledger(sheet.as_bytes(), &schema).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_invalid_schema_is_rejected_before_parsing() {
        let mut schema = LedgerSchema::legacy();
        schema
            .fields
            .retain(|spec| spec.field != LogicalField::PurchaseRate);
        for spec in schema.fields.iter_mut() {
            if spec.field == LogicalField::CommitDate {
                spec.presence = Presence::Optional;
            }
        }

        let err = parse_ledger(SHEET.as_bytes(), &schema).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidConfig(_)));

        let path = std::env::temp_dir().join(format!(
            "contract-ledger-invalid-schema-{}.csv",
            std::process::id()
        ));
        std::fs::write(&path, SHEET).unwrap();
        let loader = LedgerLoader::new(schema, Duration::from_secs(1));
        let err = loader.load(&LedgerSource::local(&path)).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidConfig(_)));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_sheet_format_detection() {
        assert_eq!(SheetFormat::detect(SHEET.as_bytes()), SheetFormat::Delimited);
        assert_eq!(SheetFormat::detect(b"PK\x03\x04rest"), SheetFormat::Workbook);
        assert_eq!(
            SheetFormat::detect(b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1rest"),
            SheetFormat::Workbook
        );
        assert_eq!(SheetFormat::detect(b""), SheetFormat::Delimited);
    }

    #[test]
    fn test_workbook_ledger() {
        let bytes = include_bytes!("../tests/fixtures/contracts_traded.xlsx");
        let table = parse_ledger(bytes, &LedgerSchema::default()).unwrap();

        // Row 1 is the title, row 2 the header; SC2 has no date cell.
        assert_eq!(table.len(), 2);
        let first = &table.rows[0];
        assert_eq!(first.contract_id, "SC1");
        assert_eq!(first.commit_date, NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
        assert_eq!(first.container_qty, Some(2.0));
        assert_eq!(first.sale_qty_mt, 10.0);
        assert_eq!(first.status.as_deref(), Some("Completed"));
        assert_eq!(
            table.rows[1].commit_date,
            NaiveDate::from_ymd_opt(2024, 2, 5).unwrap()
        );
    }

    #[test]
    fn test_corrupt_workbook_is_malformed() {
        let err = parse_ledger(b"PK\x03\x04not really a zip", &LedgerSchema::default()).unwrap_err();
        assert!(matches!(err, LedgerError::MalformedSheet(_)));
    }

    #[test]
    fn test_negative_sale_qty_drops_row() {
        let sheet = "title\nSC#,PC Date,SC Qty (MT),Sales Rate/MT (USD),Purchase Rate/MT (USD)\nA,2024-05-01,-3,10,9\nB,2024-05-01,3,10,9\n";
        let table = parse_ledger(sheet.as_bytes(), &LedgerSchema::legacy()).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0].contract_id, "B");
    }

    #[test]
    fn test_missing_local_file_is_unreachable() {
        let source = LedgerSource::local(std::env::temp_dir().join("contract-ledger-missing.csv"));
        let err = load(&source, &DashboardConfig::default()).unwrap_err();
        assert!(err.is_unreachable());
    }
}
