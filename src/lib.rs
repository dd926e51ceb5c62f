//! # Contract Ledger
//!
//! A library for turning an export-contract ledger (sales/purchase rows for
//! shipped containers of bulk material) into dashboard-ready results.
//!
//! ## Core Concepts
//!
//! - **Ledger Loader**: fetches a workbook or CSV export from a local path or remote URL, skips the
//!   decorative title row, resolves columns through a [`LedgerSchema`], coerces every
//!   cell independently and drops rows missing a required field
//! - **Derived Fields**: `revenue = sold qty * sale rate`, `cost = sold qty * purchase rate`,
//!   `margin = margin override` if the ledger carries one, else `revenue - cost`
//! - **Summaries**: KPI totals, per-status groups (with an `All` group first) and a
//!   chronological monthly trend
//! - **Order Book**: one row per contract reconciling sold vs. purchased quantity, with
//!   exposure classified as `OverSold`, `OverBought` or `Balanced`
//!
//! ## Example
//!
//! ```rust,ignore
//! use contract_ledger::*;
//!
//! let config = DashboardConfig::default();
//! let source = LedgerSource::parse("Contracts Traded.xlsx");
//!
//! let report = load_dashboard(&source, &config)?;
//! for entry in report.order_book.iter() {
//!     println!("{} {} {:.2}", entry.contract_id, entry.classification, entry.exposure);
//! }
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod ingestion;
pub mod ledger;
pub mod schema;
pub mod summary;
pub mod utils;

pub use cache::LedgerCache;
pub use config::{DashboardConfig, ReconciliationConfig};
pub use engine::{
    build_order_book, build_order_book_with, derive_fields, Classification, ContractSummary,
    ExposureTotals, OrderBook,
};
pub use error::{LedgerError, Result};
pub use export::{export_order_book, write_derived_csv, write_order_book_csv};
pub use ingestion::{load, parse_ledger, LedgerLoader, LedgerSource, SheetFormat};
pub use ledger::{ContractRecord, DerivedRecord, DerivedTable, LedgerTable};
pub use schema::{FieldSpec, LedgerSchema, LogicalField, Presence, PurchaseQtyFallback};
pub use summary::*;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything the presentation layer needs for one refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardReport {
    pub kpis: Aggregate,
    pub status_groups: Vec<(GroupKey, Aggregate)>,
    pub trend: Vec<TrendPoint>,
    pub order_book: OrderBook,
    pub rows: DerivedTable,
}

impl DashboardReport {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn status_group(&self, key: &GroupKey) -> Option<&Aggregate> {
        self.status_groups
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, aggregate)| aggregate)
    }

    /// KPIs for one contract; an unknown id gives empty totals.
    pub fn contract_kpis(&self, contract_id: &str) -> Aggregate {
        kpis_for_contract(&self.rows, contract_id)
    }
}

pub struct DashboardProcessor;

impl DashboardProcessor {
    /// Runs the full recomputation pass over an already loaded ledger.
    pub fn process(table: &LedgerTable, config: &DashboardConfig) -> DashboardReport {
        Self::process_selection(table, config, &StatusFilter::All)
    }

    /// Like [`DashboardProcessor::process`], with KPIs, trend and order book
    /// restricted to rows matching `filter`. Status groups always cover the
    /// whole ledger so the selector keeps every option.
    pub fn process_selection(
        table: &LedgerTable,
        config: &DashboardConfig,
        filter: &StatusFilter,
    ) -> DashboardReport {
        let derived = derive_fields(table);
        let status_groups: BTreeMap<GroupKey, Aggregate> = summarize_by_status(&derived);
        let selected = filter_by_status(&derived, filter);

        debug!(
            "Building dashboard for {} of {} rows",
            selected.len(),
            derived.len()
        );

        DashboardReport {
            kpis: kpis(&selected),
            status_groups: status_groups.into_iter().collect(),
            trend: monthly_trend(&selected),
            order_book: build_order_book_with(&selected, &config.reconciliation),
            rows: selected,
        }
    }

    pub fn load_and_process(
        source: &LedgerSource,
        config: &DashboardConfig,
    ) -> Result<DashboardReport> {
        config.validate()?;
        let table = load(source, config)?;
        if table.is_empty() {
            info!("Ledger {} has no usable rows", source);
        }
        Ok(Self::process(&table, config))
    }
}

pub fn build_dashboard(table: &LedgerTable, config: &DashboardConfig) -> DashboardReport {
    DashboardProcessor::process(table, config)
}

pub fn load_dashboard(source: &LedgerSource, config: &DashboardConfig) -> Result<DashboardReport> {
    DashboardProcessor::load_and_process(source, config)
}
