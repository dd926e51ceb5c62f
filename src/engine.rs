use crate::config::ReconciliationConfig;
use crate::ledger::{ContractRecord, DerivedRecord, DerivedTable, LedgerTable};
use crate::utils::{mean, natural_cmp};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Exposure sign classification for one contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    /// More sold than purchased (exposure > 0)
    OverSold,
    /// More purchased than sold (exposure < 0)
    OverBought,
    Balanced,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::OverSold => "OverSold",
            Classification::OverBought => "OverBought",
            Classification::Balanced => "Balanced",
        }
    }

    /// Classifies `exposure` (sales minus purchases).
    ///
    /// `tolerance` of zero means exact equality: any nonzero remainder,
    /// however small, is OverSold or OverBought.
    pub fn from_exposure(exposure: f64, tolerance: f64) -> Self {
        if exposure.abs() <= tolerance {
            Classification::Balanced
        } else if exposure > 0.0 {
            Classification::OverSold
        } else {
            Classification::OverBought
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order-book row: one per distinct contract id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractSummary {
    pub contract_id: String,
    pub row_count: usize,
    pub total_containers: f64,
    pub sales_qty: f64,
    pub purchase_qty: f64,
    pub exposure: f64,
    pub classification: Classification,
    pub avg_sale_price: f64,
    pub avg_purchase_price: f64,
    pub total_revenue: f64,
    pub total_cost: f64,
    pub total_margin: f64,
    /// `None` when the source carries no per-MT margin and nothing was sold.
    pub avg_margin_per_mt: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ExposureTotals {
    pub over_sold: usize,
    pub over_bought: usize,
    pub balanced: usize,
    pub net_exposure: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub entries: Vec<ContractSummary>,
}

impl OrderBook {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ContractSummary> {
        self.entries.iter()
    }

    pub fn get(&self, contract_id: &str) -> Option<&ContractSummary> {
        self.entries.iter().find(|e| e.contract_id == contract_id)
    }

    pub fn exposure_totals(&self) -> ExposureTotals {
        self.entries
            .iter()
            .fold(ExposureTotals::default(), |mut totals, entry| {
                match entry.classification {
                    Classification::OverSold => totals.over_sold += 1,
                    Classification::OverBought => totals.over_bought += 1,
                    Classification::Balanced => totals.balanced += 1,
                }
                totals.net_exposure += entry.exposure;
                totals
            })
    }
}

fn derive_record(record: &ContractRecord) -> DerivedRecord {
    let revenue = record.sale_qty_mt * record.sale_rate_per_mt;
    let cost = record.sale_qty_mt * record.purchase_rate_per_mt;
    let margin = record.gross_margin_override.unwrap_or(revenue - cost);

    DerivedRecord {
        record: record.clone(),
        revenue,
        cost,
        margin,
    }
}

/// Attaches revenue, cost and margin to every row.
///
/// Derived values are computed from the ledger fields only, so re-deriving
/// an already derived table gives the same result.
pub fn derive_fields(table: &LedgerTable) -> DerivedTable {
    table.iter().map(derive_record).collect()
}

/// Groups rows by contract id and reconciles sold vs. purchased quantity
/// with exact-zero classification.
pub fn build_order_book(table: &DerivedTable) -> OrderBook {
    build_order_book_with(table, &ReconciliationConfig::default())
}

pub fn build_order_book_with(table: &DerivedTable, config: &ReconciliationConfig) -> OrderBook {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&DerivedRecord>> = HashMap::new();

    for row in table.iter() {
        let id = row.record.contract_id.as_str();
        groups
            .entry(id)
            .or_insert_with(|| {
                order.push(id);
                Vec::new()
            })
            .push(row);
    }

    order.sort_by(|a, b| natural_cmp(a, b));

    let entries: Vec<ContractSummary> = order
        .into_iter()
        .filter_map(|id| groups.get(id).map(|rows| summarize_contract(id, rows, config)))
        .collect();

    debug!(
        "Built order book with {} contracts from {} rows",
        entries.len(),
        table.len()
    );

    OrderBook { entries }
}

fn summarize_contract(
    contract_id: &str,
    rows: &[&DerivedRecord],
    config: &ReconciliationConfig,
) -> ContractSummary {
    let sales_qty: f64 = rows.iter().map(|r| r.record.sale_qty_mt).sum();
    let purchase_qty: f64 = rows.iter().filter_map(|r| r.record.purchase_qty_mt).sum();
    let exposure = sales_qty - purchase_qty;
    let total_margin: f64 = rows.iter().map(|r| r.margin).sum();

    let avg_margin_per_mt = mean(rows.iter().filter_map(|r| r.margin_per_mt()))
        .or_else(|| (sales_qty > 0.0).then(|| total_margin / sales_qty));

    ContractSummary {
        contract_id: contract_id.to_string(),
        row_count: rows.len(),
        total_containers: rows.iter().filter_map(|r| r.record.container_qty).sum(),
        sales_qty,
        purchase_qty,
        exposure,
        classification: Classification::from_exposure(exposure, config.balance_tolerance),
        avg_sale_price: mean(rows.iter().map(|r| r.record.sale_rate_per_mt)).unwrap_or(0.0),
        avg_purchase_price: mean(rows.iter().map(|r| r.record.purchase_rate_per_mt))
            .unwrap_or(0.0),
        total_revenue: rows.iter().map(|r| r.revenue).sum(),
        total_cost: rows.iter().map(|r| r.cost).sum(),
        total_margin,
        avg_margin_per_mt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(id: &str, sale_qty: f64, sale_rate: f64, purchase_rate: f64) -> ContractRecord {
        ContractRecord {
            contract_id: id.to_string(),
            commit_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            container_qty: Some(1.0),
            sale_qty_mt: sale_qty,
            purchase_qty_mt: Some(sale_qty),
            sale_rate_per_mt: sale_rate,
            purchase_rate_per_mt: purchase_rate,
            status: None,
            gross_margin_override: None,
            margin_per_mt_override: None,
        }
    }

    fn two_row_contract() -> LedgerTable {
        LedgerTable::new(vec![
            record("SC1", 10.0, 100.0, 80.0),
            record("SC1", 5.0, 110.0, 90.0),
        ])
    }

    #[test]
    fn test_derive_fields_formulas() {
        let derived = derive_fields(&two_row_contract());
        let revenue: Vec<f64> = derived.iter().map(|r| r.revenue).collect();
        let cost: Vec<f64> = derived.iter().map(|r| r.cost).collect();
        let margin: Vec<f64> = derived.iter().map(|r| r.margin).collect();
        assert_eq!(revenue, vec![1000.0, 550.0]);
        assert_eq!(cost, vec![800.0, 450.0]);
        assert_eq!(margin, vec![200.0, 100.0]);
    }

    #[test]
    fn test_derive_fields_is_idempotent() {
        let once = derive_fields(&two_row_contract());
        let twice = derive_fields(&once.to_ledger());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_margin_override_wins() {
        let mut row = record("SC1", 10.0, 100.0, 80.0);
        row.gross_margin_override = Some(150.0);
        let derived = derive_fields(&LedgerTable::new(vec![row]));
        assert_eq!(derived.rows[0].margin, 150.0);
        assert_eq!(derived.rows[0].revenue - derived.rows[0].cost, 200.0);

        let book = build_order_book(&derived);
        assert_eq!(book.entries[0].total_margin, 150.0);
    }

    #[test]
    fn test_order_book_two_rows() {
        let book = build_order_book(&derive_fields(&two_row_contract()));
        assert_eq!(book.len(), 1);

        let sc1 = book.get("SC1").unwrap();
        assert_eq!(sc1.sales_qty, 15.0);
        assert_eq!(sc1.purchase_qty, 15.0);
        assert_eq!(sc1.total_margin, 300.0);
        assert_eq!(sc1.exposure, 0.0);
        assert_eq!(sc1.classification, Classification::Balanced);
        assert_eq!(sc1.avg_sale_price, 105.0);
        assert_eq!(sc1.avg_purchase_price, 85.0);
        assert_eq!(sc1.avg_margin_per_mt, Some(20.0));
        assert_eq!(sc1.row_count, 2);
    }

    #[test]
    fn test_over_bought_has_negative_exposure() {
        let mut row = record("SC9", 10.0, 100.0, 80.0);
        row.purchase_qty_mt = Some(12.5);
        let book = build_order_book(&derive_fields(&LedgerTable::new(vec![row])));
        let entry = book.get("SC9").unwrap();
        assert_eq!(entry.classification, Classification::OverBought);
        assert_eq!(entry.exposure, -2.5);
    }

    #[test]
    fn test_over_sold() {
        let mut row = record("SC3", 10.0, 100.0, 80.0);
        row.purchase_qty_mt = Some(4.0);
        let book = build_order_book(&derive_fields(&LedgerTable::new(vec![row])));
        assert_eq!(book.entries[0].classification, Classification::OverSold);
        assert_eq!(book.entries[0].exposure, 6.0);
    }

    #[test]
    fn test_zero_tolerance_keeps_float_noise() {
        let mut a = record("SC4", 0.1, 100.0, 80.0);
        a.purchase_qty_mt = Some(0.3);
        let mut b = record("SC4", 0.2, 100.0, 80.0);
        b.purchase_qty_mt = Some(0.0);
        let derived = derive_fields(&LedgerTable::new(vec![a, b]));

        // 0.1 + 0.2 - 0.3 is a tiny positive remainder in binary floating point.
        let book = build_order_book(&derived);
        assert_eq!(book.entries[0].classification, Classification::OverSold);

        let tolerant = build_order_book_with(
            &derived,
            &ReconciliationConfig {
                balance_tolerance: 1e-9,
            },
        );
        assert_eq!(tolerant.entries[0].classification, Classification::Balanced);
    }

    #[test]
    fn test_classification_is_total() {
        for exposure in [-1.0, -1e-12, 0.0, -0.0, 1e-12, 3.0] {
            let class = Classification::from_exposure(exposure, 0.0);
            assert_eq!(class == Classification::Balanced, exposure == 0.0);
        }
    }

    #[test]
    fn test_order_book_natural_order() {
        let table = LedgerTable::new(vec![
            record("SC10", 1.0, 1.0, 1.0),
            record("SC2", 1.0, 1.0, 1.0),
            record("SC1", 1.0, 1.0, 1.0),
        ]);
        let book = build_order_book(&derive_fields(&table));
        let ids: Vec<&str> = book.iter().map(|e| e.contract_id.as_str()).collect();
        assert_eq!(ids, vec!["SC1", "SC2", "SC10"]);
    }

    #[test]
    fn test_margin_per_mt_prefers_source_values() {
        let mut a = record("SC5", 10.0, 100.0, 80.0);
        a.margin_per_mt_override = Some(18.0);
        let mut b = record("SC5", 10.0, 100.0, 80.0);
        b.margin_per_mt_override = Some(22.0);
        let book = build_order_book(&derive_fields(&LedgerTable::new(vec![a, b])));
        assert_eq!(book.entries[0].avg_margin_per_mt, Some(20.0));
    }

    #[test]
    fn test_margin_per_mt_undefined_without_sales() {
        let mut zero = record("SC7", 0.0, 100.0, 80.0);
        zero.gross_margin_override = Some(50.0);
        let book = build_order_book(&derive_fields(&LedgerTable::new(vec![zero])));
        let sc7 = book.get("SC7").unwrap();
        assert_eq!(sc7.sales_qty, 0.0);
        assert_eq!(sc7.total_margin, 50.0);
        assert_eq!(sc7.avg_margin_per_mt, None);
    }

    #[test]
    fn test_empty_table() {
        let derived = derive_fields(&LedgerTable::default());
        assert!(derived.is_empty());
        let book = build_order_book(&derived);
        assert!(book.is_empty());
        assert_eq!(book.exposure_totals(), ExposureTotals::default());
    }

    #[test]
    fn test_exposure_totals() {
        let mut over = record("A", 10.0, 1.0, 1.0);
        over.purchase_qty_mt = Some(8.0);
        let mut under = record("B", 10.0, 1.0, 1.0);
        under.purchase_qty_mt = Some(11.0);
        let even = record("C", 10.0, 1.0, 1.0);
        let book = build_order_book(&derive_fields(&LedgerTable::new(vec![over, under, even])));
        let totals = book.exposure_totals();
        assert_eq!(totals.over_sold, 1);
        assert_eq!(totals.over_bought, 1);
        assert_eq!(totals.balanced, 1);
        assert_eq!(totals.net_exposure, 1.0);
    }
}
