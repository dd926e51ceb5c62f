use crate::ledger::{DerivedRecord, DerivedTable};
use crate::utils::{month_label, natural_cmp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

pub const ALL_GROUP_LABEL: &str = "All";

/// Bucket label for grouped summaries.
///
/// `All` always sorts first; values follow in natural order of their text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupKey {
    All,
    Value(String),
}

impl GroupKey {
    pub fn label(&self) -> &str {
        match self {
            GroupKey::All => ALL_GROUP_LABEL,
            GroupKey::Value(value) => value,
        }
    }
}

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (GroupKey::All, GroupKey::All) => Ordering::Equal,
            (GroupKey::All, GroupKey::Value(_)) => Ordering::Less,
            (GroupKey::Value(_), GroupKey::All) => Ordering::Greater,
            (GroupKey::Value(a), GroupKey::Value(b)) => natural_cmp(a, b),
        }
    }
}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Sum/mean/count reduction over a set of rows. Also serves as the KPI set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Aggregate {
    pub row_count: usize,
    pub contract_count: usize,
    pub total_containers: f64,
    pub total_sold_qty: f64,
    pub total_purchase_qty: f64,
    pub total_revenue: f64,
    pub total_cost: f64,
    pub total_margin: f64,
    pub avg_sale_rate: Option<f64>,
    pub avg_purchase_rate: Option<f64>,
}

impl Aggregate {
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a DerivedRecord>) -> Self {
        let mut aggregate = Aggregate::default();
        let mut contracts: HashSet<&str> = HashSet::new();
        let mut sale_rate_sum = 0.0;
        let mut purchase_rate_sum = 0.0;

        for row in rows {
            let record = &row.record;
            aggregate.row_count += 1;
            contracts.insert(record.contract_id.as_str());
            aggregate.total_containers += record.container_qty.unwrap_or(0.0);
            aggregate.total_sold_qty += record.sale_qty_mt;
            aggregate.total_purchase_qty += record.purchase_qty_mt.unwrap_or(0.0);
            aggregate.total_revenue += row.revenue;
            aggregate.total_cost += row.cost;
            aggregate.total_margin += row.margin;
            sale_rate_sum += record.sale_rate_per_mt;
            purchase_rate_sum += record.purchase_rate_per_mt;
        }

        aggregate.contract_count = contracts.len();
        if aggregate.row_count > 0 {
            let n = aggregate.row_count as f64;
            aggregate.avg_sale_rate = Some(sale_rate_sum / n);
            aggregate.avg_purchase_rate = Some(purchase_rate_sum / n);
        }

        aggregate
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    /// "YYYY-MM"
    pub month: String,
    pub revenue: f64,
    pub cost: f64,
    pub margin: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StatusFilter {
    #[default]
    All,
    Only(String),
}

/// Selector options are group keys, so a ledger status that happens to read
/// "All" still selects only its own rows.
impl From<&GroupKey> for StatusFilter {
    fn from(key: &GroupKey) -> Self {
        match key {
            GroupKey::All => StatusFilter::All,
            GroupKey::Value(status) => StatusFilter::Only(status.clone()),
        }
    }
}

impl StatusFilter {
    pub fn matches(&self, row: &DerivedRecord) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(status) => row.record.status.as_deref() == Some(status.as_str()),
        }
    }
}

/// Groups rows by `key` and reduces each group. Rows for which `key`
/// returns `None` belong to no group.
pub fn summarize<F>(table: &DerivedTable, key: F) -> BTreeMap<GroupKey, Aggregate>
where
    F: Fn(&DerivedRecord) -> Option<String>,
{
    let mut buckets: BTreeMap<GroupKey, Vec<&DerivedRecord>> = BTreeMap::new();
    for row in table.iter() {
        if let Some(value) = key(row) {
            buckets.entry(GroupKey::Value(value)).or_default().push(row);
        }
    }

    buckets
        .into_iter()
        .map(|(key, rows)| (key, Aggregate::from_rows(rows)))
        .collect()
}

/// Per-status totals with the `All` pseudo-group first. Rows without a
/// status only count toward `All`.
pub fn summarize_by_status(table: &DerivedTable) -> BTreeMap<GroupKey, Aggregate> {
    let mut groups = summarize(table, |row| row.record.status.clone());
    groups.insert(GroupKey::All, Aggregate::from_rows(table.iter()));
    groups
}

/// Revenue, cost and margin per commit month, oldest first.
pub fn monthly_trend(table: &DerivedTable) -> Vec<TrendPoint> {
    summarize(table, |row| Some(month_label(row.record.commit_date)))
        .into_iter()
        .map(|(key, aggregate)| TrendPoint {
            month: key.label().to_string(),
            revenue: aggregate.total_revenue,
            cost: aggregate.total_cost,
            margin: aggregate.total_margin,
        })
        .collect()
}

pub fn kpis(table: &DerivedTable) -> Aggregate {
    Aggregate::from_rows(table.iter())
}

pub fn kpis_for_contract(table: &DerivedTable, contract_id: &str) -> Aggregate {
    Aggregate::from_rows(
        table
            .iter()
            .filter(|row| row.record.contract_id == contract_id),
    )
}

pub fn filter_by_status(table: &DerivedTable, filter: &StatusFilter) -> DerivedTable {
    table.iter().filter(|row| filter.matches(row)).cloned().collect()
}

pub fn filter_by_contract(table: &DerivedTable, contract_id: &str) -> DerivedTable {
    table
        .iter()
        .filter(|row| row.record.contract_id == contract_id)
        .cloned()
        .collect()
}

/// Distinct contract ids in natural order.
pub fn contract_ids(table: &DerivedTable) -> Vec<String> {
    let mut ids: Vec<String> = table
        .iter()
        .map(|row| row.record.contract_id.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    ids.sort_by(|a, b| natural_cmp(a, b));
    ids
}

/// Selector options: [`GroupKey::All`] followed by the distinct statuses in
/// natural order. Convert a choice with `StatusFilter::from(&key)`.
pub fn status_options(table: &DerivedTable) -> Vec<GroupKey> {
    summarize_by_status(table).into_keys().collect()
}
