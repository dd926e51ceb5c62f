use crate::engine::OrderBook;
use crate::error::Result;
use crate::ledger::DerivedTable;
use csv::Writer;
use std::fs::File;
use std::io::Write;
use std::path::Path;

fn opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Writes the raw contract data view: ledger columns plus revenue, cost and
/// margin, one line per retained row.
pub fn write_derived_csv<W: Write>(table: &DerivedTable, writer: W) -> Result<()> {
    let mut writer = Writer::from_writer(writer);

    writer.write_record([
        "contract_id",
        "commit_date",
        "container_qty",
        "sale_qty_mt",
        "purchase_qty_mt",
        "sale_rate_per_mt",
        "purchase_rate_per_mt",
        "status",
        "revenue",
        "cost",
        "margin",
    ])?;

    for row in table.iter() {
        let record = &row.record;
        writer.write_record(&[
            record.contract_id.clone(),
            record.commit_date.format("%Y-%m-%d").to_string(),
            opt(record.container_qty),
            record.sale_qty_mt.to_string(),
            opt(record.purchase_qty_mt),
            record.sale_rate_per_mt.to_string(),
            record.purchase_rate_per_mt.to_string(),
            record.status.clone().unwrap_or_default(),
            row.revenue.to_string(),
            row.cost.to_string(),
            row.margin.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

pub fn write_order_book_csv<W: Write>(book: &OrderBook, writer: W) -> Result<()> {
    let mut writer = Writer::from_writer(writer);

    writer.write_record([
        "contract_id",
        "sales_qty",
        "purchase_qty",
        "exposure",
        "classification",
        "avg_sale_price",
        "avg_purchase_price",
        "total_margin",
        "avg_margin_per_mt",
    ])?;

    for entry in book.iter() {
        writer.write_record(&[
            entry.contract_id.clone(),
            entry.sales_qty.to_string(),
            entry.purchase_qty.to_string(),
            entry.exposure.to_string(),
            entry.classification.to_string(),
            entry.avg_sale_price.to_string(),
            entry.avg_purchase_price.to_string(),
            entry.total_margin.to_string(),
            opt(entry.avg_margin_per_mt),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

pub fn export_order_book(book: &OrderBook, path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path)?;
    write_order_book_csv(book, file)
}
