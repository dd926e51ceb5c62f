use contract_ledger::*;

fn main() {
    let location = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Contracts Traded.xlsx".to_string());
    let config = match std::env::args().nth(2) {
        Some(path) => match DashboardConfig::from_json_file(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("❌ Could not read config {}: {}", path, e);
                std::process::exit(2);
            }
        },
        None => DashboardConfig::default(),
    };

    let source = LedgerSource::parse(&location);
    let report = match load_dashboard(&source, &config) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    if report.is_empty() {
        println!("No usable rows in {}", source);
        return;
    }

    println!("📈 Key Metrics");
    println!("  Total Contracts: {}", report.kpis.contract_count);
    println!("  Containers:      {:.2}", report.kpis.total_containers);
    println!("  Quantity Sold:   {:.2} MT", report.kpis.total_sold_qty);
    println!("  Total Revenue:   ${:.2}", report.kpis.total_revenue);
    println!("  Total Cost:      ${:.2}", report.kpis.total_cost);
    println!("  Gross Margin:    ${:.2}", report.kpis.total_margin);

    println!("\n📊 By Status");
    for (key, aggregate) in &report.status_groups {
        println!(
            "  {:<12} rows={:<4} margin=${:.2}",
            key.label(),
            aggregate.row_count,
            aggregate.total_margin
        );
    }

    println!("\n🗓️ Monthly Trend");
    for point in &report.trend {
        println!(
            "  {}  revenue=${:>12.2}  cost=${:>12.2}  margin=${:>12.2}",
            point.month, point.revenue, point.cost, point.margin
        );
    }

    println!("\n📒 Order Book");
    for entry in report.order_book.iter() {
        println!(
            "  {:<10} sold={:>10.2} bought={:>10.2} exposure={:>10.2} {}",
            entry.contract_id,
            entry.sales_qty,
            entry.purchase_qty,
            entry.exposure,
            entry.classification
        );
    }

    let totals = report.order_book.exposure_totals();
    println!(
        "\n  OverSold: {}  OverBought: {}  Balanced: {}  Net exposure: {:.2} MT",
        totals.over_sold, totals.over_bought, totals.balanced, totals.net_exposure
    );
}
