//! Costs command - prints the task's ledger.

use crate::error::AppResult;
use cost_ledger::CostLedger;

/// Per-label cost lines followed by the overall total.
pub async fn render_totals(ledger: &CostLedger) -> Vec<String> {
    let mut lines = Vec::new();
    for label in ledger.snapshot().await.keys() {
        lines.push(format!("{:<24} ${:.6}", label, ledger.label_cost(label).await));
    }
    lines.push(format!("{:<24} ${:.6}", "total", ledger.total_cost().await));
    lines
}

pub async fn run(ledger: &CostLedger) -> AppResult<()> {
    let document = ledger.snapshot().await;

    println!("Ledger: {}", ledger.record_path().display());
    println!("{}", serde_json::to_string_pretty(&document)?);
    for line in render_totals(ledger).await {
        println!("{}", line);
    }

    Ok(())
}
