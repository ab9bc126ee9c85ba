//! Subcommand implementations.

pub mod batch;
pub mod chat;
pub mod costs;
pub mod stats;

use crate::config::{Config, LedgerConfig};
use crate::error::AppResult;
use anyhow::Context;
use cost_ledger::{CostLedger, PricingTable};
use inference_client::InferenceClient;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Build the dispatcher, attaching the task's ledger when pricing is
/// configured.
pub async fn build_client(
    config: &Config,
) -> AppResult<(InferenceClient, Option<Arc<CostLedger>>)> {
    let client = InferenceClient::from_config(&config.inference)?;

    info!(
        "Inference endpoint: {} (default model {})",
        config.inference.base_url, config.inference.default_model
    );

    match &config.ledger.pricing_path {
        Some(pricing_path) => {
            let ledger = open_ledger(&config.ledger, pricing_path).await?;
            Ok((client.with_recorder(ledger.clone()), Some(ledger)))
        }
        None => {
            warn!("LEDGER__PRICING_PATH not set - token usage will not be recorded");
            Ok((client, None))
        }
    }
}

/// Open the configured task's ledger. Fails when no pricing file is set.
pub async fn require_ledger(config: &LedgerConfig) -> AppResult<Arc<CostLedger>> {
    let pricing_path = config
        .pricing_path
        .as_ref()
        .context("LEDGER__PRICING_PATH must be set to open the cost ledger")?;
    open_ledger(config, pricing_path).await
}

async fn open_ledger(config: &LedgerConfig, pricing_path: &Path) -> AppResult<Arc<CostLedger>> {
    let pricing = PricingTable::from_file(pricing_path)?;
    info!(
        "Loaded {} pricing tiers from {:?}",
        pricing.len(),
        pricing_path
    );

    let ledger =
        CostLedger::for_task(pricing, &config.output_dir, &config.task_id, &config.label).await?;
    Ok(ledger)
}

/// Log the running cost after a command that dispatched calls.
pub async fn report_cost(ledger: Option<&CostLedger>) {
    if let Some(ledger) = ledger {
        info!(
            "Cost so far: ${:.6} under '{}' (${:.6} for the task)",
            ledger.label_cost(ledger.label()).await,
            ledger.label(),
            ledger.total_cost().await
        );
    }
}
