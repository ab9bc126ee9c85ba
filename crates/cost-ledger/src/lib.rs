//! Token usage and cost accounting for model inference calls.
//!
//! A [`CostLedger`] converts token counts into USD using an immutable
//! [`PricingTable`] and keeps running totals per label and model, persisted
//! after every update. Dispatchers report usage through the
//! [`UsageRecorder`] trait so they never depend on the ledger itself.

mod error;
mod ledger;
mod pricing;
mod types;

pub use error::LedgerError;
pub use ledger::{CostLedger, LEDGER_FILE_NAME};
pub use pricing::{calculate_cost, PricingTable, TierPrices, DEFAULT_TIER};
pub use types::*;

use async_trait::async_trait;

/// Sink for usage events emitted by successful model calls.
#[async_trait]
pub trait UsageRecorder: Send + Sync {
    /// Record one usage event under the recorder's default label and return
    /// its cost.
    async fn record(&self, event: UsageEvent) -> Result<f64, LedgerError>;
}

#[async_trait]
impl UsageRecorder for CostLedger {
    async fn record(&self, event: UsageEvent) -> Result<f64, LedgerError> {
        self.record_event(&event, None).await
    }
}
