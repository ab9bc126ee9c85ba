//! Usage events and persisted ledger records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Token counts reported by one successful model call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Subset of `input_tokens` served from the provider's prompt cache.
    #[serde(default)]
    pub cached_input_tokens: u64,
}

impl UsageEvent {
    pub fn new(model: impl Into<String>, input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            model: model.into(),
            input_tokens,
            output_tokens,
            cached_input_tokens: 0,
        }
    }

    pub fn with_cached_input(mut self, cached_input_tokens: u64) -> Self {
        self.cached_input_tokens = cached_input_tokens;
        self
    }

    /// Input tokens billed at the standard input rate.
    pub fn billable_input_tokens(&self) -> u64 {
        self.input_tokens.saturating_sub(self.cached_input_tokens)
    }
}

/// Running totals for one (label, model) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub input_tokens: u64,
    #[serde(default)]
    pub cached_input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost: f64,
}

impl LedgerRecord {
    pub(crate) fn accumulate(&mut self, event: &UsageEvent, cost: f64) {
        self.input_tokens += event.input_tokens;
        self.cached_input_tokens += event.cached_input_tokens;
        self.output_tokens += event.output_tokens;
        self.total_cost = crate::pricing::round_cost(self.total_cost + cost);
    }
}

/// On-disk ledger shape: label -> model -> record.
pub type LedgerDocument = BTreeMap<String, BTreeMap<String, LedgerRecord>>;
