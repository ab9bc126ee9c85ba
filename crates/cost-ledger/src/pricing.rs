//! Pricing table and token-to-cost conversion.
//!
//! Prices are USD per million tokens. A table maps exact model identifiers
//! or family prefixes (e.g. `gpt-4`) to a tier, and must carry a `default`
//! tier used for models nothing else matches.

use crate::error::LedgerError;
use crate::types::UsageEvent;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Key of the mandatory fallback tier.
pub const DEFAULT_TIER: &str = "default";

/// Decimal places kept on every computed and accumulated cost.
const COST_PRECISION: i32 = 12;

/// Prices for one tier, in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct TierPrices {
    #[serde(default)]
    pub input: f64,
    /// Falls back to `input` when absent.
    #[serde(default)]
    pub cached_input: Option<f64>,
    #[serde(default)]
    pub output: f64,
}

impl TierPrices {
    pub fn new(input: f64, output: f64) -> Self {
        Self {
            input,
            cached_input: None,
            output,
        }
    }

    pub fn with_cached_input(mut self, cached_input: f64) -> Self {
        self.cached_input = Some(cached_input);
        self
    }

    pub fn cached_input_price(&self) -> f64 {
        self.cached_input.unwrap_or(self.input)
    }

    fn validate(&self, key: &str) -> Result<(), LedgerError> {
        let prices = [
            ("input", self.input),
            ("cached_input", self.cached_input_price()),
            ("output", self.output),
        ];
        for (field, price) in prices {
            if !price.is_finite() || price < 0.0 {
                return Err(LedgerError::InvalidPricing(format!(
                    "{}.{} must be a non-negative number, got {}",
                    key, field, price
                )));
            }
        }
        Ok(())
    }
}

/// Immutable model pricing, loaded once and handed to a ledger.
#[derive(Debug, Clone)]
pub struct PricingTable {
    tiers: HashMap<String, TierPrices>,
    default: TierPrices,
}

impl PricingTable {
    /// Build a table, rejecting it if the `default` tier is missing or any
    /// price is negative or not finite.
    pub fn new(tiers: HashMap<String, TierPrices>) -> Result<Self, LedgerError> {
        let default = *tiers.get(DEFAULT_TIER).ok_or_else(|| {
            LedgerError::InvalidPricing(format!("missing mandatory '{}' tier", DEFAULT_TIER))
        })?;
        for (key, prices) in &tiers {
            prices.validate(key)?;
        }
        Ok(Self { tiers, default })
    }

    /// Parse a JSON object of `model -> { input, output, cached_input? }`.
    pub fn from_json_str(json: &str) -> Result<Self, LedgerError> {
        let tiers: HashMap<String, TierPrices> = serde_json::from_str(json)
            .map_err(|e| LedgerError::InvalidPricing(e.to_string()))?;
        Self::new(tiers)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            LedgerError::InvalidPricing(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Resolve the tier for a model: exact key, then the longest key that is a
    /// prefix of the model, then `default`. Returns the matched key as well.
    pub fn resolve(&self, model: &str) -> (&str, &TierPrices) {
        if let Some((key, prices)) = self.tiers.get_key_value(model) {
            return (key.as_str(), prices);
        }

        let family = self
            .tiers
            .iter()
            .filter(|(key, _)| key.as_str() != DEFAULT_TIER && model.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len());

        match family {
            Some((key, prices)) => (key.as_str(), prices),
            None => {
                debug!("No pricing configured for {}, using default tier", model);
                (DEFAULT_TIER, &self.default)
            }
        }
    }

    /// Cost of one usage event under this table.
    pub fn cost(&self, usage: &UsageEvent) -> f64 {
        let (_, prices) = self.resolve(&usage.model);
        calculate_cost(usage, prices)
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

/// Calculate the cost of a usage event.
///
/// Formula:
/// - billable_input = max(input_tokens - cached_input_tokens, 0)
/// - cost = billable_input / 1e6 * input
///        + cached_input_tokens / 1e6 * cached_input
///        + output_tokens / 1e6 * output
///
/// rounded to 12 decimal places.
pub fn calculate_cost(usage: &UsageEvent, prices: &TierPrices) -> f64 {
    let per_million = |tokens: u64, price: f64| tokens as f64 / 1_000_000.0 * price;

    round_cost(
        per_million(usage.billable_input_tokens(), prices.input)
            + per_million(usage.cached_input_tokens, prices.cached_input_price())
            + per_million(usage.output_tokens, prices.output),
    )
}

pub(crate) fn round_cost(cost: f64) -> f64 {
    let scale = 10f64.powi(COST_PRECISION);
    (cost * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_table() -> PricingTable {
        let mut tiers = HashMap::new();
        tiers.insert(
            "gpt-4".to_string(),
            TierPrices::new(30.0, 60.0).with_cached_input(15.0),
        );
        tiers.insert("gpt".to_string(), TierPrices::new(1.0, 2.0));
        tiers.insert("default".to_string(), TierPrices::new(0.5, 1.5));
        PricingTable::new(tiers).unwrap()
    }

    #[test]
    fn test_exact_match_wins() {
        let table = test_table();
        let (key, _) = table.resolve("gpt-4");
        assert_eq!(key, "gpt-4");
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = test_table();
        let (key, prices) = table.resolve("gpt-4-extra");
        assert_eq!(key, "gpt-4");
        assert_eq!(prices.input, 30.0);

        let (key, _) = table.resolve("gpt-3.5-turbo");
        assert_eq!(key, "gpt");
    }

    #[test]
    fn test_unknown_model_uses_default() {
        let table = test_table();
        let (key, prices) = table.resolve("llama-x");
        assert_eq!(key, "default");
        assert_eq!(prices.output, 1.5);
    }

    #[test]
    fn test_cached_tokens_billed_at_cached_rate() {
        let table = test_table();
        let usage = UsageEvent::new("gpt-4", 1000, 0).with_cached_input(400);

        let cost = table.cost(&usage);

        // 600 / 1M * 30 + 400 / 1M * 15 = 0.018 + 0.006
        assert!((cost - 0.024).abs() < 1e-12, "got {}", cost);
        assert!((cost - 0.03).abs() > 1e-6);
    }

    #[test]
    fn test_cached_price_defaults_to_input_price() {
        let prices = TierPrices::new(2.0, 8.0);
        let usage = UsageEvent::new("m", 1_000_000, 500_000).with_cached_input(250_000);

        let cost = calculate_cost(&usage, &prices);

        // 750k * 2 + 250k * 2 + 500k * 8 = 1.5 + 0.5 + 4.0
        assert!((cost - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_cached_exceeding_input_never_goes_negative() {
        let prices = TierPrices::new(10.0, 0.0).with_cached_input(1.0);
        let usage = UsageEvent::new("m", 100, 0).with_cached_input(300);

        let cost = calculate_cost(&usage, &prices);

        assert!((cost - 0.0003).abs() < 1e-12);
    }

    #[test]
    fn test_cost_rounded_to_twelve_places() {
        let prices = TierPrices::new(1.0 / 3.0, 0.0);
        let usage = UsageEvent::new("m", 1, 0);

        let cost = calculate_cost(&usage, &prices);

        assert_eq!(cost, 0.000000333333);
    }

    #[test]
    fn test_missing_default_is_rejected() {
        let mut tiers = HashMap::new();
        tiers.insert("gpt-4".to_string(), TierPrices::new(1.0, 1.0));

        let result = PricingTable::new(tiers);

        assert!(matches!(result, Err(LedgerError::InvalidPricing(_))));
    }

    #[test]
    fn test_negative_price_is_rejected() {
        let json = r#"{"default": {"input": -1.0, "output": 1.0}}"#;
        assert!(matches!(
            PricingTable::from_json_str(json),
            Err(LedgerError::InvalidPricing(_))
        ));
    }

    #[test]
    fn test_from_json_str() {
        let json = r#"{
            "gpt-4o": {"input": 2.5, "cached_input": 1.25, "output": 10.0},
            "default": {"input": 1.0, "output": 1.0}
        }"#;

        let table = PricingTable::from_json_str(json).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.resolve("gpt-4o-mini").1.cached_input_price(), 1.25);
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        assert!(matches!(
            PricingTable::from_json_str("[1, 2, 3]"),
            Err(LedgerError::InvalidPricing(_))
        ));
    }
}
