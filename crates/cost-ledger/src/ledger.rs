//! Persistent, concurrency-safe cost ledger.

use crate::error::LedgerError;
use crate::pricing::{round_cost, PricingTable};
use crate::types::{LedgerDocument, LedgerRecord, UsageEvent};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

/// File name of the ledger inside `<output_dir>/<task_id>/metrics/`.
pub const LEDGER_FILE_NAME: &str = "token_monitor.json";

/// Running token and cost totals per label and model, persisted to one JSON
/// document per task.
///
/// Every update holds a single mutex for the whole accumulate-and-persist
/// sequence, so concurrent callers never lose an update and the file never
/// lags memory by more than the update in flight. Sharing one ledger file
/// between processes is not supported.
pub struct CostLedger {
    pricing: PricingTable,
    record_path: PathBuf,
    label: String,
    records: Mutex<LedgerDocument>,
}

impl CostLedger {
    /// Open a ledger backed by `record_path`, loading totals already on disk.
    pub async fn open(
        pricing: PricingTable,
        record_path: impl Into<PathBuf>,
        label: impl Into<String>,
    ) -> Result<Arc<Self>, LedgerError> {
        let record_path = record_path.into();

        if let Some(parent) = record_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let records = if fs::try_exists(&record_path).await? {
            let json = fs::read_to_string(&record_path).await?;
            let records: LedgerDocument = serde_json::from_str(&json)?;
            info!(
                "Loaded cost ledger from {:?} ({} labels)",
                record_path,
                records.len()
            );
            records
        } else {
            info!("Cost ledger not found at {:?}, starting fresh", record_path);
            LedgerDocument::new()
        };

        Ok(Arc::new(Self {
            pricing,
            record_path,
            label: label.into(),
            records: Mutex::new(records),
        }))
    }

    /// Open the ledger for a task at `<output_dir>/<task_id>/metrics/token_monitor.json`.
    pub async fn for_task(
        pricing: PricingTable,
        output_dir: impl AsRef<Path>,
        task_id: &str,
        label: impl Into<String>,
    ) -> Result<Arc<Self>, LedgerError> {
        let record_path = output_dir
            .as_ref()
            .join(task_id)
            .join("metrics")
            .join(LEDGER_FILE_NAME);
        Self::open(pricing, record_path, label).await
    }

    /// Label used when a caller does not name one.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn record_path(&self) -> &Path {
        &self.record_path
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Record token usage and return the cost of this call.
    ///
    /// `label` defaults to the ledger's own label. Persistence failures are
    /// logged and returned; the in-memory totals keep the update.
    #[instrument(skip(self), fields(ledger = %self.record_path.display()))]
    pub async fn record_usage(
        &self,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        cached_input_tokens: Option<u64>,
        label: Option<&str>,
    ) -> Result<f64, LedgerError> {
        let event = UsageEvent::new(model, input_tokens, output_tokens)
            .with_cached_input(cached_input_tokens.unwrap_or(0));
        self.record_event(&event, label).await
    }

    /// Record a usage event produced by a dispatcher.
    pub async fn record_event(
        &self,
        event: &UsageEvent,
        label: Option<&str>,
    ) -> Result<f64, LedgerError> {
        let label = label.unwrap_or(self.label.as_str());
        let (tier, prices) = self.pricing.resolve(&event.model);
        let cost = crate::pricing::calculate_cost(event, prices);

        let mut records = self.records.lock().await;

        records
            .entry(label.to_string())
            .or_default()
            .entry(event.model.clone())
            .or_default()
            .accumulate(event, cost);

        debug!(
            "Recorded {} in / {} cached / {} out tokens for {}/{} (tier {}): ${}",
            event.input_tokens,
            event.cached_input_tokens,
            event.output_tokens,
            label,
            event.model,
            tier,
            cost
        );

        if let Err(e) = self.persist(&records, label).await {
            error!("Failed to save cost ledger {:?}: {}", self.record_path, e);
            return Err(e);
        }

        Ok(cost)
    }

    /// Overwrite `label`'s sub-tree in the on-disk document, leaving every
    /// other label as found. Caller must hold the records lock.
    async fn persist(&self, records: &LedgerDocument, label: &str) -> Result<(), LedgerError> {
        let mut existing: Map<String, Value> = if fs::try_exists(&self.record_path).await? {
            let json = fs::read_to_string(&self.record_path).await?;
            serde_json::from_str(&json)?
        } else {
            Map::new()
        };

        let label_records = records.get(label).cloned().unwrap_or_default();
        existing.insert(label.to_string(), serde_json::to_value(label_records)?);

        let json = serde_json::to_vec_pretty(&existing)?;

        // Atomic write
        let temp_path = self.record_path.with_extension("json.tmp");
        fs::write(&temp_path, &json).await?;
        fs::rename(&temp_path, &self.record_path).await?;

        Ok(())
    }

    /// Copy of all in-memory records.
    pub async fn snapshot(&self) -> LedgerDocument {
        self.records.lock().await.clone()
    }

    /// Totals for one (label, model) pair, if any usage was recorded.
    pub async fn totals(&self, label: &str, model: &str) -> Option<LedgerRecord> {
        let records = self.records.lock().await;
        records.get(label).and_then(|models| models.get(model)).cloned()
    }

    /// Total cost accrued under one label across all models.
    pub async fn label_cost(&self, label: &str) -> f64 {
        let records = self.records.lock().await;
        records
            .get(label)
            .map(|models| round_cost(models.values().map(|r| r.total_cost).sum()))
            .unwrap_or(0.0)
    }

    /// Total cost accrued under every label.
    pub async fn total_cost(&self) -> f64 {
        let records = self.records.lock().await;
        round_cost(
            records
                .values()
                .flat_map(|models| models.values())
                .map(|r| r.total_cost)
                .sum(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::TierPrices;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn test_pricing() -> PricingTable {
        let mut tiers = HashMap::new();
        tiers.insert(
            "gpt-4o".to_string(),
            TierPrices::new(2.5, 10.0).with_cached_input(1.25),
        );
        tiers.insert("default".to_string(), TierPrices::new(1.0, 1.0));
        PricingTable::new(tiers).unwrap()
    }

    async fn create_test_ledger() -> (Arc<CostLedger>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let ledger = CostLedger::for_task(test_pricing(), temp_dir.path(), "task-1", "outline")
            .await
            .unwrap();
        (ledger, temp_dir)
    }

    fn read_document(path: &Path) -> Value {
        let json = std::fs::read_to_string(path).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[tokio::test]
    async fn test_record_path_layout() {
        let (ledger, dir) = create_test_ledger().await;

        assert_eq!(
            ledger.record_path(),
            dir.path().join("task-1/metrics/token_monitor.json")
        );
        assert_eq!(ledger.label(), "outline");
    }

    #[tokio::test]
    async fn test_first_usage_creates_record() {
        let (ledger, _dir) = create_test_ledger().await;

        let cost = ledger
            .record_usage("gpt-4o", 1000, 500, None, None)
            .await
            .unwrap();

        // 1000 / 1M * 2.5 + 500 / 1M * 10
        assert!((cost - 0.0075).abs() < 1e-12);

        let record = ledger.totals("outline", "gpt-4o").await.unwrap();
        assert_eq!(record.input_tokens, 1000);
        assert_eq!(record.cached_input_tokens, 0);
        assert_eq!(record.output_tokens, 500);
        assert!((record.total_cost - 0.0075).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_usage_accumulates() {
        let (ledger, _dir) = create_test_ledger().await;

        ledger
            .record_usage("gpt-4o", 1500, 800, None, None)
            .await
            .unwrap();
        ledger
            .record_usage("gpt-4o", 2000, 1200, Some(1000), None)
            .await
            .unwrap();

        let record = ledger.totals("outline", "gpt-4o").await.unwrap();
        assert_eq!(record.input_tokens, 3500);
        assert_eq!(record.cached_input_tokens, 1000);
        assert_eq!(record.output_tokens, 2000);

        // first: 1500 * 2.5 + 800 * 10 = 11750 / 1M
        // second: 1000 * 2.5 + 1000 * 1.25 + 1200 * 10 = 15750 / 1M
        assert!((record.total_cost - 0.0275).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_explicit_label_overrides_default() {
        let (ledger, _dir) = create_test_ledger().await;

        ledger
            .record_usage("gpt-4o", 100, 100, None, Some("content"))
            .await
            .unwrap();

        assert!(ledger.totals("outline", "gpt-4o").await.is_none());
        assert!(ledger.totals("content", "gpt-4o").await.is_some());
    }

    #[tokio::test]
    async fn test_persist_preserves_other_labels() {
        let (ledger, _dir) = create_test_ledger().await;
        let path = ledger.record_path().to_path_buf();

        std::fs::write(
            &path,
            r#"{"external": {"qwen": {"input_tokens": 7, "cached_input_tokens": 0, "output_tokens": 3, "total_cost": 0.5}}}"#,
        )
        .unwrap();

        ledger
            .record_usage("gpt-4o", 100, 50, None, None)
            .await
            .unwrap();

        let doc = read_document(&path);
        assert_eq!(doc["external"]["qwen"]["input_tokens"], 7);
        assert_eq!(doc["outline"]["gpt-4o"]["input_tokens"], 100);
        assert_eq!(doc["outline"]["gpt-4o"]["output_tokens"], 50);
    }

    #[tokio::test]
    async fn test_reopen_continues_totals() {
        let temp_dir = TempDir::new().unwrap();

        {
            let ledger = CostLedger::for_task(test_pricing(), temp_dir.path(), "t", "outline")
                .await
                .unwrap();
            ledger
                .record_usage("gpt-4o", 100, 50, None, None)
                .await
                .unwrap();
        }

        let ledger = CostLedger::for_task(test_pricing(), temp_dir.path(), "t", "outline")
            .await
            .unwrap();
        ledger
            .record_usage("gpt-4o", 100, 50, None, None)
            .await
            .unwrap();

        let record = ledger.totals("outline", "gpt-4o").await.unwrap();
        assert_eq!(record.input_tokens, 200);
        assert_eq!(record.output_tokens, 100);
    }

    #[tokio::test]
    async fn test_costs_by_label_and_total() {
        let (ledger, _dir) = create_test_ledger().await;

        ledger
            .record_usage("gpt-4o", 1_000_000, 0, None, None)
            .await
            .unwrap();
        ledger
            .record_usage("llama-x", 1_000_000, 0, None, None)
            .await
            .unwrap();
        ledger
            .record_usage("llama-x", 0, 1_000_000, None, Some("content"))
            .await
            .unwrap();

        assert!((ledger.label_cost("outline").await - 3.5).abs() < 1e-12);
        assert!((ledger.label_cost("content").await - 1.0).abs() < 1e-12);
        assert!((ledger.total_cost().await - 4.5).abs() < 1e-12);
        assert_eq!(ledger.label_cost("missing").await, 0.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_usage_loses_no_updates() {
        const TASKS: u64 = 128;
        let (ledger, _dir) = create_test_ledger().await;

        let handles: Vec<_> = (0..TASKS)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger
                        .record_usage("gpt-4o", 100, 50, None, Some("stress_test"))
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let record = ledger.totals("stress_test", "gpt-4o").await.unwrap();
        assert_eq!(record.input_tokens, 100 * TASKS);
        assert_eq!(record.output_tokens, 50 * TASKS);

        let doc = read_document(ledger.record_path());
        assert_eq!(doc["stress_test"]["gpt-4o"]["input_tokens"], 100 * TASKS);
        assert_eq!(doc["stress_test"]["gpt-4o"]["output_tokens"], 50 * TASKS);
    }

    #[tokio::test]
    async fn test_total_cost_is_non_decreasing() {
        let (ledger, _dir) = create_test_ledger().await;
        let mut last = 0.0;

        for tokens in [0, 10, 0, 1000, 5] {
            ledger
                .record_usage("gpt-4o", tokens, tokens, None, None)
                .await
                .unwrap();
            let current = ledger.totals("outline", "gpt-4o").await.unwrap().total_cost;
            assert!(current >= last);
            last = current;
        }
    }

    #[tokio::test]
    async fn test_persist_failure_is_returned() {
        let (ledger, _dir) = create_test_ledger().await;

        // A directory where the ledger file should be makes every read fail.
        std::fs::create_dir_all(ledger.record_path()).unwrap();

        let result = ledger.record_usage("gpt-4o", 10, 10, None, None).await;

        assert!(matches!(result, Err(LedgerError::Io(_))));
        // The update is kept in memory.
        assert_eq!(
            ledger.totals("outline", "gpt-4o").await.unwrap().input_tokens,
            10
        );
    }

    #[tokio::test]
    async fn test_corrupt_ledger_fails_open() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ledger.json");
        std::fs::write(&path, "not json").unwrap();

        let result = CostLedger::open(test_pricing(), &path, "outline").await;

        assert!(matches!(result, Err(LedgerError::Json(_))));
    }
}
