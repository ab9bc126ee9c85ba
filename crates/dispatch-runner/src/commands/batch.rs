//! Batch command - dispatches a JSON array of prompts.

use crate::error::AppResult;
use clap::Args;
use inference_client::{BatchFailure, InferenceClient, DEFAULT_TEMPERATURE};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct BatchArgs {
    /// JSON file holding an array of prompt strings
    pub input: PathBuf,

    /// Write the JSON array of results here instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Concurrent calls; defaults to the configured worker count
    #[arg(long)]
    pub workers: Option<usize>,

    #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
    pub temperature: f32,
}

/// Outcome counts for a finished batch.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub retryable: usize,
    pub non_retryable: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[String]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match BatchFailure::from_placeholder(result) {
                None => summary.succeeded += 1,
                Some(BatchFailure::Retryable) => summary.retryable += 1,
                Some(BatchFailure::NonRetryable) => summary.non_retryable += 1,
            }
        }
        summary
    }
}

pub async fn read_prompts(path: &Path) -> AppResult<Vec<String>> {
    let json = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&json)?)
}

pub async fn run(args: &BatchArgs, client: &InferenceClient) -> AppResult<()> {
    let prompts = read_prompts(&args.input).await?;
    let workers = args.workers.unwrap_or_else(|| client.workers());

    info!(
        "Dispatching {} prompts with {} workers",
        prompts.len(),
        workers
    );

    let results = client
        .safe_dispatch_batch(&prompts, workers, args.temperature)
        .await;

    let summary = BatchSummary::from_results(&results);
    info!(
        "Batch finished: {} succeeded, {} retryable, {} non-retryable",
        summary.succeeded, summary.retryable, summary.non_retryable
    );
    if summary.retryable > 0 {
        warn!(
            "{} prompts failed with retryable errors; re-run them later",
            summary.retryable
        );
    }

    let json = serde_json::to_string_pretty(&results)?;
    match &args.output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(path, json).await?;
            info!("Results written to {:?}", path);
        }
        None => println!("{}", json),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_prompts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prompts.json");
        std::fs::write(&path, r#"["first", "second"]"#).unwrap();

        let prompts = read_prompts(&path).await.unwrap();
        assert_eq!(prompts, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_read_prompts_rejects_non_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prompts.json");
        std::fs::write(&path, r#"{"prompt": "first"}"#).unwrap();

        assert!(read_prompts(&path).await.is_err());
    }

    #[test]
    fn test_summary_counts_placeholders() {
        let results = vec![
            "an answer".to_string(),
            BatchFailure::Retryable.placeholder("LLM API error 429: slow down"),
            BatchFailure::NonRetryable.placeholder("LLM API error 400: bad"),
            "another answer".to_string(),
        ];

        assert_eq!(
            BatchSummary::from_results(&results),
            BatchSummary {
                succeeded: 2,
                retryable: 1,
                non_retryable: 1,
            }
        );
    }
}
