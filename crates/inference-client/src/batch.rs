//! Order-preserving batch dispatch over a bounded pool of tasks.

use crate::client::{truncate, InferenceClient};
use crate::error::{has_policy_marker, DispatchError, ErrorKind};
use crate::types::ChatRequest;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};

/// Characters of the error message kept in a failure placeholder.
const PLACEHOLDER_MESSAGE_CHARS: usize = 200;

/// Whether a failed batch item is worth submitting again later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchFailure {
    Retryable,
    NonRetryable,
}

impl BatchFailure {
    /// Policy rejections (HTTP 400 or content-policy / access markers in the
    /// message) are not retryable; every other failure is.
    pub fn classify(error: &DispatchError) -> Self {
        if error.kind() == ErrorKind::PolicyRejected || has_policy_marker(&error.to_string()) {
            BatchFailure::NonRetryable
        } else {
            BatchFailure::Retryable
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            BatchFailure::Retryable => "RETRYABLE",
            BatchFailure::NonRetryable => "NON_RETRYABLE",
        }
    }

    /// Placeholder text stored at a failed item's position.
    pub fn placeholder(self, message: &str) -> String {
        format!(
            "{}: {}",
            self.prefix(),
            truncate(message, PLACEHOLDER_MESSAGE_CHARS)
        )
    }

    /// Recognize a placeholder produced by [`placeholder`](Self::placeholder).
    pub fn from_placeholder(text: &str) -> Option<Self> {
        if text.starts_with("NON_RETRYABLE: ") {
            Some(BatchFailure::NonRetryable)
        } else if text.starts_with("RETRYABLE: ") {
            Some(BatchFailure::Retryable)
        } else {
            None
        }
    }
}

impl InferenceClient {
    /// Dispatch every prompt with at most `workers` calls in flight.
    ///
    /// The result has one entry per prompt, in input order. A failed item
    /// holds a `RETRYABLE:` or `NON_RETRYABLE:` placeholder instead of
    /// aborting the batch; only a failure of the task pool itself is
    /// returned as an error, after every other in-flight call has finished.
    #[instrument(skip(self, prompts), fields(prompts = prompts.len()))]
    pub async fn dispatch_batch(
        &self,
        prompts: &[String],
        workers: usize,
        temperature: f32,
    ) -> Result<Vec<String>, DispatchError> {
        let total = prompts.len();
        let permits = Arc::new(Semaphore::new(workers.max(1)));
        let mut pool = JoinSet::new();

        for (index, prompt) in prompts.iter().enumerate() {
            let client = self.clone();
            let permits = permits.clone();
            let request = ChatRequest::new(prompt.clone()).with_temperature(temperature);

            pool.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => client.dispatch(&request).await,
                    Err(e) => Err(e.into()),
                };
                (index, outcome)
            });
        }

        let mut results: Vec<Option<String>> = vec![None; total];
        let mut completed = 0;
        let mut pool_failure = None;

        // In-flight calls are never aborted; the pool is drained even after a
        // task fails.
        while let Some(joined) = pool.join_next().await {
            let (index, outcome) = match joined {
                Ok(joined) => joined,
                Err(e) => {
                    error!("batch worker task failed: {}", e);
                    pool_failure.get_or_insert(e);
                    continue;
                }
            };
            completed += 1;

            results[index] = Some(match outcome {
                Ok(text) => text,
                Err(e) => {
                    let failure = BatchFailure::classify(&e);
                    let message = e.to_string();
                    error!(
                        "batch item {} failed ({:?}): {}",
                        index,
                        failure,
                        truncate(&message, PLACEHOLDER_MESSAGE_CHARS)
                    );
                    failure.placeholder(&message)
                }
            });

            debug!("Batch progress {}/{}", completed, total);
        }

        if let Some(e) = pool_failure {
            return Err(e.into());
        }

        info!("Batch of {} prompts complete", total);

        Ok(results
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| crate::client::NO_RESPONSE.to_string()))
            .collect())
    }

    /// Batch dispatch that never fails. If the pool itself fails, every
    /// prompt is re-run sequentially through
    /// [`safe_dispatch`](Self::safe_dispatch).
    pub async fn safe_dispatch_batch(
        &self,
        prompts: &[String],
        workers: usize,
        temperature: f32,
    ) -> Vec<String> {
        match self.dispatch_batch(prompts, workers, temperature).await {
            Ok(results) => results,
            Err(e) => {
                error!("safe_dispatch_batch falling back to sequential calls: {}", e);
                let mut results = Vec::with_capacity(prompts.len());
                for prompt in prompts {
                    let request = ChatRequest::new(prompt.clone()).with_temperature(temperature);
                    results.push(self.safe_dispatch(&request).await);
                }
                results
            }
        }
    }
}
