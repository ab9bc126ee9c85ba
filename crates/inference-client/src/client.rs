//! Inference endpoint HTTP client.

use crate::config::ClientConfig;
use crate::error::{classify_status, error_message, DispatchError};
use crate::journal::{Journal, JournalEntry};
use crate::parse::{parse_response, parse_usage};
use crate::retry::RetryPolicy;
use crate::types::*;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cost_ledger::{UsageEvent, UsageRecorder};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Text returned by the non-raising variants when a call fails.
pub const NO_RESPONSE: &str = "no response";

/// Characters of a failed response body written to the log.
const ERROR_LOG_CHARS: usize = 500;

/// Characters of a failed response body kept in an error when the endpoint
/// sends no structured message.
const ERROR_MESSAGE_CHARS: usize = 200;

/// Dispatcher for an OpenAI-compatible inference endpoint.
///
/// Holds no mutable state between calls apart from its shared journal and
/// usage recorder handles, so clones can run concurrently without
/// coordination.
#[derive(Clone)]
pub struct InferenceClient {
    client: Client,
    base_url: String,
    api_key: SecretString,
    default_model: String,
    reasoning_models: Arc<[String]>,
    default_effort: Option<ReasoningEffort>,
    workers: usize,
    retry: RetryPolicy,
    journal: Option<Journal>,
    recorder: Option<Arc<dyn UsageRecorder>>,
}

impl InferenceClient {
    /// Create a new client with no journal, no recorder, no reasoning models
    /// and the default retry policy.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        default_model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DispatchError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: SecretString::new(api_key.into()),
            default_model: default_model.into(),
            reasoning_models: Arc::from(Vec::new()),
            default_effort: None,
            workers: 4,
            retry: RetryPolicy::default(),
            journal: None,
            recorder: None,
        })
    }

    /// Create a client from configuration, journaling to the configured path.
    pub fn from_config(config: &ClientConfig) -> Result<Self, DispatchError> {
        if config.workers == 0 {
            return Err(DispatchError::InvalidConfig(
                "workers must be at least 1".into(),
            ));
        }

        let client = Self::new(
            config.api_key.expose_secret().as_str(),
            &config.base_url,
            &config.default_model,
            config.timeout,
        )?
        .with_reasoning_models(config.reasoning_models.iter().cloned())
        .with_retry_policy(config.retry.clone())
        .with_journal(Journal::new(&config.journal_path));

        Ok(Self {
            default_effort: config.default_reasoning_effort,
            workers: config.workers,
            ..client
        })
    }

    pub fn with_reasoning_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reasoning_models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default_effort(mut self, effort: Option<ReasoningEffort>) -> Self {
        self.default_effort = effort;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn UsageRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Get the configured default model name.
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Default worker count for batch dispatch.
    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn journal(&self) -> Option<&Journal> {
        self.journal.as_ref()
    }

    /// Whether `model` equals, or starts with, a configured reasoning model id.
    pub fn is_reasoning_model(&self, model: &str) -> bool {
        self.reasoning_models
            .iter()
            .any(|prefix| model.starts_with(prefix.as_str()))
    }

    fn model_for<'a>(&'a self, request: &'a ChatRequest) -> &'a str {
        request.model.as_deref().unwrap_or(&self.default_model)
    }

    /// Send one request and return the response text.
    pub async fn dispatch(&self, request: &ChatRequest) -> Result<String, DispatchError> {
        self.dispatch_verbose(request).await.map(|c| c.text)
    }

    /// Send one request, retrying transient failures, and return the text
    /// together with the raw response body.
    #[instrument(
        skip(self, request),
        fields(model = %self.model_for(request), images = request.image_urls.len() + request.local_images.len())
    )]
    pub async fn dispatch_verbose(&self, request: &ChatRequest) -> Result<Completion, DispatchError> {
        let model = self.model_for(request);
        let (url, payload) = self.build_payload(request, model).await?;

        self.retry
            .run(|attempt| self.attempt(&url, &payload, &request.text, model, attempt))
            .await
    }

    /// Like [`dispatch`](Self::dispatch) but never fails: any error, including
    /// exhausted retries, is logged and replaced by [`NO_RESPONSE`].
    pub async fn safe_dispatch(&self, request: &ChatRequest) -> String {
        match self.dispatch(request).await {
            Ok(text) => text,
            Err(e) => {
                error!("safe_dispatch suppressed error: {}", e);
                NO_RESPONSE.to_string()
            }
        }
    }

    /// Build the endpoint URL and body for a request's protocol shape.
    pub async fn build_payload(
        &self,
        request: &ChatRequest,
        model: &str,
    ) -> Result<(String, Payload), DispatchError> {
        let mut encoded = Vec::with_capacity(request.local_images.len());
        for image in &request.local_images {
            encoded.push(encode_local_image(image).await?);
        }

        if self.is_reasoning_model(model) {
            let mut content = vec![InputPart::InputText {
                text: request.text.clone(),
            }];
            content.extend(
                request
                    .image_urls
                    .iter()
                    .chain(encoded.iter())
                    .map(|url| InputPart::InputImage {
                        image_url: url.clone(),
                    }),
            );

            let effort = request.reasoning_effort.or(self.default_effort);
            let payload = ResponsesPayload {
                model: model.to_string(),
                input: vec![InputMessage {
                    role: Role::User,
                    content,
                }],
                temperature: REASONING_TEMPERATURE,
                reasoning: effort.map(|effort| ReasoningConfig { effort }),
            };

            Ok((
                format!("{}/responses", self.base_url),
                Payload::Responses(payload),
            ))
        } else {
            let mut messages = vec![ChatMessage {
                role: Role::User,
                content: MessageContent::Text(request.text.clone()),
            }];
            for urls in [&request.image_urls, &encoded] {
                if !urls.is_empty() {
                    messages.push(image_message(urls));
                }
            }

            let payload = CompletionPayload {
                model: model.to_string(),
                messages,
                temperature: request.temperature,
            };

            Ok((
                format!("{}/chat/completions", self.base_url),
                Payload::Completion(payload),
            ))
        }
    }

    /// One HTTP round trip. Every outcome is journaled.
    async fn attempt(
        &self,
        url: &str,
        payload: &Payload,
        text: &str,
        model: &str,
        attempt: u32,
    ) -> Result<Completion, DispatchError> {
        debug!("POST {} (attempt {})", url, attempt);

        let response = match self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key.expose_secret()))
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Request to {} failed: {}", url, e);
                self.log_attempt(JournalEntry::failure(0, text, &e.to_string()))
                    .await;
                return Err(e.into());
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to read response body ({}): {}", status, e);
                self.log_attempt(JournalEntry::failure(status.as_u16(), text, &e.to_string()))
                    .await;
                return Err(e.into());
            }
        };

        if !status.is_success() {
            error!(
                "chat response code: {}\n{}",
                status,
                truncate(&body, ERROR_LOG_CHARS)
            );
            self.log_attempt(JournalEntry::failure(status.as_u16(), text, &body))
                .await;

            return Err(DispatchError::Api {
                status: status.as_u16(),
                kind: classify_status(status, &body),
                message: error_message(&body)
                    .unwrap_or_else(|| truncate(&body, ERROR_MESSAGE_CHARS)),
            });
        }

        let raw: serde_json::Value =
            serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body));

        let usage = parse_usage(&raw).map(|u| u.to_event(model));
        if let Some(event) = &usage {
            self.report_usage(event).await;
        }

        let text_out = match parse_response(&raw) {
            Ok(parsed) => parsed.text,
            Err(e) => {
                error!("There is an error: {}", e);
                format!("Error: {}", e)
            }
        };

        self.log_attempt(JournalEntry::success(status.as_u16(), text, &text_out))
            .await;

        Ok(Completion {
            text: text_out,
            status: status.as_u16(),
            raw,
            usage,
        })
    }

    async fn report_usage(&self, event: &UsageEvent) {
        let Some(recorder) = &self.recorder else {
            return;
        };
        match recorder.record(event.clone()).await {
            Ok(cost) => debug!("Call cost ${} ({})", cost, event.model),
            // The response is still returned; the ledger has logged the
            // persistence failure and kept the usage in memory.
            Err(e) => error!("Failed to record usage for {}: {}", event.model, e),
        }
    }

    async fn log_attempt(&self, entry: JournalEntry) {
        let Some(journal) = &self.journal else {
            return;
        };
        if let Err(e) = journal.append(&entry).await {
            error!("Failed to append to journal {:?}: {}", journal.path(), e);
        }
    }
}

fn image_message(urls: &[String]) -> ChatMessage {
    ChatMessage {
        role: Role::User,
        content: MessageContent::Parts(
            urls.iter()
                .map(|url| ChatPart::ImageUrl {
                    image_url: ImageUrl { url: url.clone() },
                })
                .collect(),
        ),
    }
}

async fn encode_local_image(image: &LocalImage) -> Result<String, DispatchError> {
    let encoded = match image {
        LocalImage::Bytes(bytes) => STANDARD.encode(bytes),
        LocalImage::Path(path) => {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|source| DispatchError::Image {
                    path: path.clone(),
                    source,
                })?;
            STANDARD.encode(bytes)
        }
    };
    Ok(format!("data:image/jpeg;base64,{}", encoded))
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
