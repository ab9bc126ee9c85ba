//! Dispatcher configuration.

use crate::retry::RetryPolicy;
use crate::types::ReasoningEffort;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;

/// Settings for an [`InferenceClient`](crate::InferenceClient).
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Bearer token for the inference endpoint
    pub api_key: SecretString,

    /// API base URL; `/chat/completions` and `/responses` are appended
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used when a request names none
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Exact ids or family prefixes routed to the reasoning endpoint.
    /// Accepts a list or a comma-separated string.
    #[serde(
        default = "default_reasoning_models",
        deserialize_with = "comma_separated"
    )]
    pub reasoning_models: Vec<String>,

    /// Effort attached to reasoning calls that do not set one
    #[serde(default = "default_reasoning_effort")]
    pub default_reasoning_effort: Option<ReasoningEffort>,

    /// Per-request timeout
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Default worker count for batch dispatch
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Request journal location
    #[serde(default = "default_journal_path")]
    pub journal_path: PathBuf,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_model() -> String {
    "gpt-5-nano".into()
}

fn default_reasoning_models() -> Vec<String> {
    ["o4", "o4-mini", "o3", "gpt-5"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_reasoning_effort() -> Option<ReasoningEffort> {
    Some(ReasoningEffort::Medium)
}

fn default_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_workers() -> usize {
    4
}

fn default_journal_path() -> PathBuf {
    PathBuf::from("outputs/tmp/request_stats.txt")
}

fn comma_separated<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrString {
        List(Vec<String>),
        String(String),
    }

    let items = match ListOrString::deserialize(deserializer)? {
        ListOrString::List(items) => items,
        ListOrString::String(s) => s.split(',').map(String::from).collect(),
    };

    Ok(items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect())
}

impl ClientConfig {
    /// Config with defaults for everything but the key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key.into()),
            base_url: default_base_url(),
            default_model: default_model(),
            reasoning_models: default_reasoning_models(),
            default_reasoning_effort: default_reasoning_effort(),
            timeout: default_timeout(),
            workers: default_workers(),
            journal_path: default_journal_path(),
            retry: RetryPolicy::default(),
        }
    }
}
