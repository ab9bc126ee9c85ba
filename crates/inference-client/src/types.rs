//! Request and response types for the inference endpoint.

use crate::error::DispatchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Sampling temperature used when a request does not set one.
pub const DEFAULT_TEMPERATURE: f32 = 0.5;

/// Temperature the reasoning endpoint requires.
pub const REASONING_TEMPERATURE: f32 = 1.0;

/// Chat message role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
}

/// Reasoning effort hint for reasoning models.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl FromStr for ReasoningEffort {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            other => Err(DispatchError::InvalidConfig(format!(
                "reasoning effort must be low, medium or high, got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        };
        f.write_str(s)
    }
}

/// An image supplied from the caller's machine rather than by URL.
#[derive(Debug, Clone)]
pub enum LocalImage {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// One model call. Built once, reused unchanged across retry attempts.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub text: String,
    pub image_urls: Vec<String>,
    pub local_images: Vec<LocalImage>,
    /// Falls back to the client's default model.
    pub model: Option<String>,
    pub temperature: f32,
    /// Falls back to the client's default effort. Ignored for
    /// non-reasoning models.
    pub reasoning_effort: Option<ReasoningEffort>,
}

impl ChatRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image_urls: Vec::new(),
            local_images: Vec::new(),
            model: None,
            temperature: DEFAULT_TEMPERATURE,
            reasoning_effort: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_urls.push(url.into());
        self
    }

    pub fn with_local_image(mut self, image: LocalImage) -> Self {
        self.local_images.push(image);
        self
    }

    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }
}

// ---------------------------------------------------------------------------
// Conversational ("chat completions") request shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CompletionPayload {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ChatPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatPart {
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

// ---------------------------------------------------------------------------
// Reasoning ("responses") request shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ResponsesPayload {
    pub model: String,
    pub input: Vec<InputMessage>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputMessage {
    pub role: Role,
    pub content: Vec<InputPart>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputPart {
    InputText { text: String },
    InputImage { image_url: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ReasoningConfig {
    pub effort: ReasoningEffort,
}

/// Request body for either endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Completion(CompletionPayload),
    Responses(ResponsesPayload),
}

impl Payload {
    pub fn is_reasoning(&self) -> bool {
        matches!(self, Payload::Responses(_))
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Union of the fields either endpoint may return.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseEnvelope {
    /// Flattened text convenience field of the reasoning endpoint.
    #[serde(default)]
    pub output_text: Option<String>,
    /// Typed output items of the reasoning endpoint. Kept loose so unknown
    /// item shapes are skipped rather than failing the whole response.
    #[serde(default)]
    pub output: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub choices: Option<Vec<Choice>>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: Option<ResponseMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputItem {
    #[serde(default, rename = "type")]
    pub item_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub content: Option<Vec<serde_json::Value>>,
}

/// Token usage under either naming scheme.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub prompt_tokens_details: Option<TokenDetails>,
    #[serde(default)]
    pub input_tokens_details: Option<TokenDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenDetails {
    #[serde(default)]
    pub cached_tokens: Option<u64>,
}

/// Result of a successful call, with the raw body for debugging.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub status: u16,
    pub raw: serde_json::Value,
    pub usage: Option<cost_ledger::UsageEvent>,
}
