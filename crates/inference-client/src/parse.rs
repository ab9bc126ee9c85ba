//! Extraction of text and token usage from either response envelope.

use crate::error::DispatchError;
use crate::types::{OutputItem, ResponseEnvelope, Usage};
use cost_ledger::UsageEvent;
use serde::Deserialize;
use serde_json::Value;

/// Text and usage pulled out of a 2xx response body.
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub text: String,
    pub usage: Option<Usage>,
}

/// Parse a response body.
///
/// Text is taken from `output_text` if present, else from the `output`
/// items joined with newlines, else from the first choice's message.
pub fn parse_response(raw: &Value) -> Result<ParsedResponse, DispatchError> {
    let envelope = ResponseEnvelope::deserialize(raw)
        .map_err(|e| DispatchError::Parse(e.to_string()))?;

    let text = envelope
        .output_text
        .clone()
        .or_else(|| envelope.output.as_deref().and_then(output_items_text))
        .or_else(|| choice_text(&envelope))
        .ok_or_else(|| DispatchError::Parse("response carries no text".into()))?;

    Ok(ParsedResponse {
        text,
        usage: envelope.usage,
    })
}

/// Token usage from a response body, independent of whether any text can be
/// extracted. Responses without text are still billed.
pub fn parse_usage(raw: &Value) -> Option<Usage> {
    raw.get("usage")
        .filter(|usage| !usage.is_null())
        .and_then(|usage| Usage::deserialize(usage).ok())
}

fn output_items_text(items: &[Value]) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();

    for item in items {
        let Ok(item) = OutputItem::deserialize(item) else {
            continue;
        };
        match item.item_type.as_deref() {
            Some("message") => {
                for part in item.content.iter().flatten() {
                    let Ok(part) = OutputItem::deserialize(part) else {
                        continue;
                    };
                    if matches!(part.item_type.as_deref(), Some("output_text" | "text")) {
                        parts.extend(part.text.filter(|t| !t.is_empty()));
                    }
                }
            }
            _ => parts.extend(item.text.filter(|t| !t.is_empty())),
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

fn choice_text(envelope: &ResponseEnvelope) -> Option<String> {
    envelope
        .choices
        .as_ref()?
        .first()?
        .message
        .as_ref()?
        .content
        .clone()
}

impl Usage {
    /// Convert to a ledger event, preferring the chat-completions field names.
    pub fn to_event(&self, model: &str) -> UsageEvent {
        let input = self.prompt_tokens.or(self.input_tokens).unwrap_or(0);
        let output = self.completion_tokens.or(self.output_tokens).unwrap_or(0);
        let cached = self
            .prompt_tokens_details
            .as_ref()
            .or(self.input_tokens_details.as_ref())
            .and_then(|details| details.cached_tokens)
            .unwrap_or(0);

        UsageEvent::new(model, input, output).with_cached_input(cached)
    }
}
