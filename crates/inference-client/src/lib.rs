//! Dispatcher for OpenAI-compatible inference endpoints.
//!
//! Routes each call to the chat-completions or responses shape depending on
//! the model, retries transient failures with jittered exponential backoff,
//! journals every attempt, and reports token usage to a
//! [`cost_ledger::UsageRecorder`].

mod batch;
mod client;
mod config;
mod error;
mod journal;
mod parse;
mod retry;
mod types;

pub use batch::BatchFailure;
pub use client::{InferenceClient, NO_RESPONSE};
pub use config::ClientConfig;
pub use error::{classify_status, error_message, has_policy_marker, DispatchError, ErrorKind};
pub use journal::{Journal, JournalEntry, JournalStats, RECORD_DELIMITER, RECORD_PREVIEW_CHARS};
pub use parse::{parse_response, parse_usage, ParsedResponse};
pub use retry::RetryPolicy;
pub use types::*;
