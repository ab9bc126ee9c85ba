//! Dispatch errors and failure classification.

use reqwest::StatusCode;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Substrings that mark a content-policy or access rejection. Only consulted
/// when the endpoint does not return a structured error code.
const POLICY_MARKERS: [&str; 3] = ["invalid prompt", "limited access", "safety"];

/// Structured `error.code` / `error.type` values that mean the prompt itself
/// was refused.
const POLICY_CODES: [&str; 5] = [
    "content_policy_violation",
    "content_filter",
    "invalid_prompt",
    "limited_access",
    "safety",
];

/// How a failed call should be treated by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeouts, connection resets and other transport failures.
    Transient,
    /// HTTP 429 or any 5xx.
    RateLimited,
    /// HTTP 400 or a content-policy / access restriction.
    PolicyRejected,
    /// Any other 4xx.
    ClientError,
    /// A 2xx response whose body could not be understood.
    ParseError,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::RateLimited)
    }
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM API error {status}: {message}")]
    Api {
        status: u16,
        kind: ErrorKind,
        message: String,
    },

    #[error("Unparsable response: {0}")]
    Parse(String),

    #[error("Failed to read image {path:?}: {source}")]
    Image {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<DispatchError>,
    },

    #[error("Worker pool failure: {0}")]
    Pool(#[from] tokio::task::JoinError),

    #[error("Worker pool closed")]
    PoolClosed(#[from] tokio::sync::AcquireError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Http(_) | DispatchError::Pool(_) | DispatchError::PoolClosed(_) => {
                ErrorKind::Transient
            }
            DispatchError::Api { kind, .. } => *kind,
            DispatchError::Parse(_) => ErrorKind::ParseError,
            DispatchError::Image { .. } | DispatchError::InvalidConfig(_) => ErrorKind::ClientError,
            DispatchError::RetriesExhausted { last, .. } => last.kind(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// HTTP status of the response that caused this error, if one arrived.
    pub fn status(&self) -> Option<u16> {
        match self {
            DispatchError::Api { status, .. } => Some(*status),
            DispatchError::Http(e) => e.status().map(|s| s.as_u16()),
            DispatchError::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
}

fn parse_error_body(body: &str) -> Option<ErrorBody> {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error)
}

/// The endpoint's structured `error.message`, if the body carries one.
pub fn error_message(body: &str) -> Option<String> {
    parse_error_body(body).and_then(|e| e.message)
}

/// Whether free text mentions a content-policy or access restriction.
pub fn has_policy_marker(text: &str) -> bool {
    let text = text.to_lowercase();
    POLICY_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Classify a non-2xx response.
///
/// 429 and 5xx are retryable, 400 is a policy rejection. Other 4xx are a
/// policy rejection when the structured error code says so, or, for
/// endpoints without structured codes, when the body contains a policy
/// marker; otherwise they are plain client errors.
pub fn classify_status(status: StatusCode, body: &str) -> ErrorKind {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return ErrorKind::RateLimited;
    }
    if status == StatusCode::BAD_REQUEST {
        return ErrorKind::PolicyRejected;
    }

    if let Some(error) = parse_error_body(body) {
        let code = match &error.code {
            Some(serde_json::Value::String(code)) => Some(code.as_str()),
            _ => None,
        };
        let structured = [code, error.error_type.as_deref()];
        if structured.iter().flatten().any(|c| POLICY_CODES.contains(c)) {
            return ErrorKind::PolicyRejected;
        }
        if code.is_some() || error.error_type.is_some() {
            return ErrorKind::ClientError;
        }
    }

    if has_policy_marker(body) {
        ErrorKind::PolicyRejected
    } else {
        ErrorKind::ClientError
    }
}
