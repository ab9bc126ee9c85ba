//! Common test utilities for integration tests.

use inference_client::{InferenceClient, RetryPolicy};
use std::time::Duration;
use wiremock::MockServer;

/// Start a mock inference server.
pub async fn mock_inference_server() -> MockServer {
    MockServer::start().await
}

/// Retry policy with millisecond waits so retry paths run quickly.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        jitter: false,
    }
}

/// Create a client configured for a mock server, routing `o3*` to the
/// responses endpoint.
pub fn test_inference_client(mock_server: &MockServer) -> InferenceClient {
    InferenceClient::new(
        "test-api-key",
        mock_server.uri(),
        "test-model",
        Duration::from_secs(5),
    )
    .unwrap()
    .with_reasoning_models(["o3"])
    .with_retry_policy(fast_retry(3))
}

/// Chat-completions body with the given text and token counts.
pub fn completion_body(text: &str, prompt_tokens: u64, completion_tokens: u64) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "model": "test-model",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": prompt_tokens + completion_tokens
        }
    })
}
