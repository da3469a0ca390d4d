//! Backend trait and normalized request/response types.
//!
//! A [`Backend`] translates the normalized [`CompletionRequest`] into a
//! provider-specific HTTP call. The gateway is the only caller; it layers
//! retry, usage accounting, and format repair on top.
//!
//! Built-in implementations: [`OpenAiBackend`] (any OpenAI-compatible chat
//! completions endpoint, covering both supported providers) and
//! [`MockBackend`] for deterministic tests.

pub mod backoff;
pub mod mock;
pub mod openai;

pub use backoff::{BackoffConfig, JitterStrategy};
pub use mock::{MockBackend, MockReply};
pub use openai::OpenAiBackend;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::GatewayError;

/// A normalized completion request, provider-agnostic.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model identifier (e.g. `"gpt-4o-mini"`, `"qwen-plus"`).
    pub model: String,

    /// Optional system prompt.
    pub system_prompt: Option<String>,

    /// The user prompt text.
    pub prompt: String,

    /// Prior conversation turns, used by the gateway's format-repair pass
    /// (original prompt + bad response + correction). Empty on first calls.
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature.
    pub temperature: f64,

    /// Generation budget.
    pub max_tokens: u32,

    /// Ask the provider for a JSON-typed response body.
    pub json_mode: bool,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// The role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A normalized completion response.
#[derive(Debug)]
pub struct CompletionResponse {
    /// The generated text content.
    pub text: String,

    /// Provider-reported prompt tokens, when the API returns usage data.
    pub input_tokens: Option<u64>,

    /// Provider-reported completion tokens, when the API returns usage data.
    pub output_tokens: Option<u64>,
}

/// Abstraction over completion providers.
///
/// Object-safe; held as `Arc<dyn Backend>` by the gateway.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute one completion call. Implementations map provider failures
    /// onto [`GatewayError`] variants; they do not retry.
    async fn complete(
        &self,
        client: &Client,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, GatewayError>;

    /// Human-readable name for logging.
    fn name(&self) -> &'static str;
}

/// Execute a backend call with transport-level retry and backoff.
///
/// Retries transient failures (timeouts, rate limits, 5xx, connection
/// errors) up to `config.max_retries` times, honoring provider
/// `Retry-After` hints when configured. Checks the cancellation flag before
/// each attempt and again after each backoff sleep.
pub(crate) async fn with_backoff(
    backend: &Arc<dyn Backend>,
    client: &Client,
    request: &CompletionRequest,
    config: &BackoffConfig,
    cancel: Option<&AtomicBool>,
) -> Result<CompletionResponse, GatewayError> {
    let mut last_error: Option<GatewayError> = None;

    for attempt in 0..=config.max_retries {
        if let Some(flag) = cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(GatewayError::Cancelled);
            }
        }

        if attempt > 0 {
            let delay = last_error
                .as_ref()
                .and_then(|e| e.retry_after())
                .filter(|_| config.respect_retry_after)
                .unwrap_or_else(|| config.delay_for_attempt(attempt - 1));

            if let Some(ref err) = last_error {
                tracing::warn!(
                    backend = backend.name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying transient provider failure"
                );
            }
            tokio::time::sleep(delay).await;

            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    return Err(GatewayError::Cancelled);
                }
            }
        }

        match backend.complete(client, request).await {
            Ok(response) => return Ok(response),
            Err(e) => {
                if attempt < config.max_retries && e.is_retryable() {
                    last_error = Some(e);
                    continue;
                }
                return Err(e);
            }
        }
    }

    Err(last_error.unwrap_or(GatewayError::InvalidResponse(
        "backoff loop exited unexpectedly".into(),
    )))
}
