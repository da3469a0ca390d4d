//! The sole point of contact with the external completion service.
//!
//! [`ModelGateway`] layers three concerns on a [`Backend`]: transient-failure
//! retry with backoff, structural validation of the response (with one
//! format-repair pass that re-asks the model with the parse error appended),
//! and usage accounting for every call, success or failure. No other
//! component talks to the provider.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use reqwest::Client;
use serde_json::Value;

use crate::backend::{self, Backend, BackoffConfig, ChatMessage, CompletionRequest, Role};
use crate::error::GatewayError;
use crate::parsing;
use crate::preprocess;
use crate::usage::UsageTracker;

/// Expected shape of the model's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// The reply must parse into JSON; non-conforming output triggers the
    /// repair pass.
    Json,
    /// Free-form prose; accepted as-is.
    Text,
}

/// One logical completion request from a stage.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// Usage-record label (e.g. `"sentiment_batch"`).
    pub operation: &'static str,
    pub system_prompt: Option<String>,
    pub prompt: String,
    pub temperature: f64,
    pub format: ResponseFormat,
}

/// A validated completion.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Parsed value for [`ResponseFormat::Json`]; the raw text wrapped as a
    /// string value for [`ResponseFormat::Text`].
    pub value: Value,
    /// Unparsed response text.
    pub raw: String,
}

/// Gateway over one backend, scoped to a single pipeline run, exactly like
/// its usage tracker.
pub struct ModelGateway {
    backend: Arc<dyn Backend>,
    client: Client,
    model: String,
    max_tokens: u32,
    backoff: BackoffConfig,
    usage: Arc<UsageTracker>,
    cancel: Option<Arc<AtomicBool>>,
}

impl ModelGateway {
    pub fn new(
        backend: Arc<dyn Backend>,
        client: Client,
        model: impl Into<String>,
        backoff: BackoffConfig,
        usage: Arc<UsageTracker>,
    ) -> Self {
        Self {
            backend,
            client,
            model: model.into(),
            max_tokens: 2000,
            backoff,
            usage,
            cancel: None,
        }
    }

    /// Propagate the pipeline's cancellation flag into retry loops.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }

    /// Issue one completion, retrying transient failures and repairing
    /// structural ones.
    ///
    /// For JSON requests whose reply cannot be parsed even after
    /// deterministic repair, the model is re-asked exactly once with its bad
    /// output and the parse error appended; a second structural failure is
    /// [`GatewayError::InvalidResponse`].
    pub async fn complete(&self, req: &GatewayRequest) -> Result<Completion, GatewayError> {
        let request = CompletionRequest {
            model: self.model.clone(),
            system_prompt: req.system_prompt.clone(),
            prompt: req.prompt.clone(),
            messages: Vec::new(),
            temperature: req.temperature,
            max_tokens: self.max_tokens,
            json_mode: req.format == ResponseFormat::Json,
        };

        let raw = self.call_once(req.operation, &request).await?;

        match req.format {
            ResponseFormat::Text => Ok(Completion {
                value: Value::String(raw.clone()),
                raw,
            }),
            ResponseFormat::Json => match parsing::parse_structured(&raw) {
                Ok(value) => Ok(Completion { value, raw }),
                Err(parse_err) => {
                    tracing::warn!(
                        operation = req.operation,
                        error = %parse_err,
                        "structural failure, attempting format repair"
                    );
                    self.repair(req, &request, raw, &parse_err).await
                }
            },
        }
    }

    /// The format-repair pass: re-ask with the failed exchange as history
    /// and a cooler temperature.
    async fn repair(
        &self,
        req: &GatewayRequest,
        request: &CompletionRequest,
        bad_response: String,
        parse_err: &GatewayError,
    ) -> Result<Completion, GatewayError> {
        let correction = format!(
            "Your previous response could not be parsed: {}. \
             Respond again with only valid JSON in the required format.",
            parse_err
        );
        let repair_request = CompletionRequest {
            messages: vec![
                ChatMessage {
                    role: Role::User,
                    content: request.prompt.clone(),
                },
                ChatMessage {
                    role: Role::Assistant,
                    content: bad_response,
                },
                ChatMessage {
                    role: Role::User,
                    content: correction,
                },
            ],
            temperature: (request.temperature - 0.2).max(0.0),
            ..request.clone()
        };

        let raw = self.call_once(req.operation, &repair_request).await?;
        let value = parsing::parse_structured(&raw)?;
        Ok(Completion { value, raw })
    }

    /// One backend round trip with backoff, recording usage either way.
    /// Failed calls with no billable response record zero tokens.
    async fn call_once(
        &self,
        operation: &'static str,
        request: &CompletionRequest,
    ) -> Result<String, GatewayError> {
        let started = Instant::now();
        let result = backend::with_backoff(
            &self.backend,
            &self.client,
            request,
            &self.backoff,
            self.cancel.as_deref(),
        )
        .await;

        match result {
            Ok(response) => {
                let input = response
                    .input_tokens
                    .unwrap_or_else(|| Self::estimate_request_tokens(request));
                let output = response
                    .output_tokens
                    .unwrap_or_else(|| preprocess::estimate_tokens(&response.text) as u64);
                self.usage.record(operation, input, output, started.elapsed());
                Ok(response.text)
            }
            Err(e) => {
                self.usage.record(operation, 0, 0, started.elapsed());
                tracing::warn!(operation, error = %e, "provider call failed");
                Err(e)
            }
        }
    }

    /// Estimate of the tokens the provider will bill for this request.
    fn estimate_request_tokens(request: &CompletionRequest) -> u64 {
        let mut total = preprocess::estimate_tokens(&request.prompt);
        if let Some(ref sys) = request.system_prompt {
            total += preprocess::estimate_tokens(sys);
        }
        for msg in &request.messages {
            total += preprocess::estimate_tokens(&msg.content);
        }
        total as u64
    }
}
