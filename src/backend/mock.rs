//! Mock backend for testing without a live provider.
//!
//! Supports two modes: a canned reply sequence (cycled when exhausted, like
//! a scripted conversation) and a handler closure that inspects each
//! request. The handler mode stays deterministic even when calls are
//! dispatched concurrently and arrive in any order.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use reqwest::Client;

use super::{Backend, CompletionRequest, CompletionResponse};
use crate::error::GatewayError;

/// One scripted backend reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Successful completion with this text. Reports no provider usage, so
    /// the gateway falls back to its token estimate.
    Text(String),
    /// Successful completion with provider-reported token usage.
    TextWithUsage(String, u64, u64),
    /// 429 without a Retry-After hint.
    RateLimited,
    /// Client-side timeout.
    Timeout,
    /// 401/403.
    Auth,
    /// Arbitrary HTTP failure status.
    Http(u16),
}

impl MockReply {
    fn into_result(self) -> Result<CompletionResponse, GatewayError> {
        match self {
            MockReply::Text(text) => Ok(CompletionResponse {
                text,
                input_tokens: None,
                output_tokens: None,
            }),
            MockReply::TextWithUsage(text, input, output) => Ok(CompletionResponse {
                text,
                input_tokens: Some(input),
                output_tokens: Some(output),
            }),
            MockReply::RateLimited => Err(GatewayError::RateLimited { retry_after: None }),
            MockReply::Timeout => Err(GatewayError::Timeout),
            MockReply::Auth => Err(GatewayError::Auth),
            MockReply::Http(status) => Err(GatewayError::Http {
                status,
                body: "mock failure".into(),
                retry_after: None,
            }),
        }
    }
}

type Handler = dyn Fn(&CompletionRequest) -> MockReply + Send + Sync;

/// A test backend that replays scripted replies or consults a handler.
pub struct MockBackend {
    replies: Vec<MockReply>,
    handler: Option<Box<Handler>>,
    calls: AtomicUsize,
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("replies", &self.replies.len())
            .field("has_handler", &self.handler.is_some())
            .field("calls", &self.calls.load(Ordering::Relaxed))
            .finish()
    }
}

impl MockBackend {
    /// Replay `replies` in call order, cycling when exhausted.
    pub fn new(replies: Vec<MockReply>) -> Self {
        assert!(
            !replies.is_empty(),
            "MockBackend requires at least one reply"
        );
        Self {
            replies,
            handler: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always return the same successful text.
    pub fn fixed(text: impl Into<String>) -> Self {
        Self::new(vec![MockReply::Text(text.into())])
    }

    /// Answer every call by consulting `handler` with the request.
    /// Use this when concurrent dispatch makes call order unpredictable.
    pub fn with_handler(
        handler: impl Fn(&CompletionRequest) -> MockReply + Send + Sync + 'static,
    ) -> Self {
        Self {
            replies: Vec::new(),
            handler: Some(Box::new(handler)),
            calls: AtomicUsize::new(0),
        }
    }

    /// Total completed calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn complete(
        &self,
        _client: &Client,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, GatewayError> {
        let idx = self.calls.fetch_add(1, Ordering::Relaxed);
        let reply = match &self.handler {
            Some(handler) => handler(request),
            None => self.replies[idx % self.replies.len()].clone(),
        };
        reply.into_result()
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
