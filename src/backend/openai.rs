//! Backend for OpenAI-compatible chat completions endpoints.
//!
//! Covers every provider this crate targets: OpenAI itself and
//! DashScope/Tongyi via its compatible-mode base URL. One endpoint,
//! `/v1/chat/completions`, always chat mode.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{Backend, CompletionRequest, CompletionResponse, Role};
use crate::error::GatewayError;

/// Backend for any OpenAI-compatible API.
#[derive(Clone)]
pub struct OpenAiBackend {
    base_url: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("base_url", &self.base_url)
            .field(
                "api_key",
                &self.api_key.as_ref().map(|k| {
                    if k.len() > 6 {
                        format!("{}***", &k[..6])
                    } else {
                        "***".to_string()
                    }
                }),
            )
            .finish()
    }
}

impl OpenAiBackend {
    /// Create a backend for the given base URL, without authentication.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
        }
    }

    /// Set the bearer API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Build the messages array: system prompt, then either the repair
    /// conversation history or the bare user prompt.
    fn build_messages(request: &CompletionRequest) -> Vec<Value> {
        let mut messages = Vec::new();

        if let Some(ref sys) = request.system_prompt {
            if !sys.is_empty() {
                messages.push(json!({"role": "system", "content": sys}));
            }
        }

        for msg in &request.messages {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(json!({"role": role, "content": msg.content}));
        }

        if request.messages.is_empty() {
            messages.push(json!({"role": "user", "content": request.prompt}));
        }

        messages
    }

    /// Build the `/v1/chat/completions` request body.
    fn build_body(request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": Self::build_messages(request),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": false,
        });

        if request.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        body
    }

    /// Parse a `Retry-After` header value as seconds.
    fn parse_retry_after(value: &str) -> Option<std::time::Duration> {
        value
            .trim()
            .parse::<u64>()
            .ok()
            .map(std::time::Duration::from_secs)
    }

    /// Map a non-success status onto the gateway error taxonomy.
    fn status_error(
        status: u16,
        body: String,
        retry_after: Option<std::time::Duration>,
    ) -> GatewayError {
        match status {
            401 | 403 => GatewayError::Auth,
            408 => GatewayError::Timeout,
            429 => GatewayError::RateLimited { retry_after },
            _ => GatewayError::Http {
                status,
                body,
                retry_after,
            },
        }
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn complete(
        &self,
        client: &Client,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, GatewayError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let body = Self::build_body(request);

        let mut http = client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            http = http.header("Authorization", format!("Bearer {}", key));
        }

        let resp = http.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout
            } else {
                GatewayError::Transport(e)
            }
        })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(Self::parse_retry_after);
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::status_error(status, text, retry_after));
        }

        let json_resp: Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("response body: {}", e)))?;

        let text = json_resp
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                GatewayError::InvalidResponse("missing choices[0].message.content".into())
            })?
            .to_string();

        let usage = json_resp.get("usage");
        let input_tokens = usage
            .and_then(|u| u.get("prompt_tokens"))
            .and_then(Value::as_u64);
        let output_tokens = usage
            .and_then(|u| u.get("completion_tokens"))
            .and_then(Value::as_u64);

        Ok(CompletionResponse {
            text,
            input_tokens,
            output_tokens,
        })
    }

    fn name(&self) -> &'static str {
        "openai-compatible"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ChatMessage;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o-mini".into(),
            system_prompt: None,
            prompt: "Analyze these posts".into(),
            messages: Vec::new(),
            temperature: 0.3,
            max_tokens: 2000,
            json_mode: false,
        }
    }

    #[test]
    fn test_body_basic() {
        let mut req = request();
        req.system_prompt = Some("You are a sentiment analysis expert.".into());

        let body = OpenAiBackend::build_body(&req);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["temperature"], 0.3);
        assert_eq!(body["stream"], false);

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_body_json_mode() {
        let mut req = request();
        req.json_mode = true;
        let body = OpenAiBackend::build_body(&req);
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_body_repair_history_replaces_prompt() {
        let mut req = request();
        req.messages = vec![
            ChatMessage {
                role: Role::User,
                content: "original prompt".into(),
            },
            ChatMessage {
                role: Role::Assistant,
                content: "not json".into(),
            },
            ChatMessage {
                role: Role::User,
                content: "your previous response was invalid".into(),
            },
        ];

        let body = OpenAiBackend::build_body(&req);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2]["content"], "your previous response was invalid");
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            OpenAiBackend::status_error(401, String::new(), None),
            GatewayError::Auth
        ));
        assert!(matches!(
            OpenAiBackend::status_error(403, String::new(), None),
            GatewayError::Auth
        ));
        assert!(matches!(
            OpenAiBackend::status_error(429, String::new(), None),
            GatewayError::RateLimited { .. }
        ));
        assert!(matches!(
            OpenAiBackend::status_error(500, String::new(), None),
            GatewayError::Http { status: 500, .. }
        ));
    }

    #[test]
    fn test_retry_after_parsing() {
        assert_eq!(
            OpenAiBackend::parse_retry_after("30"),
            Some(std::time::Duration::from_secs(30))
        );
        assert_eq!(OpenAiBackend::parse_retry_after("soon"), None);
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let backend = OpenAiBackend::new("https://api.openai.com").with_api_key("sk-1234567890");
        let debug = format!("{:?}", backend);
        assert!(!debug.contains("1234567890"));
        assert!(debug.contains("***"));
    }
}
