use std::time::Duration;
use thiserror::Error;

/// Errors raised at the provider boundary.
///
/// Produced by [`Backend`](crate::backend::Backend) implementations and the
/// [`ModelGateway`](crate::gateway::ModelGateway). Transient variants are
/// retried inside the gateway with backoff; everything else surfaces to the
/// calling stage.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The request did not complete within the client timeout.
    #[error("request timed out")]
    Timeout,

    /// The provider returned 429. `retry_after` is populated from the
    /// `Retry-After` response header when present.
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    /// The response arrived but did not conform to the expected structured
    /// shape, even after deterministic repair and one format-repair pass.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The provider rejected the credentials (401/403).
    #[error("authentication rejected by provider")]
    Auth,

    /// Any other non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },

    /// Low-level transport failure (connection refused, DNS, TLS).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The call was cancelled via the pipeline's cancellation flag.
    #[error("call was cancelled")]
    Cancelled,
}

impl GatewayError {
    /// Whether the gateway's backoff loop should retry this error.
    ///
    /// Rate limits, timeouts, server-side errors, and transport failures are
    /// transient. Auth failures, malformed responses, and cancellation are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Timeout | GatewayError::RateLimited { .. } => true,
            GatewayError::Http { status, .. } => *status >= 500,
            GatewayError::Transport(_) => true,
            _ => false,
        }
    }

    /// The provider-suggested retry delay, if one was supplied.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::RateLimited { retry_after } => *retry_after,
            GatewayError::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Short stable code for logging and usage records.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Timeout => "timeout",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::InvalidResponse(_) => "invalid_response",
            GatewayError::Auth => "auth",
            GatewayError::Http { .. } => "http",
            GatewayError::Transport(_) => "transport",
            GatewayError::Cancelled => "cancelled",
        }
    }
}

/// Identifies a pipeline stage in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Sentiment,
    Clustering,
    Summary,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Sentiment => "sentiment",
            StageKind::Clustering => "clustering",
            StageKind::Summary => "summary",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced to pipeline callers.
///
/// Callers always receive either a complete [`AnalysisReport`](crate::types::AnalysisReport)
/// (possibly with `status: partial`) or exactly one of these, never a
/// half-built result. Only the mandatory sentiment stage can abort a run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A mandatory stage failed irrecoverably.
    #[error("stage '{stage}' failed: {message}")]
    StageFailed { stage: StageKind, message: String },

    /// Invalid configuration detected at build time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The pipeline was cancelled before sentiment completed.
    #[error("pipeline was cancelled")]
    Cancelled,
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::StageFailed {
            stage: StageKind::Sentiment,
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_is_retryable() {
        let err = GatewayError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_server_error_is_retryable() {
        let err = GatewayError::Http {
            status: 503,
            body: "service unavailable".into(),
            retry_after: None,
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_client_error_not_retried() {
        let err = GatewayError::Http {
            status: 400,
            body: "bad request".into(),
            retry_after: None,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_auth_not_retried() {
        assert!(!GatewayError::Auth.is_retryable());
    }

    #[test]
    fn test_invalid_response_not_retried() {
        let err = GatewayError::InvalidResponse("expected array".into());
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "invalid_response");
    }

    #[test]
    fn test_cancelled_not_retried() {
        assert!(!GatewayError::Cancelled.is_retryable());
    }

    #[test]
    fn test_stage_kind_display() {
        assert_eq!(StageKind::Sentiment.to_string(), "sentiment");
        assert_eq!(StageKind::Clustering.to_string(), "clustering");
        assert_eq!(StageKind::Summary.to_string(), "summary");
    }

    #[test]
    fn test_stage_failed_message() {
        let err = PipelineError::StageFailed {
            stage: StageKind::Sentiment,
            message: "every batch exhausted retries".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("sentiment"));
        assert!(msg.contains("every batch"));
    }
}
