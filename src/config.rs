//! Pipeline configuration and provider selection.

use std::time::Duration;

use crate::error::PipelineError;
use crate::usage::TokenRate;

/// The backing completion service. Selects the default endpoint and the
/// per-model rate table used for cost estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provider {
    #[default]
    OpenAi,
    Tongyi,
}

impl Provider {
    /// Default API base URL for this provider. Both speak the
    /// OpenAI-compatible chat completions protocol.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com",
            Provider::Tongyi => "https://dashscope.aliyuncs.com/compatible-mode",
        }
    }

    /// Default model for this provider.
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4o-mini",
            Provider::Tongyi => "qwen-plus",
        }
    }

    /// Cost per 1K tokens for a model, falling back to a conservative
    /// estimate for unknown models.
    pub fn rate(&self, model: &str) -> TokenRate {
        let table: &[(&str, TokenRate)] = match self {
            Provider::OpenAi => &[
                ("gpt-4o", TokenRate::new(2.50, 10.00)),
                ("gpt-4o-mini", TokenRate::new(0.15, 0.60)),
                ("gpt-4-turbo", TokenRate::new(10.00, 30.00)),
                ("gpt-3.5-turbo", TokenRate::new(0.50, 1.50)),
            ],
            Provider::Tongyi => &[
                ("qwen-plus", TokenRate::new(0.004, 0.006)),
                ("qwen-turbo", TokenRate::new(0.001, 0.002)),
                ("qwen-max", TokenRate::new(0.02, 0.06)),
            ],
        };
        table
            .iter()
            .find(|(name, _)| *name == model)
            .map(|(_, rate)| *rate)
            .unwrap_or(TokenRate::new(0.50, 1.50))
    }
}

/// Configuration for one [`AnalysisPipeline`](crate::pipeline::AnalysisPipeline).
///
/// All knobs have the documented defaults; override with the `with_*`
/// builders and validate at pipeline construction.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Posts per sentiment batch call.
    pub batch_size: usize,

    /// Token budget per chunk for map-reduce inputs.
    pub max_tokens_per_chunk: usize,

    /// Token overlap between consecutive chunks.
    pub chunk_overlap: usize,

    /// Estimated-token threshold above which single-document stages switch
    /// to map-reduce.
    pub map_reduce_threshold_tokens: usize,

    /// Maximum opinion clusters to request.
    pub top_n_clusters: usize,

    /// Transport retries per gateway call.
    pub retry_max: u32,

    /// Maximum concurrent gateway calls per batch/map phase.
    pub concurrency_limit: usize,

    /// Backing completion service.
    pub provider: Provider,

    /// Model identifier; defaults to the provider's default model.
    pub model: String,

    /// Wall-clock budget for a whole pipeline run. `None` = unbounded.
    pub timeout: Option<Duration>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let provider = Provider::default();
        Self {
            batch_size: 10,
            max_tokens_per_chunk: 2000,
            chunk_overlap: 200,
            map_reduce_threshold_tokens: 3500,
            top_n_clusters: 3,
            retry_max: 3,
            concurrency_limit: 5,
            provider,
            model: provider.default_model().to_string(),
            timeout: None,
        }
    }
}

impl AnalysisConfig {
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_chunking(mut self, max_tokens_per_chunk: usize, overlap: usize) -> Self {
        self.max_tokens_per_chunk = max_tokens_per_chunk;
        self.chunk_overlap = overlap;
        self
    }

    pub fn with_map_reduce_threshold(mut self, tokens: usize) -> Self {
        self.map_reduce_threshold_tokens = tokens;
        self
    }

    pub fn with_top_n_clusters(mut self, n: usize) -> Self {
        self.top_n_clusters = n;
        self
    }

    pub fn with_retry_max(mut self, retries: u32) -> Self {
        self.retry_max = retries;
        self
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self.model = provider.default_model().to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Validate invariants the rest of the crate relies on.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_tokens_per_chunk == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_tokens_per_chunk must be positive".to_string(),
            ));
        }
        if self.chunk_overlap >= self.max_tokens_per_chunk {
            return Err(PipelineError::InvalidConfig(
                "chunk_overlap must be smaller than max_tokens_per_chunk".to_string(),
            ));
        }
        if self.concurrency_limit == 0 {
            return Err(PipelineError::InvalidConfig(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.model.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "model must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Rate table entry for the configured provider/model pair.
    pub fn token_rate(&self) -> TokenRate {
        self.provider.rate(&self.model)
    }
}
