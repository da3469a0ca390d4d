//! # Opinion Pipeline
//!
//! A cost-bounded, partially-degradable analysis pipeline for social media
//! posts, built on an unreliable, rate-limited, pay-per-token LLM service.
//!
//! Three stages run over one `Post` sequence:
//!
//! - **sentiment**: every post scored 0–100 in batched calls, with
//!   per-item fallback and neutral placeholders for unrecoverable items;
//! - **clustering**: the top recurring themes across the substantive,
//!   non-spam posts;
//! - **summary**: a short prose synthesis, framed by the overall
//!   sentiment.
//!
//! Sentiment is mandatory; clustering and summary degrade the report to
//! `partial` on failure instead of aborting. Inputs above a token
//! threshold are chunked and processed map-reduce style. Every provider
//! call is retried with backoff, format-repaired once on malformed
//! output, and accounted in a per-run [`UsageSummary`](usage::UsageSummary).
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use opinion_pipeline::{AnalysisConfig, AnalysisPipeline, OpenAiBackend, Post, Provider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Provider::OpenAi;
//!     let backend = Arc::new(
//!         OpenAiBackend::new(provider.default_base_url())
//!             .with_api_key(std::env::var("OPENAI_API_KEY")?),
//!     );
//!     let pipeline = AnalysisPipeline::new(backend, AnalysisConfig::default())?;
//!
//!     let posts = vec![
//!         Post::new("1", "reddit", "The new pricing makes this a hard sell for me."),
//!         Post::new("2", "youtube", "Honestly the update fixed every complaint I had."),
//!     ];
//!     let report = pipeline.analyze(&posts).await?;
//!     println!(
//!         "overall {:.1}/100 across {} posts (${:.4})",
//!         report.overall_sentiment,
//!         report.sentiment_results.len(),
//!         report.usage.cost_estimate,
//!     );
//!     Ok(())
//! }
//! ```
//!
//! Tests run against [`MockBackend`](backend::MockBackend): no network,
//! no keys.

pub mod backend;
pub mod batch;
pub mod chunker;
pub mod config;
pub mod error;
pub mod gateway;
pub mod map_reduce;
pub mod parsing;
pub mod pipeline;
pub mod preprocess;
pub mod prompts;
pub mod stages;
pub mod types;
pub mod usage;

pub use backend::{Backend, BackoffConfig, MockBackend, MockReply, OpenAiBackend};
pub use config::{AnalysisConfig, Provider};
pub use error::{GatewayError, PipelineError, Result, StageKind};
pub use gateway::ModelGateway;
pub use pipeline::AnalysisPipeline;
pub use stages::StageOutcome;
pub use types::{
    AnalysisReport, EngagementMetrics, OpinionCluster, Post, ReportStatus, SentimentLabel,
    SentimentResult,
};
pub use usage::{UsageSummary, UsageTracker};
