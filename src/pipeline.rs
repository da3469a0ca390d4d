//! The orchestrator: sentiment, clustering, and summary into one report.
//!
//! Sentiment runs first and is mandatory: its mean frames the summary
//! prompt, and a run that cannot score anything produces no report at all.
//! Clustering and summary then run concurrently; each is independently
//! optional, degrading the report to `partial` on failure instead of
//! aborting. A per-run usage tracker and gateway are constructed inside
//! every `analyze` call, so concurrent runs never share cost accounting.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use reqwest::Client;

use crate::backend::{Backend, BackoffConfig};
use crate::chunker::Chunker;
use crate::config::AnalysisConfig;
use crate::error::{PipelineError, Result, StageKind};
use crate::gateway::ModelGateway;
use crate::map_reduce::MapReduceRunner;
use crate::stages::{summary, ClusteringStage, SentimentStage, StageOutcome, SummaryStage};
use crate::types::{overall_sentiment, AnalysisReport, Post, ReportStatus};
use crate::usage::UsageTracker;

/// Progress of one run. Linear except for the terminal fork; clustering
/// and summary execute concurrently but resolve in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Pending,
    SentimentDone,
    ClusteringDone,
    SummaryDone,
    Complete,
    Partial,
}

/// Sentinel summary for a run that received no posts at all.
const NO_POSTS: &str = "No posts to analyze.";

pub struct AnalysisPipeline {
    backend: Arc<dyn Backend>,
    client: Client,
    config: AnalysisConfig,
}

impl std::fmt::Debug for AnalysisPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AnalysisPipeline {
    /// Build a pipeline over `backend`, validating the configuration.
    pub fn new(backend: Arc<dyn Backend>, config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            client: Client::new(),
            config,
        })
    }

    /// Use a caller-provided HTTP client (custom timeouts, proxies).
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Run the full analysis over `posts`.
    ///
    /// Returns a complete report (possibly `status: partial`) or a single
    /// typed error, never a half-built result. An empty input yields a
    /// neutral report without any paid call.
    pub async fn analyze(&self, posts: &[Post]) -> Result<AnalysisReport> {
        let usage = Arc::new(UsageTracker::new(self.config.token_rate()));

        if posts.is_empty() {
            return Ok(AnalysisReport {
                overall_sentiment: 50.0,
                sentiment_results: Vec::new(),
                clusters: Vec::new(),
                summary: Some(NO_POSTS.to_string()),
                status: ReportStatus::Complete,
                usage: usage.summary(),
            });
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let gateway = ModelGateway::new(
            self.backend.clone(),
            self.client.clone(),
            self.config.model.clone(),
            BackoffConfig::standard().with_max_retries(self.config.retry_max),
            usage.clone(),
        )
        .with_cancellation(cancel.clone());

        let deadline = self.config.timeout.map(|t| Instant::now() + t);
        let mut state = RunState::Pending;
        tracing::info!(posts = posts.len(), state = ?state, "pipeline starting");

        // Sentiment is mandatory; a timeout here means no report.
        let sentiment_stage =
            SentimentStage::new(self.config.batch_size, self.config.concurrency_limit);
        let sentiment_results =
            match with_remaining(deadline, sentiment_stage.score(&gateway, posts)).await {
                Some(result) => result?,
                None => {
                    cancel.store(true, Ordering::Relaxed);
                    return Err(PipelineError::StageFailed {
                        stage: StageKind::Sentiment,
                        message: "pipeline timeout elapsed before scoring finished".into(),
                    });
                }
            };
        let overall = overall_sentiment(&sentiment_results);
        state = RunState::SentimentDone;
        tracing::info!(overall, state = ?state, "sentiment complete");

        // Clustering and summary have no data dependency on each other.
        let chunker = Chunker::new(self.config.max_tokens_per_chunk, self.config.chunk_overlap);
        let clustering_stage = ClusteringStage::new(
            self.config.top_n_clusters,
            self.config.map_reduce_threshold_tokens,
            MapReduceRunner::new(chunker.clone(), self.config.concurrency_limit),
        );
        let summary_stage = SummaryStage::new(
            self.config.map_reduce_threshold_tokens,
            MapReduceRunner::new(chunker, self.config.concurrency_limit),
        );

        let optional_stages = async {
            tokio::join!(
                clustering_stage.cluster(&gateway, posts),
                summary_stage.summarize(&gateway, posts, overall),
            )
        };
        let (cluster_outcome, summary_outcome) =
            match with_remaining(deadline, optional_stages).await {
                Some(outcomes) => outcomes,
                None => {
                    // In-flight calls are cancelled by dropping their
                    // futures; the flag stops any retry loop mid-sleep.
                    cancel.store(true, Ordering::Relaxed);
                    tracing::warn!("pipeline timeout elapsed, degrading to partial");
                    (
                        StageOutcome::Failed("pipeline timeout".into()),
                        StageOutcome::Failed("pipeline timeout".into()),
                    )
                }
            };

        let mut status = ReportStatus::Complete;

        let clusters = match cluster_outcome {
            StageOutcome::Complete(clusters) => clusters,
            StageOutcome::Empty => Vec::new(),
            StageOutcome::Failed(reason) => {
                tracing::warn!(reason = %reason, "clustering unavailable");
                status = ReportStatus::Partial;
                Vec::new()
            }
        };
        state = RunState::ClusteringDone;
        tracing::info!(clusters = clusters.len(), state = ?state, "clustering resolved");

        let summary_text = match summary_outcome {
            StageOutcome::Complete(text) => Some(text),
            StageOutcome::Empty => Some(summary::NO_DISCUSSION.to_string()),
            StageOutcome::Failed(reason) => {
                tracing::warn!(reason = %reason, "summary unavailable");
                status = ReportStatus::Partial;
                None
            }
        };
        state = RunState::SummaryDone;
        tracing::info!(has_summary = summary_text.is_some(), state = ?state, "summary resolved");

        state = match status {
            ReportStatus::Complete => RunState::Complete,
            ReportStatus::Partial => RunState::Partial,
        };
        let usage_summary = usage.summary();
        tracing::info!(
            state = ?state,
            api_calls = usage_summary.api_calls,
            total_tokens = usage_summary.total_tokens(),
            cost_usd = usage_summary.cost_estimate,
            "pipeline finished"
        );

        Ok(AnalysisReport {
            overall_sentiment: overall,
            sentiment_results,
            clusters,
            summary: summary_text,
            status,
            usage: usage_summary,
        })
    }
}

/// Run `fut` against whatever is left of the deadline. `None` = expired.
async fn with_remaining<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        None => Some(fut.await),
        Some(deadline) => {
            let now = Instant::now();
            if deadline <= now {
                return None;
            }
            tokio::time::timeout(deadline - now, fut).await.ok()
        }
    }
}
