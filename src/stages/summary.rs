//! Discussion summarization: the second optional stage.
//!
//! Shares the clustering stage's filter, with a tighter sample cap, and
//! frames the prompt with the already-computed overall sentiment mapped to
//! a five-bucket label. Long inputs go through map-reduce: key points are
//! extracted per chunk, then one reduce call writes the final prose.

use async_trait::async_trait;

use crate::chunker::Chunk;
use crate::error::GatewayError;
use crate::gateway::{GatewayRequest, ModelGateway, ResponseFormat};
use crate::map_reduce::{MapReduceRunner, MapReduceTask};
use crate::preprocess;
use crate::prompts;
use crate::stages::{filter_and_sample, StageOutcome};
use crate::types::Post;

/// Cost cap: at most this many filtered posts inform the summary.
const SAMPLE_CAP: usize = 30;

/// Per-post content budget inside the prompt.
const POST_TRUNCATE: usize = 400;

/// Sentinel for a run where nothing substantive was found. Distinct from
/// failure: the report stays complete.
pub const NO_DISCUSSION: &str = "No substantial discussion found.";

pub struct SummaryStage {
    threshold_tokens: usize,
    map_reduce: MapReduceRunner,
}

impl SummaryStage {
    pub fn new(threshold_tokens: usize, map_reduce: MapReduceRunner) -> Self {
        Self {
            threshold_tokens,
            map_reduce,
        }
    }

    /// Produce a 2–3 paragraph synthesis of the discussion.
    pub async fn summarize(
        &self,
        gateway: &ModelGateway,
        posts: &[Post],
        overall_sentiment: f64,
    ) -> StageOutcome<String> {
        let sampled = filter_and_sample(posts, SAMPLE_CAP);
        if sampled.is_empty() {
            tracing::info!("no substantive posts to summarize");
            return StageOutcome::Empty;
        }

        let block = sampled
            .iter()
            .enumerate()
            .map(|(i, p)| {
                format!("{}. {}", i + 1, preprocess::condense(&p.content, POST_TRUNCATE, 5))
            })
            .collect::<Vec<_>>()
            .join("\n");

        let task = SummaryTask {
            sentiment_desc: prompts::describe_sentiment(overall_sentiment),
            score: overall_sentiment,
        };

        let result = if preprocess::estimate_tokens(&block) > self.threshold_tokens {
            self.map_reduce.run(gateway, &task, &block).await
        } else {
            task.direct(gateway, sampled.len(), &block).await
        };

        match result {
            Ok(summary) if summary.trim().is_empty() => {
                StageOutcome::Failed("model returned an empty summary".into())
            }
            Ok(summary) => StageOutcome::Complete(summary.trim().to_string()),
            Err(e) => {
                tracing::warn!(error = %e, "summarization failed, report degrades to partial");
                StageOutcome::Failed(e.to_string())
            }
        }
    }
}

struct SummaryTask {
    sentiment_desc: &'static str,
    score: f64,
}

impl SummaryTask {
    /// Single-call path for inputs under the token threshold.
    async fn direct(
        &self,
        gateway: &ModelGateway,
        post_count: usize,
        block: &str,
    ) -> Result<String, GatewayError> {
        let request = GatewayRequest {
            operation: "summary",
            system_prompt: Some(prompts::SUMMARY_SYSTEM.to_string()),
            prompt: prompts::summary_prompt(self.sentiment_desc, self.score, post_count, block),
            temperature: 0.6,
            format: ResponseFormat::Text,
        };
        let completion = gateway.complete(&request).await?;
        Ok(completion.raw)
    }
}

#[async_trait]
impl MapReduceTask<String> for SummaryTask {
    fn operation(&self) -> &'static str {
        "summary"
    }

    /// Map: distill one chunk into key points.
    async fn map(&self, gateway: &ModelGateway, chunk: &Chunk) -> Result<String, GatewayError> {
        let request = GatewayRequest {
            operation: "summary",
            system_prompt: Some(prompts::SUMMARY_SYSTEM.to_string()),
            prompt: prompts::summary_map_prompt(&chunk.text),
            temperature: 0.6,
            format: ResponseFormat::Text,
        };
        let completion = gateway.complete(&request).await?;
        Ok(completion.raw)
    }

    /// Reduce: synthesize the final prose from the partial key points.
    async fn reduce(
        &self,
        gateway: &ModelGateway,
        partials: &[String],
    ) -> Result<String, GatewayError> {
        let joined = partials
            .iter()
            .enumerate()
            .map(|(i, p)| format!("Part {}:\n{}", i + 1, p))
            .collect::<Vec<_>>()
            .join("\n\n");
        let request = GatewayRequest {
            operation: "summary",
            system_prompt: Some(prompts::SUMMARY_SYSTEM.to_string()),
            prompt: prompts::summary_reduce_prompt(self.sentiment_desc, self.score, &joined),
            temperature: 0.6,
            format: ResponseFormat::Text,
        };
        let completion = gateway.complete(&request).await?;
        Ok(completion.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackoffConfig, MockBackend, MockReply};
    use crate::chunker::Chunker;
    use crate::usage::{TokenRate, UsageTracker};
    use std::sync::Arc;

    fn gateway(backend: MockBackend) -> ModelGateway {
        ModelGateway::new(
            Arc::new(backend),
            reqwest::Client::new(),
            "test-model",
            BackoffConfig::none(),
            Arc::new(UsageTracker::new(TokenRate::new(0.1, 0.1))),
        )
    }

    fn stage(threshold: usize) -> SummaryStage {
        SummaryStage::new(threshold, MapReduceRunner::new(Chunker::new(2000, 200), 5))
    }

    fn discussion_posts(n: usize) -> Vec<Post> {
        (0..n)
            .map(|i| {
                Post::new(
                    format!("p{}", i),
                    "youtube",
                    format!(
                        "I think the pricing change is what everyone is upset about, comment {}.",
                        i
                    ),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_summarize_direct_path() {
        let gw = gateway(MockBackend::with_handler(|req| {
            // The direct prompt carries the five-bucket framing.
            assert!(req.prompt.contains("negative (30/100)"));
            MockReply::Text("People are mostly unhappy about pricing.".into())
        }));
        let outcome = stage(3500).summarize(&gw, &discussion_posts(5), 30.0).await;
        assert_eq!(
            outcome,
            StageOutcome::Complete("People are mostly unhappy about pricing.".into())
        );
    }

    #[tokio::test]
    async fn test_summarize_empty_after_filter() {
        let posts = vec![Post::new("1", "reddit", "ok"), Post::new("2", "reddit", "nice")];
        let gw = gateway(MockBackend::fixed("unused"));
        let outcome = stage(3500).summarize(&gw, &posts, 50.0).await;
        assert_eq!(outcome, StageOutcome::Empty);
    }

    #[tokio::test]
    async fn test_summarize_failure_degrades() {
        let gw = gateway(MockBackend::new(vec![MockReply::Timeout]));
        let outcome = stage(3500).summarize(&gw, &discussion_posts(5), 50.0).await;
        assert!(matches!(outcome, StageOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_summarize_map_reduce_path() {
        // Threshold 1 forces map-reduce; the block still fits one chunk, so
        // it maps directly with the key-point prompt.
        let gw = gateway(MockBackend::with_handler(|req| {
            assert!(req.prompt.contains("Extract the key points"));
            MockReply::Text("Key point: pricing dominates the discussion.".into())
        }));
        let outcome = stage(1).summarize(&gw, &discussion_posts(5), 45.0).await;
        match outcome {
            StageOutcome::Complete(text) => assert!(text.contains("pricing")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_model_reply_is_failure() {
        let gw = gateway(MockBackend::fixed("   "));
        let outcome = stage(3500).summarize(&gw, &discussion_posts(5), 50.0).await;
        assert!(matches!(outcome, StageOutcome::Failed(_)));
    }
}
