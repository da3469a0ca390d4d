//! Sentiment scoring: the mandatory stage.
//!
//! Every post is scored, spam included: the sentiment of noise is still
//! signal, so filtering happens only in the optional stages. Posts run
//! through the batch runner in groups of `batch_size`; a post that fails
//! even the per-item fallback gets a neutral placeholder so the overall
//! mean stays computable. Only when *every* post fails does the stage,
//! and with it the pipeline, fail.

use serde_json::Value;

use crate::batch::{BatchRunner, BatchTask};
use crate::error::{GatewayError, PipelineError, StageKind};
use crate::gateway::ModelGateway;
use crate::preprocess;
use crate::prompts;
use crate::types::{Post, SentimentLabel, SentimentResult};

/// Per-item content budget before formatting into a prompt.
const TRUNCATE_CHARS: usize = 500;

pub struct SentimentStage {
    runner: BatchRunner,
}

impl SentimentStage {
    pub fn new(batch_size: usize, concurrency: usize) -> Self {
        Self {
            runner: BatchRunner::new(batch_size, concurrency),
        }
    }

    /// Score every post, 1:1 with input order.
    ///
    /// Fails only when no post could be scored at all and the report would
    /// carry nothing but placeholders.
    pub async fn score(
        &self,
        gateway: &ModelGateway,
        posts: &[Post],
    ) -> Result<Vec<SentimentResult>, PipelineError> {
        if posts.is_empty() {
            return Ok(Vec::new());
        }
        let (results, stats) = self.runner.run(gateway, self, posts).await;
        tracing::info!(
            posts = posts.len(),
            batches = stats.batch_calls,
            fallbacks = stats.fallback_batches,
            failed = stats.failed_items,
            "sentiment scoring finished"
        );
        if stats.failed_items == posts.len() {
            return Err(PipelineError::StageFailed {
                stage: StageKind::Sentiment,
                message: "no post could be scored; provider calls exhausted retries".into(),
            });
        }
        Ok(results)
    }
}

impl BatchTask<Post, SentimentResult> for SentimentStage {
    fn operation(&self) -> &'static str {
        "sentiment"
    }

    fn system_prompt(&self) -> &str {
        prompts::SENTIMENT_SYSTEM
    }

    fn batch_prompt(&self, items: &[Post]) -> String {
        let texts: Vec<String> = items
            .iter()
            .map(|p| preprocess::clean(&p.content, TRUNCATE_CHARS))
            .collect();
        prompts::sentiment_batch_prompt(&texts)
    }

    fn item_prompt(&self, item: &Post) -> String {
        prompts::sentiment_item_prompt(&preprocess::clean(&item.content, TRUNCATE_CHARS))
    }

    fn parse_batch(
        &self,
        value: &Value,
        expected: usize,
    ) -> Result<Vec<SentimentResult>, GatewayError> {
        let arr = value
            .as_array()
            .ok_or_else(|| GatewayError::InvalidResponse("expected a JSON array".into()))?;
        if arr.len() != expected {
            return Err(GatewayError::InvalidResponse(format!(
                "expected {} sentiment results, got {}",
                expected,
                arr.len()
            )));
        }
        arr.iter().map(normalize_result).collect()
    }

    fn parse_item(&self, value: &Value) -> Result<SentimentResult, GatewayError> {
        normalize_result(value)
    }

    fn fallback(&self, _item: &Post) -> SentimentResult {
        SentimentResult::fallback("analysis failed")
    }
}

/// Validate and normalize one model-produced result object.
///
/// The shape is untrusted: scores are clamped into 0–100, a missing or
/// unknown label is inferred from the score, missing confidence defaults
/// to 0.5, missing reasoning gets a stock string. Anything that is not an
/// object at all is rejected (and triggers the batch fallback).
fn normalize_result(value: &Value) -> Result<SentimentResult, GatewayError> {
    let obj = value
        .as_object()
        .ok_or_else(|| GatewayError::InvalidResponse("result is not an object".into()))?;

    let score = obj
        .get("score")
        .and_then(Value::as_f64)
        .unwrap_or(50.0)
        .clamp(0.0, 100.0)
        .round() as u8;

    let label = obj
        .get("label")
        .and_then(Value::as_str)
        .and_then(|s| match s {
            "positive" => Some(SentimentLabel::Positive),
            "neutral" => Some(SentimentLabel::Neutral),
            "negative" => Some(SentimentLabel::Negative),
            _ => None,
        })
        .unwrap_or_else(|| SentimentLabel::from_score(score));

    let confidence = obj
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.5)
        .clamp(0.0, 1.0) as f32;

    let reasoning = obj
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or("sentiment analysis completed")
        .to_string();

    Ok(SentimentResult {
        score,
        label,
        confidence,
        reasoning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackoffConfig, MockBackend, MockReply};
    use crate::usage::{TokenRate, UsageTracker};
    use serde_json::json;
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

    fn posts(n: usize) -> Vec<Post> {
        (0..n)
            .map(|i| {
                Post::new(
                    format!("p{}", i),
                    "reddit",
                    format!("Post number {} with an actual opinion in it.", i),
                )
            })
            .collect()
    }

    /// Counts the numbered posts in a batch prompt and answers each with a
    /// fixed result, regardless of dispatch order.
    fn scoring_handler() -> impl Fn(&crate::backend::CompletionRequest) -> MockReply + Send + Sync
    {
        |req: &crate::backend::CompletionRequest| {
            let count = req
                .prompt
                .lines()
                .filter(|l| {
                    l.split('.').next().is_some_and(|n| n.parse::<usize>().is_ok())
                })
                .count();
            let results: Vec<Value> = (0..count.max(1))
                .map(|_| json!({"score": 70, "label": "positive", "confidence": 0.9, "reasoning": "ok"}))
                .collect();
            MockReply::Text(serde_json::to_string(&results).unwrap())
        }
    }

    #[test]
    fn test_normalize_clamps_score() {
        let r = normalize_result(&json!({"score": 150, "label": "positive", "confidence": 0.9}))
            .unwrap();
        assert_eq!(r.score, 100);
        let r = normalize_result(&json!({"score": -5, "label": "negative", "confidence": 0.9}))
            .unwrap();
        assert_eq!(r.score, 0);
    }

    #[test]
    fn test_normalize_infers_missing_label() {
        let r = normalize_result(&json!({"score": 75, "confidence": 0.8})).unwrap();
        assert_eq!(r.label, SentimentLabel::Positive);
        let r = normalize_result(&json!({"score": 30, "label": "meh"})).unwrap();
        assert_eq!(r.label, SentimentLabel::Negative);
    }

    #[test]
    fn test_normalize_defaults() {
        let r = normalize_result(&json!({})).unwrap();
        assert_eq!(r.score, 50);
        assert_eq!(r.label, SentimentLabel::Neutral);
        assert_eq!(r.confidence, 0.5);
        assert_eq!(r.reasoning, "sentiment analysis completed");
    }

    #[test]
    fn test_normalize_rejects_non_object() {
        assert!(normalize_result(&json!("just a string")).is_err());
        assert!(normalize_result(&json!(42)).is_err());
    }

    #[test]
    fn test_batch_parse_length_mismatch_rejected() {
        let stage = SentimentStage::new(10, 5);
        let value = json!([{"score": 60}, {"score": 40}]);
        let err = stage.parse_batch(&value, 3).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidResponse(_)));
    }

    #[test]
    fn test_score_label_consistency_invariant() {
        // Whatever the model sends, normalized output keeps score in range
        // and an inferred label consistent with it when the sent one is bad.
        for raw in [-50i64, 0, 39, 40, 59, 60, 100, 400] {
            let r = normalize_result(&json!({"score": raw, "label": "???"})).unwrap();
            assert!(r.score <= 100);
            assert_eq!(r.label, SentimentLabel::from_score(r.score));
        }
    }

    #[tokio::test]
    async fn test_score_all_posts_in_order() {
        let gw = gateway(MockBackend::with_handler(scoring_handler()));
        let stage = SentimentStage::new(10, 5);
        let results = stage.score(&gw, &posts(25)).await.unwrap();
        assert_eq!(results.len(), 25);
        assert!(results.iter().all(|r| r.score == 70));
    }

    #[tokio::test]
    async fn test_score_empty_input() {
        let gw = gateway(MockBackend::fixed("[]"));
        let stage = SentimentStage::new(10, 5);
        let results = stage.score(&gw, &[]).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_total_failure_aborts_stage() {
        let gw = gateway(MockBackend::new(vec![MockReply::Http(500)]));
        let stage = SentimentStage::new(10, 5);
        let err = stage.score(&gw, &posts(5)).await.unwrap_err();
        match err {
            PipelineError::StageFailed { stage, .. } => assert_eq!(stage, StageKind::Sentiment),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_partial_failure_substitutes_placeholders() {
        // Batch call and repair fail structurally; item calls fail too,
        // except the handler recognizes item prompts for post 0.
        let gw = gateway(MockBackend::with_handler(|req: &crate::backend::CompletionRequest| {
            if req.prompt.contains("Post number 0") && req.prompt.starts_with("Analyze the sentiment of this post") {
                MockReply::Text(r#"{"score": 90, "label": "positive", "confidence": 1.0, "reasoning": "clear"}"#.into())
            } else {
                MockReply::Http(500)
            }
        }));
        let stage = SentimentStage::new(10, 5);
        let results = stage.score(&gw, &posts(3)).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].score, 90);
        assert_eq!(results[1].score, 50);
        assert_eq!(results[1].reasoning, "analysis failed");
        assert_eq!(results[2].confidence, 0.0);
    }
}
