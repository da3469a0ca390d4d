//! Core data model: posts in, analysis report out.
//!
//! [`Post`] is supplied by external collectors and consumed read-only.
//! [`AnalysisReport`] is produced once per pipeline invocation and is
//! immutable after return. Everything here is serde-(de)serializable so the
//! persistence and presentation layers can consume it directly.

use serde::{Deserialize, Serialize};

use crate::usage::UsageSummary;

/// A single post harvested from a social platform.
///
/// Owned by the external collector; the pipeline never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    /// Platform-scoped post identifier.
    pub id: String,

    /// Source platform (e.g. `"reddit"`, `"youtube"`, `"twitter"`).
    pub platform: String,

    /// Raw post text as collected.
    pub content: String,

    /// Author handle, when the platform exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// Engagement counters, when the platform exposes them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engagement: Option<EngagementMetrics>,
}

impl Post {
    /// Convenience constructor for the common id/platform/content case.
    pub fn new(
        id: impl Into<String>,
        platform: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            platform: platform.into(),
            content: content.into(),
            author: None,
            engagement: None,
        }
    }
}

/// Engagement counters reported by collectors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngagementMetrics {
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub shares: u64,
    #[serde(default)]
    pub comments: u64,
}

/// Sentiment polarity label, consistent with the 0–100 score scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    /// Label boundaries: ≥60 positive, ≥40 neutral, else negative.
    pub fn from_score(score: u8) -> Self {
        if score >= 60 {
            SentimentLabel::Positive
        } else if score >= 40 {
            SentimentLabel::Neutral
        } else {
            SentimentLabel::Negative
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Negative => "negative",
        }
    }
}

/// Sentiment analysis of one post. Created by the sentiment stage, never
/// mutated afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentResult {
    /// 0 (extremely negative) to 100 (extremely positive).
    pub score: u8,
    pub label: SentimentLabel,
    /// Model-reported confidence in `[0, 1]`.
    pub confidence: f32,
    /// Short model-provided explanation.
    pub reasoning: String,
}

impl SentimentResult {
    /// Neutral placeholder for a post whose analysis failed irrecoverably.
    /// Keeps the overall mean computable without dropping the post.
    pub fn fallback(reasoning: impl Into<String>) -> Self {
        Self {
            score: 50,
            label: SentimentLabel::Neutral,
            confidence: 0.0,
            reasoning: reasoning.into(),
        }
    }
}

/// A recurring theme identified across posts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpinionCluster {
    /// Brief 2–4 word theme label.
    pub label: String,
    /// 2–3 sentence description of the theme.
    pub summary: String,
    /// Number of posts touching this theme; never exceeds the number of
    /// posts fed to the clustering stage.
    pub mention_count: u64,
    /// Up to 3 representative quotes.
    pub sample_quotes: Vec<String>,
}

/// Terminal pipeline status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// All three stages produced output.
    Complete,
    /// Sentiment succeeded but clustering and/or summary did not.
    Partial,
}

/// The pipeline's output: one per invocation, immutable after return.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Arithmetic mean of all sentiment scores, in `[0, 100]`.
    /// 50.0 when no results exist: neutral/unknown, never an error.
    pub overall_sentiment: f64,

    /// One result per input post, in input order.
    pub sentiment_results: Vec<SentimentResult>,

    /// At most `top_n_clusters` opinion clusters. Empty when the clustering
    /// stage failed or nothing substantive was found.
    pub clusters: Vec<OpinionCluster>,

    /// Discussion summary; absent when the summary stage failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    pub status: ReportStatus,

    /// Token and cost accounting for this run.
    pub usage: UsageSummary,
}

/// Mean of the available scores; 50.0 (neutral) when there are none.
pub fn overall_sentiment(results: &[SentimentResult]) -> f64 {
    if results.is_empty() {
        return 50.0;
    }
    let sum: u64 = results.iter().map(|r| u64::from(r.score)).sum();
    let mean = sum as f64 / results.len() as f64;
    (mean * 10.0).round() / 10.0
}
