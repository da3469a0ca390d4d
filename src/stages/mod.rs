//! The three analysis stages and their shared pre-filtering.

pub mod clustering;
pub mod sentiment;
pub mod summary;

pub use clustering::ClusteringStage;
pub use sentiment::SentimentStage;
pub use summary::SummaryStage;

use crate::preprocess;
use crate::types::Post;

/// Outcome of an optional stage, as tagged control flow rather than an
/// exception at every call site. Only the mandatory sentiment stage
/// escalates failure to a pipeline-level error.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    /// The stage produced a result.
    Complete(T),
    /// Nothing substantive to analyze; not a failure.
    Empty,
    /// The stage failed irrecoverably; the report degrades to partial.
    Failed(String),
}

/// Minimum cleaned content length for a post to count as substantive.
pub(crate) const MIN_CONTENT_CHARS: usize = 50;

/// Promotional phrases that mark a post as spam. Case-insensitive
/// substring match; deterministic and LLM-independent.
pub(crate) const SPAM_KEYWORDS: &[&str] = &[
    "buy now",
    "click here",
    "free trial",
    "subscribe",
    "follow me",
    "check my profile",
    "link in bio",
];

/// Whether content trips the spam keyword list.
pub(crate) fn is_spam(content: &str) -> bool {
    let lower = content.to_lowercase();
    SPAM_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Drop spam and short posts, then take a stable prefix of at most
/// `sample_cap`. Deterministic, so repeated runs on identical input are
/// reproducible. Runs before any paid call.
pub(crate) fn filter_and_sample<'a>(posts: &'a [Post], sample_cap: usize) -> Vec<&'a Post> {
    posts
        .iter()
        .filter(|p| {
            let cleaned = preprocess::clean(&p.content, usize::MAX);
            cleaned.chars().count() >= MIN_CONTENT_CHARS && !is_spam(&cleaned)
        })
        .take(sample_cap)
        .collect()
}
