//! Text cleanup and token estimation ahead of paid model calls.
//!
//! Everything here is total and deterministic: no function fails, and the
//! token estimator returns the same value for the same text within a run.
//! Used by the chunker, the batch runner, and the stage pre-filters.

use once_cell::sync::Lazy;
use regex::Regex;

static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").expect("url regex"));
static MARKDOWN_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("markdown link regex"));

/// Clean raw post text for analysis, truncating to at most `max_chars`
/// characters without cutting mid-word where feasible.
///
/// Strips URLs, unwraps markdown links to their label, collapses whitespace
/// runs and repeated sentence punctuation. Empty input yields an empty
/// string; never fails.
pub fn clean(text: &str, max_chars: usize) -> String {
    let text = MARKDOWN_LINK.replace_all(text, "$1");
    let text = URL.replace_all(&text, "");
    let text = collapse_punctuation(&text);
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_on_word(&collapsed, max_chars)
}

/// Deterministic token estimate: one token per four characters, rounded up.
///
/// A crude but consistent approximation for English-dominant text; the
/// pipeline only needs it for budgeting, not billing; the gateway prefers
/// provider-reported counts when available.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Total estimated tokens across several texts.
pub fn estimate_tokens_batch<S: AsRef<str>>(texts: &[S]) -> usize {
    texts.iter().map(|t| estimate_tokens(t.as_ref())).sum()
}

/// Split text into sentences, keeping terminators attached.
///
/// A sentence ends at a run of `.`/`!`/`?` followed by whitespace or the end
/// of input. Text without terminators comes back as a single sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            // Consume the rest of the punctuation run.
            while let Some(&next) = chars.peek() {
                if matches!(next, '.' | '!' | '?') {
                    current.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            let boundary = chars.peek().map_or(true, |next| next.is_whitespace());
            if boundary {
                let sentence = current.trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                current.clear();
            }
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

/// Select up to `max_sentences` representative sentences by position:
/// keep the first and last, fill the middle at even spacing, preferring
/// sentences long enough to carry a topic.
///
/// Short texts come back whole. Empty input yields an empty vec.
pub fn extract_key_sentences(text: &str, max_sentences: usize) -> Vec<String> {
    let sentences = split_sentences(text);
    if max_sentences == 0 {
        return Vec::new();
    }
    if sentences.len() <= max_sentences {
        return sentences;
    }

    const MIN_TOPIC_CHARS: usize = 20;
    let last = sentences.len() - 1;
    let mut indices = std::collections::BTreeSet::new();
    indices.insert(0);
    indices.insert(last);

    let middle_slots = max_sentences.saturating_sub(2);
    if middle_slots > 0 {
        let step = sentences.len() / (middle_slots + 1);
        for slot in 1..=middle_slots {
            let mut idx = (slot * step.max(1)).min(last);
            // Length component of the salience heuristic: skip fragments.
            while idx < last && sentences[idx].chars().count() < MIN_TOPIC_CHARS {
                idx += 1;
            }
            indices.insert(idx);
        }
    }

    indices.into_iter().map(|i| sentences[i].clone()).collect()
}

/// Shrink a post to at most `max_chars` without discarding topic
/// diversity: content that overflows the budget is first reduced to its
/// key sentences, and only then hard-truncated if it still overflows.
///
/// Used by the clustering and summary stages before formatting prompts;
/// plain truncation would keep only a post's opening topic.
pub fn condense(text: &str, max_chars: usize, max_sentences: usize) -> String {
    let cleaned = clean(text, usize::MAX);
    if cleaned.chars().count() <= max_chars {
        return cleaned;
    }
    let key = extract_key_sentences(&cleaned, max_sentences).join(" ");
    truncate_on_word(&key, max_chars)
}

/// Collapse runs of repeated sentence punctuation ("!!!" -> "!").
fn collapse_punctuation(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut prev: Option<char> = None;
    for c in text.chars() {
        if matches!(c, '.' | '!' | '?') && prev == Some(c) {
            continue;
        }
        result.push(c);
        prev = Some(c);
    }
    result
}

/// Truncate to `max_chars` characters, backing up to the last word boundary
/// when it does not cost more than a third of the budget.
fn truncate_on_word(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    let kept = match cut.rfind(' ') {
        Some(idx) if idx >= cut.len() * 2 / 3 => cut[..idx].trim_end(),
        _ => cut.as_str(),
    };
    format!("{}...", kept.trim_end())
}
