//! Token-bounded, overlapping chunking for long documents.
//!
//! Splits a text into sentence-aligned chunks whose estimated token counts
//! stay within a budget, with a configurable token overlap carried between
//! consecutive chunks to preserve cross-boundary context. Chunks are
//! transient: they exist only for the duration of a map-reduce run.

use crate::preprocess;

/// A token-bounded slice of a document.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Position of this chunk in the document, 0-based.
    pub index: usize,
    pub text: String,
    /// Estimated token count via [`preprocess::estimate_tokens`].
    pub token_estimate: usize,
}

/// Sentence-aligned splitter with token budget and overlap.
#[derive(Debug, Clone)]
pub struct Chunker {
    max_tokens_per_chunk: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(max_tokens_per_chunk: usize, overlap: usize) -> Self {
        Self {
            max_tokens_per_chunk,
            overlap,
        }
    }

    /// Split `text` into ordered chunks.
    ///
    /// Accumulates sentences until the token budget is reached, closes the
    /// chunk, then backs up whole sentences worth roughly `overlap` tokens
    /// as the start of the next chunk. A single sentence exceeding the
    /// budget becomes its own chunk verbatim, never silently dropped.
    /// Empty input yields exactly one empty chunk.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return vec![Chunk {
                index: 0,
                text: String::new(),
                token_estimate: 0,
            }];
        }

        let total = preprocess::estimate_tokens(text);
        if total <= self.max_tokens_per_chunk {
            return vec![Chunk {
                index: 0,
                text: text.to_string(),
                token_estimate: total,
            }];
        }

        let sentences = preprocess::split_sentences(text);
        let units: Vec<(String, usize)> = sentences
            .into_iter()
            .map(|s| {
                let tokens = preprocess::estimate_tokens(&s);
                (s, tokens)
            })
            .collect();

        let n = units.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < n {
            let mut token_count = 0;
            let mut end = start;

            while end < n && token_count + units[end].1 <= self.max_tokens_per_chunk {
                token_count += units[end].1;
                end += 1;
            }

            // A lone oversized sentence still gets a chunk of its own.
            if end == start {
                token_count = units[end].1;
                end += 1;
            }

            let chunk_text = units[start..end]
                .iter()
                .map(|(s, _)| s.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            chunks.push(Chunk {
                index: chunks.len(),
                text: chunk_text,
                token_estimate: token_count,
            });

            if end >= n {
                break;
            }

            if self.overlap == 0 {
                start = end;
                continue;
            }

            // Walk back whole sentences until the desired overlap is covered,
            // never past the start of the chunk just closed.
            let mut overlap_acc = 0;
            let mut idx = end - 1;
            while idx > start && overlap_acc < self.overlap {
                overlap_acc += units[idx].1;
                idx -= 1;
            }
            start = idx + 1;
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A "sentence" of exactly `chars` characters ending in a period.
    fn sentence_of(chars: usize) -> String {
        let mut s = "a".repeat(chars - 1);
        s.push('.');
        s
    }

    #[test]
    fn test_empty_text_single_empty_chunk() {
        let chunks = Chunker::new(2000, 200).split("");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.is_empty());
        assert_eq!(chunks[0].token_estimate, 0);
    }

    #[test]
    fn test_short_text_single_chunk_verbatim() {
        let text = "A short opinion about the product. Nothing more.";
        let chunks = Chunker::new(2000, 200).split(text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn test_transcript_splits_into_three_chunks() {
        // 50 sentences x 100 estimated tokens = 5000 tokens total.
        let text = (0..50)
            .map(|_| sentence_of(400))
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(preprocess::estimate_tokens(&sentence_of(400)), 100);

        let chunks = Chunker::new(2000, 200).split(&text);
        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.token_estimate <= 2000);
        }
    }

    #[test]
    fn test_overlap_repeats_boundary_sentences() {
        let text = (0..50)
            .map(|_| sentence_of(400))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = Chunker::new(2000, 200).split(&text);

        // With 100-token sentences and 200-token overlap, each chunk after
        // the first starts with the last two sentences of its predecessor.
        let sum: usize = chunks.iter().map(|c| c.token_estimate).sum();
        assert!(sum >= 5000, "overlap only adds coverage, got {}", sum);
    }

    #[test]
    fn test_coverage_never_lost() {
        let text = (0..30)
            .map(|i| format!("Sentence number {} talks about a distinct point.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let whole = preprocess::estimate_tokens(&text);
        let chunks = Chunker::new(50, 10).split(&text);
        let sum: usize = chunks.iter().map(|c| c.token_estimate).sum();
        assert!(sum + chunks.len() >= whole, "sum {} vs whole {}", sum, whole);
    }

    #[test]
    fn test_oversized_sentence_gets_own_chunk() {
        // One 300-token monster between small sentences, budget 100.
        let text = format!("Small one. {} Small two.", sentence_of(1200));
        let chunks = Chunker::new(100, 0).split(&text);
        assert!(chunks.iter().any(|c| c.token_estimate > 100));
        // The oversized sentence is present verbatim somewhere.
        assert!(chunks.iter().any(|c| c.text.contains(&"a".repeat(1199))));
    }

    #[test]
    fn test_no_overlap_partitions_cleanly() {
        let text = (0..20)
            .map(|_| sentence_of(40))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = Chunker::new(50, 0).split(&text);
        // 20 sentences x 10 tokens, 50-token budget -> 4 chunks of 5.
        assert_eq!(chunks.len(), 4);
        let sum: usize = chunks.iter().map(|c| c.token_estimate).sum();
        assert_eq!(sum, 200);
    }

    #[test]
    fn test_always_makes_progress() {
        // Overlap nearly as large as the budget must still terminate.
        let text = (0..40)
            .map(|_| sentence_of(40))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = Chunker::new(20, 19).split(&text);
        assert!(!chunks.is_empty());
        assert!(chunks.len() <= 80, "walk-back must advance every iteration");
    }
}
