//! Prompt construction for the three analysis stages.
//!
//! Prompts pin the model to strict JSON shapes; the score guide and output
//! contracts here are what the parsers in each stage validate against.

/// System prompt for sentiment scoring, single or batch.
pub const SENTIMENT_SYSTEM: &str = "\
You are a sentiment analysis expert specializing in social media content. \
Analyze the emotional tone of text on a 0-100 scale.

Score guide:
- 0-20: extremely negative (hate, anger, disgust)
- 21-40: negative (disappointment, frustration)
- 41-60: neutral (objective, balanced, mild opinions)
- 61-80: positive (satisfaction, approval)
- 81-100: extremely positive (love, excitement, enthusiasm)

Consider the overall tone, context, sarcasm, and emojis, not just \
individual words.";

/// User prompt for a batch of posts. The reply must be a JSON array with
/// exactly one object per numbered post, in the same order.
pub fn sentiment_batch_prompt(texts: &[String]) -> String {
    let mut prompt = String::from(
        "Analyze the sentiment of each post below. Respond with ONLY a JSON \
         array containing exactly one object per post, in the same order. \
         Each object: {\"score\": <0-100>, \"label\": \
         \"positive\"|\"neutral\"|\"negative\", \"confidence\": <0.0-1.0>, \
         \"reasoning\": \"<brief>\"}\n\nPosts:\n",
    );
    for (i, text) in texts.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, text));
    }
    prompt.push_str("\nResponse (JSON array only):");
    prompt
}

/// User prompt for a single post, used by the per-item fallback path.
pub fn sentiment_item_prompt(text: &str) -> String {
    format!(
        "Analyze the sentiment of this post. Respond with ONLY a JSON \
         object: {{\"score\": <0-100>, \"label\": \
         \"positive\"|\"neutral\"|\"negative\", \"confidence\": <0.0-1.0>, \
         \"reasoning\": \"<brief>\"}}\n\nPost: {}",
        text
    )
}

/// System prompt for opinion clustering.
pub const CLUSTERING_SYSTEM: &str = "\
You are an expert conversation analyst. Identify and group the distinct \
themes and discussion points in social media posts.

Principles:
- group by topic, not by sentiment; a cluster may contain mixed opinions
- clusters must be mutually exclusive with clear, descriptive labels
- count mentions by relevance, not keyword matches
- extract short representative quotes";

/// User prompt requesting the top clusters for a numbered post block.
pub fn clustering_prompt(post_count: usize, top_n: usize, posts: &str) -> String {
    format!(
        "Analyze these {post_count} social media posts and identify the top \
         {top_n} opinion clusters. Respond with ONLY a JSON object: \
         {{\"clusters\": [{{\"label\": \"<2-4 word theme>\", \"summary\": \
         \"<2-3 sentences>\", \"mention_count\": <number>, \"sample_quotes\": \
         [\"<quote>\", ...]}}]}}\n\nPosts:\n{posts}\n\nResponse (JSON only):"
    )
}

/// Reduce prompt merging per-chunk cluster lists into a final top-N.
pub fn clustering_merge_prompt(top_n: usize, partials: &str) -> String {
    format!(
        "The following JSON lists contain opinion clusters identified in \
         different parts of one discussion. Merge overlapping themes, sum \
         their mention counts, and return the top {top_n} clusters overall. \
         Respond with ONLY a JSON object of the same shape: \
         {{\"clusters\": [...]}}\n\nPartial cluster lists:\n{partials}\n\n\
         Response (JSON only):"
    )
}

/// System prompt for discussion summarization.
pub const SUMMARY_SYSTEM: &str = "\
You are an expert at synthesizing social media discussions. Write clear, \
concise summaries that capture the main topics, the overall emotional \
tone, and points of consensus or controversy. Write 2-3 natural, flowing \
paragraphs, never lists or bullet points.";

/// User prompt for a direct (non-chunked) summary.
pub fn summary_prompt(sentiment_desc: &str, score: f64, post_count: usize, posts: &str) -> String {
    format!(
        "Summarize this social media discussion. Overall sentiment: \
         {sentiment_desc} ({score:.0}/100).\n\nHere are {post_count} \
         representative posts:\n{posts}\n\nGenerate a 2-3 paragraph summary:"
    )
}

/// Map prompt: extract key points from one chunk of the discussion.
pub fn summary_map_prompt(chunk: &str) -> String {
    format!(
        "Extract the key points from these social media posts: main topics, \
         opinions expressed, and notable sentiment indicators. Be \
         concise.\n\nPosts:\n{chunk}\n\nKey points:"
    )
}

/// Reduce prompt: synthesize partial key-point lists into the final summary.
pub fn summary_reduce_prompt(sentiment_desc: &str, score: f64, partials: &str) -> String {
    format!(
        "You are synthesizing a social media discussion from analyses of \
         its parts. Overall sentiment: {sentiment_desc} ({score:.0}/100).\n\n\
         Key points from each part:\n{partials}\n\nWrite a coherent 2-3 \
         paragraph summary covering the main themes, the overall tone, and \
         areas of agreement or controversy. Flowing prose, no lists:"
    )
}

/// Five-bucket description of an overall score, for prompt framing.
pub fn describe_sentiment(score: f64) -> &'static str {
    if score >= 80.0 {
        "very positive"
    } else if score >= 60.0 {
        "positive"
    } else if score >= 40.0 {
        "neutral"
    } else if score >= 20.0 {
        "negative"
    } else {
        "very negative"
    }
}
