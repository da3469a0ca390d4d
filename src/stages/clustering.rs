//! Opinion clustering: optional commentary, never load-bearing.
//!
//! Runs the deterministic spam/length filter before any paid call, samples
//! a stable prefix to cap cost, then asks the model for the top themes in
//! one call, or via map-reduce when the sampled set is too large. Failure
//! degrades the report to partial instead of aborting the run.

use async_trait::async_trait;
use serde_json::Value;

use crate::chunker::Chunk;
use crate::error::GatewayError;
use crate::gateway::{GatewayRequest, ModelGateway, ResponseFormat};
use crate::map_reduce::{MapReduceRunner, MapReduceTask};
use crate::preprocess;
use crate::prompts;
use crate::stages::{filter_and_sample, StageOutcome};
use crate::types::{OpinionCluster, Post};

/// Cost cap: at most this many filtered posts are sent to the model.
const SAMPLE_CAP: usize = 50;

/// Per-post content budget inside the prompt.
const POST_TRUNCATE: usize = 300;

/// Maximum sample quotes carried per cluster.
const MAX_QUOTES: usize = 3;

pub struct ClusteringStage {
    top_n: usize,
    threshold_tokens: usize,
    map_reduce: MapReduceRunner,
}

impl ClusteringStage {
    pub fn new(top_n: usize, threshold_tokens: usize, map_reduce: MapReduceRunner) -> Self {
        Self {
            top_n,
            threshold_tokens,
            map_reduce,
        }
    }

    /// Identify up to `top_n` recurring themes across the posts.
    pub async fn cluster(
        &self,
        gateway: &ModelGateway,
        posts: &[Post],
    ) -> StageOutcome<Vec<OpinionCluster>> {
        let sampled = filter_and_sample(posts, SAMPLE_CAP);
        if sampled.is_empty() {
            tracing::info!("no substantive posts to cluster");
            return StageOutcome::Empty;
        }

        let document = numbered_block(&sampled, POST_TRUNCATE);
        let task = ClusterTask {
            top_n: self.top_n,
            posts_fed: sampled.len(),
        };

        let result = if preprocess::estimate_tokens(&document) > self.threshold_tokens {
            self.map_reduce.run(gateway, &task, &document).await
        } else {
            task.cluster_block(gateway, sampled.len(), &document).await
        };

        match result {
            Ok(clusters) => StageOutcome::Complete(clusters),
            Err(e) => {
                tracing::warn!(error = %e, "clustering failed, report degrades to partial");
                StageOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Shared between the direct path and the map-reduce path.
struct ClusterTask {
    top_n: usize,
    posts_fed: usize,
}

impl ClusterTask {
    /// One clustering call over a block of numbered posts.
    async fn cluster_block(
        &self,
        gateway: &ModelGateway,
        post_count: usize,
        block: &str,
    ) -> Result<Vec<OpinionCluster>, GatewayError> {
        let request = GatewayRequest {
            operation: "clustering",
            system_prompt: Some(prompts::CLUSTERING_SYSTEM.to_string()),
            prompt: prompts::clustering_prompt(post_count, self.top_n, block),
            temperature: 0.5,
            format: ResponseFormat::Json,
        };
        let completion = gateway.complete(&request).await?;
        parse_clusters(&completion.value, self.top_n, self.posts_fed as u64)
    }
}

#[async_trait]
impl MapReduceTask<Vec<OpinionCluster>> for ClusterTask {
    fn operation(&self) -> &'static str {
        "clustering"
    }

    async fn map(
        &self,
        gateway: &ModelGateway,
        chunk: &Chunk,
    ) -> Result<Vec<OpinionCluster>, GatewayError> {
        let post_count = chunk.text.lines().count();
        self.cluster_block(gateway, post_count, &chunk.text).await
    }

    async fn reduce(
        &self,
        gateway: &ModelGateway,
        partials: &[Vec<OpinionCluster>],
    ) -> Result<Vec<OpinionCluster>, GatewayError> {
        let partial_lists: Vec<Value> = partials
            .iter()
            .map(|clusters| serde_json::to_value(clusters).unwrap_or(Value::Null))
            .collect();
        let serialized = serde_json::to_string_pretty(&partial_lists)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let request = GatewayRequest {
            operation: "clustering",
            system_prompt: Some(prompts::CLUSTERING_SYSTEM.to_string()),
            prompt: prompts::clustering_merge_prompt(self.top_n, &serialized),
            temperature: 0.5,
            format: ResponseFormat::Json,
        };
        let completion = gateway.complete(&request).await?;
        parse_clusters(&completion.value, self.top_n, self.posts_fed as u64)
    }
}

/// Number the sampled posts into one prompt block, condensing any post
/// that overflows its budget down to key sentences first.
fn numbered_block(posts: &[&Post], truncate: usize) -> String {
    posts
        .iter()
        .enumerate()
        .map(|(i, p)| format!("{}. {}", i + 1, preprocess::condense(&p.content, truncate, 5)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Validate the model's cluster list against the stage invariants:
/// at most `top_n` clusters, `mention_count` never above the number of
/// posts fed, at most three quotes each. Entries without a usable label
/// are dropped rather than invented.
fn parse_clusters(
    value: &Value,
    top_n: usize,
    posts_fed: u64,
) -> Result<Vec<OpinionCluster>, GatewayError> {
    let arr = value
        .get("clusters")
        .and_then(Value::as_array)
        .or_else(|| value.as_array())
        .ok_or_else(|| GatewayError::InvalidResponse("no clusters array in reply".into()))?;

    let clusters = arr
        .iter()
        .filter_map(|entry| {
            let obj = entry.as_object()?;
            let label = obj.get("label").and_then(Value::as_str)?.trim();
            if label.is_empty() {
                return None;
            }
            let summary = obj
                .get("summary")
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim()
                .to_string();
            let mention_count = obj
                .get("mention_count")
                .and_then(Value::as_u64)
                .unwrap_or(0)
                .min(posts_fed);
            let sample_quotes: Vec<String> = obj
                .get("sample_quotes")
                .and_then(Value::as_array)
                .map(|quotes| {
                    quotes
                        .iter()
                        .filter_map(Value::as_str)
                        .take(MAX_QUOTES)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            Some(OpinionCluster {
                label: label.to_string(),
                summary,
                mention_count,
                sample_quotes,
            })
        })
        .take(top_n)
        .collect();

    Ok(clusters)
}
