//! Map-reduce over long documents.
//!
//! When a single document exceeds the token threshold, it is split into
//! overlapping chunks; the task's `map` runs once per chunk (bounded
//! concurrency, order preserved), and one `reduce` call merges the partial
//! results. A chunk that fails permanently, after the gateway's own
//! retries, is skipped rather than failing the run; only when every chunk
//! fails does the runner report an error to the stage.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::chunker::{Chunk, Chunker};
use crate::error::GatewayError;
use crate::gateway::ModelGateway;

/// Stage-specific half of a map-reduce operation.
#[async_trait]
pub trait MapReduceTask<T: Send>: Send + Sync {
    /// Usage-record label for calls issued by this task.
    fn operation(&self) -> &'static str;

    /// Analyze one chunk in isolation.
    async fn map(&self, gateway: &ModelGateway, chunk: &Chunk) -> Result<T, GatewayError>;

    /// Merge the ordered surviving partials into the final result.
    /// Only called with at least one partial.
    async fn reduce(&self, gateway: &ModelGateway, partials: &[T]) -> Result<T, GatewayError>;
}

/// Chunks a document and drives a [`MapReduceTask`] over it.
#[derive(Debug, Clone)]
pub struct MapReduceRunner {
    chunker: Chunker,
    concurrency: usize,
}

impl MapReduceRunner {
    pub fn new(chunker: Chunker, concurrency: usize) -> Self {
        Self {
            chunker,
            concurrency: concurrency.max(1),
        }
    }

    /// Run `text` through `task`.
    ///
    /// A document that fits a single chunk is mapped directly; no reduce
    /// call is spent on merging one partial with itself.
    pub async fn run<T: Send + Sync>(
        &self,
        gateway: &ModelGateway,
        task: &dyn MapReduceTask<T>,
        text: &str,
    ) -> Result<T, GatewayError> {
        let chunks = self.chunker.split(text);
        tracing::info!(
            operation = task.operation(),
            chunks = chunks.len(),
            "split document for map-reduce"
        );

        if chunks.len() == 1 {
            return task.map(gateway, &chunks[0]).await;
        }

        let total = chunks.len();
        let mut slots: Vec<Option<Result<T, GatewayError>>> = (0..total).map(|_| None).collect();

        let mut in_flight = stream::iter(chunks.iter().map(|chunk| async move {
            let result = task.map(gateway, chunk).await;
            (chunk.index, result)
        }))
        .buffer_unordered(self.concurrency);

        while let Some((idx, result)) = in_flight.next().await {
            slots[idx] = Some(result);
        }
        drop(in_flight);

        let mut partials = Vec::with_capacity(total);
        let mut last_error = None;
        for (idx, slot) in slots.into_iter().enumerate() {
            match slot.expect("every chunk slot is filled before the stream ends") {
                Ok(partial) => partials.push(partial),
                Err(e) => {
                    tracing::warn!(
                        operation = task.operation(),
                        chunk = idx,
                        error = %e,
                        "chunk analysis failed, skipping its partial"
                    );
                    last_error = Some(e);
                }
            }
        }

        if partials.is_empty() {
            return Err(last_error
                .unwrap_or_else(|| GatewayError::InvalidResponse("no chunks produced".into())));
        }

        tracing::info!(
            operation = task.operation(),
            partials = partials.len(),
            dropped = total - partials.len(),
            "reducing partial results"
        );
        task.reduce(gateway, &partials).await
    }
}
