//! Batched execution with per-item fallback.
//!
//! [`BatchRunner`] partitions an item sequence into fixed-size batches and
//! issues one gateway call per batch. A batch whose call fails, or whose
//! reply does not contain exactly one result per item, is retried once as
//! individual per-item calls; an item that still fails gets the task's
//! stage-defined default. The output therefore always has the same length
//! and order as the input, and worst-case calls are bounded by
//! `batches + failed_batches × batch_size`.

use futures::stream::{self, StreamExt};
use serde_json::Value;

use crate::error::GatewayError;
use crate::gateway::{GatewayRequest, ModelGateway, ResponseFormat};

/// Stage-specific half of a batched operation: how to format prompts, parse
/// replies, and fill in defaults. The runner owns scheduling and fallback.
pub trait BatchTask<I, T>: Send + Sync {
    /// Usage-record label for calls issued by this task.
    fn operation(&self) -> &'static str;

    fn system_prompt(&self) -> &str;

    /// Prompt covering a whole batch; the reply must be a structured array
    /// with one element per item, in order.
    fn batch_prompt(&self, items: &[I]) -> String;

    /// Prompt for a single item, used on the fallback path.
    fn item_prompt(&self, item: &I) -> String;

    /// Parse a batch reply. Must fail unless exactly `expected` results are
    /// present; a count mismatch triggers the per-item fallback.
    fn parse_batch(&self, value: &Value, expected: usize) -> Result<Vec<T>, GatewayError>;

    /// Parse a single-item reply.
    fn parse_item(&self, value: &Value) -> Result<T, GatewayError>;

    /// Default result for an item that failed even the fallback path.
    fn fallback(&self, item: &I) -> T;

    fn temperature(&self) -> f64 {
        0.3
    }
}

/// Call accounting for one run, used by the mandatory stage to detect total
/// failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchStats {
    /// Batch-level gateway calls issued.
    pub batch_calls: usize,
    /// Batches that fell back to per-item calls.
    pub fallback_batches: usize,
    /// Items that received the fallback default.
    pub failed_items: usize,
}

/// Partitions items and dispatches batches with bounded concurrency.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    batch_size: usize,
    concurrency: usize,
}

impl BatchRunner {
    pub fn new(batch_size: usize, concurrency: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
        }
    }

    /// Run `items` through `task`. The returned vec has exactly one result
    /// per item, in input order, regardless of completion order or failures.
    pub async fn run<I: Sync, T: Send>(
        &self,
        gateway: &ModelGateway,
        task: &dyn BatchTask<I, T>,
        items: &[I],
    ) -> (Vec<T>, BatchStats) {
        if items.is_empty() {
            return (Vec::new(), BatchStats::default());
        }

        let batches: Vec<&[I]> = items.chunks(self.batch_size).collect();
        let total_batches = batches.len();

        // Results land in slots indexed by batch position, not completion
        // order.
        let mut slots: Vec<Option<(Vec<T>, usize, bool)>> =
            (0..total_batches).map(|_| None).collect();

        let mut in_flight = stream::iter(batches.into_iter().enumerate().map(|(idx, chunk)| {
            async move {
                tracing::info!(
                    operation = task.operation(),
                    batch = idx + 1,
                    total = total_batches,
                    size = chunk.len(),
                    "dispatching batch"
                );
                let outcome = self.run_batch(gateway, task, chunk).await;
                (idx, outcome)
            }
        }))
        .buffer_unordered(self.concurrency);

        while let Some((idx, outcome)) = in_flight.next().await {
            slots[idx] = Some(outcome);
        }
        drop(in_flight);

        let mut results = Vec::with_capacity(items.len());
        let mut stats = BatchStats {
            batch_calls: total_batches,
            ..BatchStats::default()
        };
        for slot in slots {
            let (batch_results, failed, fell_back) =
                slot.expect("every batch slot is filled before the stream ends");
            results.extend(batch_results);
            stats.failed_items += failed;
            if fell_back {
                stats.fallback_batches += 1;
            }
        }
        (results, stats)
    }

    /// One batch: a single call, then the per-item fallback on failure.
    /// Returns `(results, failed_items, fell_back)`.
    async fn run_batch<I: Sync, T: Send>(
        &self,
        gateway: &ModelGateway,
        task: &dyn BatchTask<I, T>,
        chunk: &[I],
    ) -> (Vec<T>, usize, bool) {
        let request = GatewayRequest {
            operation: task.operation(),
            system_prompt: Some(task.system_prompt().to_string()),
            prompt: task.batch_prompt(chunk),
            temperature: task.temperature(),
            format: ResponseFormat::Json,
        };

        match gateway.complete(&request).await {
            Ok(completion) => match task.parse_batch(&completion.value, chunk.len()) {
                Ok(results) => return (results, 0, false),
                Err(e) => {
                    tracing::warn!(
                        operation = task.operation(),
                        error = %e,
                        "batch reply rejected, retrying items individually"
                    );
                }
            },
            Err(e) => {
                tracing::warn!(
                    operation = task.operation(),
                    error = %e,
                    "batch call failed, retrying items individually"
                );
            }
        }

        let mut results = Vec::with_capacity(chunk.len());
        let mut failed = 0;
        for item in chunk {
            match self.run_item(gateway, task, item).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::warn!(
                        operation = task.operation(),
                        error = %e,
                        "item failed after fallback, substituting default"
                    );
                    failed += 1;
                    results.push(task.fallback(item));
                }
            }
        }
        (results, failed, true)
    }

    async fn run_item<I: Sync, T: Send>(
        &self,
        gateway: &ModelGateway,
        task: &dyn BatchTask<I, T>,
        item: &I,
    ) -> Result<T, GatewayError> {
        let request = GatewayRequest {
            operation: task.operation(),
            system_prompt: Some(task.system_prompt().to_string()),
            prompt: task.item_prompt(item),
            temperature: task.temperature(),
            format: ResponseFormat::Json,
        };
        let completion = gateway.complete(&request).await?;
        task.parse_item(&completion.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackoffConfig, MockBackend, MockReply};
    use crate::usage::{TokenRate, UsageTracker};
    use std::sync::Arc;

    /// Doubles numbers via the "model". Batch replies are JSON arrays,
    /// item replies bare JSON numbers.
    struct DoubleTask;

    impl BatchTask<u32, i64> for DoubleTask {
        fn operation(&self) -> &'static str {
            "double"
        }

        fn system_prompt(&self) -> &str {
            "double each number"
        }

        fn batch_prompt(&self, items: &[u32]) -> String {
            let nums: Vec<String> = items.iter().map(|n| n.to_string()).collect();
            format!("BATCH {}", nums.join(","))
        }

        fn item_prompt(&self, item: &u32) -> String {
            format!("ITEM {}", item)
        }

        fn parse_batch(&self, value: &Value, expected: usize) -> Result<Vec<i64>, GatewayError> {
            let arr = value
                .as_array()
                .ok_or_else(|| GatewayError::InvalidResponse("expected array".into()))?;
            if arr.len() != expected {
                return Err(GatewayError::InvalidResponse(format!(
                    "expected {} results, got {}",
                    expected,
                    arr.len()
                )));
            }
            arr.iter()
                .map(|v| {
                    v.as_i64()
                        .ok_or_else(|| GatewayError::InvalidResponse("expected number".into()))
                })
                .collect()
        }

        fn parse_item(&self, value: &Value) -> Result<i64, GatewayError> {
            value
                .as_i64()
                .ok_or_else(|| GatewayError::InvalidResponse("expected number".into()))
        }

        fn fallback(&self, _item: &u32) -> i64 {
            -1
        }
    }

    fn doubling_handler(
        broken_batch_member: Option<u32>,
    ) -> impl Fn(&crate::backend::CompletionRequest) -> MockReply + Send + Sync {
        move |req: &crate::backend::CompletionRequest| {
            if !req.messages.is_empty() {
                // Format-repair passes stay broken in these tests.
                return MockReply::Text("still broken".into());
            }
            if let Some(rest) = req.prompt.strip_prefix("ITEM ") {
                let n: i64 = rest.trim().parse().unwrap();
                return MockReply::Text((n * 2).to_string());
            }
            let rest = req.prompt.strip_prefix("BATCH ").unwrap();
            let nums: Vec<i64> = rest
                .split(',')
                .map(|s| s.trim().parse().unwrap())
                .collect();
            if let Some(broken) = broken_batch_member {
                if nums.contains(&i64::from(broken)) {
                    return MockReply::Text("garbage, not an array".into());
                }
            }
            let doubled: Vec<i64> = nums.iter().map(|n| n * 2).collect();
            MockReply::Text(serde_json::to_string(&doubled).unwrap())
        }
    }

    fn gateway(backend: MockBackend) -> (ModelGateway, Arc<UsageTracker>) {
        let usage = Arc::new(UsageTracker::new(TokenRate::new(0.1, 0.1)));
        let gw = ModelGateway::new(
            Arc::new(backend),
            reqwest::Client::new(),
            "test-model",
            BackoffConfig::none(),
            usage.clone(),
        );
        (gw, usage)
    }

    #[tokio::test]
    async fn test_partition_count_and_order() {
        let (gw, usage) = gateway(MockBackend::with_handler(doubling_handler(None)));
        let items: Vec<u32> = (0..25).collect();
        let runner = BatchRunner::new(10, 5);
        let (results, stats) = runner.run(&gw, &DoubleTask, &items).await;

        // ceil(25/10) = 3 batch calls, no fallbacks.
        assert_eq!(stats.batch_calls, 3);
        assert_eq!(stats.fallback_batches, 0);
        assert_eq!(stats.failed_items, 0);
        assert_eq!(usage.summary().api_calls, 3);

        // N results in input order.
        assert_eq!(results.len(), 25);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(*r, i as i64 * 2);
        }
    }

    #[tokio::test]
    async fn test_malformed_batch_falls_back_to_items() {
        // The batch containing 15 returns garbage; its 10 items are retried
        // individually and still succeed.
        let (gw, usage) = gateway(MockBackend::with_handler(doubling_handler(Some(15))));
        let items: Vec<u32> = (0..25).collect();
        let runner = BatchRunner::new(10, 5);
        let (results, stats) = runner.run(&gw, &DoubleTask, &items).await;

        assert_eq!(results.len(), 25);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(*r, i as i64 * 2, "order preserved through fallback");
        }
        assert_eq!(stats.fallback_batches, 1);
        assert_eq!(stats.failed_items, 0);
        // 3 batch calls + 1 repair pass on the garbage batch + 10 item calls.
        assert_eq!(usage.summary().api_calls, 14);
    }

    #[tokio::test]
    async fn test_item_failure_gets_default() {
        // Every call fails outright: all items take the fallback default.
        let (gw, _) = gateway(MockBackend::new(vec![MockReply::Http(500)]));
        let items: Vec<u32> = (0..5).collect();
        let runner = BatchRunner::new(10, 5);
        let (results, stats) = runner.run(&gw, &DoubleTask, &items).await;

        assert_eq!(results, vec![-1; 5]);
        assert_eq!(stats.fallback_batches, 1);
        assert_eq!(stats.failed_items, 5);
    }

    #[tokio::test]
    async fn test_empty_items_no_calls() {
        let (gw, usage) = gateway(MockBackend::fixed("[]"));
        let runner = BatchRunner::new(10, 5);
        let (results, stats) = runner.run(&gw, &DoubleTask, &[]).await;
        assert!(results.is_empty());
        assert_eq!(stats.batch_calls, 0);
        assert_eq!(usage.summary().api_calls, 0);
    }

    #[tokio::test]
    async fn test_short_last_batch() {
        let (gw, _) = gateway(MockBackend::with_handler(doubling_handler(None)));
        let items: Vec<u32> = (0..12).collect();
        let runner = BatchRunner::new(5, 2);
        let (results, stats) = runner.run(&gw, &DoubleTask, &items).await;
        assert_eq!(stats.batch_calls, 3); // 5 + 5 + 2
        assert_eq!(results.len(), 12);
    }
}
