//! Token and cost accounting, scoped to a single pipeline run.
//!
//! Multiple concurrent gateway calls record into one [`UsageTracker`];
//! appends are serialized behind a mutex; this is the only shared mutable
//! state in the crate. A tracker is constructed at pipeline start and
//! discarded with the run; never share one across concurrent runs, or
//! per-request cost accounting breaks.

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Cost per 1,000 tokens, split by direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenRate {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl TokenRate {
    pub const fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// Dollar cost of one call at this rate.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_per_1k
    }
}

/// One provider call, as recorded by the gateway. Append-only.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    /// Operation label (e.g. `"sentiment_batch"`, `"summary_reduce"`).
    pub operation: &'static str,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration: Duration,
    /// Dollar estimate for this call at the tracker's rate.
    pub cost_estimate: f64,
}

/// Running fold over all records of one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSummary {
    pub api_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Dollar estimate across all calls.
    pub cost_estimate: f64,
    /// Summed request wall time in milliseconds.
    pub total_duration_ms: u64,
}

impl UsageSummary {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    records: Vec<UsageRecord>,
    summary: UsageSummary,
}

/// Accumulates usage across all gateway calls of one pipeline run.
#[derive(Debug)]
pub struct UsageTracker {
    state: Mutex<TrackerState>,
    rate: TokenRate,
}

impl UsageTracker {
    pub fn new(rate: TokenRate) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            rate,
        }
    }

    /// Append a record and update the running totals.
    ///
    /// Failed calls with no billable response record zero tokens but still
    /// count toward `api_calls` and wall time.
    pub fn record(
        &self,
        operation: &'static str,
        input_tokens: u64,
        output_tokens: u64,
        duration: Duration,
    ) {
        let cost = self.rate.cost(input_tokens, output_tokens);
        let mut state = self.state.lock().expect("usage tracker poisoned");
        state.summary.api_calls += 1;
        state.summary.input_tokens += input_tokens;
        state.summary.output_tokens += output_tokens;
        state.summary.cost_estimate += cost;
        state.summary.total_duration_ms += duration.as_millis() as u64;
        state.records.push(UsageRecord {
            operation,
            input_tokens,
            output_tokens,
            duration,
            cost_estimate: cost,
        });
        tracing::debug!(
            operation,
            input_tokens,
            output_tokens,
            cost_usd = cost,
            "recorded provider call"
        );
    }

    /// Snapshot of the running totals.
    pub fn summary(&self) -> UsageSummary {
        self.state
            .lock()
            .expect("usage tracker poisoned")
            .summary
            .clone()
    }

    /// Copy of all records so far, in append order.
    pub fn records(&self) -> Vec<UsageRecord> {
        self.state
            .lock()
            .expect("usage tracker poisoned")
            .records
            .clone()
    }
}
