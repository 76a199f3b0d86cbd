//! Per-call performance samples and the sink they are reported to
//!
//! Sinks are fire-and-forget: implementations swallow (and log) their own
//! failures so reporting can never abort a translation or an evaluation run.

use aqp_ir::{EvaluationRecord, RunSummary, TokenUsage};
use serde::{Deserialize, Serialize};

use crate::stages::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Success,
    TransportError,
    ParseError,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::TransportError => "transport_error",
            CallOutcome::ParseError => "parse_error",
        }
    }
}

/// One completion call, including failed attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSample {
    pub stage: Stage,
    /// 1-based attempt number within the stage
    pub attempt: u32,
    pub latency_ms: f64,
    pub token_usage: TokenUsage,
    pub outcome: CallOutcome,
}

pub trait MetricsSink: Send + Sync {
    fn record_call(&self, _sample: &CallSample) {}

    fn record_evaluation(&self, _record: &EvaluationRecord) {}

    fn record_run(&self, _summary: &RunSummary) {}
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl MetricsSink for NoopSink {}

/// Emits samples as structured `tracing` events
#[derive(Debug, Clone, Default)]
pub struct TracingSink {
    project: String,
}

impl TracingSink {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
        }
    }
}

impl MetricsSink for TracingSink {
    fn record_call(&self, sample: &CallSample) {
        tracing::info!(
            project = %self.project,
            stage = sample.stage.as_str(),
            attempt = sample.attempt,
            latency_ms = sample.latency_ms,
            prompt_tokens = sample.token_usage.prompt,
            completion_tokens = sample.token_usage.completion,
            outcome = sample.outcome.as_str(),
            "llm_call"
        );
    }

    fn record_evaluation(&self, record: &EvaluationRecord) {
        tracing::info!(
            project = %self.project,
            case_id = %record.case_id,
            score = record.score,
            latency_ms = record.latency_ms,
            total_tokens = record.token_usage.total(),
            predicted = %record.predicted_filter,
            ground_truth = %record.ground_truth_filter,
            "evaluation_record"
        );
    }

    fn record_run(&self, summary: &RunSummary) {
        tracing::info!(
            project = %self.project,
            cases = summary.cases,
            mean_score = summary.mean_score,
            exact_matches = summary.exact_matches,
            total_tokens = summary.total_tokens,
            mean_latency_ms = summary.mean_latency_ms,
            "evaluation_run"
        );
    }
}
