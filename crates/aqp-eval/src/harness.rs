//! Batch evaluation of the translation pipeline against ground truth

use aqp_ir::{EvaluationRecord, RunSummary, TokenUsage};
use aqp_pipeline::{CompletionService, MetricsSink, NoopSink, Stage, TranslationPipeline};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::cases::EvalCase;
use crate::scoring::Scorer;

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
pub const DEFAULT_PROJECT: &str = "aqp";

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRun {
    pub run_id: Uuid,
    pub project: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One per case, in input order
    pub records: Vec<EvaluationRecord>,
    pub summary: RunSummary,
}

pub struct EvaluationHarness<S> {
    pipeline: Arc<TranslationPipeline<S>>,
    scorer: Scorer,
    max_concurrency: usize,
    project: String,
    sink: Arc<dyn MetricsSink>,
}

impl<S> EvaluationHarness<S>
where
    S: CompletionService + 'static,
{
    pub fn new(pipeline: Arc<TranslationPipeline<S>>, scorer: Scorer) -> Self {
        Self {
            pipeline,
            scorer,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            project: DEFAULT_PROJECT.to_string(),
            sink: Arc::new(NoopSink),
        }
    }

    /// Zero is treated as one
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    pub async fn run(&self, cases: Vec<EvalCase>) -> EvaluationRun {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!(
            run_id = %run_id,
            project = %self.project,
            cases = cases.len(),
            max_concurrency = self.max_concurrency,
            "Starting evaluation run"
        );

        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        let mut slots: Vec<Option<EvaluationRecord>> = vec![None; cases.len()];

        for (index, case) in cases.iter().cloned().enumerate() {
            let permits = Arc::clone(&permits);
            let pipeline = Arc::clone(&self.pipeline);
            let scorer = self.scorer;
            tasks.spawn(async move {
                // the semaphore is never closed
                let _permit = permits.acquire_owned().await.ok();
                (index, evaluate_case(&pipeline, &scorer, case).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, record)) => slots[index] = Some(record),
                Err(err) => tracing::error!(error = %err, "Evaluation task failed"),
            }
        }

        let records: Vec<EvaluationRecord> = slots
            .into_iter()
            .zip(cases)
            .map(|(slot, case)| slot.unwrap_or_else(|| failed_record(case)))
            .collect();

        for record in &records {
            self.sink.record_evaluation(record);
        }
        let summary = RunSummary::from_records(&records);
        self.sink.record_run(&summary);

        tracing::info!(
            run_id = %run_id,
            cases = summary.cases,
            mean_score = summary.mean_score,
            exact_matches = summary.exact_matches,
            "Evaluation run finished"
        );

        EvaluationRun {
            run_id,
            project: self.project.clone(),
            started_at,
            finished_at: Utc::now(),
            records,
            summary,
        }
    }
}

/// Translate one case and score it.
///
/// A rejected request or a filter stage that produced nothing usable counts as
/// an unparsable prediction and scores 0.0.
pub async fn evaluate_case<S: CompletionService>(
    pipeline: &TranslationPipeline<S>,
    scorer: &Scorer,
    case: EvalCase,
) -> EvaluationRecord {
    let started = Instant::now();
    let outcome = pipeline.translate_text(&case.utterance).await;
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

    let (predicted_filter, score, token_usage) = match outcome {
        Ok(translation) => {
            let filter_failed = translation
                .degradations
                .iter()
                .any(|d| d.stage == Stage::FilterGeneration);
            if filter_failed {
                (String::new(), 0.0, translation.token_usage)
            } else {
                let score = scorer.score_against_text(&translation.result.filter, &case.ground_truth_filter);
                (translation.filter_expression(), score, translation.token_usage)
            }
        }
        Err(err) => {
            tracing::warn!(case_id = %case.id, error = %err, "Case could not be translated");
            (String::new(), 0.0, TokenUsage::default())
        }
    };

    tracing::debug!(case_id = %case.id, score, predicted = %predicted_filter, "Case scored");

    EvaluationRecord {
        case_id: case.id,
        utterance: case.utterance,
        ground_truth_filter: case.ground_truth_filter,
        predicted_filter,
        score,
        latency_ms,
        token_usage,
    }
}

fn failed_record(case: EvalCase) -> EvaluationRecord {
    EvaluationRecord {
        case_id: case.id,
        utterance: case.utterance,
        ground_truth_filter: case.ground_truth_filter,
        predicted_filter: String::new(),
        score: 0.0,
        latency_ms: 0.0,
        token_usage: TokenUsage::default(),
    }
}
