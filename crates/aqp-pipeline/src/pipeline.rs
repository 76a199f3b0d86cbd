//! Three-stage translation of an utterance into a structured query
//!
//! column selection -> filter generation -> sort extraction. Each stage renders
//! its prompt, calls the completion service, parses strictly and validates the
//! result against the schema. A stage that still fails after its retries is
//! degraded instead of aborting the run, so a translation is always produced.

use aqp_ir::{
    FilterExpr, PlanValidationError, QueryPlan, RequestError, Schema, TokenUsage, TranslationRequest,
    TranslationResult,
};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::llm::{CompletionService, ModelConfig};
use crate::metrics::{CallOutcome, CallSample, MetricsSink, NoopSink};
use crate::parse::{self, ParseFailure};
use crate::prompt::{MissingVariableError, PromptEngine};
use crate::stages::{self, FailureKind, Stage, TranslationStageError};
use crate::state::{PipelineState, StageOutcome};

pub const DEFAULT_MAX_RETRIES: u32 = 1;

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error(transparent)]
    EmptyUtterance(#[from] RequestError),

    #[error("Translation was cancelled")]
    Cancelled,

    #[error("Prompt template error: {0}")]
    Template(#[from] MissingVariableError),
}

impl TranslationError {
    pub fn user_message(&self) -> String {
        match self {
            TranslationError::EmptyUtterance(err) => err.to_string(),
            TranslationError::Cancelled => "The request was cancelled before a query was formed.".to_string(),
            TranslationError::Template(_) => "The query could not be translated because of an internal error.".to_string(),
        }
    }
}

/// Output of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Translation {
    pub result: TranslationResult,
    /// Summed over every call, retries included
    pub token_usage: TokenUsage,
    pub latency_ms: f64,
    pub state: PipelineState,
    pub degradations: Vec<TranslationStageError>,
    pub calls: Vec<CallSample>,
}

impl Translation {
    pub fn is_degraded(&self) -> bool {
        self.state == PipelineState::FailedDegraded
    }

    pub fn filter_expression(&self) -> String {
        self.result.filter_expression()
    }
}

/// Mutable bookkeeping local to one run
struct Run {
    state: PipelineState,
    usage: TokenUsage,
    calls: Vec<CallSample>,
    degradations: Vec<TranslationStageError>,
}

impl Run {
    fn new() -> Self {
        Self {
            state: PipelineState::Pending,
            usage: TokenUsage::default(),
            calls: Vec::new(),
            degradations: Vec::new(),
        }
    }

    fn produced(&mut self) {
        self.state = self.state.advance(StageOutcome::Produced);
    }

    fn degrade(&mut self, error: TranslationStageError) {
        tracing::warn!(
            stage = error.stage.as_str(),
            attempts = error.attempts,
            cause = %error.cause,
            "Stage degraded"
        );
        self.degradations.push(error);
        self.state = self.state.advance(StageOutcome::Degraded);
    }
}

pub struct TranslationPipeline<S> {
    service: S,
    schema: Arc<Schema>,
    model: ModelConfig,
    max_retries: u32,
    sink: Arc<dyn MetricsSink>,
}

impl<S: CompletionService> TranslationPipeline<S> {
    pub fn new(service: S, schema: Arc<Schema>) -> Self {
        Self {
            service,
            schema,
            model: ModelConfig::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            sink: Arc::new(NoopSink),
        }
    }

    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    pub fn sink(&self) -> &Arc<dyn MetricsSink> {
        &self.sink
    }

    /// Translate raw utterance text, rejecting empty input before any call
    pub async fn translate_text(&self, utterance: &str) -> Result<Translation, TranslationError> {
        let request = TranslationRequest::new(utterance)?;
        self.translate(&request).await
    }

    /// Race a translation against `cancel`. If `cancel` resolves first, the
    /// in-flight calls and all partial state are dropped.
    pub async fn translate_until<C>(&self, request: &TranslationRequest, cancel: C) -> Result<Translation, TranslationError>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => {
                tracing::info!(utterance = %request.utterance(), "Translation cancelled");
                Err(TranslationError::Cancelled)
            }
            result = self.translate(request) => result,
        }
    }

    pub async fn translate(&self, request: &TranslationRequest) -> Result<Translation, TranslationError> {
        let started = Instant::now();
        let query = request.utterance();
        let mut run = Run::new();

        tracing::info!(utterance = %query, model = %self.model.model_name, "Translating question");

        let mut selected = self.select_columns(query, &mut run).await?;
        let filter = self.generate_filter(query, &mut selected, &mut run).await?;
        let sort = self.extract_sort(query, &selected, &filter, &mut run).await?;

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let result = TranslationResult {
            selected_columns: selected,
            filter,
            sort,
        };

        tracing::info!(
            filter = %result.filter_expression(),
            columns = result.selected_columns.len(),
            sort = ?result.sort,
            degraded = run.state == PipelineState::FailedDegraded,
            total_tokens = run.usage.total(),
            latency_ms,
            "Translation finished"
        );

        Ok(Translation {
            result,
            token_usage: run.usage,
            latency_ms,
            state: run.state,
            degradations: run.degradations,
            calls: run.calls,
        })
    }

    /// Validate a translation into an executable plan
    pub fn plan(&self, translation: &Translation) -> Result<QueryPlan, PlanValidationError> {
        QueryPlan::new(&translation.result, &self.schema)
    }

    async fn select_columns(&self, query: &str, run: &mut Run) -> Result<BTreeSet<String>, TranslationError> {
        let stage = Stage::ColumnSelection;
        let prompt = self.render(
            stage,
            &[
                ("columns_with_description", aqp_registry::describe(&self.schema, None)),
                ("query", query.to_string()),
            ],
        )?;

        let full_schema = || self.schema.names().map(str::to_string).collect::<BTreeSet<_>>();

        match self.call_stage(stage, &prompt, parse::parse_columns, run).await {
            Ok((selection, attempts)) => {
                let (kept, dropped) = stages::validate_columns(&selection, &self.schema);
                for column in &dropped {
                    tracing::warn!(column = %column, "Dropping selected column absent from the schema");
                }
                if kept.is_empty() {
                    run.degrade(TranslationStageError {
                        stage,
                        attempts,
                        kind: FailureKind::NoUsableOutput,
                        cause: "no selected column is part of the schema".to_string(),
                    });
                    return Ok(full_schema());
                }
                tracing::info!(columns = ?kept, "Columns selected");
                run.produced();
                Ok(kept)
            }
            Err(error) => {
                run.degrade(error);
                Ok(full_schema())
            }
        }
    }

    async fn generate_filter(
        &self,
        query: &str,
        selected: &mut BTreeSet<String>,
        run: &mut Run,
    ) -> Result<FilterExpr, TranslationError> {
        let stage = Stage::FilterGeneration;
        let prompt = self.render(
            stage,
            &[
                ("columns_with_description", aqp_registry::describe(&self.schema, Some(&*selected))),
                ("query", query.to_string()),
                ("columns", self.column_list(selected)),
            ],
        )?;

        match self.call_stage(stage, &prompt, parse::parse_filter, run).await {
            Ok((filter, _)) => {
                let (kept, dropped) = stages::validate_filter(filter, &self.schema);
                for (comparison, reason) in &dropped {
                    tracing::warn!(comparison = %comparison, reason = %reason, "Dropping comparison");
                }
                for column in kept.columns() {
                    if selected.insert(column.clone()) {
                        tracing::debug!(column = %column, "Filter column added to selection");
                    }
                }
                tracing::info!(filter = %kept, "Filter generated");
                run.produced();
                Ok(kept)
            }
            Err(error) => {
                run.degrade(error);
                Ok(FilterExpr::empty())
            }
        }
    }

    async fn extract_sort(
        &self,
        query: &str,
        selected: &BTreeSet<String>,
        filter: &FilterExpr,
        run: &mut Run,
    ) -> Result<Option<aqp_ir::SortSpec>, TranslationError> {
        let stage = Stage::SortExtraction;
        let filter_text = if filter.is_empty() {
            "(none)".to_string()
        } else {
            filter.to_string()
        };
        let prompt = self.render(
            stage,
            &[
                ("columns_with_description", aqp_registry::describe(&self.schema, Some(selected))),
                ("query", query.to_string()),
                ("columns", self.column_list(selected)),
                ("filter", filter_text),
            ],
        )?;

        match self.call_stage(stage, &prompt, parse::parse_sort, run).await {
            Ok((sort, _)) => {
                run.produced();
                match stages::validate_sort(sort, &self.schema) {
                    Ok(sort) => Ok(sort),
                    Err(invalid) => {
                        tracing::warn!(column = %invalid.column, "Dropping sort on column absent from the schema");
                        Ok(None)
                    }
                }
            }
            Err(error) => {
                run.degrade(error);
                Ok(None)
            }
        }
    }

    fn render(&self, stage: Stage, variables: &[(&str, String)]) -> Result<String, MissingVariableError> {
        let variables: HashMap<String, String> =
            variables.iter().map(|(name, value)| (name.to_string(), value.clone())).collect();
        PromptEngine::render(stage.template(), &variables)
    }

    /// Selected names in schema order, as a JSON list
    fn column_list(&self, selected: &BTreeSet<String>) -> String {
        let ordered: Vec<&str> = self.schema.names().filter(|name| selected.contains(*name)).collect();
        serde_json::to_string(&ordered).unwrap_or_default()
    }

    /// Call the service until the completion parses or the retries run out.
    /// Returns the parsed value with the attempt that produced it.
    async fn call_stage<T>(
        &self,
        stage: Stage,
        prompt: &str,
        parse: fn(&str) -> Result<T, ParseFailure>,
        run: &mut Run,
    ) -> Result<(T, u32), TranslationStageError> {
        let attempts = self.max_retries + 1;
        let mut current = prompt.to_string();
        let mut last = (FailureKind::Transport, String::new());

        for attempt in 1..=attempts {
            tracing::debug!(stage = stage.as_str(), attempt, prompt = %current, "Calling completion service");
            let started = Instant::now();

            let (outcome, parsed) = match self.service.complete(&current, &self.model).await {
                Ok(completion) => {
                    run.usage += completion.token_usage;
                    let sample = |outcome| CallSample {
                        stage,
                        attempt,
                        latency_ms: completion.latency_ms,
                        token_usage: completion.token_usage,
                        outcome,
                    };
                    match parse(&completion.text) {
                        Ok(value) => (sample(CallOutcome::Success), Some(value)),
                        Err(failure) => {
                            tracing::warn!(
                                stage = stage.as_str(),
                                attempt,
                                error = %failure,
                                completion = %completion.text,
                                "Failed to parse completion"
                            );
                            last = (FailureKind::Parse, failure.to_string());
                            (sample(CallOutcome::ParseError), None)
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(stage = stage.as_str(), attempt, error = %err, "Completion call failed");
                    last = (FailureKind::Transport, err.to_string());
                    let sample = CallSample {
                        stage,
                        attempt,
                        latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                        token_usage: TokenUsage::default(),
                        outcome: CallOutcome::TransportError,
                    };
                    (sample, None)
                }
            };

            self.sink.record_call(&outcome);
            run.calls.push(outcome);

            if let Some(value) = parsed {
                return Ok((value, attempt));
            }
            if attempt < attempts {
                current = with_feedback(prompt, &last.1);
            }
        }

        Err(TranslationStageError {
            stage,
            attempts,
            kind: last.0,
            cause: last.1,
        })
    }
}

fn with_feedback(prompt: &str, cause: &str) -> String {
    format!(
        "{}\nYour previous response could not be used: {}. Respond again with JSON only, in the format shown above.\n",
        prompt, cause
    )
}
