//! End-to-end question answering: transcript or utterance to result rows

use aqp_exec::{Dataset, ExecutionError, QueryExecutor, QueryResult};
use aqp_ir::{PlanValidationError, QueryPlan, RequestError, TranslationRequest};
use aqp_pipeline::{
    CompletionService, Transcriber, Translation, TranslationError, TranslationPipeline, TranscriptionError,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error(transparent)]
    Plan(#[from] PlanValidationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    #[error("Audio queries are not enabled")]
    AudioDisabled,
}

impl QueryError {
    /// Message safe to show to the person who asked
    pub fn user_message(&self) -> String {
        match self {
            QueryError::Request(err) => err.to_string(),
            QueryError::Translation(err) => err.user_message(),
            QueryError::Plan(err) => err.user_message(),
            QueryError::Execution(err) => err.user_message(),
            QueryError::Transcription(err) => err.user_message().to_string(),
            QueryError::AudioDisabled => "Audio queries are not enabled on this server.".to_string(),
        }
    }
}

/// Everything produced while answering one question
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub utterance: String,
    pub translation: Translation,
    pub plan: QueryPlan,
    pub result: QueryResult,
}

impl QueryResponse {
    /// One user-facing note per degraded stage, in stage order
    pub fn warnings(&self) -> Vec<&'static str> {
        self.translation
            .degradations
            .iter()
            .map(|degradation| degradation.user_message())
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let result = &self.translation.result;
        json!({
            "utterance": self.utterance,
            "filter_expression": result.filter_expression(),
            "filter_document": result.filter.to_expr_document(),
            "selected_columns": self.plan.selected_columns(),
            "sort": result.sort,
            "state": self.translation.state,
            "degradations": self.translation.degradations,
            "warnings": self.warnings(),
            "token_usage": self.translation.token_usage,
            "latency_ms": self.translation.latency_ms,
            "fingerprint": self.plan.fingerprint(),
            "results": self.result.to_json(),
        })
    }
}

pub struct QueryService<S> {
    pipeline: Arc<TranslationPipeline<S>>,
    dataset: Arc<dyn Dataset>,
    executor: QueryExecutor,
    transcriber: Option<Arc<dyn Transcriber>>,
}

impl<S: CompletionService> QueryService<S> {
    pub fn new(pipeline: Arc<TranslationPipeline<S>>, dataset: Arc<dyn Dataset>, executor: QueryExecutor) -> Self {
        Self {
            pipeline,
            dataset,
            executor,
            transcriber: None,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn pipeline(&self) -> &Arc<TranslationPipeline<S>> {
        &self.pipeline
    }

    /// Schema description as given to the column selector
    pub fn describe_schema(&self) -> String {
        aqp_registry::describe(self.pipeline.schema(), None)
    }

    pub async fn answer(&self, utterance: &str) -> Result<QueryResponse, QueryError> {
        let request = TranslationRequest::new(utterance)?;
        self.answer_request(request).await
    }

    pub async fn answer_audio(&self, audio: &[u8], sample_rate: u32) -> Result<QueryResponse, QueryError> {
        let transcriber = self.transcriber.as_ref().ok_or(QueryError::AudioDisabled)?;
        let transcript = transcriber.transcribe(audio, sample_rate).await?;
        tracing::info!(transcript = %transcript, "Audio transcribed");
        let request = TranslationRequest::from_transcript(&transcript)?;
        self.answer_request(request).await
    }

    async fn answer_request(&self, request: TranslationRequest) -> Result<QueryResponse, QueryError> {
        let translation = self.pipeline.translate(&request).await?;
        for degradation in &translation.degradations {
            tracing::warn!(
                stage = %degradation.stage,
                cause = %degradation.cause,
                "Answering with a degraded translation"
            );
        }

        let plan = self.pipeline.plan(&translation)?;
        let result = self.executor.execute(&plan, self.dataset.as_ref())?;

        crate::log_event!(
            level: tracing::Level::INFO,
            event: "query_answered",
            fingerprint: plan.fingerprint(),
            rows: result.row_count,
            degraded: translation.is_degraded()
        );

        Ok(QueryResponse {
            utterance: request.utterance().to_string(),
            translation,
            plan,
            result,
        })
    }
}
