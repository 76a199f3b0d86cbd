//! AQP translation pipeline
//!
//! Turns a natural-language question into a [`aqp_ir::TranslationResult`] with
//! three language-model backed stages, and provides the speech-to-text front
//! end and the per-call metrics hooks used by the server and the evaluator.

pub mod llm;
pub mod metrics;
pub mod parse;
pub mod pipeline;
pub mod prompt;
pub mod stages;
pub mod state;
pub mod transcribe;

pub use llm::{BoundedCompletion, Completion, CompletionError, CompletionService, ModelConfig, OpenAiCompletion};
pub use metrics::{CallOutcome, CallSample, MetricsSink, NoopSink, TracingSink};
pub use parse::{ColumnSelection, ParseFailure};
pub use pipeline::{Translation, TranslationError, TranslationPipeline, DEFAULT_MAX_RETRIES};
pub use prompt::{MissingVariableError, PromptEngine, TemplateId};
pub use stages::{FailureKind, Stage, TranslationStageError};
pub use state::{PipelineState, StageOutcome};
pub use transcribe::{OpenAiTranscriber, Transcriber, TranscriptionError};
