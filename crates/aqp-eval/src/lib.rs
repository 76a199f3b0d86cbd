//! AQP evaluation harness
//!
//! Runs the translation pipeline over cases with known ground-truth filters,
//! scores each prediction and reports records and run summaries to metrics
//! sinks.

pub mod cases;
pub mod harness;
pub mod scoring;
pub mod sinks;

pub use cases::{cases_from_json, load_cases, CaseLoadError, EvalCase};
pub use harness::{evaluate_case, EvaluationHarness, EvaluationRun, DEFAULT_MAX_CONCURRENCY, DEFAULT_PROJECT};
pub use scoring::{Scorer, ScoringConfig, ScoringMode, DEFAULT_NUMERIC_TOLERANCE};
pub use sinks::{FanoutSink, JsonlSink, PrometheusSink, TracingSink};
