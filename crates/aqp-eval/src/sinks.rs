//! Metrics sinks for evaluation runs
//!
//! All sinks swallow their own failures after logging them.

use aqp_ir::{EvaluationRecord, RunSummary};
use aqp_pipeline::{CallSample, MetricsSink};
use prometheus::{Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub use aqp_pipeline::TracingSink;

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Entry<'a> {
    Call(&'a CallSample),
    Evaluation(&'a EvaluationRecord),
    Run(&'a RunSummary),
}

/// Appends one JSON object per line to a file
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlSink {
    pub fn create<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::info!(path = %path.display(), "Writing evaluation metrics");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, entry: Entry<'_>) {
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to serialize metrics entry");
                return;
            }
        };
        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = writeln!(file, "{}", line) {
            tracing::warn!(path = %self.path.display(), error = %err, "Failed to write metrics entry");
        }
    }
}

impl MetricsSink for JsonlSink {
    fn record_call(&self, sample: &CallSample) {
        self.append(Entry::Call(sample));
    }

    fn record_evaluation(&self, record: &EvaluationRecord) {
        self.append(Entry::Evaluation(record));
    }

    fn record_run(&self, summary: &RunSummary) {
        self.append(Entry::Run(summary));
        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = file.flush() {
            tracing::warn!(path = %self.path.display(), error = %err, "Failed to flush metrics file");
        }
    }
}

const LATENCY_BUCKETS_MS: &[f64] = &[50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0];

/// Prometheus metrics for completion calls and evaluation runs
pub struct PrometheusSink {
    registry: Registry,
    call_latency: HistogramVec,
    tokens: IntCounterVec,
    calls: IntCounterVec,
    case_scores: Histogram,
    last_run_accuracy: Gauge,
}

impl PrometheusSink {
    pub fn new(project: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("aqp".to_string()), None)?;

        let call_latency = HistogramVec::new(
            HistogramOpts::new("llm_call_latency_ms", "Completion call latency in milliseconds")
                .const_label("project", project)
                .buckets(LATENCY_BUCKETS_MS.to_vec()),
            &["stage", "outcome"],
        )?;
        let tokens = IntCounterVec::new(
            Opts::new("llm_tokens_total", "Tokens consumed by completion calls").const_label("project", project),
            &["stage", "kind"],
        )?;
        let calls = IntCounterVec::new(
            Opts::new("llm_calls_total", "Completion calls by outcome").const_label("project", project),
            &["stage", "outcome"],
        )?;
        let case_scores = Histogram::with_opts(
            HistogramOpts::new("evaluation_case_score", "Score of each evaluation case")
                .const_label("project", project)
                .buckets(vec![0.0, 0.25, 0.5, 0.75, 1.0]),
        )?;
        let last_run_accuracy = Gauge::with_opts(
            Opts::new("evaluation_last_run_accuracy", "Mean score of the most recent run")
                .const_label("project", project),
        )?;

        registry.register(Box::new(call_latency.clone()))?;
        registry.register(Box::new(tokens.clone()))?;
        registry.register(Box::new(calls.clone()))?;
        registry.register(Box::new(case_scores.clone()))?;
        registry.register(Box::new(last_run_accuracy.clone()))?;

        Ok(Self {
            registry,
            call_latency,
            tokens,
            calls,
            case_scores,
            last_run_accuracy,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current metrics in the Prometheus text exposition format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(err) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %err, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl MetricsSink for PrometheusSink {
    fn record_call(&self, sample: &CallSample) {
        let stage = sample.stage.as_str();
        let outcome = sample.outcome.as_str();
        self.call_latency
            .with_label_values(&[stage, outcome])
            .observe(sample.latency_ms);
        self.calls.with_label_values(&[stage, outcome]).inc();
        self.tokens
            .with_label_values(&[stage, "prompt"])
            .inc_by(sample.token_usage.prompt as u64);
        self.tokens
            .with_label_values(&[stage, "completion"])
            .inc_by(sample.token_usage.completion as u64);
    }

    fn record_evaluation(&self, record: &EvaluationRecord) {
        self.case_scores.observe(record.score);
    }

    fn record_run(&self, summary: &RunSummary) {
        self.last_run_accuracy.set(summary.mean_score);
    }
}

/// Forwards to every inner sink in order
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn MetricsSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn MetricsSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl MetricsSink for FanoutSink {
    fn record_call(&self, sample: &CallSample) {
        for sink in &self.sinks {
            sink.record_call(sample);
        }
    }

    fn record_evaluation(&self, record: &EvaluationRecord) {
        for sink in &self.sinks {
            sink.record_evaluation(record);
        }
    }

    fn record_run(&self, summary: &RunSummary) {
        for sink in &self.sinks {
            sink.record_run(summary);
        }
    }
}
