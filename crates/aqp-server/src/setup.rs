//! Wiring shared by the binaries

use anyhow::Context;
use aqp_eval::{FanoutSink, JsonlSink, PrometheusSink, TracingSink};
use aqp_exec::{ExecutionBudget, QueryExecutor, TableDataset};
use aqp_pipeline::{BoundedCompletion, MetricsSink, ModelConfig, OpenAiCompletion, TranslationPipeline};
use aqp_registry::SchemaRegistry;
use async_openai::{config::OpenAIConfig, Client};
use std::sync::Arc;

use crate::config::{Config, LlmConfig, MetricsConfig};

pub type LiveCompletion = BoundedCompletion<OpenAiCompletion>;
pub type LivePipeline = TranslationPipeline<LiveCompletion>;

/// Sinks selected by the metrics section. The Prometheus sink is also
/// returned on its own so callers can render it.
pub fn build_sink(config: &MetricsConfig) -> anyhow::Result<(Arc<dyn MetricsSink>, Option<Arc<PrometheusSink>>)> {
    let mut fanout = FanoutSink::new(vec![Arc::new(TracingSink::new(config.project.clone()))]);

    if let Some(path) = &config.jsonl_path {
        let sink = JsonlSink::create(path).with_context(|| format!("opening metrics file {}", path))?;
        fanout.push(Arc::new(sink));
    }

    let prometheus = if config.prometheus {
        let sink = Arc::new(PrometheusSink::new(&config.project).context("registering Prometheus metrics")?);
        fanout.push(sink.clone());
        Some(sink)
    } else {
        None
    };

    Ok((Arc::new(fanout), prometheus))
}

pub fn openai_client() -> anyhow::Result<Client<OpenAIConfig>> {
    let api_key = Config::openai_api_key()?;
    Ok(Client::with_config(OpenAIConfig::new().with_api_key(api_key)))
}

pub fn load_schema(config: &Config) -> anyhow::Result<SchemaRegistry> {
    SchemaRegistry::load(&config.schema.path).with_context(|| format!("loading schema from {}", config.schema.path))
}

pub fn load_dataset(config: &Config) -> anyhow::Result<TableDataset> {
    TableDataset::load_json(&config.dataset.path)
        .with_context(|| format!("loading dataset from {}", config.dataset.path))
}

pub fn executor(config: &Config) -> QueryExecutor {
    match config.dataset.max_rows {
        Some(max_rows) => QueryExecutor::with_budget(ExecutionBudget::max_rows(max_rows)),
        None => QueryExecutor::new(),
    }
}

pub fn pipeline(
    client: Client<OpenAIConfig>,
    registry: &SchemaRegistry,
    llm: &LlmConfig,
    sink: Arc<dyn MetricsSink>,
) -> LivePipeline {
    let service = BoundedCompletion::new(OpenAiCompletion::new(client), llm.max_concurrency);
    TranslationPipeline::new(service, Arc::clone(registry.schema()))
        .with_model(ModelConfig::new(llm.model.clone(), llm.temperature))
        .with_max_retries(llm.max_retries)
        .with_sink(sink)
}
