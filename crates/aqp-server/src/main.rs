//! AQP MCP server
//!
//! Answers natural language (and spoken) questions about a tabular dataset
//! over the Model Context Protocol.

use anyhow::Context;
use aqp_pipeline::OpenAiTranscriber;
use aqp_server::{logging, setup, AqpServerHandler, Config, QueryService};
use rust_mcp_sdk::mcp_server::{hyper_server, HyperServerOptions};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Secrets live in .env
    dotenvy::dotenv().ok();

    let config_path = std::env::var("AQP_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load_or_default(&config_path).with_context(|| format!("loading {}", config_path))?;
    logging::init(&config.logging, "aqp-server.log");

    let registry = setup::load_schema(&config)?;
    let dataset = setup::load_dataset(&config)?;
    let (sink, _) = setup::build_sink(&config.metrics)?;
    let client = setup::openai_client()?;

    info!(
        model = %config.llm.model,
        columns = registry.schema().len(),
        max_concurrency = config.llm.max_concurrency,
        "Translation pipeline ready"
    );

    let transcriber = OpenAiTranscriber::new(client.clone()).with_model(config.llm.transcription_model.clone());
    let pipeline = setup::pipeline(client, &registry, &config.llm, sink);
    let service = QueryService::new(Arc::new(pipeline), Arc::new(dataset), setup::executor(&config))
        .with_transcriber(Arc::new(transcriber));

    let handler = AqpServerHandler::new(Arc::new(service));
    let server_info = AqpServerHandler::<setup::LiveCompletion>::server_info();

    info!(host = %config.server.host, port = config.server.port, "Starting AQP MCP server");

    let server = hyper_server::create_server(
        server_info,
        handler,
        HyperServerOptions {
            host: config.server.host.clone(),
            port: config.server.port,
            sse_support: true,
            ..Default::default()
        },
    );

    server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server stopped: {}", e))?;

    Ok(())
}
