//! MCP (Model Context Protocol) server implementation

use aqp_pipeline::CompletionService;
use async_trait::async_trait;
use rust_mcp_schema::{
    schema_utils::CallToolError, CallToolRequest, CallToolResult, ContentBlock, Implementation, InitializeResult,
    ListToolsRequest, ListToolsResult, RpcError, ServerCapabilities, ServerCapabilitiesTools, TextContent, Tool,
    ToolInputSchema, LATEST_PROTOCOL_VERSION,
};
use rust_mcp_sdk::{mcp_server::ServerHandler, McpServer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::query::{QueryError, QueryService};

pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

pub struct AqpServerHandler<S> {
    service: Arc<QueryService<S>>,
}

impl<S: CompletionService + 'static> AqpServerHandler<S> {
    pub fn new(service: Arc<QueryService<S>>) -> Self {
        Self { service }
    }

    pub fn server_info() -> InitializeResult {
        InitializeResult {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ServerCapabilitiesTools { list_changed: None }),
                ..Default::default()
            },
            server_info: Implementation {
                name: "aqp-server".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: Some("Audio Query Processor".to_string()),
            },
            instructions: Some(
                "Ask questions about the loaded dataset in plain language. \
                 Use 'query' for text, 'query_audio' for a recorded WAV or PCM file \
                 and 'schema' to see which columns can be asked about."
                    .to_string(),
            ),
            meta: None,
        }
    }

    pub fn tools() -> Vec<Tool> {
        vec![
            Tool {
                name: "query".to_string(),
                description: Some(
                    "Answer a natural language question about the dataset. \
                     Returns the generated filter, sort and selected columns, and the matching rows."
                        .to_string(),
                ),
                input_schema: ToolInputSchema::new(
                    vec!["utterance".to_string()],
                    Some(properties(&[(
                        "utterance",
                        "string",
                        "Question about the dataset (e.g., 'models with latency under 100ms')",
                    )])),
                ),
                title: None,
                annotations: None,
                meta: None,
                output_schema: None,
            },
            Tool {
                name: "query_audio".to_string(),
                description: Some(
                    "Transcribe a spoken question and answer it like 'query'. \
                     Accepts a WAV file or raw 16-bit mono PCM."
                        .to_string(),
                ),
                input_schema: ToolInputSchema::new(
                    vec!["path".to_string()],
                    Some(properties(&[
                        ("path", "string", "Path to the audio file on the server"),
                        ("sample_rate", "integer", "Sample rate of raw PCM input (defaults to 16000)"),
                    ])),
                ),
                title: None,
                annotations: None,
                meta: None,
                output_schema: None,
            },
            Tool {
                name: "schema".to_string(),
                description: Some("Describe the columns that questions can refer to.".to_string()),
                input_schema: ToolInputSchema::new(vec![], Some(HashMap::new())),
                title: None,
                annotations: None,
                meta: None,
                output_schema: None,
            },
        ]
    }

    /// Dispatch a tool call by name
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> std::result::Result<CallToolResult, CallToolError> {
        crate::log_event!(level: tracing::Level::INFO, event: "tool_called", tool: name);
        match name {
            "query" => self.handle_query_tool(arguments).await,
            "query_audio" => self.handle_audio_tool(arguments).await,
            "schema" => Ok(text_result(self.service.describe_schema())),
            _ => Err(CallToolError::unknown_tool(name.to_string())),
        }
    }

    async fn handle_query_tool(
        &self,
        arguments: Option<Map<String, Value>>,
    ) -> std::result::Result<CallToolResult, CallToolError> {
        let args = arguments.ok_or_else(|| CallToolError::from_message("Missing arguments"))?;
        let utterance = args
            .get("utterance")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CallToolError::from_message("Missing required argument: utterance"))?;

        info!(utterance = %utterance, "Answering question");
        let response = self.service.answer(utterance).await.map_err(tool_error)?;
        Ok(text_result(serde_json::to_string_pretty(&response.to_json()).unwrap_or_default()))
    }

    async fn handle_audio_tool(
        &self,
        arguments: Option<Map<String, Value>>,
    ) -> std::result::Result<CallToolResult, CallToolError> {
        let args = arguments.ok_or_else(|| CallToolError::from_message("Missing arguments"))?;
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CallToolError::from_message("Missing required argument: path"))?;
        let sample_rate = match args.get("sample_rate") {
            None | Some(Value::Null) => DEFAULT_SAMPLE_RATE,
            Some(value) => value
                .as_u64()
                .and_then(|rate| u32::try_from(rate).ok())
                .ok_or_else(|| CallToolError::from_message("sample_rate must be a positive integer"))?,
        };

        let audio = tokio::fs::read(path).await.map_err(|e| {
            error!(path = %path, error = %e, "Failed to read audio file");
            CallToolError::from_message(format!("Could not read audio file {}: {}", path, e))
        })?;

        info!(path = %path, bytes = audio.len(), sample_rate, "Answering spoken question");
        let response = self
            .service
            .answer_audio(&audio, sample_rate)
            .await
            .map_err(tool_error)?;
        Ok(text_result(serde_json::to_string_pretty(&response.to_json()).unwrap_or_default()))
    }
}

#[async_trait]
impl<S: CompletionService + 'static> ServerHandler for AqpServerHandler<S> {
    async fn handle_list_tools_request(
        &self,
        _request: ListToolsRequest,
        _runtime: Arc<dyn McpServer>,
    ) -> std::result::Result<ListToolsResult, RpcError> {
        info!("Listing available tools");

        Ok(ListToolsResult {
            tools: Self::tools(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn handle_call_tool_request(
        &self,
        request: CallToolRequest,
        _runtime: Arc<dyn McpServer>,
    ) -> std::result::Result<CallToolResult, CallToolError> {
        self.call_tool(&request.params.name, request.params.arguments).await
    }
}

fn properties(fields: &[(&str, &str, &str)]) -> HashMap<String, Map<String, Value>> {
    fields
        .iter()
        .map(|(name, kind, description)| {
            let mut prop = Map::new();
            prop.insert("type".to_string(), Value::String(kind.to_string()));
            prop.insert("description".to_string(), Value::String(description.to_string()));
            (name.to_string(), prop)
        })
        .collect()
}

fn text_result(text: String) -> CallToolResult {
    CallToolResult {
        content: vec![ContentBlock::TextContent(TextContent::new(text, None, None))],
        is_error: None,
        meta: None,
        structured_content: None,
    }
}

fn tool_error(err: QueryError) -> CallToolError {
    error!(error = %err, "Query failed");
    CallToolError::from_message(err.user_message())
}
