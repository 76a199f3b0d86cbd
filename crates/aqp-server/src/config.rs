//! Configuration for the AQP server and evaluator
//!
//! Loads configuration from:
//! 1. config.yaml - operational settings (port, model, data paths, logging)
//! 2. .env file - secrets (API keys)
//!
//! Environment variables always override config.yaml values.

use aqp_eval::{ScoringConfig, ScoringMode, DEFAULT_NUMERIC_TOLERANCE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Language-model settings shared by every stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub temperature: f32,
    pub max_retries: u32,
    /// Upper bound on concurrent completion calls
    pub max_concurrency: usize,
    pub transcription_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: aqp_pipeline::llm::DEFAULT_MODEL.to_string(),
            temperature: 0.0,
            max_retries: aqp_pipeline::DEFAULT_MAX_RETRIES,
            max_concurrency: 4,
            transcription_model: aqp_pipeline::transcribe::DEFAULT_TRANSCRIPTION_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub path: String,
    /// Rows returned per query; unlimited when absent
    pub max_rows: Option<usize>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: "data/runs.json".to_string(),
            max_rows: Some(10_000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub path: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            path: "data/columns.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub project: String,
    /// Append records and call samples to this file
    pub jsonl_path: Option<String>,
    pub prometheus: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            project: aqp_eval::DEFAULT_PROJECT.to_string(),
            jsonl_path: None,
            prometheus: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub scoring: ScoringMode,
    pub numeric_tolerance: f64,
    pub max_concurrency: usize,
    pub cases_path: String,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringMode::Strict,
            numeric_tolerance: DEFAULT_NUMERIC_TOLERANCE,
            max_concurrency: aqp_eval::DEFAULT_MAX_CONCURRENCY,
            cases_path: "data/eval_cases.json".to_string(),
        }
    }
}

impl EvaluationConfig {
    pub fn scoring_config(&self) -> ScoringConfig {
        ScoringConfig {
            mode: self.scoring,
            numeric_tolerance: self.numeric_tolerance,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or module-specific
    pub level: String,

    /// Output format: pretty, json, compact
    pub format: String,

    /// Output destination: stdout, file, both
    pub output: String,

    /// Directory for log files
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            output: "stdout".to_string(),
            directory: "./logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub dataset: DatasetConfig,
    pub schema: SchemaConfig,
    pub metrics: MetricsConfig,
    pub evaluation: EvaluationConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from YAML file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&contents)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        // an empty document deserializes to unit, not a map
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("AQP_SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("AQP_SERVER_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }

        if let Some(model) = lookup("AQP_MODEL") {
            self.llm.model = model;
        }
        if let Some(path) = lookup("AQP_DATASET") {
            self.dataset.path = path;
        }
        if let Some(path) = lookup("AQP_SCHEMA") {
            self.schema.path = path;
        }
        if let Some(project) = lookup("AQP_PROJECT") {
            self.metrics.project = project;
        }

        if let Some(level) = lookup("RUST_LOG") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(output) = lookup("LOG_OUTPUT") {
            self.logging.output = output;
        }
        if let Some(dir) = lookup("LOG_DIR") {
            self.logging.directory = dir;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::Invalid(format!(
                "llm.temperature must be between 0 and 2, got {}",
                self.llm.temperature
            )));
        }
        if self.llm.max_concurrency == 0 {
            return Err(ConfigError::Invalid("llm.max_concurrency must be at least 1".to_string()));
        }
        if self.evaluation.numeric_tolerance < 0.0 {
            return Err(ConfigError::Invalid("evaluation.numeric_tolerance must not be negative".to_string()));
        }
        Ok(())
    }

    /// Get OpenAI API key from environment (must be in .env)
    pub fn openai_api_key() -> Result<String, ConfigError> {
        std::env::var("OPENAI_API_KEY").map_err(|_| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))
    }
}
