//! Language-model completion service

use aqp_ir::TokenUsage;
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
        ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Semaphore;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_name: String,
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL.to_string(),
            temperature: 0.0,
        }
    }
}

impl ModelConfig {
    pub fn new(model_name: impl Into<String>, temperature: f32) -> Self {
        Self {
            model_name: model_name.into(),
            temperature,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub token_usage: TokenUsage,
    pub latency_ms: f64,
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("OpenAI request failed: {0}")]
    OpenAi(#[from] async_openai::error::OpenAIError),

    #[error("Completion service returned no content")]
    EmptyResponse,

    #[error("Completion service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str, config: &ModelConfig) -> Result<Completion, CompletionError>;
}

#[async_trait]
impl<S: CompletionService + ?Sized> CompletionService for Arc<S> {
    async fn complete(&self, prompt: &str, config: &ModelConfig) -> Result<Completion, CompletionError> {
        (**self).complete(prompt, config).await
    }
}

/// Chat-completion backed service using JSON response mode
#[derive(Clone)]
pub struct OpenAiCompletion {
    client: Client<OpenAIConfig>,
}

impl OpenAiCompletion {
    pub fn new(client: Client<OpenAIConfig>) -> Self {
        Self { client }
    }

    /// Client configured from `OPENAI_API_KEY`
    pub fn from_env() -> Self {
        Self::new(Client::new())
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    async fn complete(&self, prompt: &str, config: &ModelConfig) -> Result<Completion, CompletionError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(config.model_name.as_str())
            .messages(vec![ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()?,
            )])
            .response_format(ResponseFormat::JsonObject)
            .temperature(config.temperature)
            .build()?;

        let started = Instant::now();
        let response = self.client.chat().create(request).await?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or(CompletionError::EmptyResponse)?;

        let token_usage = response
            .usage
            .map(|usage| TokenUsage::new(usage.prompt_tokens, usage.completion_tokens))
            .unwrap_or_default();

        tracing::debug!(
            model = %config.model_name,
            latency_ms,
            prompt_tokens = token_usage.prompt,
            completion_tokens = token_usage.completion,
            "Completion received"
        );

        Ok(Completion {
            text,
            token_usage,
            latency_ms,
        })
    }
}

/// Caps the number of in-flight calls to the wrapped service
pub struct BoundedCompletion<S> {
    inner: S,
    permits: Arc<Semaphore>,
}

impl<S> BoundedCompletion<S> {
    pub fn new(inner: S, max_concurrency: usize) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl<S: CompletionService> CompletionService for BoundedCompletion<S> {
    async fn complete(&self, prompt: &str, config: &ModelConfig) -> Result<Completion, CompletionError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| CompletionError::Unavailable("concurrency limiter closed".to_string()))?;
        self.inner.complete(prompt, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Slow {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl CompletionService for Slow {
        async fn complete(&self, _prompt: &str, _config: &ModelConfig) -> Result<Completion, CompletionError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Completion {
                text: "{}".to_string(),
                token_usage: TokenUsage::default(),
                latency_ms: 20.0,
            })
        }
    }

    #[tokio::test]
    async fn test_bounded_completion_limits_in_flight_calls() {
        let inner = Arc::new(Slow {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let bounded = Arc::new(BoundedCompletion::new(inner.clone(), 2));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let bounded = bounded.clone();
            handles.push(tokio::spawn(async move {
                bounded.complete("prompt", &ModelConfig::default()).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(inner.peak.load(Ordering::SeqCst), 2);
        assert_eq!(bounded.available_permits(), 2);
    }

    #[test]
    fn test_default_model_is_deterministic() {
        let config = ModelConfig::default();
        assert_eq!(config.model_name, DEFAULT_MODEL);
        assert_eq!(config.temperature, 0.0);
    }
}
