//! Ollama LLM Provider
//!
//! Implementation of `LlmProvider` for local Ollama inference.

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{
        Completion, CompletionStream, FinishReason, GenerationOptions, LlmProvider, StreamChunk,
    },
};
use async_trait::async_trait;
use futures::StreamExt;
use ollama_rs::{
    Ollama,
    generation::chat::{
        ChatMessage, ChatMessageResponse, MessageRole, request::ChatMessageRequest,
    },
    models::ModelOptions,
};

/// Ollama provider configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
            timeout_secs: 120,
        }
    }
}

/// Ollama LLM provider
pub struct OllamaProvider {
    client: Ollama,
}

impl OllamaProvider {
    /// Create from configuration
    pub fn from_config(config: &OllamaConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client: Ollama::new_with_client(config.host.clone(), config.port, http),
        })
    }

    /// Create with default localhost settings
    pub fn localhost() -> Result<Self> {
        Self::from_config(&OllamaConfig::default())
    }

    fn convert_messages(messages: &[Message]) -> Vec<ChatMessage> {
        messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => MessageRole::System,
                    Role::User => MessageRole::User,
                    Role::Assistant => MessageRole::Assistant,
                };
                ChatMessage::new(role, m.content.clone())
            })
            .collect()
    }

    fn convert_completion(response: &ChatMessageResponse, model: &str) -> Completion {
        Completion {
            content: response.message.content.clone(),
            model: model.to_string(),
            usage: None,
            finish_reason: Some(FinishReason::Stop),
        }
    }

    fn build_request(messages: &[Message], opts: &GenerationOptions) -> ChatMessageRequest {
        let num_predict = i32::try_from(opts.max_tokens).unwrap_or(i32::MAX);
        let mut options = ModelOptions::default()
            .temperature(opts.temperature)
            .top_p(opts.top_p)
            .num_predict(num_predict);
        if !opts.stop_sequences.is_empty() {
            options = options.stop(opts.stop_sequences.clone());
        }

        ChatMessageRequest::new(opts.model.clone(), Self::convert_messages(messages))
            .options(options)
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.list_local_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        tracing::debug!(model = %options.model, messages = messages.len(), "Ollama chat request");

        let response = self
            .client
            .send_chat_messages(Self::build_request(messages, options))
            .await
            .map_err(|e| AgentError::ProviderUnavailable(e.to_string()))?;

        Ok(Self::convert_completion(&response, &options.model))
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<CompletionStream> {
        let stream = self
            .client
            .send_chat_messages_stream(Self::build_request(messages, options))
            .await
            .map_err(|e| AgentError::ProviderUnavailable(e.to_string()))?;

        let mapped = stream.map(|result| {
            result
                .map(|chunk| StreamChunk {
                    delta: chunk.message.content.clone(),
                    done: chunk.done,
                    usage: None,
                })
                .map_err(|_| AgentError::Provider("Ollama stream interrupted".into()))
        });

        Ok(Box::pin(mapped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = OllamaConfig::default();
        assert_eq!(config.host, "http://localhost");
        assert_eq!(config.port, 11434);
    }

    #[test]
    fn test_message_conversion() {
        let messages = vec![
            Message::system("You are helpful."),
            Message::user("Hello"),
            Message::assistant("Hi"),
        ];

        let converted = OllamaProvider::convert_messages(&messages);
        assert_eq!(converted.len(), 3);
        assert_eq!(converted[2].content, "Hi");
    }

    #[test]
    fn test_provider_name() {
        let provider = OllamaProvider::localhost().unwrap();
        assert_eq!(provider.name(), "ollama");
    }
}
