//! Model Gateway
//!
//! Uniform call interface the loops use to reach an [`LlmProvider`].
//! Adds per-call temperature, retry of transient failures and stream
//! collection on top of the raw provider.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Message;
use crate::provider::{GenerationOptions, LlmProvider};

/// Retry policy for transient provider failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; grows linearly per attempt
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    2
}
const fn default_backoff_ms() -> u64 {
    500
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_ms: 0,
        }
    }
}

/// Cloneable handle to a provider plus the base generation options
#[derive(Clone)]
pub struct ModelGateway {
    provider: Arc<dyn LlmProvider>,
    options: GenerationOptions,
    retry: RetryPolicy,
}

impl ModelGateway {
    pub fn new(provider: Arc<dyn LlmProvider>, options: GenerationOptions) -> Self {
        Self {
            provider,
            options,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn health_check(&self) -> Result<bool> {
        self.provider.health_check().await
    }

    /// Send messages and return the generated text
    pub async fn complete(&self, messages: &[Message], temperature: f32) -> Result<String> {
        let mut options = self.options.clone();
        options.temperature = temperature;

        let mut attempt: u32 = 0;
        loop {
            let estimated: u32 = messages.iter().map(Message::estimate_tokens).sum();
            tracing::debug!(
                provider = self.provider.name(),
                model = %options.model,
                messages = messages.len(),
                estimated_tokens = estimated,
                attempt,
                "Calling model"
            );

            match self.request(messages, &options).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.backoff_ms.saturating_mul(u64::from(attempt));
                    tracing::warn!(error = %e, attempt, delay_ms = delay, "Retrying model call");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Like [`complete`](Self::complete), but a failure comes back as text
    ///
    /// The loops feed the returned string into their parsers, so a transport
    /// error degrades into a parse failure or an observation instead of
    /// tearing the run down.
    pub async fn think(&self, messages: &[Message], temperature: f32) -> String {
        match self.complete(messages, temperature).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Model call failed");
                format!("Error calling LLM: {e}")
            }
        }
    }

    async fn request(&self, messages: &[Message], options: &GenerationOptions) -> Result<String> {
        if !options.stream {
            let completion = self.provider.complete(messages, options).await?;
            if let Some(usage) = completion.usage {
                tracing::debug!(
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "Model usage"
                );
            }
            return Ok(completion.content);
        }

        let mut stream = self.provider.complete_stream(messages, options).await?;
        let mut collected = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            collected.push_str(&chunk.delta);
            if chunk.done {
                break;
            }
        }
        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::mock::ScriptedProvider;

    fn gateway(provider: Arc<ScriptedProvider>) -> ModelGateway {
        ModelGateway::new(provider, GenerationOptions::default()).with_retry(RetryPolicy {
            max_retries: 2,
            backoff_ms: 1,
        })
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_error(AgentError::RateLimited("429".into()));
        provider.push_reply("ok");

        let text = gateway(provider.clone()).complete(&[Message::user("q")], 0.0).await.unwrap();
        assert_eq!(text, "ok");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_error(AgentError::Auth("bad key".into()));
        provider.push_reply("never");

        let result = gateway(provider.clone()).complete(&[], 0.0).await;
        assert!(matches!(result, Err(AgentError::Auth(_))));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_think_embeds_transport_error() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_error(AgentError::Provider("connection reset".into()));

        let text = gateway(provider).think(&[], 0.0).await;
        assert!(text.starts_with("Error calling LLM:"));
        assert!(text.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_stream_collection() {
        let provider = Arc::new(ScriptedProvider::with_replies(["streamed answer"]));
        let options = GenerationOptions {
            stream: true,
            ..GenerationOptions::default()
        };
        let gw = ModelGateway::new(provider, options);

        assert_eq!(gw.complete(&[], 0.3).await.unwrap(), "streamed answer");
    }
}
