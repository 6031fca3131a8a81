//! OpenAI-compatible LLM Provider
//!
//! Talks to any endpoint that speaks the `/chat/completions` protocol
//! (OpenAI, DashScope, DeepSeek, vLLM, LM Studio, ...).

use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    message::Message,
    provider::{
        Completion, CompletionStream, FinishReason, GenerationOptions, LlmProvider, StreamChunk,
        TokenUsage,
    },
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde_json::{Value, json};

/// Default public endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Connection settings for an OpenAI-compatible endpoint
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// Base URL, without the `/chat/completions` suffix
    pub base_url: String,
    pub api_key: String,

    /// Whole-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: String::new(),
            timeout_secs: 60,
        }
    }
}

/// OpenAI-compatible chat completions provider
pub struct OpenAiProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiProvider {
    /// Build a provider; an empty API key is a configuration error
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(AgentError::Config(
                "LLM_API_KEY is required for the OpenAI-compatible provider".into(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn request_body(messages: &[Message], opts: &GenerationOptions, stream: bool) -> Value {
        let messages: Vec<Value> = messages
            .iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        let mut body = json!({
            "model": opts.model,
            "messages": messages,
            "temperature": opts.temperature,
            "top_p": opts.top_p,
            "max_tokens": opts.max_tokens,
            "stream": stream,
        });
        if !opts.stop_sequences.is_empty() {
            body["stop"] = json!(opts.stop_sequences);
        }
        body
    }

    async fn post_chat(&self, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(self.endpoint("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(map_status(status, &text))
        }
    }
}

/// Map a non-success HTTP status to the error taxonomy
pub fn map_status(status: StatusCode, body: &str) -> AgentError {
    let detail = format!("{status}: {}", body.trim());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AgentError::Auth(detail),
        StatusCode::TOO_MANY_REQUESTS => AgentError::RateLimited(detail),
        s if s.is_server_error() => AgentError::ProviderUnavailable(detail),
        _ => AgentError::Provider(detail),
    }
}

fn map_transport(e: reqwest::Error) -> AgentError {
    if e.is_timeout() || e.is_connect() {
        AgentError::ProviderUnavailable(e.to_string())
    } else {
        AgentError::Provider(e.to_string())
    }
}

fn finish_reason(value: &Value) -> Option<FinishReason> {
    match value.as_str()? {
        "stop" => Some(FinishReason::Stop),
        "length" => Some(FinishReason::Length),
        "content_filter" => Some(FinishReason::ContentFilter),
        _ => None,
    }
}

fn token_count(value: &Value) -> u32 {
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

fn parse_completion(json: &Value, model: &str) -> Result<Completion> {
    let choice = &json["choices"][0];
    let content = choice["message"]["content"]
        .as_str()
        .ok_or_else(|| AgentError::Provider("response carried no message content".into()))?;

    let usage = json.get("usage").filter(|u| u.is_object()).map(|u| TokenUsage {
        prompt_tokens: token_count(&u["prompt_tokens"]),
        completion_tokens: token_count(&u["completion_tokens"]),
        total_tokens: token_count(&u["total_tokens"]),
    });

    Ok(Completion {
        content: content.to_owned(),
        model: json["model"].as_str().unwrap_or(model).to_owned(),
        usage,
        finish_reason: finish_reason(&choice["finish_reason"]),
    })
}

#[derive(Debug, PartialEq, Eq)]
enum SseEvent {
    Delta(String),
    Done,
}

/// One server-sent-events line; comments, blanks and keep-alives yield `None`
fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }

    match serde_json::from_str::<Value>(data) {
        Ok(json) => Some(SseEvent::Delta(
            json["choices"][0]["delta"]["content"]
                .as_str()
                .unwrap_or_default()
                .to_owned(),
        )),
        Err(e) => {
            tracing::debug!(error = %e, "Skipping malformed stream event");
            None
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn health_check(&self) -> Result<bool> {
        match self
            .http
            .get(self.endpoint("models"))
            .bearer_auth(&self.api_key)
            .send()
            .await
        {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                tracing::warn!("OpenAI-compatible health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        tracing::debug!(model = %options.model, messages = messages.len(), "Chat completion request");

        let response = self
            .post_chat(&Self::request_body(messages, options, false))
            .await?;
        let json: Value = response.json().await.map_err(map_transport)?;
        parse_completion(&json, &options.model)
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<CompletionStream> {
        let response = self
            .post_chat(&Self::request_body(messages, options, true))
            .await?;

        let bytes = Box::pin(response.bytes_stream());
        let stream = futures::stream::unfold(
            (bytes, Vec::<u8>::new(), false),
            |(mut bytes, mut buffer, finished)| async move {
                if finished {
                    return None;
                }
                loop {
                    if let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        match parse_sse_line(String::from_utf8_lossy(&line).trim()) {
                            Some(SseEvent::Done) => {
                                let chunk = StreamChunk {
                                    delta: String::new(),
                                    done: true,
                                    usage: None,
                                };
                                return Some((Ok(chunk), (bytes, buffer, true)));
                            }
                            Some(SseEvent::Delta(delta)) if !delta.is_empty() => {
                                let chunk = StreamChunk {
                                    delta,
                                    done: false,
                                    usage: None,
                                };
                                return Some((Ok(chunk), (bytes, buffer, false)));
                            }
                            _ => continue,
                        }
                    }

                    match bytes.next().await {
                        Some(Ok(data)) => buffer.extend_from_slice(&data),
                        Some(Err(e)) => return Some((Err(map_transport(e)), (bytes, buffer, true))),
                        None => return None,
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new(&OpenAiConfig {
            base_url: "http://localhost:8000/v1/".into(),
            api_key: "sk-test".into(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let err = OpenAiProvider::new(&OpenAiConfig::default()).err().unwrap();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        assert_eq!(
            provider().endpoint("chat/completions"),
            "http://localhost:8000/v1/chat/completions"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(map_status(StatusCode::UNAUTHORIZED, ""), AgentError::Auth(_)));
        assert!(matches!(map_status(StatusCode::FORBIDDEN, ""), AgentError::Auth(_)));
        assert!(matches!(
            map_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            AgentError::RateLimited(_)
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_GATEWAY, ""),
            AgentError::ProviderUnavailable(_)
        ));
        assert!(matches!(map_status(StatusCode::BAD_REQUEST, ""), AgentError::Provider(_)));
        assert!(map_status(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
    }

    #[test]
    fn test_request_body() {
        let opts = GenerationOptions {
            model: "qwen-plus".into(),
            stop_sequences: vec!["Observation:".into()],
            ..GenerationOptions::default()
        };
        let body = OpenAiProvider::request_body(
            &[Message::system("be brief"), Message::user("hi")],
            &opts,
            false,
        );

        assert_eq!(body["model"], "qwen-plus");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["stop"][0], "Observation:");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn test_parse_completion() {
        let json = json!({
            "model": "gpt-4o-mini-2024",
            "choices": [{"message": {"role": "assistant", "content": "hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
        });
        let completion = parse_completion(&json, "gpt-4o-mini").unwrap();

        assert_eq!(completion.content, "hello");
        assert_eq!(completion.model, "gpt-4o-mini-2024");
        assert_eq!(completion.finish_reason, Some(FinishReason::Stop));
        assert_eq!(completion.usage.unwrap().total_tokens, 6);

        assert!(parse_completion(&json!({"choices": []}), "m").is_err());
    }

    #[test]
    fn test_parse_sse_lines() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#),
            Some(SseEvent::Delta("Hel".into()))
        );
        assert_eq!(parse_sse_line("data: [DONE]"), Some(SseEvent::Done));
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line(""), None);
    }
}
