//! Runtime configuration
//!
//! Everything a binary needs to pick and reach a model, read once from the
//! environment and passed down explicitly.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use agent_core::{
    error::{AgentError, Result},
    gateway::{ModelGateway, RetryPolicy},
    provider::{GenerationOptions, LlmProvider},
};
use serde::{Deserialize, Serialize};

#[cfg(feature = "ollama")]
use crate::ollama::{OllamaConfig, OllamaProvider};
use crate::openai::{DEFAULT_BASE_URL, OpenAiConfig, OpenAiProvider};

/// Which backend serves the model
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Any `/chat/completions` endpoint
    #[default]
    #[serde(rename = "openai")]
    OpenAiCompatible,

    #[serde(rename = "ollama")]
    Ollama,
}

impl FromStr for ProviderKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "openai-compatible" => Ok(Self::OpenAiCompatible),
            "ollama" => Ok(Self::Ollama),
            other => Err(AgentError::Config(format!(
                "unknown LLM_PROVIDER '{other}' (expected 'openai' or 'ollama')"
            ))),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAiCompatible => f.write_str("openai"),
            Self::Ollama => f.write_str("ollama"),
        }
    }
}

/// Provider selection, credentials and loop budgets
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub ollama_host: String,
    pub ollama_port: u16,

    /// ReAct step budget
    pub max_steps: usize,

    /// Plan-Solve replan budget
    pub max_replans: usize,

    /// Retries for transient provider failures
    pub max_retries: u32,
}

impl RuntimeConfig {
    /// Read from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read from an explicit set of variables
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let provider = get("LLM_PROVIDER")
            .map(|v| v.parse::<ProviderKind>())
            .transpose()?
            .unwrap_or_default();
        let model = get("LLM_MODEL_ID")
            .ok_or_else(|| AgentError::Config("LLM_MODEL_ID is not set".into()))?;

        Ok(Self {
            provider,
            model,
            api_key: get("LLM_API_KEY"),
            base_url: get("LLM_BASE_URL"),
            timeout_secs: parse_var(get("LLM_TIMEOUT"), "LLM_TIMEOUT", 60)?,
            ollama_host: get("OLLAMA_HOST").unwrap_or_else(|| "http://localhost".into()),
            ollama_port: parse_var(get("OLLAMA_PORT"), "OLLAMA_PORT", 11434)?,
            max_steps: parse_var(get("AGENT_MAX_STEPS"), "AGENT_MAX_STEPS", 5)?,
            max_replans: parse_var(get("AGENT_MAX_REPLANS"), "AGENT_MAX_REPLANS", 3)?,
            max_retries: parse_var(get("LLM_MAX_RETRIES"), "LLM_MAX_RETRIES", 2)?,
        })
    }

    /// Base generation options for the configured model
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            model: self.model.clone(),
            ..GenerationOptions::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        }
    }

    pub fn openai_config(&self) -> OpenAiConfig {
        OpenAiConfig {
            base_url: self.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            api_key: self.api_key.clone().unwrap_or_default(),
            timeout_secs: self.timeout_secs,
        }
    }

    #[cfg(feature = "ollama")]
    pub fn ollama_config(&self) -> OllamaConfig {
        OllamaConfig {
            host: self.ollama_host.clone(),
            port: self.ollama_port,
            timeout_secs: self.timeout_secs,
        }
    }

    /// Provider plus options plus retry policy, ready for the loops
    pub fn gateway(&self) -> Result<ModelGateway> {
        let provider = build_provider(self)?;
        Ok(ModelGateway::new(provider, self.generation_options()).with_retry(self.retry_policy()))
    }
}

fn parse_var<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    value.map_or(Ok(default), |v| {
        v.parse()
            .map_err(|_| AgentError::Config(format!("{key} has an invalid value '{v}'")))
    })
}

/// The one place a provider is chosen
pub fn build_provider(config: &RuntimeConfig) -> Result<Arc<dyn LlmProvider>> {
    tracing::info!(provider = %config.provider, model = %config.model, "Building provider");

    match config.provider {
        ProviderKind::OpenAiCompatible => Ok(Arc::new(OpenAiProvider::new(&config.openai_config())?)),

        #[cfg(feature = "ollama")]
        ProviderKind::Ollama => Ok(Arc::new(OllamaProvider::from_config(&config.ollama_config())?)),

        #[cfg(not(feature = "ollama"))]
        ProviderKind::Ollama => Err(AgentError::Config(
            "this build does not include the 'ollama' feature".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::from_map(&vars(&[("LLM_MODEL_ID", "qwen-plus")])).unwrap();

        assert_eq!(config.provider, ProviderKind::OpenAiCompatible);
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.max_steps, 5);
        assert_eq!(config.max_replans, 3);
        assert_eq!(config.openai_config().base_url, DEFAULT_BASE_URL);
        assert_eq!(config.generation_options().model, "qwen-plus");
    }

    #[test]
    fn test_missing_model_is_error() {
        let err = RuntimeConfig::from_map(&vars(&[("LLM_API_KEY", "sk")])).unwrap_err();
        assert!(err.to_string().contains("LLM_MODEL_ID"));
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let err = RuntimeConfig::from_map(&vars(&[
            ("LLM_MODEL_ID", "m"),
            ("LLM_TIMEOUT", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));

        let err = RuntimeConfig::from_map(&vars(&[
            ("LLM_MODEL_ID", "m"),
            ("LLM_PROVIDER", "anthropic"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("anthropic"));
    }

    #[test]
    fn test_openai_without_key_fails_at_build() {
        let config = RuntimeConfig::from_map(&vars(&[("LLM_MODEL_ID", "m")])).unwrap();
        assert!(matches!(build_provider(&config), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_build_openai_gateway() {
        let config = RuntimeConfig::from_map(&vars(&[
            ("LLM_MODEL_ID", "m"),
            ("LLM_API_KEY", "sk-test"),
            ("LLM_BASE_URL", "http://localhost:8000/v1"),
            ("LLM_MAX_RETRIES", "0"),
        ]))
        .unwrap();
        let gateway = config.gateway().unwrap();
        assert_eq!(gateway.provider_name(), "openai");
        assert_eq!(config.retry_policy().max_retries, 0);
    }

    #[cfg(feature = "ollama")]
    #[test]
    fn test_build_ollama_provider() {
        let config = RuntimeConfig::from_map(&vars(&[
            ("LLM_MODEL_ID", "llama3.2"),
            ("LLM_PROVIDER", "Ollama"),
            ("OLLAMA_PORT", "11500"),
        ]))
        .unwrap();
        assert_eq!(config.ollama_config().port, 11500);
        assert_eq!(build_provider(&config).unwrap().name(), "ollama");
    }
}
