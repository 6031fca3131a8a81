//! # agent-runtime
//!
//! Concrete backends for the agent loops.
//!
//! ## Providers
//!
//! - **OpenAI-compatible** (default): any `/chat/completions` endpoint
//! - **Ollama** (feature `ollama`): local inference via ollama-rs
//!
//! ## Sandbox
//!
//! - **PythonSandbox**: runs generated code in a `python3` subprocess with
//!   `pd`, `plt` and `df` pre-bound
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env()?;
//! let agent = ReactAgentBuilder::new()
//!     .gateway(config.gateway()?)
//!     .tool(CalculatorTool)
//!     .build()?;
//! ```

pub mod config;
#[cfg(feature = "ollama")]
pub mod ollama;
pub mod openai;
pub mod sandbox;

pub use config::{ProviderKind, RuntimeConfig, build_provider};
#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaProvider};
pub use openai::{OpenAiConfig, OpenAiProvider};
pub use sandbox::{PythonSandbox, SandboxConfig};

// Re-export core types for convenience
pub use agent_core::{AgentError, LlmProvider, Message, ModelGateway, Result, Role};
