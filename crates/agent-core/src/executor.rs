//! Action Executor
//!
//! Runs one resolved action (a tool call or a piece of generated code) and
//! captures whatever happens as an [`Observation`]. Errors stop here; they
//! are data for the next model turn, not control flow.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AgentError, Result};
use crate::parser::Action;
use crate::tool::{ToolArgs, ToolRegistry};

/// Reserved action name that ends a ReAct run
pub const FINISH_ACTION: &str = "finish";

/// Whether an action name is the finish sentinel (case-insensitive)
pub fn is_finish(name: &str) -> bool {
    name.eq_ignore_ascii_case(FINISH_ACTION)
}

/// Textual outcome of an action, success or error alike
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub text: String,
    pub success: bool,
}

impl Observation {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: true,
        }
    }

    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: false,
        }
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Environment that executes generated code
///
/// Implementations pre-seed a fixed set of bindings and nothing else. The
/// useful output of a run is its side effect (a file on disk), so `run`
/// only reports captured stdout.
#[async_trait]
pub trait CodeSandbox: Send + Sync {
    async fn run(&self, code: &str) -> Result<String>;
}

/// Dispatches actions to tools and code to the sandbox
#[derive(Clone)]
pub struct ActionExecutor {
    tools: Arc<ToolRegistry>,
    sandbox: Option<Arc<dyn CodeSandbox>>,
}

impl ActionExecutor {
    pub const fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            tools,
            sandbox: None,
        }
    }

    #[must_use]
    pub fn with_sandbox(mut self, sandbox: Arc<dyn CodeSandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Execute a tool action
    pub async fn execute(&self, action: &Action) -> Observation {
        if is_finish(&action.name) {
            return Observation::failure(format!(
                "Error: '{}' is reserved for ending the task and cannot be executed as a tool.",
                action.name
            ));
        }

        let Some(tool) = self.tools.lookup(&action.name) else {
            tracing::debug!(tool = %action.name, "Unknown tool requested");
            return Observation::failure(format!(
                "Error: no tool named '{}' was found. Check the spelling; available tools: {}.",
                action.name,
                self.tools.names().join(", ")
            ));
        };

        let schema = tool.schema();
        let args = bind_arguments(&action.args, &schema.parameters);

        tracing::debug!(tool = %schema.name, "Executing tool");

        let outcome = match tool.validate(&args) {
            Ok(()) => tool.call(&args).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(output) => Observation::success(output),
            Err(AgentError::ToolValidation(detail)) => Observation::failure(format!(
                "Tool Execution Error: invalid arguments. Tool '{}' expects {}. Your input: {}. Details: {}",
                schema.name,
                schema.signature(),
                action.args,
                detail
            )),
            Err(AgentError::ToolExecution(detail)) => {
                tracing::warn!(tool = %schema.name, error = %detail, "Tool failed");
                Observation::failure(format!("Tool Execution Error: {detail}"))
            }
            Err(e) => {
                tracing::warn!(tool = %schema.name, error = %e, "Tool failed");
                Observation::failure(format!("Tool Execution Error: {e}"))
            }
        }
    }

    /// Execute generated code in the sandbox
    pub async fn run_code(&self, code: &str) -> Observation {
        let Some(sandbox) = &self.sandbox else {
            return Observation::failure("Execution Error: no code sandbox is configured.");
        };

        match sandbox.run(code).await {
            Ok(stdout) if stdout.trim().is_empty() => {
                Observation::success("Code executed successfully.")
            }
            Ok(stdout) => Observation::success(format!("Code executed successfully.\n{}", stdout.trim())),
            Err(e) => {
                tracing::warn!(error = %e, "Generated code failed");
                Observation::failure(format!("Execution Error: {e}"))
            }
        }
    }

    /// Execute generated code and require it to leave `artifact` behind
    ///
    /// A clean exit without the artifact still counts as a failure.
    pub async fn run_code_for_artifact(&self, code: &str, artifact: &Path) -> Observation {
        let observation = self.run_code(code).await;
        if !observation.success {
            return observation;
        }

        if artifact.exists() {
            Observation::success(format!(
                "{}\nArtifact written to {}.",
                observation.text,
                artifact.display()
            ))
        } else {
            Observation::failure(format!(
                "Execution Error: the code ran but did not produce {}.",
                artifact.display()
            ))
        }
    }
}

/// Named arguments from a mapping; any other value binds to the first parameter
fn bind_arguments(args: &Value, parameters: &[crate::tool::ParameterSchema]) -> ToolArgs {
    match args {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            let key = parameters.first().map_or("input", |p| p.name.as_str());
            map.insert(key.to_owned(), other.clone());
            map
        }
    }
}
