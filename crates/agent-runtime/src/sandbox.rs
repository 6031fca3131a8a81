//! Python code sandbox
//!
//! Runs generated code in a separate interpreter process with a fixed
//! prelude: `pd` (pandas), `plt` (matplotlib.pyplot on the Agg backend) and
//! `df` (a DataFrame from the configured CSV, or an empty one). Nothing else
//! is pre-bound. The script goes to a temp file that is removed afterwards.

use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    executor::CodeSandbox,
};
use async_trait::async_trait;
use tokio::process::Command;

/// Sandbox settings
#[derive(Clone, Debug)]
pub struct SandboxConfig {
    /// Interpreter executable
    pub interpreter: String,

    /// CSV loaded into `df`
    pub data_path: Option<PathBuf>,

    /// Directory the script runs in; relative artifact paths land here
    pub working_dir: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".into(),
            data_path: None,
            working_dir: None,
            timeout_secs: 60,
        }
    }
}

/// Subprocess-backed [`CodeSandbox`]
#[derive(Clone, Debug)]
pub struct PythonSandbox {
    config: SandboxConfig,
}

impl PythonSandbox {
    pub const fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Prelude that binds `pd`, `plt` and `df`
    pub fn prelude(&self) -> String {
        let df = self.config.data_path.as_ref().map_or_else(
            || "pd.DataFrame()".to_owned(),
            |path| {
                // a JSON string literal is also a valid Python string literal
                let literal = serde_json::to_string(&path.to_string_lossy())
                    .unwrap_or_else(|_| "\"\"".to_owned());
                format!("pd.read_csv({literal})")
            },
        );

        format!(
            "import pandas as pd\n\
             import matplotlib as _matplotlib\n\
             _matplotlib.use(\"Agg\")\n\
             import matplotlib.pyplot as plt\n\
             del _matplotlib\n\
             df = {df}\n"
        )
    }

    fn write_script(&self, code: &str) -> Result<tempfile::NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("agent-sandbox-")
            .suffix(".py")
            .tempfile()?;
        file.write_all(self.prelude().as_bytes())?;
        file.write_all(b"\n")?;
        file.write_all(code.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(file)
    }
}

#[async_trait]
impl CodeSandbox for PythonSandbox {
    async fn run(&self, code: &str) -> Result<String> {
        let script = self.write_script(code)?;

        let mut cmd = Command::new(&self.config.interpreter);
        cmd.arg(script.path()).kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        tracing::info!(interpreter = %self.config.interpreter, "Running generated code");

        let output = tokio::time::timeout(Duration::from_secs(self.config.timeout_secs), cmd.output())
            .await
            .map_err(|_| {
                AgentError::Sandbox(format!("timed out after {}s", self.config.timeout_secs))
            })??;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::debug!(status = ?output.status, "Generated code exited with failure");
            Err(AgentError::Sandbox(format!(
                "exit {}: {}",
                output.status.code().map_or_else(|| "signal".to_owned(), |c| c.to_string()),
                stderr.trim()
            )))
        }
    }
}
