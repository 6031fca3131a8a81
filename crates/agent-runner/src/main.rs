//! Agent runner
//!
//! ```text
//! agent-runner react      <task...>   ReAct loop with the built-in tools
//! agent-runner plan       <task...>   Plan-Solve-Replan, one model call per step
//! agent-runner plan-react <task...>   Plan-Solve-Replan, a ReAct sub-loop per step
//! agent-runner reflect    <task...>   generate/execute/reflect Python code
//! ```
//!
//! Provider settings come from the environment (or `.env`); see
//! `agent_runtime::RuntimeConfig`. The reflect mode also reads
//! `AGENT_DATA_CSV` and `AGENT_ARTIFACT`.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use agent_core::{
    ActionExecutor, CalculatorTool, CodeReflectionAgent, DateTimeTool, LlmStepSolver, ModelGateway,
    PlanSolveAgent, PlanSolveConfig, PlanSolveStatus, ReactAgent, ReactAgentBuilder,
    ReactStepSolver, ReflectionConfig, ReflectionStatus, StepSolver, ToolRegistry,
};
use agent_runtime::{PythonSandbox, RuntimeConfig, SandboxConfig};
use anyhow::{Context, bail};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    React,
    Plan,
    PlanReact,
    Reflect,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "react" => Ok(Self::React),
            "plan" => Ok(Self::Plan),
            "plan-react" => Ok(Self::PlanReact),
            "reflect" => Ok(Self::Reflect),
            other => bail!("unknown mode '{other}' (expected react, plan, plan-react or reflect)"),
        }
    }
}

/// Mode and task from the command line
fn parse_args(args: &[String]) -> anyhow::Result<(Mode, String)> {
    let Some((mode, task)) = args.split_first() else {
        bail!("usage: agent-runner <react|plan|plan-react|reflect> <task...>");
    };
    let task = task.join(" ");
    if task.trim().is_empty() {
        bail!("a task is required");
    }
    Ok((mode.parse()?, task))
}

fn tool_registry() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(CalculatorTool);
    tools.register(DateTimeTool);
    tools
}

fn react_agent(gateway: ModelGateway, config: &RuntimeConfig) -> anyhow::Result<ReactAgent> {
    Ok(ReactAgentBuilder::new()
        .gateway(gateway)
        .tools(tool_registry())
        .max_steps(config.max_steps)
        .build()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment before the filter reads RUST_LOG
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (mode, task) = parse_args(&args)?;

    let config = RuntimeConfig::from_env().context("invalid runtime configuration")?;
    let gateway = config.gateway()?;

    if !gateway_health(&gateway).await {
        tracing::warn!(provider = %config.provider, "Provider health check failed; continuing anyway");
    }

    match mode {
        Mode::React => {
            let answer = react_agent(gateway, &config)?.ask(&task).await;
            println!("{answer}");
        }

        Mode::Plan | Mode::PlanReact => {
            let solver: Arc<dyn StepSolver> = if mode == Mode::Plan {
                Arc::new(LlmStepSolver::new(gateway.clone(), 0.7))
            } else {
                Arc::new(ReactStepSolver::new(react_agent(gateway.clone(), &config)?))
            };
            let plan_config = PlanSolveConfig {
                max_replans: config.max_replans,
                ..PlanSolveConfig::default()
            };

            let run = PlanSolveAgent::new(gateway, solver, plan_config).run(&task).await;
            match run.status {
                PlanSolveStatus::Done { answer } => println!("{answer}"),
                PlanSolveStatus::Aborted { reason } => bail!("task aborted: {reason}"),
            }
        }

        Mode::Reflect => {
            let sandbox = PythonSandbox::new(SandboxConfig {
                data_path: std::env::var_os("AGENT_DATA_CSV").map(PathBuf::from),
                timeout_secs: config.timeout_secs,
                ..SandboxConfig::default()
            });
            let executor = ActionExecutor::new(Arc::new(ToolRegistry::new()))
                .with_sandbox(Arc::new(sandbox));
            let reflection_config = ReflectionConfig {
                artifact: std::env::var_os("AGENT_ARTIFACT").map(PathBuf::from),
                ..ReflectionConfig::default()
            };

            let context = std::env::var("AGENT_DATA_SCHEMA").unwrap_or_default();
            let run = CodeReflectionAgent::new(gateway, executor, reflection_config)
                .run(&task, &context)
                .await;

            if let Some(code) = run.final_code() {
                println!("{code}");
            }
            match run.status {
                ReflectionStatus::Success => tracing::info!("Reflection finished with success"),
                ReflectionStatus::MaxIterationsReached => {
                    tracing::warn!("Reflection stopped at the iteration limit");
                }
                ReflectionStatus::Failed { message } => bail!("reflection failed: {message}"),
            }
        }
    }

    Ok(())
}

async fn gateway_health(gateway: &ModelGateway) -> bool {
    matches!(gateway.health_check().await, Ok(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_parse_args() {
        let (mode, task) = parse_args(&args(&["plan-react", "compute", "10", "/", "0"])).unwrap();
        assert_eq!(mode, Mode::PlanReact);
        assert_eq!(task, "compute 10 / 0");
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse_args(&[]).is_err());
        assert!(parse_args(&args(&["react"])).is_err());
        assert!(parse_args(&args(&["chat", "hi"])).is_err());
    }

    #[test]
    fn test_registry_has_builtins() {
        assert_eq!(tool_registry().names(), ["calculate", "datetime"]);
    }
}
