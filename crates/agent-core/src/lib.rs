//! # agent-core
//!
//! Provider-agnostic agent loops: ReAct, Plan-Solve-Replan and code reflection.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Loop Controllers                          │
//! │  ┌─────────────┐  ┌──────────────────┐  ┌─────────────────────┐  │
//! │  │ ReactAgent  │  │  PlanSolveAgent  │  │ CodeReflectionAgent │  │
//! │  └──────┬──────┘  └───┬─────────┬────┘  └──────────┬──────────┘  │
//! │         │         Planner   Evaluator              │             │
//! │  ┌──────┴─────────────┴─────────┴──────────────────┴──────────┐  │
//! │  │        OutputParser · ActionExecutor · Presenter           │  │
//! │  └──────┬───────────────────────────────────────┬─────────────┘  │
//! │  ┌──────┴──────┐                         ┌──────┴──────┐         │
//! │  │ ModelGateway│──── LlmProvider ────    │ ToolRegistry│         │
//! │  └─────────────┘     (Strategy)          └─────────────┘         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Concrete providers (Ollama, OpenAI-compatible) and the Python sandbox live
//! in `agent-runtime`; everything here talks to them through traits.

pub mod error;
pub mod evaluator;
pub mod executor;
pub mod gateway;
pub mod message;
pub mod mock;
pub mod parser;
pub mod plan_solve;
pub mod planner;
pub mod presenter;
pub mod provider;
pub mod react;
pub mod reflection;
pub mod template;
pub mod tool;

pub use error::{AgentError, Result};
pub use evaluator::{EvaluationVerdict, Evaluator};
pub use executor::{ActionExecutor, CodeSandbox, Observation};
pub use gateway::{ModelGateway, RetryPolicy};
pub use message::{Message, Role};
pub use parser::{Action, ParsedStep};
pub use plan_solve::{
    AbortReason, HistoryEntry, LlmStepSolver, PlanSolveAgent, PlanSolveConfig, PlanSolveRun,
    PlanSolveStatus, ReactStepSolver, StepContext, StepSolver,
};
pub use planner::{Plan, Planner};
pub use presenter::{NullPresenter, Presentation, Presenter, TracingPresenter};
pub use provider::{Completion, GenerationOptions, LlmProvider};
pub use react::{ReactAgent, ReactAgentBuilder, ReactConfig, ReactOutcome, ReactRun};
pub use reflection::{
    CodeReflectionAgent, ReflectionConfig, ReflectionIteration, ReflectionRun, ReflectionStatus,
};
pub use template::fill_template;
pub use tool::{CalculatorTool, DateTimeTool, Tool, ToolRegistry, ToolSchema};
