//! Plan-Solve-Replan Loop
//!
//! ```text
//! PLANNING ─▶ EXECUTING ─▶ EVALUATING ─┬─ success ─▶ EXECUTING (or DONE when the plan is empty)
//!    │                                 └─ failure ─▶ REPLANNING ─▶ EXECUTING
//!    └─ empty plan ─▶ ABORTED                             └─ empty / over budget ─▶ ABORTED
//! ```
//!
//! Steps are popped before they run and never re-queued; a rejected step is
//! only ever superseded by a freshly planned remainder. History holds
//! accepted results only.

use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::evaluator::Evaluator;
use crate::gateway::ModelGateway;
use crate::message::Message;
use crate::planner::{Plan, Planner};
use crate::presenter::{Presentation, Presenter, TracingPresenter};
use crate::react::{ReactAgent, ReactOutcome};
use crate::template::fill_template;

const EXECUTOR_PROMPT_TEMPLATE: &str = r#"You are a top-tier AI execution expert. Your job is to solve a problem step by step, strictly following the given plan.
You will receive the original problem, the remaining plan, and the steps completed so far with their results.
Focus on solving the "current step" and output only that step's final answer, without any extra explanation or conversation.

# Original problem:
{question}

# Remaining plan:
{plan}

# Completed steps and results:
{history}

# Current step:
{current_step}

Output only the answer to the "current step":"#;

/// One accepted step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step: String,
    pub result: String,

    /// The evaluator's reason for accepting it
    pub feedback: Option<String>,
}

/// Render accepted steps the way prompts expect them
pub fn render_history(entries: &[HistoryEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let _ = write!(out, "Step: {}\nResult: {}\n\n", entry.step, entry.result);
    }
    out
}

/// What a step solver sees
#[derive(Clone, Copy, Debug)]
pub struct StepContext<'a> {
    pub task: &'a str,

    /// Steps still queued after the current one
    pub remaining: &'a Plan,

    /// Rendered accepted history
    pub history: &'a str,
    pub step: &'a str,
}

/// Produces a result for one plan step
///
/// Failures are returned as text; judging them is the evaluator's job.
#[async_trait]
pub trait StepSolver: Send + Sync {
    async fn solve(&self, ctx: &StepContext<'_>) -> String;
}

/// Solves a step with a single model call
pub struct LlmStepSolver {
    gateway: ModelGateway,
    temperature: f32,
}

impl LlmStepSolver {
    pub const fn new(gateway: ModelGateway, temperature: f32) -> Self {
        Self {
            gateway,
            temperature,
        }
    }
}

#[async_trait]
impl StepSolver for LlmStepSolver {
    async fn solve(&self, ctx: &StepContext<'_>) -> String {
        let history = if ctx.history.trim().is_empty() { "None" } else { ctx.history };
        let plan = ctx.remaining.to_string();
        let prompt = fill_template(EXECUTOR_PROMPT_TEMPLATE, &[
            ("question", ctx.task),
            ("plan", &plan),
            ("history", history),
            ("current_step", ctx.step),
        ]);

        self.gateway
            .think(&[Message::user(prompt)], self.temperature)
            .await
    }
}

/// Solves a step by running a tool-using ReAct sub-loop
pub struct ReactStepSolver {
    agent: ReactAgent,
}

impl ReactStepSolver {
    pub const fn new(agent: ReactAgent) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl StepSolver for ReactStepSolver {
    async fn solve(&self, ctx: &StepContext<'_>) -> String {
        let history = if ctx.history.trim().is_empty() { "None" } else { ctx.history };
        let question = format!(
            "Overall task: {}\nCompleted steps and results:\n{}\nCurrent step (solve only this): {}",
            ctx.task, history, ctx.step
        );

        let run = self.agent.run(&question).await;
        match run.outcome {
            ReactOutcome::Finished { answer, .. } => answer,
            ReactOutcome::MaxStepsReached { steps } => format!(
                "Step not completed: no final answer after {steps} reasoning steps. Last observations:\n{}",
                run.history.iter().rev().take(2).rev().cloned().collect::<Vec<_>>().join("\n")
            ),
        }
    }
}

/// Loop limits and sampling settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanSolveConfig {
    /// Replans allowed in one run
    #[serde(default = "default_max_replans")]
    pub max_replans: usize,

    /// Steps executed in one run, across all plans
    #[serde(default = "default_max_step_executions")]
    pub max_step_executions: usize,

    #[serde(default = "default_planner_temperature")]
    pub planner_temperature: f32,

    #[serde(default)]
    pub evaluator_temperature: f32,
}

const fn default_max_replans() -> usize {
    3
}
const fn default_max_step_executions() -> usize {
    20
}
const fn default_planner_temperature() -> f32 {
    0.7
}

impl Default for PlanSolveConfig {
    fn default() -> Self {
        Self {
            max_replans: default_max_replans(),
            max_step_executions: default_max_step_executions(),
            planner_temperature: default_planner_temperature(),
            evaluator_temperature: 0.0,
        }
    }
}

/// Why a run stopped without an answer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    /// The initial plan was empty or unparseable
    EmptyPlan,

    /// A replan after a rejected step came back empty
    EmptyReplan { failure_reason: String },

    /// A step was rejected after the replan budget was spent
    ReplanLimit { max_replans: usize, failure_reason: String },

    /// The step-execution budget was spent with work still queued
    StepLimit { max_step_executions: usize },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPlan => f.write_str("no plan could be generated"),
            Self::EmptyReplan { failure_reason } => {
                write!(f, "replanning failed after: {failure_reason}")
            }
            Self::ReplanLimit {
                max_replans,
                failure_reason,
            } => write!(f, "replan limit ({max_replans}) reached after: {failure_reason}"),
            Self::StepLimit {
                max_step_executions,
            } => write!(f, "step limit ({max_step_executions}) reached"),
        }
    }
}

/// Terminal status of a run
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlanSolveStatus {
    /// Every step was accepted; the answer is the last accepted result
    Done { answer: String },

    /// Stopped without an answer
    Aborted { reason: AbortReason },
}

/// Result of one plan-solve-replan run
#[derive(Clone, Debug)]
pub struct PlanSolveRun {
    pub run_id: Uuid,
    pub status: PlanSolveStatus,

    /// Accepted steps, in order
    pub history: Vec<HistoryEntry>,
    pub executed_steps: usize,
    pub replans: usize,
}

impl PlanSolveRun {
    pub fn answer(&self) -> Option<&str> {
        match &self.status {
            PlanSolveStatus::Done { answer } => Some(answer),
            PlanSolveStatus::Aborted { .. } => None,
        }
    }
}

enum State {
    Planning,
    Executing,
    Evaluating { step: String, result: String },
    Replanning { failure_reason: String },
    Done,
    Aborted(AbortReason),
}

/// Plan-and-solve agent with evaluation and replanning
pub struct PlanSolveAgent {
    planner: Planner,
    solver: Arc<dyn StepSolver>,
    evaluator: Evaluator,
    presenter: Arc<dyn Presenter>,
    config: PlanSolveConfig,
}

impl PlanSolveAgent {
    pub fn new(gateway: ModelGateway, solver: Arc<dyn StepSolver>, config: PlanSolveConfig) -> Self {
        Self {
            planner: Planner::new(gateway.clone(), config.planner_temperature),
            evaluator: Evaluator::new(gateway).with_temperature(config.evaluator_temperature),
            solver,
            presenter: Arc::new(TracingPresenter),
            config,
        }
    }

    #[must_use]
    pub fn with_presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.presenter = presenter;
        self
    }

    pub const fn config(&self) -> &PlanSolveConfig {
        &self.config
    }

    /// Run the loop on a task
    pub async fn run(&self, task: &str) -> PlanSolveRun {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("plan_solve_run", %run_id);
        self.drive(task, run_id).instrument(span).await
    }

    async fn drive(&self, task: &str, run_id: Uuid) -> PlanSolveRun {
        self.presenter.render(task.into(), Some("Task Start"));

        let mut plan = Plan::default();
        let mut history: Vec<HistoryEntry> = Vec::new();
        let mut final_answer = String::new();
        let mut executed_steps = 0;
        let mut replans = 0;
        let mut state = State::Planning;

        let status = loop {
            state = match state {
                State::Planning => {
                    plan = self.planner.plan(task).await;
                    if plan.is_empty() {
                        self.presenter
                            .render("Could not generate a plan.".into(), Some("Plan Error"));
                        State::Aborted(AbortReason::EmptyPlan)
                    } else {
                        self.presenter.render(plan_data(&plan), Some("Plan Generated"));
                        State::Executing
                    }
                }

                State::Executing => {
                    if plan.is_empty() {
                        State::Done
                    } else if executed_steps >= self.config.max_step_executions {
                        State::Aborted(AbortReason::StepLimit {
                            max_step_executions: self.config.max_step_executions,
                        })
                    } else if let Some(step) = plan.pop_front() {
                        executed_steps += 1;
                        let rendered = render_history(&history);
                        let ctx = StepContext {
                            task,
                            remaining: &plan,
                            history: &rendered,
                            step: &step,
                        };
                        tracing::info!(step = %step, executed_steps, "Executing step");
                        let result = self.solver.solve(&ctx).await;
                        self.presenter.render(
                            format!("Step: {step}\nResult: {result}").into(),
                            Some("Executing Step"),
                        );
                        State::Evaluating { step, result }
                    } else {
                        State::Done
                    }
                }

                State::Evaluating { step, result } => {
                    let verdict = self.evaluator.evaluate(&step, &result).await;
                    if verdict.success {
                        final_answer.clone_from(&result);
                        history.push(HistoryEntry {
                            step,
                            result,
                            feedback: Some(verdict.reason),
                        });
                        State::Executing
                    } else {
                        tracing::info!(step = %step, reason = %verdict.reason, "Step rejected");
                        self.presenter.render(
                            format!("Critic rejected the step: {}", verdict.reason).into(),
                            Some("Execution Rejected"),
                        );
                        State::Replanning {
                            failure_reason: verdict.reason,
                        }
                    }
                }

                State::Replanning { failure_reason } => {
                    if replans >= self.config.max_replans {
                        State::Aborted(AbortReason::ReplanLimit {
                            max_replans: self.config.max_replans,
                            failure_reason,
                        })
                    } else {
                        replans += 1;
                        let remaining = self
                            .planner
                            .replan(task, &render_history(&history), &failure_reason)
                            .await;
                        if remaining.is_empty() {
                            State::Aborted(AbortReason::EmptyReplan { failure_reason })
                        } else {
                            self.presenter.render(plan_data(&remaining), Some("Plan Updated"));
                            plan = remaining;
                            State::Executing
                        }
                    }
                }

                State::Done => {
                    self.presenter.render(final_answer.clone().into(), Some("Final Answer"));
                    break PlanSolveStatus::Done {
                        answer: final_answer,
                    };
                }

                State::Aborted(reason) => {
                    tracing::warn!(reason = %reason, "Run aborted");
                    self.presenter
                        .render(format!("Task stopped: {reason}").into(), Some("Stop"));
                    break PlanSolveStatus::Aborted { reason };
                }
            };
        };

        PlanSolveRun {
            run_id,
            status,
            history,
            executed_steps,
            replans,
        }
    }
}

fn plan_data(plan: &Plan) -> Presentation {
    Presentation::Data(serde_json::json!(plan.iter().collect::<Vec<_>>()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::RetryPolicy;
    use crate::mock::ScriptedProvider;
    use crate::presenter::NullPresenter;
    use crate::provider::GenerationOptions;
    use crate::react::ReactAgentBuilder;
    use crate::tool::CalculatorTool;

    const OK: &str = r#"{"success": true, "reason": "clear answer"}"#;
    const BAD: &str = r#"{"success": false, "reason": "tool failure"}"#;

    fn gateway(provider: &Arc<ScriptedProvider>) -> ModelGateway {
        ModelGateway::new(provider.clone(), GenerationOptions::default())
            .with_retry(RetryPolicy::none())
    }

    fn llm_agent(provider: &Arc<ScriptedProvider>, config: PlanSolveConfig) -> PlanSolveAgent {
        let gw = gateway(provider);
        let solver = Arc::new(LlmStepSolver::new(gw.clone(), 0.0));
        PlanSolveAgent::new(gw, solver, config).with_presenter(Arc::new(NullPresenter))
    }

    #[tokio::test]
    async fn test_all_steps_succeed() {
        let provider = Arc::new(ScriptedProvider::with_replies([
            "```python\n['first', 'second', 'third']\n```",
            "r1", OK, "r2", OK, "r3", OK,
        ]));
        let run = llm_agent(&provider, PlanSolveConfig::default()).run("task").await;

        assert_eq!(run.status, PlanSolveStatus::Done { answer: "r3".into() });
        assert_eq!(run.executed_steps, 3);
        assert_eq!(run.replans, 0);
        assert_eq!(provider.call_count(), 7);
        let steps: Vec<_> = run.history.iter().map(|e| e.step.as_str()).collect();
        assert_eq!(steps, ["first", "second", "third"]);
        assert_eq!(run.history[0].feedback.as_deref(), Some("clear answer"));
    }

    #[tokio::test]
    async fn test_failed_step_is_replaced_by_new_remainder() {
        let provider = Arc::new(ScriptedProvider::with_replies([
            "['a', 'b', 'c']",
            "ra", OK,
            "rb", BAD,
            "['x', 'y']",
            "rx", OK,
            "ry", OK,
        ]));
        let run = llm_agent(&provider, PlanSolveConfig::default()).run("task").await;

        assert_eq!(run.answer(), Some("ry"));
        assert_eq!(run.replans, 1);
        assert_eq!(run.executed_steps, 4);
        let steps: Vec<_> = run.history.iter().map(|e| e.step.as_str()).collect();
        assert_eq!(steps, ["a", "x", "y"]);
        assert!(run.history.iter().all(|e| e.result != "rb"));

        // replan prompt sees accepted history and the failure reason only
        let replan_prompt = provider.prompt(5).unwrap();
        assert!(replan_prompt.contains("Step: a\nResult: ra"));
        assert!(!replan_prompt.contains("Result: rb"));
        assert!(replan_prompt.contains("tool failure"));

        // step 'c' from the original plan never ran
        assert!(provider.calls().iter().all(|call| {
            !call[0].content.contains("# Current step:\nc\n")
        }));
    }

    #[tokio::test]
    async fn test_empty_plan_aborts_without_execution() {
        let provider = Arc::new(ScriptedProvider::with_replies(["no idea"]));
        let run = llm_agent(&provider, PlanSolveConfig::default()).run("task").await;

        assert_eq!(run.status, PlanSolveStatus::Aborted { reason: AbortReason::EmptyPlan });
        assert_eq!(run.executed_steps, 0);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_replan_aborts() {
        let provider = Arc::new(ScriptedProvider::with_replies([
            "['a']", "ra", BAD, "sorry, cannot",
        ]));
        let run = llm_agent(&provider, PlanSolveConfig::default()).run("task").await;

        assert_eq!(
            run.status,
            PlanSolveStatus::Aborted {
                reason: AbortReason::EmptyReplan { failure_reason: "tool failure".into() }
            }
        );
        assert!(run.history.is_empty());
    }

    #[tokio::test]
    async fn test_replan_budget_is_enforced() {
        let provider = Arc::new(ScriptedProvider::with_replies([
            "['a']", "ra", BAD, "['b']", "rb", BAD,
        ]));
        let config = PlanSolveConfig {
            max_replans: 1,
            ..PlanSolveConfig::default()
        };
        let run = llm_agent(&provider, config).run("task").await;

        assert!(matches!(
            run.status,
            PlanSolveStatus::Aborted { reason: AbortReason::ReplanLimit { max_replans: 1, .. } }
        ));
        assert_eq!(provider.call_count(), 6);
    }

    #[tokio::test]
    async fn test_step_budget_is_enforced() {
        let provider = Arc::new(ScriptedProvider::with_replies([
            "['a', 'b', 'c']", "ra", OK, "rb", OK,
        ]));
        let config = PlanSolveConfig {
            max_step_executions: 2,
            ..PlanSolveConfig::default()
        };
        let run = llm_agent(&provider, config).run("task").await;

        assert_eq!(
            run.status,
            PlanSolveStatus::Aborted {
                reason: AbortReason::StepLimit { max_step_executions: 2 }
            }
        );
        assert_eq!(run.history.len(), 2);
    }

    #[tokio::test]
    async fn test_division_by_zero_explanation_is_accepted() {
        let explanation = "Division by zero is undefined, so 10 / 0 has no numeric result.";
        let follow_up = "Because 10 / 0 is undefined, adding 5 is also undefined.";
        let provider = Arc::new(ScriptedProvider::with_replies([
            r#"["Compute 10 / 0", "Add 5 to the result"]"#.to_owned(),
            r#"{"thought": "use the calculator", "action": {"name": "calculate", "args": {"expression": "10 / 0"}}}"#.to_owned(),
            format!(r#"{{"thought": "it failed", "action": {{"name": "Finish", "args": {{"answer": "{explanation}"}}}}}}"#),
            r#"{"success": true, "reason": "explains why the value is undefined"}"#.to_owned(),
            format!(r#"{{"thought": "follows", "action": {{"name": "finish", "args": {{"answer": "{follow_up}"}}}}}}"#),
            OK.to_owned(),
        ]));

        let gw = gateway(&provider);
        let react = ReactAgentBuilder::new()
            .gateway(gw.clone())
            .tool(CalculatorTool)
            .presenter(Arc::new(NullPresenter))
            .build()
            .unwrap();
        let agent = PlanSolveAgent::new(gw, Arc::new(ReactStepSolver::new(react)), PlanSolveConfig::default())
            .with_presenter(Arc::new(NullPresenter));

        let run = agent.run("compute 10 / 0, then add 5").await;

        assert_eq!(run.answer(), Some(follow_up));
        assert_eq!(run.history[0].result, explanation);
        assert_eq!(provider.call_count(), 6);
        assert!(provider.prompt(2).unwrap().contains("Tool Execution Error: Division by zero"));
    }

    #[tokio::test]
    async fn test_unfinished_react_step_is_judged_and_replanned() {
        let provider = Arc::new(ScriptedProvider::with_replies([
            "['look it up']",
            r#"{"thought": "check", "action": {"name": "calculate", "args": {"expression": "1 + 1"}}}"#,
            BAD,
            "['answer directly']",
            r#"{"thought": "done", "action": {"name": "finish", "args": {"answer": "2"}}}"#,
            OK,
        ]));

        let gw = gateway(&provider);
        let react = ReactAgentBuilder::new()
            .gateway(gw.clone())
            .tool(CalculatorTool)
            .max_steps(1)
            .presenter(Arc::new(NullPresenter))
            .build()
            .unwrap();
        let agent = PlanSolveAgent::new(gw, Arc::new(ReactStepSolver::new(react)), PlanSolveConfig::default())
            .with_presenter(Arc::new(NullPresenter));

        let run = agent.run("task").await;

        assert_eq!(run.answer(), Some("2"));
        assert_eq!(run.replans, 1);
        let steps: Vec<_> = run.history.iter().map(|e| e.step.as_str()).collect();
        assert_eq!(steps, ["answer directly"]);

        let critic_prompt = provider.prompt(2).unwrap();
        assert!(critic_prompt.contains("Result: Step not completed: no final answer after 1 reasoning steps"));
        assert!(critic_prompt.contains("Observation: 1 + 1 = 2"));
        assert!(provider.prompt(3).unwrap().contains("tool failure"));
    }

    #[tokio::test]
    async fn test_placeholder_text_in_steps_is_not_expanded() {
        let provider = Arc::new(ScriptedProvider::with_replies([
            r#"["Print the literal {history} token"]"#,
            "printed",
            OK,
        ]));
        let run = llm_agent(&provider, PlanSolveConfig::default()).run("task").await;

        assert_eq!(run.answer(), Some("printed"));
        let solver_prompt = provider.prompt(1).unwrap();
        assert!(solver_prompt.contains("Print the literal {history} token"));
        assert!(provider.prompt(2).unwrap().contains("Task step: Print the literal {history} token"));
    }

    #[test]
    fn test_render_history() {
        let entries = vec![HistoryEntry {
            step: "s".into(),
            result: "r".into(),
            feedback: None,
        }];
        assert_eq!(render_history(&entries), "Step: s\nResult: r\n\n");
    }
}
