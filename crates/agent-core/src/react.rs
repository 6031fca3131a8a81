//! ReAct Loop
//!
//! Think → act → observe, bounded by a step budget and ended by an explicit
//! `finish` action. Every action/observation pair is appended to a flat
//! history that is re-injected into the next prompt, errors included.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::executor::{is_finish, ActionExecutor};
use crate::gateway::ModelGateway;
use crate::message::Message;
use crate::parser::{parse_action, Action, ParsedStep};
use crate::presenter::{Presentation, Presenter, TracingPresenter};
use crate::template::fill_template;
use crate::tool::{Tool, ToolRegistry};

/// Text returned by [`ReactAgent::ask`] when the step budget runs out
pub const MAX_STEPS_MESSAGE: &str = "Max steps reached.";

/// History line appended when a reply could not be parsed
const FORMAT_CORRECTION: &str =
    "System Observation: the previous output was not valid JSON. Reply strictly with the required JSON object.";

const REACT_PROMPT_TEMPLATE: &str = r#"You are an intelligent assistant able to call external tools.

# Available tools
{tools}

# Output format
- Output your reasoning and your action **strictly** as the JSON below. Do not output anything that is not JSON.
{
    "thought": "your reasoning: analyse the problem, break it down and plan the next action",
    "action": {
        "name": "tool name (for example calculate, or Finish)",
        "args": {
            "arg_name": "arg_value"
        }
    }
}

- Once you have gathered enough information to answer the question, set the action name to "Finish" and put the final answer in the "answer" field of args.
- Example: { "thought": "I found the answer...", "action": { "name": "Finish", "args": { "answer": "this is the final answer" } } }

# Current task
Solve the following problem:
Question: {question}
History: {history}"#;

/// ReAct configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReactConfig {
    /// Think-act-observe cycles before giving up
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Sampling temperature for the reasoning calls
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

const fn default_max_steps() -> usize {
    5
}
const fn default_temperature() -> f32 {
    0.7
}

impl Default for ReactConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            temperature: default_temperature(),
        }
    }
}

/// How a ReAct run ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReactOutcome {
    /// The model emitted `finish`
    Finished { answer: String, steps: usize },

    /// The step budget ran out without a `finish`
    MaxStepsReached { steps: usize },
}

/// Result of one ReAct run
#[derive(Clone, Debug)]
pub struct ReactRun {
    pub run_id: Uuid,
    pub outcome: ReactOutcome,

    /// Flat `Action:` / `Observation:` lines, in order
    pub history: Vec<String>,
}

impl ReactRun {
    /// Final answer, if the model finished
    pub fn answer(&self) -> Option<&str> {
        match &self.outcome {
            ReactOutcome::Finished { answer, .. } => Some(answer),
            ReactOutcome::MaxStepsReached { .. } => None,
        }
    }
}

/// ReAct agent
#[derive(Clone)]
pub struct ReactAgent {
    gateway: ModelGateway,
    executor: ActionExecutor,
    presenter: Arc<dyn Presenter>,
    config: ReactConfig,
}

impl ReactAgent {
    /// Create a new agent
    pub fn new(gateway: ModelGateway, executor: ActionExecutor, config: ReactConfig) -> Self {
        Self {
            gateway,
            executor,
            presenter: Arc::new(TracingPresenter),
            config,
        }
    }

    #[must_use]
    pub fn with_presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.presenter = presenter;
        self
    }

    /// Get configuration
    pub const fn config(&self) -> &ReactConfig {
        &self.config
    }

    /// Answer a question, or [`MAX_STEPS_MESSAGE`] when the budget runs out
    pub async fn ask(&self, question: &str) -> String {
        self.run(question)
            .await
            .answer()
            .map_or_else(|| MAX_STEPS_MESSAGE.to_owned(), str::to_owned)
    }

    /// Run the loop on a question
    pub async fn run(&self, question: &str) -> ReactRun {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("react_run", %run_id);

        async {
            let mut history = Vec::new();
            let outcome = self.drive(question, &mut history).await;
            ReactRun {
                run_id,
                outcome,
                history,
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, question: &str, history: &mut Vec<String>) -> ReactOutcome {
        self.presenter
            .render(format!("Starting task: {question}").into(), Some("System Start"));

        let tools = self.executor.tools().describe();

        for step in 1..=self.config.max_steps {
            let joined = history.join("\n");
            let prompt = fill_template(REACT_PROMPT_TEMPLATE, &[
                ("tools", &tools),
                ("question", question),
                ("history", &joined),
            ]);

            let response = self
                .gateway
                .think(&[Message::user(prompt)], self.config.temperature)
                .await;

            let parsed = parse_action(&response);
            if let Some(thought) = parsed.as_ref().and_then(|p| p.thought.as_deref()) {
                self.presenter
                    .render(thought.into(), Some(&format!("Step {step}: Thought")));
            }

            let Some(ParsedStep {
                action: Some(action),
                ..
            }) = parsed
            else {
                tracing::warn!(step, "Reply carried no usable action");
                self.presenter.render(
                    format!("Could not parse an action.\nRaw response: {response}").into(),
                    Some("Warning"),
                );
                history.push(FORMAT_CORRECTION.to_owned());
                continue;
            };

            if is_finish(&action.name) {
                let answer = finish_answer(&action);
                tracing::info!(step, "Finished");
                self.presenter.render(answer.clone().into(), Some("Final Answer"));
                return ReactOutcome::Finished {
                    answer,
                    steps: step,
                };
            }

            self.presenter.render(
                Presentation::Data(serde_json::json!({ "tool": action.name, "args": action.args })),
                Some(&format!("Step {step}: Action")),
            );

            let observation = self.executor.execute(&action).await;

            self.presenter.render(
                observation.text.clone().into(),
                Some(&format!("Step {step}: Observation")),
            );

            history.push(format!("Action: {}", action.to_record()));
            history.push(format!("Observation: {}", observation.text));
        }

        tracing::info!(max_steps = self.config.max_steps, "Step budget exhausted");
        self.presenter
            .render("Max steps reached, stopping.".into(), Some("Stop"));
        ReactOutcome::MaxStepsReached {
            steps: self.config.max_steps,
        }
    }
}

/// The `answer` argument of a finish action, or the whole argument value
fn finish_answer(action: &Action) -> String {
    match action.args.get("answer") {
        Some(Value::String(answer)) => answer.clone(),
        Some(other) => other.to_string(),
        None => match &action.args {
            Value::String(answer) => answer.clone(),
            other => other.to_string(),
        },
    }
}

/// Builder for a [`ReactAgent`]
pub struct ReactAgentBuilder {
    gateway: Option<ModelGateway>,
    tools: ToolRegistry,
    presenter: Option<Arc<dyn Presenter>>,
    config: ReactConfig,
}

impl Default for ReactAgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReactAgentBuilder {
    pub fn new() -> Self {
        Self {
            gateway: None,
            tools: ToolRegistry::new(),
            presenter: None,
            config: ReactConfig::default(),
        }
    }

    #[must_use]
    pub fn gateway(mut self, gateway: ModelGateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    #[must_use]
    pub fn tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.tools.register(tool);
        self
    }

    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    #[must_use]
    pub const fn max_steps(mut self, max: usize) -> Self {
        self.config.max_steps = max;
        self
    }

    #[must_use]
    pub const fn temperature(mut self, temp: f32) -> Self {
        self.config.temperature = temp;
        self
    }

    pub fn build(self) -> Result<ReactAgent> {
        let gateway = self
            .gateway
            .ok_or_else(|| AgentError::Config("Model gateway is required".into()))?;
        if self.config.max_steps == 0 {
            return Err(AgentError::Config("max_steps must be at least 1".into()));
        }

        let executor = ActionExecutor::new(Arc::new(self.tools));
        let agent = ReactAgent::new(gateway, executor, self.config);
        Ok(match self.presenter {
            Some(presenter) => agent.with_presenter(presenter),
            None => agent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::RetryPolicy;
    use crate::mock::ScriptedProvider;
    use crate::presenter::NullPresenter;
    use crate::provider::GenerationOptions;
    use crate::tool::CalculatorTool;

    fn agent(provider: Arc<ScriptedProvider>, max_steps: usize) -> ReactAgent {
        let gateway =
            ModelGateway::new(provider, GenerationOptions::default()).with_retry(RetryPolicy::none());
        ReactAgentBuilder::new()
            .gateway(gateway)
            .tool(CalculatorTool)
            .presenter(Arc::new(NullPresenter))
            .max_steps(max_steps)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_finish_returns_answer_without_further_calls() {
        let provider = Arc::new(ScriptedProvider::with_replies([
            r#"{"thought": "known", "action": {"name": "finish", "args": {"answer": "42"}}}"#,
            r#"{"thought": "unreachable", "action": {"name": "finish", "args": {"answer": "0"}}}"#,
        ]));
        let run = agent(provider.clone(), 5).run("what is six times seven?").await;

        assert_eq!(run.answer(), Some("42"));
        assert_eq!(run.outcome, ReactOutcome::Finished { answer: "42".into(), steps: 1 });
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_max_steps_without_finish() {
        let provider = Arc::new(
            ScriptedProvider::new().with_fallback(
                r#"{"thought": "again", "action": {"name": "calculate", "args": {"expression": "1 + 1"}}}"#,
            ),
        );
        let agent = agent(provider.clone(), 5);
        let run = agent.run("loop forever").await;

        assert_eq!(run.outcome, ReactOutcome::MaxStepsReached { steps: 5 });
        assert_eq!(run.answer(), None);
        assert_eq!(provider.call_count(), 5);
        assert_eq!(run.history.len(), 10);

        assert_eq!(agent.ask("loop forever").await, MAX_STEPS_MESSAGE);
    }

    #[tokio::test]
    async fn test_tool_observation_is_fed_back() {
        let provider = Arc::new(ScriptedProvider::with_replies([
            r#"{"thought": "divide", "action": {"name": "calculate", "args": {"expression": "10 / 0"}}}"#,
            r#"{"thought": "undefined", "action": {"name": "Finish", "args": {"answer": "undefined"}}}"#,
        ]));
        let run = agent(provider.clone(), 5).run("10 / 0?").await;

        assert_eq!(run.answer(), Some("undefined"));
        assert_eq!(run.history.len(), 2);
        assert!(run.history[0].starts_with("Action: "));
        assert_eq!(run.history[1], "Observation: Tool Execution Error: Division by zero");
        assert!(provider.prompt(1).unwrap().contains("Observation: Tool Execution Error: Division by zero"));
    }

    #[tokio::test]
    async fn test_parse_failure_adds_correction_and_counts_as_step() {
        let provider = Arc::new(ScriptedProvider::with_replies([
            "I think the answer is 4",
            r#"{"thought": "ok", "action": {"name": "FINISH", "args": {"answer": 4}}}"#,
        ]));
        let run = agent(provider.clone(), 5).run("2 + 2?").await;

        assert_eq!(run.outcome, ReactOutcome::Finished { answer: "4".into(), steps: 2 });
        assert_eq!(run.history, vec![FORMAT_CORRECTION.to_owned()]);
        assert!(provider.prompt(1).unwrap().contains("not valid JSON"));
    }

    #[tokio::test]
    async fn test_unknown_tool_and_transport_error_keep_looping() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_reply(r#"{"thought": "x", "action": {"name": "search", "args": {"query": "q"}}}"#);
        provider.push_error(AgentError::Provider("socket closed".into()));
        provider.push_reply(r#"{"thought": "y", "action": {"name": "finish", "args": {"answer": "done"}}}"#);

        let run = agent(provider, 5).run("q").await;
        assert_eq!(run.answer(), Some("done"));
        assert!(run.history[1].contains("no tool named 'search'"));
        assert_eq!(run.history[2], FORMAT_CORRECTION);
    }

    #[test]
    fn test_builder_requires_gateway() {
        assert!(matches!(ReactAgentBuilder::new().build(), Err(AgentError::Config(_))));
    }
}
