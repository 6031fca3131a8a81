//! Code Reflection Loop
//!
//! Generate code, run it, ask a critic about the result, and regenerate
//! from the critique until the critic signals success or the iteration
//! budget runs out. The last iteration runs without a critique.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::executor::{ActionExecutor, Observation};
use crate::gateway::ModelGateway;
use crate::message::Message;
use crate::parser::{ensure_code_tags, extract_tagged_code};
use crate::presenter::{Presentation, Presenter, TracingPresenter};
use crate::template::fill_template;

/// Markers in a critique that end the loop
pub const SUCCESS_SIGNALS: [&str; 2] = ["SC_SUCCESS", "NO_ISSUES"];

const GENERATOR_PROMPT_TEMPLATE: &str = r"You are a Python expert writing code that runs in a prepared environment.
The names `df` (a pandas DataFrame), `pd` (pandas) and `plt` (matplotlib.pyplot) are already defined.

Context:
{context}

User instruction: {instruction}
{artifact}
{feedback}
Requirements for the code:
1. Use pandas and matplotlib only.
2. Do not call plt.show(); close all plots with plt.close().
3. Add all necessary import statements.

Return ONLY the code wrapped in <execute_python> tags.";

const REFLECTOR_PROMPT_TEMPLATE: &str = r#"You are a careful code reviewer.
Critique the code and its execution result against the instruction, then return improved code.

Instruction:
{instruction}

Context:
{context}

Code:
{code}

Execution result:
{observation}

OUTPUT FORMAT (STRICT!):
1) First line: a valid JSON object with ONLY the "feedback" field.
Example: {"feedback": "The legend is unclear and the axis labels overlap."}
If the result fully satisfies the instruction, the feedback must contain SC_SUCCESS.

2) After a newline, output ONLY the refined Python code wrapped in:
<execute_python>
...
</execute_python>"#;

/// Loop settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReflectionConfig {
    /// Critique rounds; the loop executes at most one more time than this
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// File the generated code must leave behind to count as a clean run
    #[serde(default)]
    pub artifact: Option<PathBuf>,

    #[serde(default)]
    pub temperature: f32,
}

const fn default_max_iterations() -> usize {
    3
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            artifact: None,
            temperature: 0.0,
        }
    }
}

/// A critique split into feedback and optional refined code
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reflection {
    pub feedback: String,
    pub refined_code: Option<String>,
}

impl Reflection {
    /// First line is a `{"feedback": ...}` object (or raw feedback), the rest is code
    pub fn parse(response: &str) -> Self {
        let response = response.trim();
        let (first, rest) = response.split_once('\n').unwrap_or((response, ""));
        let first = first.trim();

        let feedback = match serde_json::from_str::<serde_json::Value>(first) {
            Ok(value) => value
                .get("feedback")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("No feedback provided")
                .to_owned(),
            Err(_) => first.to_owned(),
        };

        let refined_code = if rest.trim().is_empty() {
            None
        } else {
            extract_tagged_code(&ensure_code_tags(rest)).filter(|code| !code.is_empty())
        };

        Self {
            feedback,
            refined_code,
        }
    }

    pub fn is_success(&self) -> bool {
        SUCCESS_SIGNALS.iter().any(|s| self.feedback.contains(s))
    }
}

/// One generate-execute(-reflect) round
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReflectionIteration {
    pub iteration: usize,
    pub code: String,
    pub observation: Observation,

    /// Absent on the final, unreviewed round
    pub feedback: Option<String>,
}

/// How a reflection run ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReflectionStatus {
    /// The critic signalled success
    Success,

    /// The budget ran out; the last round's code is the best available
    MaxIterationsReached,

    /// A model call failed, so there was nothing to run or review
    Failed { message: String },
}

/// Result of one reflection run
#[derive(Clone, Debug)]
pub struct ReflectionRun {
    pub run_id: Uuid,
    pub status: ReflectionStatus,
    pub history: Vec<ReflectionIteration>,
}

impl ReflectionRun {
    /// Code from the last executed round
    pub fn final_code(&self) -> Option<&str> {
        self.history.last().map(|it| it.code.as_str())
    }

    pub fn final_observation(&self) -> Option<&Observation> {
        self.history.last().map(|it| &it.observation)
    }
}

/// Generate → execute → reflect → regenerate
pub struct CodeReflectionAgent {
    gateway: ModelGateway,
    executor: ActionExecutor,
    presenter: Arc<dyn Presenter>,
    config: ReflectionConfig,
}

impl CodeReflectionAgent {
    /// `executor` needs a sandbox for the generated code to run anywhere
    pub fn new(gateway: ModelGateway, executor: ActionExecutor, config: ReflectionConfig) -> Self {
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

    pub async fn run(&self, instruction: &str, context: &str) -> ReflectionRun {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("reflection_run", %run_id);
        self.drive(instruction, context, run_id).instrument(span).await
    }

    async fn drive(&self, instruction: &str, context: &str, run_id: Uuid) -> ReflectionRun {
        let mut history: Vec<ReflectionIteration> = Vec::new();
        let mut feedback: Option<String> = None;
        let mut next_code: Option<String> = None;
        let finish = |status: ReflectionStatus, history: Vec<ReflectionIteration>| ReflectionRun {
            run_id,
            status,
            history,
        };

        for iteration in 0..=self.config.max_iterations {
            let label = format!("Iteration {}/{}", iteration + 1, self.config.max_iterations + 1);
            tracing::info!(iteration = iteration + 1, "Reflection round");

            let code = match next_code.take() {
                Some(code) => code,
                None => match self.generate(instruction, context, feedback.as_deref()).await {
                    Ok(code) => code,
                    Err(message) => {
                        tracing::warn!(error = %message, "Code generation failed");
                        return finish(ReflectionStatus::Failed { message }, history);
                    }
                },
            };
            self.presenter
                .render(code.clone().into(), Some(&format!("Generated Code ({label})")));

            let observation = match &self.config.artifact {
                Some(path) => self.executor.run_code_for_artifact(&code, path).await,
                None => self.executor.run_code(&code).await,
            };
            self.presenter
                .render(observation.text.clone().into(), Some(&format!("Execution ({label})")));
            if observation.success {
                if let Some(path) = &self.config.artifact {
                    self.presenter.render(Presentation::Image(path.clone()), Some("Artifact"));
                }
            }

            if iteration == self.config.max_iterations {
                history.push(ReflectionIteration {
                    iteration,
                    code,
                    observation,
                    feedback: None,
                });
                return finish(ReflectionStatus::MaxIterationsReached, history);
            }

            let reflection = match self.reflect(instruction, context, &code, &observation).await {
                Ok(reflection) => reflection,
                Err(message) => {
                    tracing::warn!(error = %message, "Reflection failed");
                    history.push(ReflectionIteration {
                        iteration,
                        code,
                        observation,
                        feedback: None,
                    });
                    return finish(ReflectionStatus::Failed { message }, history);
                }
            };
            self.presenter
                .render(reflection.feedback.clone().into(), Some(&format!("Feedback ({label})")));

            let success = reflection.is_success();
            history.push(ReflectionIteration {
                iteration,
                code,
                observation,
                feedback: Some(reflection.feedback.clone()),
            });
            if success {
                return finish(ReflectionStatus::Success, history);
            }

            next_code = reflection.refined_code;
            feedback = Some(reflection.feedback);
        }

        finish(ReflectionStatus::MaxIterationsReached, history)
    }

    async fn generate(
        &self,
        instruction: &str,
        context: &str,
        feedback: Option<&str>,
    ) -> std::result::Result<String, String> {
        let artifact = self.config.artifact.as_ref().map_or_else(String::new, |path| {
            format!("Save the result to '{}'.\n", path.display())
        });
        let feedback = feedback.map_or_else(String::new, |f| {
            format!("Feedback on the previous attempt (address it):\n{f}\n")
        });
        let prompt = fill_template(GENERATOR_PROMPT_TEMPLATE, &[
            ("context", context),
            ("instruction", instruction),
            ("artifact", &artifact),
            ("feedback", &feedback),
        ]);

        let response = self
            .gateway
            .complete(&[Message::user(prompt)], self.config.temperature)
            .await
            .map_err(|e| format!("Generation failed: {e}"))?;

        let tagged = ensure_code_tags(&response);
        Ok(extract_tagged_code(&tagged).unwrap_or_else(|| response.trim().to_owned()))
    }

    async fn reflect(
        &self,
        instruction: &str,
        context: &str,
        code: &str,
        observation: &Observation,
    ) -> std::result::Result<Reflection, String> {
        let prompt = fill_template(REFLECTOR_PROMPT_TEMPLATE, &[
            ("instruction", instruction),
            ("context", context),
            ("code", code),
            ("observation", &observation.text),
        ]);

        self.gateway
            .complete(&[Message::user(prompt)], self.config.temperature)
            .await
            .map(|response| Reflection::parse(&response))
            .map_err(|e| format!("Reflection failed: {e}"))
    }
}
