//! Evaluator
//!
//! A second model call that judges whether a step's result counts as
//! success before it is committed to history.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::gateway::ModelGateway;
use crate::message::Message;
use crate::parser::extract_json_object;
use crate::template::fill_template;

/// Reason recorded when the critic's reply cannot be parsed
pub const PARSE_FAILURE_REASON: &str = "evaluator parse failure, assuming success";

const EVAL_PROMPT_TEMPLATE: &str = r#"You are an impartial judge. Decide whether the result of the task step below is a success.

Task step: {step}
Result: {result}

Criteria:
1. A clear answer counts as SUCCESS, even if the answer is "no solution" or "does not exist", as long as it is a reasoned conclusion.
2. A system error, a failed tool call, or "I don't know" without any justification counts as FAILURE.
3. In particular, a result that explains why something cannot be computed is a SUCCESS.

Reply with JSON only, in this format:
```json
{
    "success": true,
    "reason": "short justification"
}
```"#;

/// The critic's judgment of one step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationVerdict {
    pub success: bool,
    pub reason: String,
}

impl EvaluationVerdict {
    pub fn success(reason: impl Into<String>) -> Self {
        Self {
            success: true,
            reason: reason.into(),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: reason.into(),
        }
    }

    /// Verdict from critic output
    ///
    /// `None` when no JSON object is present or it carries no boolean
    /// `success`; a missing `reason` becomes "Unknown reason".
    pub fn parse(text: &str) -> Option<Self> {
        let object = extract_json_object(text)?;
        let success = object.get("success").and_then(Value::as_bool)?;
        let reason = object
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("Unknown reason")
            .to_owned();
        Some(Self { success, reason })
    }
}

/// LLM-backed critic
#[derive(Clone)]
pub struct Evaluator {
    gateway: ModelGateway,
    temperature: f32,
}

impl Evaluator {
    pub const fn new(gateway: ModelGateway) -> Self {
        Self {
            gateway,
            temperature: 0.0,
        }
    }

    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Judge one step result
    ///
    /// A failed model call or an unparseable reply is treated as success
    /// so a formatting glitch in the critic never stalls the run.
    pub async fn evaluate(&self, step: &str, result: &str) -> EvaluationVerdict {
        let prompt = fill_template(EVAL_PROMPT_TEMPLATE, &[("step", step), ("result", result)]);

        let response = match self
            .gateway
            .complete(&[Message::user(prompt)], self.temperature)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Evaluator call failed");
                return EvaluationVerdict::success(PARSE_FAILURE_REASON);
            }
        };

        if let Some(verdict) = EvaluationVerdict::parse(&response) {
            tracing::debug!(success = verdict.success, reason = %verdict.reason, "Step evaluated");
            verdict
        } else {
            tracing::warn!(response = %response, "Could not parse evaluator reply");
            EvaluationVerdict::success(PARSE_FAILURE_REASON)
        }
    }
}
