//! Planner
//!
//! Breaks a task into an ordered list of sub-tasks, and produces a fresh
//! list for the remaining work after a step has been rejected.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::gateway::ModelGateway;
use crate::message::Message;
use crate::parser::parse_plan;
use crate::template::fill_template;

const PLANNER_PROMPT_TEMPLATE: &str = r#"You are a top-tier AI planning expert. Your job is to break the user's complex problem down into an action plan made of several simple steps.
Make sure every step is an independent, executable sub-task, and that the steps are in strict logical order.
Your output must be a Python list in which every element is a string describing one sub-task.

Problem: {question}

Output your plan strictly in the following format; the ```python prefix and ``` suffix are required:
```python
["step 1", "step 2", "step 3", ...]
```"#;

const REPLAN_PROMPT_TEMPLATE: &str = r#"You are a top-tier AI planning expert. An agent ran into an obstacle while executing a plan and needs you to replan dynamically.

# Original problem:
{question}

# Completed steps and their results:
{history}

# Obstacle encountered:
{failure_reason}

Based on the current situation, produce a new action plan for the **remaining unfinished goal**.
Do not include steps that are already completed; output only the next steps.

Output your new plan strictly in the following format; the ```python prefix and ``` suffix are required:
```python
["new step 1", "new step 2", ...]
```"#;

/// Ordered sub-tasks, consumed front to back
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan(VecDeque<String>);

impl Plan {
    pub fn new<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(steps.into_iter().map(Into::into).collect())
    }

    /// Remove and return the next step
    pub fn pop_front(&mut self) -> Option<String> {
        self.0.pop_front()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl From<Vec<String>> for Plan {
    fn from(steps: Vec<String>) -> Self {
        Self(steps.into())
    }
}

impl fmt::Display for Plan {
    /// Python-style list literal, the same shape the model was asked to emit
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, step) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{step:?}")?;
        }
        f.write_str("]")
    }
}

/// LLM-backed planner
#[derive(Clone)]
pub struct Planner {
    gateway: ModelGateway,
    temperature: f32,
}

impl Planner {
    pub const fn new(gateway: ModelGateway, temperature: f32) -> Self {
        Self {
            gateway,
            temperature,
        }
    }

    /// Initial plan for a task; empty when the reply could not be parsed
    pub async fn plan(&self, task: &str) -> Plan {
        let prompt = fill_template(PLANNER_PROMPT_TEMPLATE, &[("question", task)]);
        let plan = self.request(prompt).await;

        if plan.is_empty() {
            tracing::warn!("Planner produced no usable plan");
        } else {
            tracing::info!(steps = plan.len(), "Plan generated");
        }
        plan
    }

    /// Plan for the remaining work only, given what has been accepted so far
    pub async fn replan(&self, task: &str, history: &str, failure_reason: &str) -> Plan {
        let history = if history.trim().is_empty() { "None" } else { history };
        let prompt = fill_template(REPLAN_PROMPT_TEMPLATE, &[
            ("question", task),
            ("history", history),
            ("failure_reason", failure_reason),
        ]);
        let plan = self.request(prompt).await;

        tracing::info!(steps = plan.len(), "Replan finished");
        plan
    }

    async fn request(&self, prompt: String) -> Plan {
        let response = self
            .gateway
            .think(&[Message::user(prompt)], self.temperature)
            .await;
        Plan::from(parse_plan(&response))
    }
}
