//! Tool System
//!
//! Tools are registered by name and invoked by the ActionExecutor with
//! named arguments. Each tool carries a schema so argument mismatches can be
//! reported back to the model with the expected signature.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AgentError, Result};

/// Named arguments passed to a tool
pub type ToolArgs = Map<String, Value>;

/// Parameter definition for tool schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,
}

impl ParameterSchema {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: "string".into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, description)
        }
    }
}

/// Tool definition schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// Parameter definitions
    pub parameters: Vec<ParameterSchema>,
}

impl ToolSchema {
    /// Render as `name(param: type, optional?: type)`
    pub fn signature(&self) -> String {
        let params = self
            .parameters
            .iter()
            .map(|p| {
                let marker = if p.required { "" } else { "?" };
                format!("{}{}: {}", p.name, marker, p.param_type)
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({})", self.name, params)
    }
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool's schema
    fn schema(&self) -> ToolSchema;

    /// Execute the tool with named arguments
    async fn call(&self, args: &ToolArgs) -> Result<String>;

    /// Validate arguments before execution
    fn validate(&self, args: &ToolArgs) -> Result<()> {
        let schema = self.schema();

        for param in &schema.parameters {
            if param.required && !args.contains_key(&param.name) {
                return Err(AgentError::ToolValidation(format!(
                    "missing required argument '{}'",
                    param.name
                )));
            }
        }

        if let Some(unknown) = args
            .keys()
            .find(|key| !schema.parameters.iter().any(|p| &p.name == *key))
        {
            return Err(AgentError::ToolValidation(format!(
                "unexpected argument '{unknown}'"
            )));
        }

        Ok(())
    }
}

/// Registry for available tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    /// Register a shared tool
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.schema().name;
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "Replacing previously registered tool");
        }
    }

    /// Look a tool up by exact, case-sensitive name
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Tool names in sorted order
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool description block injected into prompts
    pub fn describe(&self) -> String {
        if self.tools.is_empty() {
            return "(no tools available)".into();
        }

        let mut out = String::new();
        for tool in self.tools.values() {
            let schema = tool.schema();
            let _ = writeln!(out, "- {}: {}", schema.signature(), schema.description);
            for param in &schema.parameters {
                let required = if param.required { " (required)" } else { "" };
                let _ = writeln!(out, "    - `{}`{}: {}", param.name, required, param.description);
            }
        }
        out
    }
}

// ============================================================================
// Built-in Tools
// ============================================================================

/// DateTime tool - returns current time
pub struct DateTimeTool;

#[async_trait]
impl Tool for DateTimeTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "datetime".into(),
            description: "Get the current UTC date and time".into(),
            parameters: vec![ParameterSchema::optional(
                "format",
                "Output format: 'iso', 'human', or 'unix'",
            )],
        }
    }

    async fn call(&self, args: &ToolArgs) -> Result<String> {
        let format = args.get("format").and_then(Value::as_str).unwrap_or("human");

        let now = chrono::Utc::now();

        Ok(match format {
            "iso" => now.to_rfc3339(),
            "unix" => now.timestamp().to_string(),
            _ => now.format("%A, %B %d, %Y at %H:%M:%S UTC").to_string(),
        })
    }
}

/// Calculator tool - evaluates arithmetic expressions
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "calculate".into(),
            description: "Evaluate an arithmetic expression with + - * / ^ and parentheses".into(),
            parameters: vec![ParameterSchema::required(
                "expression",
                "Expression to evaluate (e.g., '2 + 2', '(10 - 4) / 3')",
            )],
        }
    }

    async fn call(&self, args: &ToolArgs) -> Result<String> {
        let expr = match args.get("expression") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(AgentError::ToolValidation(
                    "'expression' must be a string".into(),
                ));
            }
        };

        let value = evaluate_expression(&expr).map_err(AgentError::ToolExecution)?;
        Ok(format!("{expr} = {value}"))
    }
}

/// Recursive-descent evaluation of `+ - * / ^` with parentheses
fn evaluate_expression(expr: &str) -> std::result::Result<f64, String> {
    let tokens: Vec<char> = expr.chars().filter(|c| !c.is_whitespace()).collect();
    if tokens.is_empty() {
        return Err("Empty expression".into());
    }

    let mut pos = 0;
    let value = parse_sum(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(format!("Unexpected '{}' at position {}", tokens[pos], pos));
    }
    Ok(value)
}

fn parse_sum(tokens: &[char], pos: &mut usize) -> std::result::Result<f64, String> {
    let mut value = parse_product(tokens, pos)?;
    while let Some(&op) = tokens.get(*pos) {
        if op != '+' && op != '-' {
            break;
        }
        *pos += 1;
        let rhs = parse_product(tokens, pos)?;
        value = if op == '+' { value + rhs } else { value - rhs };
    }
    Ok(value)
}

fn parse_product(tokens: &[char], pos: &mut usize) -> std::result::Result<f64, String> {
    let mut value = parse_unary(tokens, pos)?;
    while let Some(&op) = tokens.get(*pos) {
        if op != '*' && op != '/' {
            break;
        }
        *pos += 1;
        let rhs = parse_unary(tokens, pos)?;
        if op == '/' {
            if rhs == 0.0 {
                return Err("Division by zero".into());
            }
            value /= rhs;
        } else {
            value *= rhs;
        }
    }
    Ok(value)
}

// Sign binds looser than `^`: -2^2 is -(2^2)
fn parse_unary(tokens: &[char], pos: &mut usize) -> std::result::Result<f64, String> {
    match tokens.get(*pos) {
        Some('-') => {
            *pos += 1;
            Ok(-parse_unary(tokens, pos)?)
        }
        Some('+') => {
            *pos += 1;
            parse_unary(tokens, pos)
        }
        _ => parse_power(tokens, pos),
    }
}

fn parse_power(tokens: &[char], pos: &mut usize) -> std::result::Result<f64, String> {
    let base = parse_atom(tokens, pos)?;
    if tokens.get(*pos) == Some(&'^') {
        *pos += 1;
        // right-associative; the exponent may carry its own sign
        let exponent = parse_unary(tokens, pos)?;
        return Ok(base.powf(exponent));
    }
    Ok(base)
}

fn parse_atom(tokens: &[char], pos: &mut usize) -> std::result::Result<f64, String> {
    match tokens.get(*pos) {
        Some('(') => {
            *pos += 1;
            let value = parse_sum(tokens, pos)?;
            if tokens.get(*pos) != Some(&')') {
                return Err("Missing closing parenthesis".into());
            }
            *pos += 1;
            Ok(value)
        }
        Some(_) => {
            let start = *pos;
            while tokens
                .get(*pos)
                .is_some_and(|c| c.is_ascii_digit() || *c == '.')
            {
                *pos += 1;
            }
            let literal: String = tokens[start..*pos].iter().collect();
            literal
                .parse::<f64>()
                .map_err(|e| format!("Parse error at position {start}: {e}"))
        }
        None => Err("Unexpected end of expression".into()),
    }
}
