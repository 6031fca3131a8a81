//! Output Parser
//!
//! Extracts structured payloads from raw, possibly malformed model text:
//! plan lists, JSON action objects and tagged code blocks. Nothing here
//! returns an error for bad input; every extractor has an unambiguous
//! "nothing usable" result instead.

// lazy_regex! validates the patterns at compile time
#![allow(clippy::non_std_lazy_statics)]

use lazy_regex::lazy_regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AgentError, Result};

/// Opening tag wrapping generated executable code
pub const CODE_OPEN_TAG: &str = "<execute_python>";

/// Closing tag wrapping generated executable code
pub const CODE_CLOSE_TAG: &str = "</execute_python>";

/// Markdown fence opener or closer on its own line
static RE_CODE_FENCE: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"(?m)^```(?:python)?\s*|\s*```$");

/// An action chosen by the model: a tool name and its arguments
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,

    /// Mapping of named arguments, or a single bare value
    #[serde(default = "empty_args")]
    pub args: Value,
}

fn empty_args() -> Value {
    Value::Object(Map::new())
}

impl Action {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Compact JSON form recorded in ReAct history
    pub fn to_record(&self) -> String {
        serde_json::json!({ "name": self.name, "args": self.args }).to_string()
    }
}

/// Thought and action parsed from one ReAct reply
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedStep {
    pub thought: Option<String>,

    /// `None` when the JSON carried no usable `action.name`
    pub action: Option<Action>,
}

/// Content of the first fenced code block, language tag removed
///
/// An unterminated fence yields everything after the opener.
pub fn extract_fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")? + 3;
    let mut rest = &text[start..];

    if let Some(newline) = rest.find('\n') {
        let tag = rest[..newline].trim();
        if tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+'))
        {
            rest = &rest[newline + 1..];
        }
    }

    let body = rest.find("```").map_or(rest, |end| &rest[..end]);
    Some(body.trim())
}

/// Parse a plan from model output
///
/// An empty vector means the output could not be used as a plan.
pub fn parse_plan(text: &str) -> Vec<String> {
    let payload = extract_fenced_block(text).unwrap_or_else(|| text.trim());

    match parse_string_list(payload) {
        Ok(plan) => plan,
        Err(e) => {
            tracing::debug!(error = %e, "Plan payload rejected");
            Vec::new()
        }
    }
}

/// Parse a list literal whose elements are all string literals
///
/// Accepts single- or double-quoted strings with the usual backslash
/// escapes, adjacent-literal concatenation, trailing commas and `#`
/// comments. Anything else, nested lists and numbers included, is rejected.
pub fn parse_string_list(src: &str) -> Result<Vec<String>> {
    let mut parser = ListLiteral {
        chars: src.chars().collect(),
        pos: 0,
    };
    parser.list()
}

struct ListLiteral {
    chars: Vec<char>,
    pos: usize,
}

impl ListLiteral {
    fn list(&mut self) -> Result<Vec<String>> {
        self.skip_blank();
        self.expect('[')?;

        let mut items = Vec::new();
        loop {
            self.skip_blank();
            match self.peek() {
                Some(']') => {
                    self.pos += 1;
                    break;
                }
                Some('\'' | '"') => {
                    items.push(self.concatenated_string()?);
                    self.skip_blank();
                    match self.peek() {
                        Some(',') => self.pos += 1,
                        Some(']') => {}
                        other => return Err(self.unexpected(other)),
                    }
                }
                other => return Err(self.unexpected(other)),
            }
        }

        self.skip_blank();
        if self.pos < self.chars.len() {
            return Err(AgentError::Parse(format!(
                "trailing content after list at position {}",
                self.pos
            )));
        }
        Ok(items)
    }

    fn concatenated_string(&mut self) -> Result<String> {
        let mut value = self.string()?;
        loop {
            let checkpoint = self.pos;
            self.skip_blank();
            if matches!(self.peek(), Some('\'' | '"')) {
                value.push_str(&self.string()?);
            } else {
                self.pos = checkpoint;
                return Ok(value);
            }
        }
    }

    fn string(&mut self) -> Result<String> {
        let quote = self.next().ok_or_else(|| self.unexpected(None))?;
        let mut out = String::new();

        loop {
            match self.next() {
                None | Some('\n') => {
                    return Err(AgentError::Parse("unterminated string literal".into()));
                }
                Some(c) if c == quote => return Ok(out),
                Some('\\') => self.escape(&mut out)?,
                Some(c) => out.push(c),
            }
        }
    }

    fn escape(&mut self, out: &mut String) -> Result<()> {
        let Some(c) = self.next() else {
            return Err(AgentError::Parse("dangling backslash".into()));
        };
        match c {
            '\n' => {}
            '\\' | '\'' | '"' => out.push(c),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            'x' => out.push(self.code_point(2)?),
            'u' => out.push(self.code_point(4)?),
            'U' => out.push(self.code_point(8)?),
            // unknown escapes keep their backslash
            other => {
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }

    fn code_point(&mut self, digits: usize) -> Result<char> {
        let end = self.pos + digits;
        if end > self.chars.len() {
            return Err(AgentError::Parse("truncated escape sequence".into()));
        }
        let hex: String = self.chars[self.pos..end].iter().collect();
        self.pos = end;
        u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| AgentError::Parse(format!("invalid escape \\{hex}")))
    }

    fn skip_blank(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
            } else if c == '#' {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, want: char) -> Result<()> {
        match self.peek() {
            Some(c) if c == want => {
                self.pos += 1;
                Ok(())
            }
            other => Err(self.unexpected(other)),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn unexpected(&self, found: Option<char>) -> AgentError {
        match found {
            Some(c) => AgentError::Parse(format!("unexpected '{c}' at position {}", self.pos)),
            None => AgentError::Parse("unexpected end of input".into()),
        }
    }
}

/// First JSON object in the text, looking inside a fence when there is one
///
/// Scans from the first `{` to the last `}`; anything that does not parse
/// as an object yields `None`.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let clean = extract_fenced_block(text).unwrap_or(text);

    let start = clean.find('{')?;
    let end = clean.rfind('}')?;
    if end < start {
        return None;
    }

    match serde_json::from_str::<Value>(&clean[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "JSON object rejected");
            None
        }
    }
}

/// Parse a ReAct reply of the form `{"thought": ..., "action": {"name": ..., "args": {...}}}`
///
/// `None` means no JSON object could be recovered at all.
pub fn parse_action(text: &str) -> Option<ParsedStep> {
    let object = extract_json_object(text)?;

    let thought = object
        .get("thought")
        .and_then(Value::as_str)
        .map(str::to_owned);

    let action = object
        .get("action")
        .and_then(Value::as_object)
        .and_then(|action| {
            let name = action.get("name")?.as_str()?.trim();
            if name.is_empty() {
                return None;
            }
            let args = action.get("args").cloned().unwrap_or_else(empty_args);
            Some(Action::new(name, args))
        });

    Some(ParsedStep { thought, action })
}

/// Strip Markdown fences and make sure the code sits inside the code tags
pub fn ensure_code_tags(text: &str) -> String {
    let stripped = RE_CODE_FENCE.replace_all(text.trim(), "");
    let stripped = stripped.trim();

    if stripped.contains(CODE_OPEN_TAG) {
        stripped.to_owned()
    } else {
        format!("{CODE_OPEN_TAG}\n{stripped}\n{CODE_CLOSE_TAG}")
    }
}

/// Trimmed code between the first tag pair
pub fn extract_tagged_code(text: &str) -> Option<String> {
    let start = text.find(CODE_OPEN_TAG)? + CODE_OPEN_TAG.len();
    let end = text[start..].find(CODE_CLOSE_TAG)? + start;
    Some(text[start..end].trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plan_from_python_fence() {
        let text = "Here is the plan:\n```python\n[\"step one\", 'step two', \"step \\\"three\\\"\"]\n```\nGood luck.";
        assert_eq!(
            parse_plan(text),
            vec!["step one", "step two", "step \"three\""]
        );
    }

    #[test]
    fn test_plan_from_bare_text_and_untagged_fence() {
        assert_eq!(parse_plan("  ['a', 'b']  "), vec!["a", "b"]);
        assert_eq!(parse_plan("```\n['only']\n```"), vec!["only"]);
        assert_eq!(parse_plan("```['inline']```"), vec!["inline"]);
    }

    #[test]
    fn test_plan_tolerates_python_literal_features() {
        let text = "[\n  # first do this\n  'compute ' 'the sum',\n  \"then \\u00e9crire\\n\",\n]";
        assert_eq!(parse_plan(text), vec!["compute the sum", "then écrire\n"]);
        assert_eq!(parse_plan("[]"), Vec::<String>::new());
    }

    #[test]
    fn test_plan_failures_are_empty() {
        assert!(parse_plan("I cannot make a plan.").is_empty());
        assert!(parse_plan("['a', 1]").is_empty());
        assert!(parse_plan("['a', ['b']]").is_empty());
        assert!(parse_plan("('a', 'b')").is_empty());
        assert!(parse_plan("['unterminated]").is_empty());
        assert!(parse_plan("['a'] + ['b']").is_empty());
        assert!(parse_plan("[__import__('os').system('ls')]").is_empty());
    }

    #[test]
    fn test_action_from_noisy_text() {
        let text = r#"Sure! {"thought": "need math", "action": {"name": "calculate", "args": {"expression": "1+1"}}} done"#;
        let step = parse_action(text).unwrap();
        assert_eq!(step.thought.as_deref(), Some("need math"));
        assert_eq!(
            step.action,
            Some(Action::new("calculate", json!({"expression": "1+1"})))
        );
    }

    #[test]
    fn test_action_inside_json_fence() {
        let text = "```json\n{\"thought\": \"t\", \"action\": {\"name\": \"Finish\"}}\n```";
        let action = parse_action(text).unwrap().action.unwrap();
        assert_eq!(action.name, "Finish");
        assert_eq!(action.args, json!({}));
    }

    #[test]
    fn test_action_parse_failures() {
        assert_eq!(parse_action("no braces here"), None);
        assert_eq!(parse_action("} backwards {"), None);
        assert_eq!(parse_action("{\"thought\": broken}"), None);

        let no_action = parse_action(r#"{"thought": "hmm", "action": "search"}"#).unwrap();
        assert_eq!(no_action.thought.as_deref(), Some("hmm"));
        assert_eq!(no_action.action, None);
    }

    #[test]
    fn test_code_tags_added_and_fences_removed() {
        let normalized = ensure_code_tags("```python\nprint('hi')\n```");
        assert_eq!(normalized, "<execute_python>\nprint('hi')\n</execute_python>");
        assert_eq!(extract_tagged_code(&normalized).as_deref(), Some("print('hi')"));
    }

    #[test]
    fn test_code_tag_normalization_is_idempotent() {
        for raw in [
            "x = 1",
            "```\nimport pandas as pd\ndf.plot()\n```",
            "<execute_python>\nplt.close()\n</execute_python>",
        ] {
            let once = ensure_code_tags(raw);
            let twice = ensure_code_tags(&once);
            assert_eq!(once.trim(), twice.trim());
            assert!(extract_tagged_code(&twice).is_some());
        }
    }

    #[test]
    fn test_extract_tagged_code_absent() {
        assert_eq!(extract_tagged_code("print(1)"), None);
        assert_eq!(extract_tagged_code("<execute_python> never closed"), None);
    }

    #[test]
    fn test_action_record_is_compact_json() {
        let record = Action::new("search", json!({"query": "rust"})).to_record();
        assert!(!record.contains('\n'));
        let value: Value = serde_json::from_str(&record).unwrap();
        assert_eq!(value, json!({"name": "search", "args": {"query": "rust"}}));
    }
}
