//! Scripted provider for tests and offline demos.
//!
//! Replies are handed out in the order they were queued; every message list
//! the provider receives is recorded so callers can assert on call counts and
//! prompt contents.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::provider::{Completion, GenerationOptions, LlmProvider};

enum Reply {
    Text(String),
    Fail(AgentError),
}

/// Provider that answers from a fixed script
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Option<String>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider preloaded with text replies
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let provider = Self::new();
        for reply in replies {
            provider.push_reply(reply);
        }
        provider
    }

    /// Reply used once the script is exhausted (otherwise an error is returned)
    #[must_use]
    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Reply::Text(reply.into()));
    }

    pub fn push_error(&self, error: AgentError) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Reply::Fail(error));
    }

    /// Number of completions requested so far
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Every message list received, oldest first
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Concatenated content of the n-th request
    pub fn prompt(&self, n: usize) -> Option<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(n)
            .map(|messages| {
                messages
                    .iter()
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(messages.to_vec());

        let next = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match next {
            Some(Reply::Text(text)) => Ok(Completion::text(text, &options.model)),
            Some(Reply::Fail(err)) => Err(err),
            None => self
                .fallback
                .as_ref()
                .map(|text| Completion::text(text, &options.model))
                .ok_or_else(|| AgentError::Provider("script exhausted".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_in_order_then_fallback() {
        let provider = ScriptedProvider::with_replies(["one", "two"]).with_fallback("again");
        let opts = GenerationOptions::default();
        let msgs = [Message::user("hi")];

        assert_eq!(provider.complete(&msgs, &opts).await.unwrap().content, "one");
        assert_eq!(provider.complete(&msgs, &opts).await.unwrap().content, "two");
        assert_eq!(provider.complete(&msgs, &opts).await.unwrap().content, "again");
        assert_eq!(provider.call_count(), 3);
        assert_eq!(provider.prompt(0).as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_exhausted_script_errors() {
        let provider = ScriptedProvider::new();
        provider.push_error(AgentError::RateLimited("429".into()));
        let opts = GenerationOptions::default();

        let first = provider.complete(&[], &opts).await;
        assert!(matches!(first, Err(AgentError::RateLimited(_))));
        let second = provider.complete(&[], &opts).await;
        assert!(matches!(second, Err(AgentError::Provider(_))));
    }
}
