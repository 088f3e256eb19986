//! Deterministic mock LLM client for tests and demos.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use tracing::debug;

use crate::{
    client::{LlmClient, Prompt, parse_json_reply},
    error::{LlmError, Result},
    schema::OutputSchema,
};

/// What the mock answers with.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// A well-formed JSON reply.
    Json(Value),
    /// Raw model text, parsed like a real reply would be.
    Raw(String),
    /// A failure.
    Error(LlmError),
}

impl From<Value> for MockReply {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// A routing rule: optional schema name plus a case-insensitive pattern over the user prompt.
#[derive(Debug, Clone)]
pub struct MockRule {
    schema: Option<String>,
    pattern: Regex,
    reply: MockReply,
    latency: Option<Duration>,
}

impl MockRule {
    pub fn new(schema: Option<&str>, pattern: &str, reply: impl Into<MockReply>) -> Result<Self> {
        let pattern = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| LlmError::unsupported(format!("invalid mock pattern '{pattern}': {e}")))?;
        Ok(Self {
            schema: schema.map(str::to_string),
            pattern,
            reply: reply.into(),
            latency: None,
        })
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn matches(&self, prompt: &Prompt, schema: &OutputSchema) -> bool {
        self.schema.as_deref().is_none_or(|s| s == schema.name()) && self.pattern.is_match(&prompt.user)
    }
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub schema: String,
    pub system: Option<String>,
    pub user: String,
}

#[derive(Debug, Default)]
struct MockState {
    failures: VecDeque<LlmError>,
    history: Vec<MockCall>,
}

/// An [`LlmClient`] that answers from a rule table.
///
/// Rules are checked in insertion order; the first whose schema filter and
/// pattern both match wins. Scripted failures queued with
/// [`fail_next`](Self::fail_next) are returned before any rule is consulted.
#[derive(Debug)]
pub struct MockLlmClient {
    model_id: String,
    rules: Vec<MockRule>,
    fallback: Option<MockReply>,
    latency: Option<Duration>,
    state: Mutex<MockState>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            model_id: "mock-model".to_string(),
            rules: Vec::new(),
            fallback: None,
            latency: None,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Add a rule.
    pub fn with_rule(mut self, rule: MockRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Answer requests for `schema` whose prompt matches `pattern`.
    pub fn when(self, schema: &str, pattern: &str, reply: impl Into<MockReply>) -> Result<Self> {
        Ok(self.with_rule(MockRule::new(Some(schema), pattern, reply)?))
    }

    /// Answer every request for `schema` not matched by an earlier rule.
    pub fn for_schema(self, schema: &str, reply: impl Into<MockReply>) -> Result<Self> {
        self.when(schema, "", reply)
    }

    /// Reply used when no rule matches.
    pub fn with_fallback(mut self, reply: impl Into<MockReply>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    /// Delay applied to every call without a rule-specific latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue an error returned by the next call, ahead of any rule.
    pub fn fail_next(&self, error: LlmError) {
        self.lock().failures.push_back(error);
    }

    /// Queue the same error for the next `times` calls.
    pub fn fail_times(&self, times: usize, error: LlmError) {
        let mut state = self.lock();
        for _ in 0..times {
            state.failures.push_back(error.clone());
        }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().history.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().history.len()
    }

    /// Number of calls made for the named schema.
    pub fn calls_for(&self, schema: &str) -> usize {
        self.lock()
            .history
            .iter()
            .filter(|c| c.schema == schema)
            .count()
    }

    pub fn clear_history(&self) {
        self.lock().history.clear();
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn route(&self, prompt: &Prompt, schema: &OutputSchema) -> (Option<MockReply>, Option<Duration>) {
        match self.rules.iter().find(|r| r.matches(prompt, schema)) {
            Some(rule) => (Some(rule.reply.clone()), rule.latency.or(self.latency)),
            None => (self.fallback.clone(), self.latency),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(&self, prompt: &Prompt, schema: &OutputSchema) -> Result<Value> {
        let scripted = {
            let mut state = self.lock();
            state.history.push(MockCall {
                schema: schema.name().to_string(),
                system: prompt.system.clone(),
                user: prompt.user.clone(),
            });
            state.failures.pop_front()
        };

        let (reply, latency) = self.route(prompt, schema);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = scripted {
            debug!(schema = %schema.name(), error = %error, "mock returning scripted failure");
            return Err(error);
        }

        match reply {
            Some(MockReply::Json(value)) => Ok(value),
            Some(MockReply::Raw(text)) => parse_json_reply(&text),
            Some(MockReply::Error(error)) => Err(error),
            None => Err(LlmError::unsupported(format!(
                "no mock reply configured for schema '{}'",
                schema.name()
            ))),
        }
    }
}
