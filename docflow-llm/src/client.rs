//! LLM client contract.

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{LlmError, Result},
    schema::OutputSchema,
};

/// A single structured-output request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: Option<String>,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Prompt {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            system: None,
            user: user.into(),
            temperature: 0.0,
            max_tokens: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Trait for model providers that produce JSON conforming to a schema.
///
/// Implementations are shared across concurrent runs.
#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    /// Identifier of the backing model.
    fn model_id(&self) -> &str;

    /// Ask the model for a reply shaped by `schema`.
    ///
    /// Implementations return the parsed JSON; callers check it against the
    /// schema with [`OutputSchema::parse`].
    async fn complete(&self, prompt: &Prompt, schema: &OutputSchema) -> Result<Value>;
}

/// Parse raw model text as JSON, tolerating a surrounding Markdown code fence.
pub fn parse_json_reply(raw: &str) -> Result<Value> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(body).map_err(|e| LlmError::malformed(e.to_string(), raw))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_prompt_builder() {
        let prompt = Prompt::new("classify this")
            .with_system("you are a classifier")
            .with_max_tokens(256);
        assert_eq!(prompt.system.as_deref(), Some("you are a classifier"));
        assert_eq!(prompt.temperature, 0.0);
        assert_eq!(prompt.max_tokens, Some(256));
    }

    #[test]
    fn test_parse_json_reply() {
        assert_eq!(parse_json_reply(r#"{"a": 1}"#).unwrap(), json!({"a": 1}));
        assert_eq!(
            parse_json_reply("```json\n{\"a\": 2}\n```").unwrap(),
            json!({"a": 2})
        );

        let err = parse_json_reply("Sure! Here is the data").unwrap_err();
        assert!(matches!(err, LlmError::MalformedOutput { ref raw, .. } if raw == "Sure! Here is the data"));
    }
}
