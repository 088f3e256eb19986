//! Shared execution context for workflow runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::{FlowError, Result};

/// Well-known context keys written by the standard agents.
pub mod keys {
    pub const DOCUMENT_TYPE: &str = "document_type";
    pub const CLASSIFICATION: &str = "classification";
    pub const RETRIEVED_SNIPPETS: &str = "retrieved_snippets";
    pub const EXTRACTED_DATA: &str = "extracted_data";
    pub const VALIDATION_ERRORS: &str = "validation_errors";
    pub const VALIDATION_REPORT: &str = "validation_report";
}

/// String-keyed JSON map accumulated as steps complete.
///
/// Entries can be added or overwritten but never removed, so a later step can
/// always rely on what an earlier one wrote. Keys iterate in sorted order,
/// which keeps serialized states stable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    data: BTreeMap<String, Value>,
}

impl Context {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context from existing JSON entries.
    pub fn from_json(data: BTreeMap<String, Value>) -> Self {
        Self { data }
    }

    /// Set a value, overwriting any existing entry under `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        let json_value = serde_json::to_value(value)?;
        self.data.insert(key.into(), json_value);
        Ok(())
    }

    /// Get a value by key and deserialize it.
    pub fn get_json<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.data
            .get(key)
            .map(|value| T::deserialize(value))
            .transpose()
            .map_err(|e| FlowError::context(format!("key '{key}': {e}")))
    }

    /// Get the raw JSON value by key.
    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Get a string value by key.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Convert the context to a single JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.data
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

/// Builder for creating contexts with initial data.
#[derive(Default)]
pub struct ContextBuilder {
    context: Context,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_json(mut self, key: impl Into<String>, value: impl Serialize) -> Result<Self> {
        self.context.set(key, value)?;
        Ok(self)
    }

    pub fn build(self) -> Context {
        self.context
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Classification {
        document_type: String,
        confidence: f64,
    }

    #[test]
    fn test_set_and_get() {
        let mut context = Context::new();
        let classification = Classification {
            document_type: "invoice".to_string(),
            confidence: 0.9,
        };

        context.set(keys::CLASSIFICATION, &classification).unwrap();
        context.set(keys::DOCUMENT_TYPE, "invoice").unwrap();

        let retrieved: Classification = context.get_json(keys::CLASSIFICATION).unwrap().unwrap();
        assert_eq!(retrieved, classification);
        assert_eq!(context.get_str(keys::DOCUMENT_TYPE), Some("invoice"));
        assert!(context.contains(keys::DOCUMENT_TYPE));
        assert!(!context.contains(keys::EXTRACTED_DATA));
        assert!(context.get_json::<String>("missing").unwrap().is_none());
    }

    #[test]
    fn test_overwrite() {
        let mut context = Context::new();
        context.set("count", 1).unwrap();
        context.set("count", 2).unwrap();

        assert_eq!(context.len(), 1);
        assert_eq!(context.get_raw("count"), Some(&json!(2)));
    }

    #[test]
    fn test_type_mismatch_is_context_error() {
        let mut context = Context::new();
        context.set("count", "not a number").unwrap();

        let err = context.get_json::<u32>("count").unwrap_err();
        assert!(matches!(err, FlowError::Context(_)));
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let context = ContextBuilder::new()
            .with_json("b", 2)
            .unwrap()
            .with_json("a", "one")
            .unwrap()
            .build();

        let value = serde_json::to_value(&context).unwrap();
        assert_eq!(value, json!({"a": "one", "b": 2}));
        assert_eq!(context.to_json(), value);

        let back: Context = serde_json::from_value(value).unwrap();
        assert_eq!(back, context);
        assert_eq!(back.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
