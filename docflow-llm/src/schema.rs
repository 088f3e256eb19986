//! Output schema descriptors.

use std::{fmt, sync::Arc};

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{LlmError, Result};

/// A named JSON schema a model reply must conform to.
///
/// The compiled validator is shared, so cloning a schema is cheap.
#[derive(Clone)]
pub struct OutputSchema {
    name: String,
    schema: Value,
    validator: Arc<jsonschema::Validator>,
}

impl OutputSchema {
    /// Compile a schema from its JSON form.
    pub fn new(name: impl Into<String>, schema: Value) -> Result<Self> {
        let name = name.into();
        let validator = jsonschema::Validator::new(&schema).map_err(|e| {
            LlmError::schema_mismatch(name.clone(), format!("invalid schema: {e}"))
        })?;
        Ok(Self {
            name,
            schema,
            validator: Arc::new(validator),
        })
    }

    /// Generate the schema from a Rust type.
    pub fn of<T: JsonSchema>(name: impl Into<String>) -> Result<Self> {
        let generated = schemars::schema_for!(T);
        let schema = serde_json::to_value(&generated)
            .map_err(|e| LlmError::schema_mismatch("<generated>", e.to_string()))?;
        Self::new(name, schema)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Check `value` against the schema, reporting every violation.
    pub fn validate(&self, value: &Value) -> Result<()> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(value)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{path}: {e}")
                }
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(LlmError::schema_mismatch(&self.name, errors.join("; ")))
        }
    }

    /// Validate and then deserialize `value`.
    pub fn parse<T: DeserializeOwned>(&self, value: Value) -> Result<T> {
        self.validate(&value)?;
        serde_json::from_value(value)
            .map_err(|e| LlmError::schema_mismatch(&self.name, e.to_string()))
    }
}

impl fmt::Debug for OutputSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSchema")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
