//! Engine configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    error::{FlowError, Result},
    retry::RetryPolicy,
};

/// Configuration for a [`WorkflowEngine`](crate::engine::WorkflowEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of documents processed at once by `process_batch`.
    pub batch_concurrency: usize,
    /// Step-level retry policy for steps that do not set their own.
    pub default_step_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_concurrency: 4,
            default_step_retry: RetryPolicy::none(),
        }
    }
}

impl EngineConfig {
    pub fn with_batch_concurrency(mut self, batch_concurrency: usize) -> Self {
        self.batch_concurrency = batch_concurrency;
        self
    }

    pub fn with_default_step_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_step_retry = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_concurrency == 0 {
            return Err(FlowError::configuration(
                "batch_concurrency must be at least 1",
            ));
        }
        self.default_step_retry.validate()
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            FlowError::configuration(format!("reading {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&yaml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_concurrency, 4);
        assert_eq!(config.default_step_retry.max_attempts, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
batch_concurrency: 8
default_step_retry:
  max_attempts: 2
  backoff_base: 0.01
"#;
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.batch_concurrency, 8);
        assert_eq!(config.default_step_retry.max_attempts, 2);
        assert_eq!(config.default_step_retry.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_invalid_yaml_is_rejected() {
        assert!(EngineConfig::from_yaml_str("batch_concurrency: 0").is_err());
        assert!(EngineConfig::from_yaml_str("batch_concurrency: [").is_err());
        assert!(EngineConfig::from_yaml_file("/nonexistent/engine.yaml").is_err());
    }
}
