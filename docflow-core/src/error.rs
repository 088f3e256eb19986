//! Error types for docflow.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for workflow operations.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Error types that can occur while defining or running a workflow.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlowError {
    /// Transient failure talking to a model provider (timeout, throttling, transport).
    #[error("Provider error: {message}")]
    Provider { message: String },

    /// Model output did not conform to the requested schema.
    #[error("Schema violation: {message}")]
    SchemaViolation { message: String },

    /// Agent was handed input it cannot process.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Defect in a validation rule definition.
    #[error("Validation rule error: {message}")]
    ValidationRule { message: String },

    /// Malformed workflow definition or configuration.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Run was cancelled by the caller.
    #[error("Workflow run was cancelled")]
    Cancelled,

    /// Invalid run state transition.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Source state
        from: String,
        /// Target state
        to: String,
    },

    /// Context manipulation error.
    #[error("Context error: {0}")]
    Context(String),

    /// Serialization/Deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl FlowError {
    /// Create a provider error.
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider {
            message: msg.into(),
        }
    }

    /// Create a schema violation error.
    pub fn schema_violation(msg: impl Into<String>) -> Self {
        Self::SchemaViolation {
            message: msg.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
        }
    }

    /// Create a validation rule error.
    pub fn validation_rule(msg: impl Into<String>) -> Self {
        Self::ValidationRule {
            message: msg.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create a context error.
    pub fn context(msg: impl Into<String>) -> Self {
        Self::Context(msg.into())
    }

    /// Create a new invalid transition error.
    pub fn invalid_transition(from: impl fmt::Debug, to: impl fmt::Debug) -> Self {
        Self::InvalidTransition {
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Provider { .. } => ErrorKind::Provider,
            Self::SchemaViolation { .. } => ErrorKind::SchemaViolation,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::ValidationRule { .. } => ErrorKind::ValidationRule,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Cancelled => ErrorKind::Cancellation,
            Self::InvalidTransition { .. } | Self::Context(_) | Self::Serialization(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Check if the error is expected to be transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider { .. })
    }

    /// Errors that abort a run regardless of the failing step's policy.
    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for FlowError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Configuration {
            message: err.to_string(),
        }
    }
}

/// Serializable classification of a [`FlowError`], stored in step history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Provider,
    SchemaViolation,
    InvalidInput,
    ValidationRule,
    Configuration,
    Cancellation,
    Internal,
}

impl ErrorKind {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::SchemaViolation => "schema_violation",
            Self::InvalidInput => "invalid_input",
            Self::ValidationRule => "validation_rule",
            Self::Configuration => "configuration",
            Self::Cancellation => "cancellation",
            Self::Internal => "internal",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ValidationRule | Self::Configuration | Self::Cancellation | Self::Internal
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure escalated out of a retry loop, carrying attempt and latency metadata.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{error} (after {attempts} attempt(s), {elapsed:?})")]
pub struct RetryError {
    /// The last error observed.
    pub error: FlowError,
    /// Number of attempts made, including the failing one.
    pub attempts: u32,
    /// Wall time spent across all attempts and backoffs.
    pub elapsed: Duration,
}

impl RetryError {
    pub fn new(error: FlowError, attempts: u32, elapsed: Duration) -> Self {
        Self {
            error,
            attempts,
            elapsed,
        }
    }

    /// Wrap an error that failed before any attempt was made.
    pub fn immediate(error: FlowError) -> Self {
        Self::new(error, 0, Duration::ZERO)
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}
