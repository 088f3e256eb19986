//! Error types for LLM calls.

use docflow_core::error::FlowError;
use thiserror::Error;

/// Result type for LLM operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Failures reported by an [`LlmClient`](crate::client::LlmClient).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// The reply was not parseable JSON.
    #[error("Malformed output: {message}")]
    MalformedOutput { message: String, raw: String },

    /// The reply parsed but did not match the requested schema.
    #[error("Output does not match schema '{schema}': {message}")]
    SchemaMismatch { schema: String, message: String },

    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),
}

impl LlmError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited(message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn malformed(message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::MalformedOutput {
            message: message.into(),
            raw: raw.into(),
        }
    }

    pub fn schema_mismatch(schema: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            schema: schema.into(),
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedInput(message.into())
    }

    /// Check if the error is transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Timeout(_) | Self::Transport(_)
        )
    }

    /// Reply-shape problems that a fresh attempt may fix.
    pub fn is_output_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedOutput { .. } | Self::SchemaMismatch { .. }
        )
    }

    /// Get error category for logging/monitoring.
    pub fn category(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limited",
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
            Self::MalformedOutput { .. } => "malformed_output",
            Self::SchemaMismatch { .. } => "schema_mismatch",
            Self::UnsupportedInput(_) => "unsupported_input",
        }
    }
}

impl From<LlmError> for FlowError {
    fn from(err: LlmError) -> Self {
        match &err {
            LlmError::RateLimited(_) | LlmError::Timeout(_) | LlmError::Transport(_) => {
                FlowError::provider(err.to_string())
            }
            LlmError::MalformedOutput { .. } | LlmError::SchemaMismatch { .. } => {
                FlowError::schema_violation(err.to_string())
            }
            LlmError::UnsupportedInput(_) => FlowError::invalid_input(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use docflow_core::error::ErrorKind;

    use super::*;

    #[test]
    fn test_retryable_errors_map_to_provider() {
        for err in [
            LlmError::rate_limited("429"),
            LlmError::timeout("30s"),
            LlmError::transport("connection reset"),
        ] {
            assert!(err.is_retryable());
            let flow = FlowError::from(err);
            assert_eq!(flow.kind(), ErrorKind::Provider);
            assert!(flow.is_retryable());
        }
    }

    #[test]
    fn test_output_errors_map_to_schema_violation() {
        let err = LlmError::malformed("expected value at line 1", "not json");
        assert!(!err.is_retryable());
        assert!(err.is_output_error());
        assert_eq!(err.category(), "malformed_output");
        assert_eq!(FlowError::from(err).kind(), ErrorKind::SchemaViolation);

        let err = LlmError::schema_mismatch("invoice", "missing total_amount");
        assert!(err.to_string().contains("'invoice'"));
        assert_eq!(FlowError::from(err).kind(), ErrorKind::SchemaViolation);
    }

    #[test]
    fn test_unsupported_input_maps_to_invalid_input() {
        let flow = FlowError::from(LlmError::unsupported("image-only page"));
        assert_eq!(flow.kind(), ErrorKind::InvalidInput);
    }
}
