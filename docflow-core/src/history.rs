//! Step history records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, RetryError};

/// How a step visit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Failed,
    Skipped,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable snapshot of the error that failed a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

impl From<&RetryError> for StepError {
    fn from(err: &RetryError) -> Self {
        Self {
            kind: err.kind(),
            message: err.error.to_string(),
            attempts: err.attempts,
            elapsed_ms: err.elapsed.as_millis() as u64,
        }
    }
}

/// One entry in a run's append-only history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: StepOutcome,
    /// Agent-level attempts summed over every engine-level invocation.
    pub attempts: u32,
    /// Engine-level invocations of the step handler.
    pub invocations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

impl StepRecord {
    pub fn skipped(step: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            step: step.into(),
            started_at: at,
            finished_at: at,
            outcome: StepOutcome::Skipped,
            attempts: 0,
            invocations: 0,
            error: None,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    pub fn is_failure(&self) -> bool {
        self.outcome == StepOutcome::Failed
    }
}
