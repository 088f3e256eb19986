//! Workflow run results.

use serde::{Deserialize, Serialize};

use crate::{
    context::Context,
    history::{StepOutcome, StepRecord},
    state::{RunError, RunStatus, WorkflowState},
};

/// Aggregate numbers for a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub duration_ms: i64,
    pub steps_run: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Agent-level attempts across all steps.
    pub attempts: u32,
}

impl RunSummary {
    fn from_state(state: &WorkflowState) -> Self {
        let mut summary = Self {
            duration_ms: match (state.started_at(), state.finished_at()) {
                (Some(start), Some(end)) => (end - start).num_milliseconds(),
                _ => 0,
            },
            steps_run: state.history().len(),
            ..Self::default()
        };
        for record in state.history() {
            summary.attempts += record.attempts;
            match record.outcome {
                StepOutcome::Succeeded => summary.succeeded += 1,
                StepOutcome::Failed => summary.failed += 1,
                StepOutcome::Skipped => summary.skipped += 1,
            }
        }
        summary
    }
}

/// Final outcome of a workflow run. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    status: RunStatus,
    summary: RunSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RunError>,
    state: WorkflowState,
}

impl WorkflowResult {
    pub(crate) fn from_state(state: WorkflowState) -> Self {
        Self {
            status: state.status(),
            summary: RunSummary::from_state(&state),
            error: state.error().cloned(),
            state,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// The error that aborted the run, if any.
    pub fn error(&self) -> Option<&RunError> {
        self.error.as_ref()
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn into_state(self) -> WorkflowState {
        self.state
    }

    pub fn context(&self) -> &Context {
        self.state.context()
    }

    /// Step outcomes in execution order.
    pub fn outcomes(&self) -> Vec<(&str, StepOutcome)> {
        self.state
            .history()
            .iter()
            .map(|r| (r.step.as_str(), r.outcome))
            .collect()
    }

    /// Outcome of the named step, if it ran.
    pub fn outcome_of(&self, step: &str) -> Option<StepOutcome> {
        self.state
            .history()
            .iter()
            .rev()
            .find(|r| r.step == step)
            .map(|r| r.outcome)
    }

    /// Failed step records in execution order.
    pub fn failures(&self) -> Vec<&StepRecord> {
        self.state.failures().collect()
    }
}
