//! Run state for workflow executions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    context::Context,
    document::Document,
    error::{ErrorKind, FlowError, Result},
    history::{StepOutcome, StepRecord},
};

/// Lifecycle of a single workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    NotStarted,
    Running,
    Succeeded,
    /// Finished, but at least one non-fatal step failed.
    PartiallySucceeded,
    Failed,
}

impl RunStatus {
    /// Returns true if the run has stopped.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::PartiallySucceeded | Self::Failed
        )
    }

    /// Returns true if this status can move to `target`.
    pub fn can_transition_to(&self, target: &Self) -> bool {
        match (self, target) {
            // Terminal states are final
            (s, _) if s.is_terminal() => false,
            (Self::NotStarted, Self::Running) => true,
            // A definition that cannot start still fails the run
            (Self::NotStarted, Self::Failed) => true,
            (Self::Running, t) => t.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::PartiallySucceeded => "partially_succeeded",
            Self::Failed => "failed",
        }
    }
}

/// The error that aborted a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
    /// Step that was running when the run aborted, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

impl RunError {
    pub fn new(error: &FlowError, step: Option<&str>) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            step: step.map(str::to_string),
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.step {
            Some(step) => write!(f, "{} (step '{step}')", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Everything a run knows about itself. Only the engine mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    run_id: Uuid,
    workflow: String,
    document: Arc<Document>,
    status: RunStatus,
    context: Context,
    history: Vec<StepRecord>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RunError>,
}

impl WorkflowState {
    pub fn new(workflow: impl Into<String>, document: Arc<Document>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            workflow: workflow.into(),
            document,
            status: RunStatus::NotStarted,
            context: Context::new(),
            history: Vec::new(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Seed the context before the run starts, e.g. with a caller-supplied
    /// document type. Pass the state to `WorkflowEngine::resume` to run it.
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn history(&self) -> &[StepRecord] {
        &self.history
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// The error that aborted the run, if it failed.
    pub fn error(&self) -> Option<&RunError> {
        self.error.as_ref()
    }

    pub fn last_record(&self) -> Option<&StepRecord> {
        self.history.last()
    }

    /// Records of steps that failed, in execution order.
    pub fn failures(&self) -> impl Iterator<Item = &StepRecord> {
        self.history
            .iter()
            .filter(|r| r.outcome == StepOutcome::Failed)
    }

    pub(crate) fn transition(&mut self, to: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(&to) {
            return Err(FlowError::invalid_transition(self.status, to));
        }
        let now = Utc::now();
        if to == RunStatus::Running {
            self.started_at = Some(now);
        }
        if to.is_terminal() {
            self.started_at.get_or_insert(now);
            self.finished_at = Some(now);
        }
        self.status = to;
        Ok(())
    }

    pub(crate) fn set_error(&mut self, error: RunError) {
        self.error = Some(error);
    }

    pub(crate) fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    pub(crate) fn record(&mut self, record: StepRecord) {
        self.history.push(record);
    }
}
