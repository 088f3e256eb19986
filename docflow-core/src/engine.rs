//! Workflow execution engine.

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use chrono::Utc;
use futures::{StreamExt, stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::EngineConfig,
    definition::{StepDefinition, Target, WorkflowDefinition},
    document::{Document, DocumentStatus},
    edges::resolve_next,
    error::{FlowError, Result, RetryError},
    history::{StepError, StepOutcome, StepRecord},
    result::WorkflowResult,
    retry::retry_with_policy,
    state::{RunError, RunStatus, WorkflowState},
    step::StepOutput,
};

/// Why the run loop stopped early.
struct Abort {
    error: RunError,
}

impl Abort {
    fn new(error: FlowError, step: Option<&str>) -> Self {
        Self {
            error: RunError::new(&error, step),
        }
    }
}

/// Executes a [`WorkflowDefinition`] against documents.
///
/// The engine never returns an error from a run: every failure ends up in the
/// [`WorkflowResult`].
#[derive(Debug, Clone)]
pub struct WorkflowEngine {
    definition: Arc<WorkflowDefinition>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(definition: WorkflowDefinition) -> Self {
        Self {
            definition: Arc::new(definition),
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(definition: WorkflowDefinition, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            definition: Arc::new(definition),
            config,
        })
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the workflow over a document.
    pub async fn execute(&self, document: impl Into<Arc<Document>>) -> WorkflowResult {
        self.execute_with_cancel(document, CancellationToken::new())
            .await
    }

    /// Run the workflow, stopping early if `cancel` fires.
    pub async fn execute_with_cancel(
        &self,
        document: impl Into<Arc<Document>>,
        cancel: CancellationToken,
    ) -> WorkflowResult {
        let state = WorkflowState::new(self.definition.name(), document.into());
        self.run(state, cancel).await
    }

    /// Continue a run from a previously captured state.
    ///
    /// Execution picks up at the edge following the last history record, or at
    /// the start step when nothing has run yet. Terminal states are returned
    /// unchanged.
    pub async fn resume(&self, state: WorkflowState, cancel: CancellationToken) -> WorkflowResult {
        if state.status().is_terminal() {
            return WorkflowResult::from_state(state);
        }
        self.run(state, cancel).await
    }

    /// Process independent documents concurrently, returning results in input order.
    pub async fn process_batch<I>(&self, documents: I, cancel: CancellationToken) -> Vec<WorkflowResult>
    where
        I: IntoIterator<Item = Document>,
    {
        let limit = self.config.batch_concurrency.max(1);
        stream::iter(documents)
            .map(|doc| self.execute_with_cancel(doc, cancel.clone()))
            .buffered(limit)
            .collect()
            .await
    }

    #[instrument(
        name = "workflow_run",
        skip(self, state, cancel),
        fields(
            workflow = %self.definition.name(),
            run_id = %state.run_id(),
            document_id = %state.document().id,
        )
    )]
    async fn run(&self, mut state: WorkflowState, cancel: CancellationToken) -> WorkflowResult {
        let outcome = self.drive(&mut state, &cancel).await;
        self.finish(state, outcome.err())
    }

    async fn drive(
        &self,
        state: &mut WorkflowState,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), Abort> {
        if state.workflow() != self.definition.name() {
            return Err(Abort::new(
                FlowError::configuration(format!(
                    "state belongs to workflow '{}', not '{}'",
                    state.workflow(),
                    self.definition.name()
                )),
                None,
            ));
        }

        let mut cursor = self.starting_point(state)?;
        if state.status() == RunStatus::NotStarted {
            state
                .transition(RunStatus::Running)
                .map_err(|e| Abort::new(e, None))?;
            info!(start = %cursor, "workflow started");
        } else {
            info!(next = %cursor, completed = state.history().len(), "workflow resumed");
        }

        let visit_bound = self.definition.steps().len();
        let mut visits = state.history().len();

        while let Target::Step(name) = cursor {
            if cancel.is_cancelled() {
                return Err(Abort::new(FlowError::Cancelled, Some(&name)));
            }
            // Built definitions are acyclic; only a hand-edited resumed history trips this.
            if visits >= visit_bound {
                return Err(Abort::new(
                    FlowError::configuration(format!(
                        "visit bound of {visit_bound} steps exceeded"
                    )),
                    Some(&name),
                ));
            }
            visits += 1;

            let step = self.definition.step(&name).ok_or_else(|| {
                Abort::new(
                    FlowError::configuration(format!("unknown step '{name}'")),
                    None,
                )
            })?;
            let outcome = self.visit(step, state, cancel).await?;

            cursor = resolve_next(self.definition.edges_from(&name), &name, outcome, state.context())
                .map_err(|e| Abort::new(e, Some(&name)))?;
            debug!(step = %name, %outcome, next = %cursor, "edge resolved");
        }
        Ok(())
    }

    /// Where a fresh or resumed run continues.
    fn starting_point(&self, state: &WorkflowState) -> std::result::Result<Target, Abort> {
        let Some(last) = state.last_record() else {
            return Ok(Target::step(self.definition.start()));
        };
        let step = self.definition.step(&last.step).ok_or_else(|| {
            Abort::new(
                FlowError::configuration(format!(
                    "history refers to unknown step '{}'",
                    last.step
                )),
                None,
            )
        })?;

        // A fatal failure that was recorded before the run was finalised.
        if last.outcome == StepOutcome::Failed
            && let Some(err) = &last.error
            && (step.is_fatal() || err.kind.is_fatal())
        {
            return Err(Abort {
                error: RunError {
                    kind: err.kind,
                    message: err.message.clone(),
                    step: Some(last.step.clone()),
                },
            });
        }

        resolve_next(
            self.definition.edges_from(&last.step),
            &last.step,
            last.outcome,
            state.context(),
        )
        .map_err(|e| Abort::new(e, Some(&last.step)))
    }

    /// Run a single step visit and record it.
    async fn visit(
        &self,
        step: &StepDefinition,
        state: &mut WorkflowState,
        cancel: &CancellationToken,
    ) -> std::result::Result<StepOutcome, Abort> {
        let started_at = Utc::now();

        if let Some(guard) = step.eligibility()
            && !guard.check(state.context())
        {
            debug!(step = %step.name(), guard = %guard.label(), "step skipped");
            state.record(StepRecord::skipped(step.name(), started_at));
            return Ok(StepOutcome::Skipped);
        }

        info!(step = %step.name(), handler = %step.handler().name(), "step started");
        let agent_attempts = AtomicU32::new(0);
        let policy = step
            .retry_policy()
            .unwrap_or(&self.config.default_step_retry);

        let invoked = {
            let view: &WorkflowState = state;
            let handler = step.handler();
            let agent_attempts = &agent_attempts;
            retry_with_policy(policy, cancel, |_| async move {
                match handler.invoke(view, cancel).await {
                    Ok(out) => {
                        agent_attempts.fetch_add(out.attempts, Ordering::Relaxed);
                        Ok(out.value)
                    }
                    Err(err) => {
                        agent_attempts.fetch_add(err.attempts, Ordering::Relaxed);
                        Err(err.error)
                    }
                }
            })
            .await
        };
        let attempts = agent_attempts.load(Ordering::Relaxed);

        match invoked {
            Ok(done) => {
                if let Err(e) = write_output(state, step, done.value) {
                    return Err(Abort::new(e, Some(step.name())));
                }
                if let Some(status) = step.marks_status() {
                    state.document().set_status(status);
                }
                state.record(StepRecord {
                    step: step.name().to_string(),
                    started_at,
                    finished_at: Utc::now(),
                    outcome: StepOutcome::Succeeded,
                    attempts,
                    invocations: done.attempts,
                    error: None,
                });
                info!(
                    step = %step.name(),
                    attempts,
                    invocations = done.attempts,
                    elapsed_ms = done.elapsed.as_millis() as u64,
                    "step succeeded"
                );
                Ok(StepOutcome::Succeeded)
            }
            Err(err) => {
                let aborts = step.is_fatal() || err.error.is_fatal();
                state.record(failed_record(step, started_at, attempts, &err));
                if aborts {
                    error!(step = %step.name(), error = %err, "fatal step failure");
                    Err(Abort::new(err.error, Some(step.name())))
                } else {
                    warn!(step = %step.name(), error = %err, "step failed, continuing degraded");
                    Ok(StepOutcome::Failed)
                }
            }
        }
    }

    fn finish(&self, mut state: WorkflowState, abort: Option<Abort>) -> WorkflowResult {
        let status = match &abort {
            Some(_) => RunStatus::Failed,
            None if state.failures().next().is_some() => RunStatus::PartiallySucceeded,
            None => RunStatus::Succeeded,
        };

        if let Some(abort) = abort {
            error!(error = %abort.error, kind = %abort.error.kind, "workflow failed");
            state.set_error(abort.error);
            state.document().set_status(DocumentStatus::Failed);
        }
        if let Err(e) = state.transition(status) {
            error!(error = %e, "could not finalise run status");
        }

        let result = WorkflowResult::from_state(state);
        info!(
            status = result.status().as_str(),
            steps = result.summary().steps_run,
            duration_ms = result.summary().duration_ms,
            "workflow finished"
        );
        #[cfg(feature = "metrics")]
        {
            metrics::counter!(
                "docflow_runs_total",
                "workflow" => self.definition.name().to_string(),
                "status" => result.status().as_str()
            )
            .increment(1);
            metrics::histogram!(
                "docflow_run_duration_seconds",
                "workflow" => self.definition.name().to_string()
            )
            .record(result.summary().duration_ms as f64 / 1000.0);
        }
        result
    }
}

fn write_output(state: &mut WorkflowState, step: &StepDefinition, output: StepOutput) -> Result<()> {
    let ctx = state.context_mut();
    ctx.set(step.key(), output.value)?;
    for (key, value) in output.extra {
        ctx.set(key, value)?;
    }
    Ok(())
}

fn failed_record(
    step: &StepDefinition,
    started_at: chrono::DateTime<Utc>,
    attempts: u32,
    err: &RetryError,
) -> StepRecord {
    let mut error = StepError::from(err);
    error.attempts = attempts;
    StepRecord {
        step: step.name().to_string(),
        started_at,
        finished_at: Utc::now(),
        outcome: StepOutcome::Failed,
        attempts,
        invocations: err.attempts,
        error: Some(error),
    }
}
