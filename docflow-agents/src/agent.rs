//! Agent contract and the retrying call wrapper shared by every agent.

use std::fmt::Debug;

use async_trait::async_trait;
use docflow_core::prelude::*;
use tracing::{debug, warn};

/// A single-responsibility unit of document processing.
///
/// [`run`](Agent::run) is one attempt. Callers go through
/// [`AgentExt::call`], which applies the agent's own retry policy and reports
/// attempt counts. Equal inputs must give equal outputs given the same backend
/// responses.
#[async_trait]
pub trait Agent: Send + Sync + Debug {
    type Input: Send + Sync;
    type Output: Send;

    /// Get the name of this agent for logging and metrics.
    fn name(&self) -> &str;

    /// Perform one attempt.
    async fn run(&self, input: &Self::Input) -> Result<Self::Output>;

    /// Agent-level retry policy.
    fn retry_policy(&self) -> &RetryPolicy;

    /// Whether a failed attempt is worth repeating. Defaults to transient provider errors.
    fn retries_on(&self, error: &FlowError) -> bool {
        error.is_retryable()
    }
}

/// Retrying invocation for any [`Agent`].
#[async_trait]
pub trait AgentExt: Agent {
    /// Run the agent under its retry policy, observing `cancel`.
    async fn call(
        &self,
        input: &Self::Input,
        cancel: &CancellationToken,
    ) -> std::result::Result<Attempted<Self::Output>, RetryError>;
}

#[async_trait]
impl<A> AgentExt for A
where
    A: Agent + ?Sized,
{
    async fn call(
        &self,
        input: &Self::Input,
        cancel: &CancellationToken,
    ) -> std::result::Result<Attempted<Self::Output>, RetryError> {
        let outcome = retry_with_policy_if(
            self.retry_policy(),
            cancel,
            |error| self.retries_on(error),
            |attempt| async move {
                debug!(agent = %self.name(), attempt, "agent attempt");
                self.run(input).await
            },
        )
        .await;

        match &outcome {
            Ok(done) => debug!(
                agent = %self.name(),
                attempts = done.attempts,
                elapsed_ms = done.elapsed.as_millis() as u64,
                "agent succeeded"
            ),
            Err(err) => warn!(
                agent = %self.name(),
                attempts = err.attempts,
                kind = %err.kind(),
                error = %err.error,
                "agent failed"
            ),
        }
        #[cfg(feature = "metrics")]
        record_metrics(self.name(), &outcome);
        outcome
    }
}

#[cfg(feature = "metrics")]
fn record_metrics<T>(agent: &str, outcome: &std::result::Result<Attempted<T>, RetryError>) {
    let (status, attempts, elapsed) = match outcome {
        Ok(done) => ("succeeded", done.attempts, done.elapsed),
        Err(err) => (err.kind().as_str(), err.attempts, err.elapsed),
    };
    metrics::counter!(
        "docflow_agent_invocations_total",
        "agent" => agent.to_string(),
        "outcome" => status
    )
    .increment(1);
    metrics::histogram!("docflow_agent_attempts", "agent" => agent.to_string())
        .record(f64::from(attempts));
    metrics::histogram!("docflow_agent_duration_seconds", "agent" => agent.to_string())
        .record(elapsed.as_secs_f64());
}
