//! Step handler abstraction.

use std::{collections::BTreeMap, fmt::Debug, future::Future, pin::Pin, sync::Arc, time::Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    context::Context,
    document::Document,
    error::{FlowError, Result, RetryError},
    retry::Attempted,
    state::WorkflowState,
};

/// Value produced by a step, plus any extra context entries it wants written.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepOutput {
    /// Stored under the step's output key.
    pub value: Value,
    /// Additional keys written alongside the main value.
    pub extra: BTreeMap<String, Value>,
}

impl StepOutput {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            extra: BTreeMap::new(),
        }
    }

    /// Serialize `value` into a step output.
    pub fn from_serialize(value: &impl Serialize) -> Result<Self> {
        Ok(Self::new(serde_json::to_value(value)?))
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Serialize) -> Result<Self> {
        self.extra.insert(key.into(), serde_json::to_value(value)?);
        Ok(self)
    }
}

/// Trait for the capability a workflow step invokes.
///
/// A handler reads the run state, performs its work (typically one agent call
/// with the agent's own retry policy), and reports how many agent-level
/// attempts it took.
#[async_trait]
pub trait StepHandler: Send + Sync + Debug {
    /// Get the name of this handler for logging.
    fn name(&self) -> &str;

    /// Perform the step's work against the current state.
    async fn invoke(
        &self,
        state: &WorkflowState,
        cancel: &CancellationToken,
    ) -> std::result::Result<Attempted<StepOutput>, RetryError>;
}

/// Owned view of the run handed to closure handlers.
#[derive(Debug, Clone)]
pub struct StepInput {
    pub document: Arc<Document>,
    pub context: Context,
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<StepOutput>> + Send>>;

/// A handler that wraps an async closure. Each invocation is a single attempt.
pub struct FnHandler<F>
where
    F: Fn(StepInput) -> HandlerFuture + Send + Sync,
{
    func: F,
    name: String,
}

impl<F> Debug for FnHandler<F>
where
    F: Fn(StepInput) -> HandlerFuture + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").field("name", &self.name).finish()
    }
}

impl<F> FnHandler<F>
where
    F: Fn(StepInput) -> HandlerFuture + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            func,
            name: name.into(),
        }
    }
}

#[async_trait]
impl<F> StepHandler for FnHandler<F>
where
    F: Fn(StepInput) -> HandlerFuture + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        state: &WorkflowState,
        cancel: &CancellationToken,
    ) -> std::result::Result<Attempted<StepOutput>, RetryError> {
        if cancel.is_cancelled() {
            return Err(RetryError::immediate(FlowError::Cancelled));
        }
        let start = Instant::now();
        let input = StepInput {
            document: state.document().clone(),
            context: state.context().clone(),
        };
        match (self.func)(input).await {
            Ok(value) => Ok(Attempted {
                value,
                attempts: 1,
                elapsed: start.elapsed(),
            }),
            Err(error) => Err(RetryError::new(error, 1, start.elapsed())),
        }
    }
}

/// Wrap an async closure as a shared step handler.
pub fn handler_fn<F, Fut>(name: impl Into<String>, func: F) -> Arc<dyn StepHandler>
where
    F: Fn(StepInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StepOutput>> + Send + 'static,
{
    Arc::new(FnHandler::new(name, move |input| {
        Box::pin(func(input)) as HandlerFuture
    }))
}
