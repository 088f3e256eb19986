//! # docflow-core
//!
//! Workflow orchestration for multi-agent document processing.
//!
//! A workflow is a small acyclic graph of steps. Each step invokes a
//! [`StepHandler`](step::StepHandler), usually an LLM-backed agent, and ends
//! as succeeded, failed or skipped. Edges keyed by that outcome, optionally
//! guarded by predicates over the shared [`Context`](context::Context), decide
//! what runs next.
//!
//! ## Core Concepts
//!
//! - **Document**: pages of text plus metadata, shared read-only by every step
//! - **Context**: string-keyed JSON values accumulated as steps complete
//! - **Step**: a handler with an output key, retry policy and fatal flag
//! - **Engine**: drives a run to a terminal status and records every step
//!
//! ## Quick Start
//!
//! ```rust
//! use docflow_core::prelude::*;
//! use serde_json::json;
//!
//! # async fn demo() -> docflow_core::Result<()> {
//! let classify = StepDefinition::new(
//!     "classify",
//!     handler_fn("classify", |_| async { Ok(StepOutput::new(json!("invoice"))) }),
//! )
//! .output_key(keys::DOCUMENT_TYPE);
//!
//! let workflow = WorkflowDefinition::builder("demo")
//!     .step(classify)
//!     .then("classify", Target::End)
//!     .build()?;
//!
//! let result = WorkflowEngine::new(workflow)
//!     .execute(Document::from_pages("doc-1", ["INVOICE #1"]))
//!     .await;
//! assert_eq!(result.status(), RunStatus::Succeeded);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod definition;
pub mod document;
pub mod edges;
pub mod engine;
pub mod error;
pub mod history;
pub mod result;
pub mod retry;
pub mod state;
pub mod step;


pub use error::{FlowError, Result};

/// Convenient re-exports for common use.
pub mod prelude {
    pub use async_trait::async_trait;
    pub use serde::{Deserialize, Serialize};
    pub use tokio_util::sync::CancellationToken;

    pub use crate::{
        config::EngineConfig,
        context::{Context, ContextBuilder, keys},
        definition::{Edge, Guard, Predicate, StepDefinition, Target, WorkflowBuilder, WorkflowDefinition},
        document::{Document, DocumentMetadata, DocumentStatus, DocumentType, Page},
        edges::resolve_next,
        engine::WorkflowEngine,
        error::{ErrorKind, FlowError, Result, RetryError},
        history::{StepError, StepOutcome, StepRecord},
        result::{RunSummary, WorkflowResult},
        retry::{Attempted, RetryPolicy, retry_with_policy, retry_with_policy_if, sleep_or_cancel},
        state::{RunError, RunStatus, WorkflowState},
        step::{FnHandler, StepHandler, StepInput, StepOutput, handler_fn},
    };
}
