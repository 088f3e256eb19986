//! # docflow-agents
//!
//! The agents of the standard document pipeline and the glue that runs them
//! on a [`WorkflowEngine`](docflow_core::engine::WorkflowEngine):
//!
//! - [`ClassificationAgent`](classification::ClassificationAgent) labels a document
//! - [`RetrievalAgent`](retrieval::RetrievalAgent) looks up extraction guidelines
//! - [`ExtractionAgent`](extraction::ExtractionAgent) pulls out a typed record
//! - [`ValidationAgent`](validation::ValidationAgent) checks it against a [`RuleBook`](validation::RuleBook)
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use docflow_agents::prelude::*;
//!
//! # async fn demo() -> docflow_core::Result<()> {
//! let client = Arc::new(MockLlmClient::with_document_presets()?);
//! let pipeline = DocumentPipeline::builder(client).build()?;
//!
//! let result = pipeline
//!     .process(Document::from_pages("doc-1", ["INVOICE #INV-2024-001\nBill To: Customer Inc"]))
//!     .await;
//! assert_eq!(result.status(), RunStatus::Succeeded);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod classification;
pub mod config;
pub mod extraction;
pub mod pipeline;
pub mod registry;
pub mod retrieval;
pub mod steps;
pub mod validation;

#[cfg(test)]
mod pipeline_test;

/// Re-export commonly used types and traits
pub mod prelude {
    pub use docflow_core::prelude::*;
    pub use docflow_llm::prelude::*;

    pub use crate::{
        agent::{Agent, AgentExt},
        classification::{ClassificationAgent, ClassificationOutput},
        config::{PipelineConfig, StepOverride},
        extraction::{ExtractedRecord, ExtractionAgent, ExtractionInput},
        pipeline::{DocumentPipeline, DocumentPipelineBuilder, WORKFLOW_NAME, standard_workflow},
        registry::{AgentRegistry, HandlerKind},
        retrieval::{InMemoryKnowledgeBase, KnowledgeBase, RetrievalAgent, RetrievalQuery, Snippet},
        steps::{ClassifyStep, ExtractStep, RetrieveStep, ValidateStep},
        validation::{
            Check, Rule, RuleBook, RuleSetSource, Severity, ValidationAgent, ValidationInput,
            ValidationReport, Violation,
        },
    };
}
