//! The standard document processing workflow.
//!
//! ```text
//! classify ──succeeded──▶ retrieve ──▶ extract ──succeeded──▶ validate ──▶ End
//!    └──failed──▶ End                     └──skipped/failed──▶ End
//! ```
//!
//! Retrieval and extraction only run for a known document type; validation
//! only runs when extracted data is present. Classification and extraction
//! are fatal by default, retrieval and validation degrade the run.

use std::sync::Arc;

use docflow_core::prelude::*;
use docflow_llm::prelude::*;
use tracing::info;

use crate::{
    config::PipelineConfig,
    registry::{AgentRegistry, HandlerKind},
    retrieval::{InMemoryKnowledgeBase, KnowledgeBase},
    validation::{RuleBook, RuleSetSource},
};

/// Name of the standard workflow.
pub const WORKFLOW_NAME: &str = "document_processing";

fn known_type() -> Guard {
    Guard::not_equals(keys::DOCUMENT_TYPE, DocumentType::Unknown.as_str())
}

fn step(
    registry: &AgentRegistry,
    config: &PipelineConfig,
    kind: HandlerKind,
) -> Result<StepDefinition> {
    let handler = registry.get(kind)?;
    let step = StepDefinition::new(kind.as_str(), handler);
    let step = match kind {
        HandlerKind::Classify => step
            .output_key(keys::DOCUMENT_TYPE)
            .fatal(true)
            .marks(DocumentStatus::Classified)
            .description("Label the document with its type"),
        HandlerKind::Retrieve => step
            .output_key(keys::RETRIEVED_SNIPPETS)
            .when(known_type())
            .description("Look up extraction guidelines for the type"),
        HandlerKind::Extract => step
            .output_key(keys::EXTRACTED_DATA)
            .fatal(true)
            .when(known_type())
            .marks(DocumentStatus::Extracted)
            .description("Extract the typed record"),
        HandlerKind::Validate => step
            .output_key(keys::VALIDATION_REPORT)
            .when(Guard::has_key(keys::EXTRACTED_DATA))
            .marks(DocumentStatus::Validated)
            .description("Check the record against the rule book"),
    };

    let Some(over) = config.step(kind) else {
        return Ok(step);
    };
    let step = match over.fatal {
        Some(fatal) => step.fatal(fatal),
        None => step,
    };
    Ok(match &over.retry {
        Some(retry) => step.retry(retry.clone()),
        None => step,
    })
}

/// Build the standard workflow from registered handlers.
pub fn standard_workflow(
    registry: &AgentRegistry,
    config: &PipelineConfig,
) -> Result<WorkflowDefinition> {
    let classify = HandlerKind::Classify.as_str();
    let retrieve = HandlerKind::Retrieve.as_str();
    let extract = HandlerKind::Extract.as_str();
    let validate = HandlerKind::Validate.as_str();

    let mut builder = WorkflowDefinition::builder(WORKFLOW_NAME)
        .version(env!("CARGO_PKG_VERSION"))
        .start(classify);
    for kind in HandlerKind::ALL {
        builder = builder.step(step(registry, config, kind)?);
    }
    builder
        .edge(classify, StepOutcome::Succeeded, Target::step(retrieve))
        .then(classify, Target::End)
        .then(retrieve, Target::step(extract))
        .edge(extract, StepOutcome::Succeeded, Target::step(validate))
        .then(extract, Target::End)
        .then(validate, Target::End)
        .build()
}

/// Classification, retrieval, extraction and validation on one engine.
#[derive(Debug, Clone)]
pub struct DocumentPipeline {
    engine: WorkflowEngine,
}

impl DocumentPipeline {
    pub fn builder(client: Arc<dyn LlmClient>) -> DocumentPipelineBuilder {
        DocumentPipelineBuilder::new(client)
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        self.engine.definition()
    }

    pub async fn process(&self, document: Document) -> WorkflowResult {
        self.engine.execute(document).await
    }

    pub async fn process_with_cancel(
        &self,
        document: Document,
        cancel: CancellationToken,
    ) -> WorkflowResult {
        self.engine.execute_with_cancel(document, cancel).await
    }

    /// Process independent documents concurrently; results keep input order.
    pub async fn process_batch(
        &self,
        documents: Vec<Document>,
        cancel: CancellationToken,
    ) -> Vec<WorkflowResult> {
        self.engine.process_batch(documents, cancel).await
    }

    /// Continue a saved, unfinished run.
    pub async fn resume(&self, state: WorkflowState, cancel: CancellationToken) -> WorkflowResult {
        self.engine.resume(state, cancel).await
    }
}

/// Builder for [`DocumentPipeline`].
///
/// Without further setup the pipeline uses the built-in guideline
/// knowledge base and rule book.
#[derive(Debug)]
pub struct DocumentPipelineBuilder {
    client: Arc<dyn LlmClient>,
    knowledge_base: Option<Arc<dyn KnowledgeBase>>,
    rules: Option<Arc<dyn RuleSetSource>>,
    config: PipelineConfig,
    handlers: Vec<(HandlerKind, Arc<dyn StepHandler>)>,
}

impl DocumentPipelineBuilder {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            knowledge_base: None,
            rules: None,
            config: PipelineConfig::default(),
            handlers: Vec::new(),
        }
    }

    pub fn knowledge_base(mut self, knowledge_base: Arc<dyn KnowledgeBase>) -> Self {
        self.knowledge_base = Some(knowledge_base);
        self
    }

    pub fn rules(mut self, rules: Arc<dyn RuleSetSource>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the standard handler for one stage.
    pub fn handler(mut self, kind: HandlerKind, handler: Arc<dyn StepHandler>) -> Self {
        self.handlers.push((kind, handler));
        self
    }

    pub fn build(self) -> Result<DocumentPipeline> {
        self.config.validate()?;
        let knowledge_base = self
            .knowledge_base
            .unwrap_or_else(|| Arc::new(InMemoryKnowledgeBase::standard()));
        let rules = self
            .rules
            .unwrap_or_else(|| Arc::new(RuleBook::standard()));

        let mut registry =
            AgentRegistry::standard(self.client, knowledge_base, rules, &self.config)?;
        for (kind, handler) in self.handlers {
            registry.register(kind, handler);
        }

        let definition = standard_workflow(&registry, &self.config)?;
        let engine = WorkflowEngine::with_config(definition, self.config.engine)?;
        info!(
            workflow = WORKFLOW_NAME,
            steps = engine.definition().steps().len(),
            "pipeline ready"
        );
        Ok(DocumentPipeline { engine })
    }
}
