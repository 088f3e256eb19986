//! Registry mapping handler kinds to step handlers.

use std::{collections::HashMap, fmt, sync::Arc};

use docflow_core::prelude::*;
use docflow_llm::prelude::*;

use crate::{
    classification::ClassificationAgent,
    config::PipelineConfig,
    extraction::ExtractionAgent,
    retrieval::{KnowledgeBase, RetrievalAgent},
    steps::{ClassifyStep, ExtractStep, RetrieveStep, ValidateStep},
    validation::{RuleSetSource, ValidationAgent},
};

/// The stages of the standard pipeline. Each kind is also the step's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    Classify,
    Retrieve,
    Extract,
    Validate,
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 4] = [
        Self::Classify,
        Self::Retrieve,
        Self::Extract,
        Self::Validate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Retrieve => "retrieve",
            Self::Extract => "extract",
            Self::Validate => "validate",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry for the handlers a pipeline is assembled from.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    handlers: HashMap<HandlerKind, Arc<dyn StepHandler>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handlers backed by the standard agents.
    pub fn standard(
        client: Arc<dyn LlmClient>,
        knowledge_base: Arc<dyn KnowledgeBase>,
        rules: Arc<dyn RuleSetSource>,
        config: &PipelineConfig,
    ) -> Result<Self> {
        let classification = ClassificationAgent::new(client.clone())?
            .with_retry(config.agent_retry.clone())
            .with_max_pages(config.max_pages);
        let retrieval = RetrievalAgent::new(knowledge_base)
            .with_retry(config.agent_retry.clone())
            .with_limit(config.retrieval_limit);
        let extraction = ExtractionAgent::new(client)?.with_retry(config.agent_retry.clone());
        let validation = ValidationAgent::new(rules).with_strict(config.strict_validation);

        Ok(Self::new()
            .with(HandlerKind::Classify, Arc::new(ClassifyStep::new(classification)))
            .with(HandlerKind::Retrieve, Arc::new(RetrieveStep::new(retrieval)))
            .with(HandlerKind::Extract, Arc::new(ExtractStep::new(extraction)))
            .with(HandlerKind::Validate, Arc::new(ValidateStep::new(validation))))
    }

    pub fn with(mut self, kind: HandlerKind, handler: Arc<dyn StepHandler>) -> Self {
        self.register(kind, handler);
        self
    }

    /// Register a handler, returning the one it replaces.
    pub fn register(
        &mut self,
        kind: HandlerKind,
        handler: Arc<dyn StepHandler>,
    ) -> Option<Arc<dyn StepHandler>> {
        self.handlers.insert(kind, handler)
    }

    pub fn get(&self, kind: HandlerKind) -> Result<Arc<dyn StepHandler>> {
        self.handlers.get(&kind).cloned().ok_or_else(|| {
            FlowError::configuration(format!("no handler registered for '{kind}'"))
        })
    }

    pub fn contains(&self, kind: HandlerKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
