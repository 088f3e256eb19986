//! Pipeline configuration.

use std::{collections::BTreeMap, path::Path};

use docflow_core::prelude::*;

use crate::{
    classification::DEFAULT_MAX_PAGES, registry::HandlerKind, retrieval::DEFAULT_SNIPPET_LIMIT,
};

/// Per-step changes to the standard pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StepOverride {
    pub fatal: Option<bool>,
    /// Step-level retry, applied on top of the agent's own policy.
    pub retry: Option<RetryPolicy>,
}

/// Configuration for [`DocumentPipeline`](crate::pipeline::DocumentPipeline).
///
/// ```yaml
/// engine:
///   batch_concurrency: 8
/// agent_retry:
///   max_attempts: 4
///   backoff_base: 0.5
/// max_pages: 2
/// strict_validation: true
/// steps:
///   extract:
///     fatal: false
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub engine: EngineConfig,
    /// Retry policy for the LLM-backed and retrieval agents.
    pub agent_retry: RetryPolicy,
    /// Pages the classifier looks at.
    pub max_pages: usize,
    /// Guideline snippets handed to extraction.
    pub retrieval_limit: usize,
    /// Count validation warnings as failures.
    pub strict_validation: bool,
    pub steps: BTreeMap<HandlerKind, StepOverride>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            agent_retry: RetryPolicy::default(),
            max_pages: DEFAULT_MAX_PAGES,
            retrieval_limit: DEFAULT_SNIPPET_LIMIT,
            strict_validation: false,
            steps: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_agent_retry(mut self, policy: RetryPolicy) -> Self {
        self.agent_retry = policy;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_retrieval_limit(mut self, limit: usize) -> Self {
        self.retrieval_limit = limit;
        self
    }

    pub fn with_strict_validation(mut self, strict: bool) -> Self {
        self.strict_validation = strict;
        self
    }

    pub fn with_step(mut self, kind: HandlerKind, step: StepOverride) -> Self {
        self.steps.insert(kind, step);
        self
    }

    pub fn step(&self, kind: HandlerKind) -> Option<&StepOverride> {
        self.steps.get(&kind)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.agent_retry.validate()?;
        if self.max_pages == 0 {
            return Err(FlowError::configuration("max_pages must be at least 1"));
        }
        if self.retrieval_limit == 0 {
            return Err(FlowError::configuration(
                "retrieval_limit must be at least 1",
            ));
        }
        for (kind, step) in &self.steps {
            if let Some(retry) = &step.retry {
                retry.validate().map_err(|e| {
                    FlowError::configuration(format!("step '{kind}': {e}"))
                })?;
            }
        }
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            FlowError::configuration(format!("reading {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&yaml)
    }
}
