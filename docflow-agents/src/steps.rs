//! Step handlers that connect the agents to the run context.
//!
//! Each handler reads its inputs from the [`WorkflowState`], calls its agent
//! through [`AgentExt::call`] and turns the typed output into a
//! [`StepOutput`]. Output keys are set on the step definition; the handlers
//! only add the extra keys listed below.

use std::sync::Arc;

use async_trait::async_trait;
use docflow_core::prelude::*;
use serde_json::Value;

use crate::{
    agent::{Agent, AgentExt},
    classification::{ClassificationAgent, ClassificationOutput},
    extraction::{ExtractedRecord, ExtractionAgent, ExtractionInput},
    retrieval::{RetrievalAgent, RetrievalQuery, Snippet},
    validation::{ValidationAgent, ValidationInput, ValidationReport},
};

type StepResult = std::result::Result<Attempted<StepOutput>, RetryError>;

/// Convert a finished agent call, keeping its attempt metadata on conversion errors.
fn finish<T>(done: Attempted<T>, convert: impl FnOnce(T) -> Result<StepOutput>) -> StepResult {
    let Attempted {
        value,
        attempts,
        elapsed,
    } = done;
    match convert(value) {
        Ok(output) => Ok(Attempted {
            value: output,
            attempts,
            elapsed,
        }),
        Err(error) => Err(RetryError::new(error, attempts, elapsed)),
    }
}

fn document_type(state: &WorkflowState) -> Result<DocumentType> {
    state
        .context()
        .get_json::<DocumentType>(keys::DOCUMENT_TYPE)?
        .ok_or_else(|| FlowError::invalid_input("document has not been classified"))
}

fn extraction_input(state: &WorkflowState) -> Result<ExtractionInput> {
    Ok(ExtractionInput {
        document: Arc::clone(state.document()),
        document_type: document_type(state)?,
        snippets: state
            .context()
            .get_json::<Vec<Snippet>>(keys::RETRIEVED_SNIPPETS)?
            .unwrap_or_default(),
    })
}

fn validation_input(state: &WorkflowState) -> Result<ValidationInput> {
    let record = state
        .context()
        .get_raw(keys::EXTRACTED_DATA)
        .cloned()
        .ok_or_else(|| FlowError::invalid_input("no extracted data to validate"))?;
    Ok(ValidationInput {
        document_type: document_type(state)?,
        record,
    })
}

/// Writes the label as its value and the full classification under `classification`.
#[derive(Debug)]
pub struct ClassifyStep {
    agent: ClassificationAgent,
}

impl ClassifyStep {
    pub fn new(agent: ClassificationAgent) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl StepHandler for ClassifyStep {
    fn name(&self) -> &str {
        self.agent.name()
    }

    async fn invoke(&self, state: &WorkflowState, cancel: &CancellationToken) -> StepResult {
        let done = self.agent.call(state.document().as_ref(), cancel).await?;
        finish(done, |out: ClassificationOutput| {
            StepOutput::new(Value::from(out.document_type.as_str()))
                .with_extra(keys::CLASSIFICATION, &out)
        })
    }
}

/// Writes the snippet list as its value.
#[derive(Debug)]
pub struct RetrieveStep {
    agent: RetrievalAgent,
}

impl RetrieveStep {
    pub fn new(agent: RetrievalAgent) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl StepHandler for RetrieveStep {
    fn name(&self) -> &str {
        self.agent.name()
    }

    async fn invoke(&self, state: &WorkflowState, cancel: &CancellationToken) -> StepResult {
        let query = RetrievalQuery {
            document_type: document_type(state).map_err(RetryError::immediate)?,
        };
        let done = self.agent.call(&query, cancel).await?;
        finish(done, |snippets| StepOutput::from_serialize(&snippets))
    }
}

/// Writes the record's fields as its value. Missing snippets are treated as none.
#[derive(Debug)]
pub struct ExtractStep {
    agent: ExtractionAgent,
}

impl ExtractStep {
    pub fn new(agent: ExtractionAgent) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl StepHandler for ExtractStep {
    fn name(&self) -> &str {
        self.agent.name()
    }

    async fn invoke(&self, state: &WorkflowState, cancel: &CancellationToken) -> StepResult {
        let input = extraction_input(state).map_err(RetryError::immediate)?;
        let done = self.agent.call(&input, cancel).await?;
        finish(done, |record: ExtractedRecord| Ok(StepOutput::new(record.to_fields()?)))
    }
}

/// Writes the report as its value and the blocking messages under `validation_errors`.
#[derive(Debug)]
pub struct ValidateStep {
    agent: ValidationAgent,
}

impl ValidateStep {
    pub fn new(agent: ValidationAgent) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl StepHandler for ValidateStep {
    fn name(&self) -> &str {
        self.agent.name()
    }

    async fn invoke(&self, state: &WorkflowState, cancel: &CancellationToken) -> StepResult {
        let input = validation_input(state).map_err(RetryError::immediate)?;
        let strict = self.agent.is_strict();
        let done = self.agent.call(&input, cancel).await?;
        finish(done, |report: ValidationReport| {
            StepOutput::from_serialize(&report)?
                .with_extra(keys::VALIDATION_ERRORS, report.blocking_messages(strict))
        })
    }
}
