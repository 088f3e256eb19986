//! Document type classification.

use std::sync::Arc;

use async_trait::async_trait;
use docflow_core::prelude::*;
use docflow_llm::prelude::*;
use schemars::JsonSchema;
use tracing::debug;

use crate::agent::Agent;

/// Pages sent to the model when no limit is configured.
pub const DEFAULT_MAX_PAGES: usize = 3;

const SYSTEM_PROMPT: &str = "You are a document classification expert. Decide which kind of \
business document you are looking at. Answer with exactly one label from: invoice, receipt, \
contract, form, unknown. Use unknown when none of the others clearly fits. Include a confidence \
between 0 and 1 and a short reasoning.";

/// Raw model reply.
#[derive(Debug, Deserialize, JsonSchema)]
struct ClassificationReply {
    document_type: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

/// Result of classifying one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationOutput {
    pub document_type: DocumentType,
    pub confidence: f64,
    pub reasoning: String,
    pub analyzed_pages: usize,
}

/// Labels a document with one of the known [`DocumentType`]s.
///
/// `unknown` is a valid answer. Labels outside the closed set are mapped to
/// `unknown` rather than rejected.
#[derive(Debug, Clone)]
pub struct ClassificationAgent {
    client: Arc<dyn LlmClient>,
    schema: OutputSchema,
    retry: RetryPolicy,
    max_pages: usize,
}

impl ClassificationAgent {
    pub fn new(client: Arc<dyn LlmClient>) -> Result<Self> {
        let schema = OutputSchema::of::<ClassificationReply>(CLASSIFICATION_SCHEMA)?;
        Ok(Self {
            client,
            schema,
            retry: RetryPolicy::default(),
            max_pages: DEFAULT_MAX_PAGES,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    fn prompt(&self, document: &Document) -> (Prompt, usize) {
        let pages: Vec<String> = document
            .pages
            .iter()
            .take(self.max_pages)
            .map(|page| format!("[Page {}]\n{}", page.number, page.content))
            .collect();
        let user = format!(
            "Classify the following document.\n\n{}\n\nReply with JSON only.",
            pages.join("\n\n")
        );
        (Prompt::new(user).with_system(SYSTEM_PROMPT), pages.len())
    }
}

#[async_trait]
impl Agent for ClassificationAgent {
    type Input = Document;
    type Output = ClassificationOutput;

    fn name(&self) -> &str {
        "classification"
    }

    async fn run(&self, document: &Document) -> Result<ClassificationOutput> {
        if document.pages.is_empty() {
            return Err(FlowError::invalid_input(format!(
                "document '{}' has no pages",
                document.id
            )));
        }

        let (prompt, analyzed_pages) = self.prompt(document);
        let value = self.client.complete(&prompt, &self.schema).await?;
        let reply: ClassificationReply = self.schema.parse(value)?;
        if !(0.0..=1.0).contains(&reply.confidence) {
            return Err(LlmError::schema_mismatch(
                self.schema.name(),
                format!("confidence {} is outside [0, 1]", reply.confidence),
            )
            .into());
        }

        let document_type = DocumentType::parse_lenient(&reply.document_type);
        debug!(
            document_id = %document.id,
            label = %reply.document_type,
            %document_type,
            confidence = reply.confidence,
            "document classified"
        );
        Ok(ClassificationOutput {
            document_type,
            confidence: reply.confidence,
            reasoning: reply.reasoning,
            analyzed_pages,
        })
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::agent::AgentExt;

    fn agent(client: MockLlmClient) -> ClassificationAgent {
        ClassificationAgent::new(Arc::new(client)).unwrap()
    }

    #[tokio::test]
    async fn test_classifies_with_presets() {
        let agent = agent(MockLlmClient::with_document_presets().unwrap());
        let doc = Document::from_pages("d1", ["INVOICE #INV-2024-001", "Bill To: Customer Inc"]);

        let out = agent.run(&doc).await.unwrap();
        assert_eq!(out.document_type, DocumentType::Invoice);
        assert_eq!(out.analyzed_pages, 2);
        assert!(out.confidence > 0.9);
    }

    #[tokio::test]
    async fn test_unknown_is_a_result() {
        let agent = agent(MockLlmClient::with_document_presets().unwrap());
        let doc = Document::from_pages("d2", ["Lorem ipsum dolor sit amet"]);

        let out = agent.run(&doc).await.unwrap();
        assert_eq!(out.document_type, DocumentType::Unknown);
    }

    #[tokio::test]
    async fn test_only_first_pages_are_sent() {
        let client = Arc::new(MockLlmClient::with_document_presets().unwrap());
        let agent = ClassificationAgent::new(client.clone())
            .unwrap()
            .with_max_pages(1);
        let doc = Document::from_pages("d3", ["first page text", "second page: INVOICE"]);

        let out = agent.run(&doc).await.unwrap();
        assert_eq!(out.analyzed_pages, 1);
        assert_eq!(out.document_type, DocumentType::Unknown);

        let calls = client.calls();
        assert!(calls[0].user.contains("[Page 1]"));
        assert!(!calls[0].user.contains("second page"));
    }

    #[tokio::test]
    async fn test_unrecognised_label_maps_to_unknown() {
        let client = MockLlmClient::new()
            .for_schema(
                CLASSIFICATION_SCHEMA,
                json!({"document_type": "purchase order", "confidence": 0.7}),
            )
            .unwrap();
        let out = agent(client)
            .run(&Document::from_pages("d4", ["PO 7781"]))
            .await
            .unwrap();
        assert_eq!(out.document_type, DocumentType::Unknown);
        assert_eq!(out.reasoning, "");
    }

    #[tokio::test]
    async fn test_bad_confidence_is_a_schema_violation() {
        let client = MockLlmClient::new()
            .for_schema(
                CLASSIFICATION_SCHEMA,
                json!({"document_type": "invoice", "confidence": 7.5}),
            )
            .unwrap();
        let err = agent(client)
            .run(&Document::from_pages("d5", ["x"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaViolation);
    }

    #[tokio::test]
    async fn test_empty_document_is_rejected() {
        let agent = agent(MockLlmClient::with_document_presets().unwrap());
        let err = agent.run(&Document::new("empty")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let client = Arc::new(MockLlmClient::with_document_presets().unwrap());
        client.fail_times(2, LlmError::rate_limited("429"));
        let agent = ClassificationAgent::new(client.clone()).unwrap().with_retry(
            RetryPolicy::default()
                .with_backoff(std::time::Duration::from_millis(1), 2.0)
                .with_jitter(false),
        );

        let done = agent
            .call(&Document::from_pages("d6", ["Thank you for your purchase"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(done.attempts, 3);
        assert_eq!(done.value.document_type, DocumentType::Receipt);
        assert_eq!(client.calls_for(CLASSIFICATION_SCHEMA), 3);
    }
}
