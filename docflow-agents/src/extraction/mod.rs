//! Structured field extraction.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use docflow_core::prelude::*;
use docflow_llm::prelude::*;
use tracing::debug;

use crate::{agent::Agent, retrieval::Snippet};

mod records;

pub use records::{
    Address, ContractRecord, ExtractedRecord, FormRecord, InvoiceRecord, LineItem, Party,
    ReceiptRecord, record_schema,
};

fn instructions(document_type: DocumentType) -> &'static str {
    match document_type {
        DocumentType::Invoice => {
            "You extract data from invoices. Capture the invoice number, invoice and due dates, \
             vendor and customer details, every line item with quantity and unit price, the \
             subtotal, tax, total, currency and payment terms."
        }
        DocumentType::Receipt => {
            "You extract data from receipts. Capture the merchant name and address, transaction \
             date and time, purchased items, subtotal, tax, tip, total, payment method and the \
             last four card digits."
        }
        DocumentType::Contract => {
            "You extract data from contracts. Capture the title and type, effective and \
             expiration dates, every party, the governing law, key terms and total value."
        }
        DocumentType::Form | DocumentType::Unknown => {
            "You extract data from forms. Capture the title and type, the form date, who \
             submitted it, every labelled field with its value, checkbox states and signatures."
        }
    }
}

/// Input for [`ExtractionAgent`].
#[derive(Debug, Clone)]
pub struct ExtractionInput {
    pub document: Arc<Document>,
    pub document_type: DocumentType,
    /// Guidelines found by retrieval; may be empty.
    pub snippets: Vec<Snippet>,
}

/// Pulls a typed record out of a classified document.
///
/// Replies that fail to parse or do not match the record schema are asked for
/// again within the agent's retry budget. Once the budget is spent they surface
/// as a schema violation.
#[derive(Debug, Clone)]
pub struct ExtractionAgent {
    client: Arc<dyn LlmClient>,
    schemas: BTreeMap<DocumentType, OutputSchema>,
    retry: RetryPolicy,
}

impl ExtractionAgent {
    pub fn new(client: Arc<dyn LlmClient>) -> Result<Self> {
        let schemas = DocumentType::ALL
            .into_iter()
            .filter(DocumentType::is_known)
            .map(|t| Ok((t, record_schema(t)?)))
            .collect::<Result<_>>()?;
        Ok(Self {
            client,
            schemas,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The schema replies for `document_type` are checked against.
    pub fn schema_for(&self, document_type: DocumentType) -> Option<&OutputSchema> {
        self.schemas.get(&document_type)
    }

    fn prompt(input: &ExtractionInput) -> Prompt {
        let mut system = instructions(input.document_type).to_string();
        if !input.snippets.is_empty() {
            system.push_str("\n\nGuidelines:");
            for snippet in &input.snippets {
                system.push_str(&format!("\n- {}", snippet.content));
            }
        }
        system.push_str("\n\nUse null for any field that is not present.");

        let user = format!(
            "Extract structured data from the following {} document:\n\n---\n{}\n---\n\nReturn the fields as JSON.",
            input.document_type,
            input.document.full_text()
        );
        Prompt::new(user).with_system(system)
    }
}

#[async_trait]
impl Agent for ExtractionAgent {
    type Input = ExtractionInput;
    type Output = ExtractedRecord;

    fn name(&self) -> &str {
        "extraction"
    }

    async fn run(&self, input: &ExtractionInput) -> Result<ExtractedRecord> {
        let schema = self.schemas.get(&input.document_type).ok_or_else(|| {
            FlowError::invalid_input(format!(
                "cannot extract fields from a document of type '{}'",
                input.document_type
            ))
        })?;

        let value = self.client.complete(&Self::prompt(input), schema).await?;
        let record = ExtractedRecord::parse(schema, input.document_type, value)?;
        debug!(
            document_id = %input.document.id,
            document_type = %input.document_type,
            "fields extracted"
        );
        Ok(record)
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn retries_on(&self, error: &FlowError) -> bool {
        error.is_retryable() || error.kind() == ErrorKind::SchemaViolation
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::agent::AgentExt;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::default()
            .with_backoff(Duration::from_millis(1), 2.0)
            .with_jitter(false)
    }

    fn input(document_type: DocumentType, text: &str) -> ExtractionInput {
        ExtractionInput {
            document: Arc::new(Document::from_pages("doc", [text])),
            document_type,
            snippets: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_extracts_invoice() {
        let client = Arc::new(MockLlmClient::with_document_presets().unwrap());
        let agent = ExtractionAgent::new(client).unwrap();

        let record = agent
            .run(&input(DocumentType::Invoice, "INVOICE #INV-2024-001"))
            .await
            .unwrap();
        match record {
            ExtractedRecord::Invoice(invoice) => {
                assert_eq!(invoice.invoice_number.as_deref(), Some("INV-2024-001"));
                assert_eq!(invoice.total_amount, Some(2160.0));
                assert_eq!(invoice.line_items.len(), 2);
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_type_is_not_retried() {
        let client = Arc::new(MockLlmClient::with_document_presets().unwrap());
        let agent = ExtractionAgent::new(client.clone()).unwrap().with_retry(fast_retry());

        let err = agent
            .call(&input(DocumentType::Unknown, "???"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(err.attempts, 1);
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_output_is_retried_then_escalated() {
        let client = Arc::new(
            MockLlmClient::new()
                .for_schema("receipt", MockReply::Raw("Sorry, I can't read that.".into()))
                .unwrap(),
        );
        let agent = ExtractionAgent::new(client.clone()).unwrap().with_retry(fast_retry());

        let err = agent
            .call(&input(DocumentType::Receipt, "COFFEE SHOP"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaViolation);
        assert!(!err.error.is_retryable());
        assert_eq!(err.attempts, 3);
        assert_eq!(client.calls_for("receipt"), 3);
    }

    #[tokio::test]
    async fn test_recovers_after_a_bad_reply() {
        let client = Arc::new(
            MockLlmClient::new()
                .for_schema("invoice", json!({"invoice_number": "INV-1", "total_amount": 100.0}))
                .unwrap(),
        );
        client.fail_next(LlmError::malformed("truncated", "{\"invoice_"));
        let agent = ExtractionAgent::new(client).unwrap().with_retry(fast_retry());

        let done = agent
            .call(&input(DocumentType::Invoice, "INVOICE"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(done.attempts, 2);
        assert_eq!(done.value.document_type(), DocumentType::Invoice);
    }

    #[test]
    fn test_prompt_carries_guidelines() {
        let mut req = input(DocumentType::Contract, "This Agreement");
        req.snippets.push(Snippet {
            id: "contract-dates".into(),
            document_type: Some(DocumentType::Contract),
            title: "Contract dates".into(),
            content: "Effective date precedes expiration.".into(),
            score: 2.0,
        });

        let prompt = ExtractionAgent::prompt(&req);
        let system = prompt.system.unwrap();
        assert!(system.contains("Effective date precedes expiration."));
        assert!(prompt.user.contains("contract document"));
        assert!(prompt.user.contains("This Agreement"));
    }
}
