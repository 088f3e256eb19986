//! Canned replies for the standard document pipeline.
//!
//! Classification rules match keywords in the document text. Extraction
//! replies are keyed by the requested schema name, so an extraction request
//! never picks up a classification reply or the other way round.

use serde_json::{Value, json};

use crate::{error::Result, mock::MockLlmClient};

/// Schema name used by the classification agent.
pub const CLASSIFICATION_SCHEMA: &str = "classification";

fn classified(document_type: &str, confidence: f64, reasoning: &str) -> Value {
    json!({
        "document_type": document_type,
        "confidence": confidence,
        "reasoning": reasoning,
    })
}

/// Ordered keyword rules; receipts are checked before invoices since both carry totals.
fn classification_rules() -> Vec<(&'static str, Value)> {
    let receipt = classified(
        "receipt",
        0.92,
        "Document contains merchant information and transaction details.",
    );
    vec![
        (r"coffee\s*shop|thank\s*you|visa\s*\*+", receipt.clone()),
        (r"receipt|transaction|merchant|payment\s*method", receipt),
        (
            r"invoice|inv[\-\s]|bill\s*to|payment\s*terms",
            classified(
                "invoice",
                0.95,
                "Document contains invoice number, line items, and total amount.",
            ),
        ),
        (
            r"agreement|contract|parties|hereby|governing\s*law",
            classified(
                "contract",
                0.90,
                "Document contains legal language and party definitions.",
            ),
        ),
        (
            r"\bform\b|application|checkbox|\[\s*[xX]?\s*\]",
            classified("form", 0.88, "Document contains form fields and checkboxes."),
        ),
    ]
}

pub fn invoice_fixture() -> Value {
    json!({
        "invoice_number": "INV-2024-001",
        "invoice_date": "2024-01-15",
        "due_date": "2024-02-15",
        "vendor": {
            "name": "Acme Corporation",
            "address": {"street": "123 Business St", "city": "New York", "state": "NY", "postal_code": "10001"}
        },
        "customer": {
            "name": "Customer Inc",
            "address": {"street": "456 Client Ave", "city": "Los Angeles", "state": "CA", "postal_code": "90001"}
        },
        "line_items": [
            {"description": "Consulting Services", "quantity": 10.0, "unit_price": 150.0, "total": 1500.0},
            {"description": "Software License", "quantity": 1.0, "unit_price": 500.0, "total": 500.0}
        ],
        "subtotal": 2000.0,
        "tax_amount": 160.0,
        "tax_rate": 8.0,
        "total_amount": 2160.0,
        "currency": "USD",
        "payment_terms": "Net 30"
    })
}

pub fn receipt_fixture() -> Value {
    json!({
        "merchant_name": "Coffee Shop",
        "merchant_address": {"street": "123 Main Street", "city": "San Francisco", "state": "CA", "postal_code": "94102"},
        "transaction_date": "2024-01-20",
        "transaction_time": "10:30 AM",
        "line_items": [
            {"description": "Latte", "total": 5.50},
            {"description": "Croissant", "total": 3.75}
        ],
        "subtotal": 9.25,
        "tax_amount": 0.74,
        "total_amount": 9.99,
        "payment_method": "VISA",
        "card_last_four": "1234",
        "currency": "USD"
    })
}

pub fn contract_fixture() -> Value {
    json!({
        "contract_title": "Service Agreement",
        "contract_type": "Service",
        "effective_date": "2024-03-01",
        "expiration_date": "2025-02-28",
        "parties": [{"name": "Provider Corp"}, {"name": "Client LLC"}],
        "governing_law": "Delaware",
        "key_terms": ["Monthly payment", "Service delivery"],
        "total_value": 120000.0,
        "currency": "USD"
    })
}

pub fn form_fixture() -> Value {
    json!({
        "form_title": "Application Form",
        "form_type": "Application",
        "form_date": "2024-02-01",
        "submitted_by": {
            "name": "John Smith",
            "email": "john.smith@email.com",
            "phone": "(555) 123-4567"
        },
        "fields": {"Name": "John Smith", "Email": "john.smith@email.com", "Phone": "(555) 123-4567"},
        "checkboxes": {"terms_agreed": true, "newsletter": false},
        "signatures": ["John Smith"]
    })
}

impl MockLlmClient {
    /// Add the keyword-based classification replies, defaulting to `unknown`.
    pub fn with_classification_presets(mut self) -> Result<Self> {
        for (pattern, reply) in classification_rules() {
            self = self.when(CLASSIFICATION_SCHEMA, pattern, reply)?;
        }
        self.for_schema(
            CLASSIFICATION_SCHEMA,
            classified("unknown", 0.5, "Unable to determine document type."),
        )
    }

    /// Add one extraction reply per document type schema.
    pub fn with_extraction_presets(self) -> Result<Self> {
        self.for_schema("invoice", invoice_fixture())?
            .for_schema("receipt", receipt_fixture())?
            .for_schema("contract", contract_fixture())?
            .for_schema("form", form_fixture())
    }

    /// A client configured for the whole standard pipeline.
    pub fn with_document_presets() -> Result<Self> {
        Self::new()
            .with_classification_presets()?
            .with_extraction_presets()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::{LlmClient, Prompt},
        schema::OutputSchema,
    };

    async fn classify(client: &MockLlmClient, text: &str) -> String {
        let schema = OutputSchema::new(CLASSIFICATION_SCHEMA, json!({"type": "object"})).unwrap();
        let reply = client.complete(&Prompt::new(text), &schema).await.unwrap();
        reply["document_type"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_classification_presets() {
        let client = MockLlmClient::with_document_presets().unwrap();

        assert_eq!(classify(&client, "INVOICE #INV-001\nBill To: Customer").await, "invoice");
        assert_eq!(classify(&client, "COFFEE SHOP\nThank you for visiting").await, "receipt");
        assert_eq!(classify(&client, "This Agreement is made between the parties").await, "contract");
        assert_eq!(classify(&client, "Employee application\n[x] I agree").await, "form");
        assert_eq!(classify(&client, "Lorem ipsum dolor sit amet").await, "unknown");
    }

    #[tokio::test]
    async fn test_extraction_keyed_by_schema() {
        let client = MockLlmClient::with_document_presets().unwrap();
        let schema = OutputSchema::new("receipt", json!({"type": "object"})).unwrap();

        // Prompt mentions "invoice" but the receipt schema decides the reply
        let reply = client
            .complete(&Prompt::new("invoice-like receipt text"), &schema)
            .await
            .unwrap();
        assert_eq!(reply["merchant_name"], "Coffee Shop");
    }
}
