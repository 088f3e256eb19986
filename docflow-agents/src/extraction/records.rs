//! Typed records produced by extraction.
//!
//! Dates are kept as the strings the model returned; the validation rules
//! decide whether they parse. Amounts are plain numbers.

use std::collections::BTreeMap;

use docflow_core::prelude::*;
use docflow_llm::prelude::*;
use schemars::JsonSchema;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Address {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

/// A named organisation or person.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Party {
    pub name: String,
    pub address: Option<Address>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct LineItem {
    pub description: String,
    pub quantity: Option<f64>,
    pub unit_price: Option<f64>,
    pub total: Option<f64>,
}

impl LineItem {
    /// The printed total, or quantity times unit price when only those are known.
    pub fn amount(&self) -> Option<f64> {
        self.total.or_else(|| Some(self.quantity? * self.unit_price?))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct InvoiceRecord {
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub due_date: Option<String>,
    pub vendor: Option<Party>,
    pub customer: Option<Party>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    pub subtotal: Option<f64>,
    pub tax_amount: Option<f64>,
    pub tax_rate: Option<f64>,
    pub total_amount: Option<f64>,
    pub currency: Option<String>,
    pub payment_terms: Option<String>,
    pub purchase_order: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ReceiptRecord {
    pub merchant_name: Option<String>,
    pub merchant_address: Option<Address>,
    pub transaction_date: Option<String>,
    pub transaction_time: Option<String>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    pub subtotal: Option<f64>,
    pub tax_amount: Option<f64>,
    pub tip_amount: Option<f64>,
    pub total_amount: Option<f64>,
    pub payment_method: Option<String>,
    pub card_last_four: Option<String>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ContractRecord {
    pub contract_title: Option<String>,
    pub contract_type: Option<String>,
    pub effective_date: Option<String>,
    pub expiration_date: Option<String>,
    #[serde(default)]
    pub parties: Vec<Party>,
    pub governing_law: Option<String>,
    #[serde(default)]
    pub key_terms: Vec<String>,
    pub total_value: Option<f64>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct FormRecord {
    pub form_title: Option<String>,
    pub form_type: Option<String>,
    pub form_date: Option<String>,
    pub submitted_by: Option<Party>,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default)]
    pub checkboxes: BTreeMap<String, bool>,
    #[serde(default)]
    pub signatures: Vec<String>,
}

/// A record of whichever type the document was classified as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "document_type", content = "fields", rename_all = "snake_case")]
pub enum ExtractedRecord {
    Invoice(InvoiceRecord),
    Receipt(ReceiptRecord),
    Contract(ContractRecord),
    Form(FormRecord),
}

impl ExtractedRecord {
    pub fn document_type(&self) -> DocumentType {
        match self {
            Self::Invoice(_) => DocumentType::Invoice,
            Self::Receipt(_) => DocumentType::Receipt,
            Self::Contract(_) => DocumentType::Contract,
            Self::Form(_) => DocumentType::Form,
        }
    }

    /// The record's own fields, as stored in the run context.
    pub fn to_fields(&self) -> Result<Value> {
        let value = match self {
            Self::Invoice(r) => serde_json::to_value(r)?,
            Self::Receipt(r) => serde_json::to_value(r)?,
            Self::Contract(r) => serde_json::to_value(r)?,
            Self::Form(r) => serde_json::to_value(r)?,
        };
        Ok(value)
    }

    /// Check `fields` against the schema for `document_type` and build the record.
    pub fn parse(schema: &OutputSchema, document_type: DocumentType, fields: Value) -> Result<Self> {
        let record = match document_type {
            DocumentType::Invoice => Self::Invoice(schema.parse(fields)?),
            DocumentType::Receipt => Self::Receipt(schema.parse(fields)?),
            DocumentType::Contract => Self::Contract(schema.parse(fields)?),
            DocumentType::Form => Self::Form(schema.parse(fields)?),
            DocumentType::Unknown => {
                return Err(FlowError::invalid_input(
                    "no record type for an unknown document",
                ));
            }
        };
        Ok(record)
    }
}

/// Output schema for a document type; named after the type.
pub fn record_schema(document_type: DocumentType) -> Result<OutputSchema> {
    let name = document_type.as_str();
    let schema = match document_type {
        DocumentType::Invoice => OutputSchema::of::<InvoiceRecord>(name)?,
        DocumentType::Receipt => OutputSchema::of::<ReceiptRecord>(name)?,
        DocumentType::Contract => OutputSchema::of::<ContractRecord>(name)?,
        DocumentType::Form => OutputSchema::of::<FormRecord>(name)?,
        DocumentType::Unknown => {
            return Err(FlowError::invalid_input(
                "no output schema for an unknown document",
            ));
        }
    };
    Ok(schema)
}
