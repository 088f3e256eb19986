//! Document model.

use std::{
    collections::BTreeMap,
    fmt,
    str::FromStr,
    sync::atomic::{AtomicU8, Ordering},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::FlowError;

/// Closed set of document types the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Invoice,
    Receipt,
    Contract,
    Form,
    Unknown,
}

impl DocumentType {
    pub const ALL: [DocumentType; 5] = [
        Self::Invoice,
        Self::Receipt,
        Self::Contract,
        Self::Form,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::Receipt => "receipt",
            Self::Contract => "contract",
            Self::Form => "form",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a model-produced label, mapping anything unrecognised to `Unknown`.
    pub fn parse_lenient(label: &str) -> Self {
        label.parse().unwrap_or(Self::Unknown)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl FromStr for DocumentType {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "invoice" => Ok(Self::Invoice),
            "receipt" => Ok(Self::Receipt),
            "contract" => Ok(Self::Contract),
            "form" => Ok(Self::Form),
            "unknown" => Ok(Self::Unknown),
            other => Err(FlowError::invalid_input(format!(
                "unrecognised document type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing status of a document, advanced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DocumentStatus {
    #[default]
    Received = 0,
    Classified = 1,
    Extracted = 2,
    Validated = 3,
    Failed = 4,
}

impl DocumentStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Classified,
            2 => Self::Extracted,
            3 => Self::Validated,
            4 => Self::Failed,
            _ => Self::Received,
        }
    }
}

/// A single page of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based page number.
    pub number: u32,
    pub content: String,
}

/// Descriptive metadata carried alongside a document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentMetadata {
    pub source: Option<String>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub custom: BTreeMap<String, Value>,
}

/// Interior-mutable status so a document can be shared through `Arc` while
/// the engine advances it.
#[derive(Debug, Default)]
struct StatusCell(AtomicU8);

impl StatusCell {
    fn new(status: DocumentStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    fn get(&self) -> DocumentStatus {
        DocumentStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, status: DocumentStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

/// A document submitted for processing. Content never changes during a run.
#[derive(Debug, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub pages: Vec<Page>,
    #[serde(default)]
    pub metadata: DocumentMetadata,
    #[serde(
        default,
        serialize_with = "serialize_status",
        deserialize_with = "deserialize_status"
    )]
    status: StatusCell,
}

fn serialize_status<S: Serializer>(cell: &StatusCell, serializer: S) -> Result<S::Ok, S::Error> {
    cell.get().serialize(serializer)
}

fn deserialize_status<'de, D: Deserializer<'de>>(deserializer: D) -> Result<StatusCell, D::Error> {
    DocumentStatus::deserialize(deserializer).map(StatusCell::new)
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            pages: Vec::new(),
            metadata: DocumentMetadata::default(),
            status: StatusCell::default(),
        }
    }

    /// Build a document from page texts, numbering pages from 1.
    pub fn from_pages<I, S>(id: impl Into<String>, pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut doc = Self::new(id);
        for content in pages {
            doc.push_page(content);
        }
        doc
    }

    pub fn with_page(mut self, content: impl Into<String>) -> Self {
        self.push_page(content);
        self
    }

    pub fn with_metadata(mut self, metadata: DocumentMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    fn push_page(&mut self, content: impl Into<String>) {
        let number = self.pages.len() as u32 + 1;
        self.pages.push(Page {
            number,
            content: content.into(),
        });
    }

    /// Concatenated text of all pages separated by blank lines.
    pub fn full_text(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Look up a page by its 1-based number.
    pub fn page(&self, number: u32) -> Option<&Page> {
        self.pages.iter().find(|p| p.number == number)
    }

    pub fn status(&self) -> DocumentStatus {
        self.status.get()
    }

    pub(crate) fn set_status(&self, status: DocumentStatus) {
        self.status.set(status);
    }
}

impl Clone for Document {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            pages: self.pages.clone(),
            metadata: self.metadata.clone(),
            status: StatusCell::new(self.status()),
        }
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.pages == other.pages
            && self.metadata == other.metadata
            && self.status() == other.status()
    }
}
