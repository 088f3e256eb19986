//! Extraction guideline retrieval.

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use docflow_core::prelude::*;
use tracing::debug;

use crate::agent::Agent;

/// Snippets returned when no limit is configured.
pub const DEFAULT_SNIPPET_LIMIT: usize = 3;

/// A guideline passage handed to the extraction agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub id: String,
    /// Document type the passage is about; `None` for general guidance.
    pub document_type: Option<DocumentType>,
    pub title: String,
    pub content: String,
    pub score: f64,
}

/// Source of guideline snippets.
#[async_trait]
pub trait KnowledgeBase: Send + Sync + Debug {
    /// Best matches for `query`, restricted to `document_type` and general entries.
    async fn search(
        &self,
        query: &str,
        document_type: DocumentType,
        limit: usize,
    ) -> Result<Vec<Snippet>>;
}

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    document_type: Option<DocumentType>,
    title: String,
    content: String,
}

/// Keyword-scored in-memory knowledge base.
///
/// An entry scores one point per distinct query term found in its title or
/// content, plus one when it is specific to the requested type. Ties are
/// broken by id, so results are stable.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKnowledgeBase {
    entries: Vec<Entry>,
}

impl InMemoryKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(
        mut self,
        id: impl Into<String>,
        document_type: Option<DocumentType>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        self.entries.push(Entry {
            id: id.into(),
            document_type,
            title: title.into(),
            content: content.into(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Built-in extraction guidelines for every known document type.
    pub fn standard() -> Self {
        Self::new()
            .with_entry(
                "general-dates",
                None,
                "Date guidelines",
                "Write every date as YYYY-MM-DD. Leave a date null when it is not printed on the document.",
            )
            .with_entry(
                "general-amounts",
                None,
                "Amount guidelines",
                "Amounts are plain numbers without currency symbols or thousands separators. Put the currency code in its own field.",
            )
            .with_entry(
                "invoice-totals",
                Some(DocumentType::Invoice),
                "Invoice totals",
                "For an invoice, subtotal plus tax amount should equal the total amount. Line item totals are quantity times unit price.",
            )
            .with_entry(
                "invoice-parties",
                Some(DocumentType::Invoice),
                "Invoice parties",
                "The vendor issues the invoice; the customer is the bill-to party. Capture the invoice number exactly as printed.",
            )
            .with_entry(
                "receipt-totals",
                Some(DocumentType::Receipt),
                "Receipt totals",
                "For a receipt, the total amount is subtotal plus tax plus tip. Record only the last four card digits.",
            )
            .with_entry(
                "contract-dates",
                Some(DocumentType::Contract),
                "Contract dates",
                "For a contract, the effective date must not be later than the expiration date. List every named party.",
            )
            .with_entry(
                "form-fields",
                Some(DocumentType::Form),
                "Form fields",
                "For a form, copy each labelled field with its value and record every checkbox as true or false.",
            )
    }
}

fn terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_lowercase)
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

#[async_trait]
impl KnowledgeBase for InMemoryKnowledgeBase {
    async fn search(
        &self,
        query: &str,
        document_type: DocumentType,
        limit: usize,
    ) -> Result<Vec<Snippet>> {
        let query_terms = terms(query);
        let mut hits: Vec<Snippet> = self
            .entries
            .iter()
            .filter(|e| e.document_type.is_none_or(|t| t == document_type))
            .filter_map(|e| {
                let haystack = format!("{} {}", e.title, e.content).to_lowercase();
                let matched = query_terms
                    .iter()
                    .filter(|t| haystack.contains(t.as_str()))
                    .count();
                let bonus = usize::from(e.document_type == Some(document_type));
                let score = (matched + bonus) as f64;
                (score > 0.0).then(|| Snippet {
                    id: e.id.clone(),
                    document_type: e.document_type,
                    title: e.title.clone(),
                    content: e.content.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Input for [`RetrievalAgent`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalQuery {
    pub document_type: DocumentType,
}

/// Looks up extraction guidelines for a classified document.
#[derive(Debug, Clone)]
pub struct RetrievalAgent {
    knowledge_base: Arc<dyn KnowledgeBase>,
    limit: usize,
    retry: RetryPolicy,
}

impl RetrievalAgent {
    pub fn new(knowledge_base: Arc<dyn KnowledgeBase>) -> Self {
        Self {
            knowledge_base,
            limit: DEFAULT_SNIPPET_LIMIT,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Agent for RetrievalAgent {
    type Input = RetrievalQuery;
    type Output = Vec<Snippet>;

    fn name(&self) -> &str {
        "retrieval"
    }

    async fn run(&self, query: &RetrievalQuery) -> Result<Vec<Snippet>> {
        if !query.document_type.is_known() {
            return Err(FlowError::invalid_input(
                "cannot retrieve guidelines for an unknown document type",
            ));
        }
        let text = format!("extraction guidelines for {}", query.document_type);
        let snippets = self
            .knowledge_base
            .search(&text, query.document_type, self.limit)
            .await?;
        debug!(document_type = %query.document_type, found = snippets.len(), "guidelines retrieved");
        Ok(snippets)
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn test_type_specific_entries_rank_first() {
        let agent = RetrievalAgent::new(Arc::new(InMemoryKnowledgeBase::standard()));
        let snippets = agent
            .run(&RetrievalQuery {
                document_type: DocumentType::Invoice,
            })
            .await
            .unwrap();

        assert_eq!(snippets.len(), DEFAULT_SNIPPET_LIMIT);
        assert_eq!(snippets[0].document_type, Some(DocumentType::Invoice));
        assert!(
            snippets
                .iter()
                .all(|s| s.document_type.is_none_or(|t| t == DocumentType::Invoice))
        );
    }

    #[tokio::test]
    async fn test_search_is_deterministic() {
        let kb = InMemoryKnowledgeBase::standard();
        let first = kb.search("guidelines for receipt", DocumentType::Receipt, 5).await.unwrap();
        let second = kb.search("guidelines for receipt", DocumentType::Receipt, 5).await.unwrap();
        assert_eq!(first, second);
        assert!(first.iter().any(|s| s.id == "receipt-totals"));
        assert!(!first.iter().any(|s| s.id.starts_with("contract")));
    }

    #[tokio::test]
    async fn test_unknown_type_is_invalid_input() {
        let agent = RetrievalAgent::new(Arc::new(InMemoryKnowledgeBase::new()));
        let err = agent
            .run(&RetrievalQuery {
                document_type: DocumentType::Unknown,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_no_matches() {
        let kb = InMemoryKnowledgeBase::new().with_entry("a", None, "Colours", "Red and blue");
        let hits = kb.search("guidelines for form", DocumentType::Form, 3).await.unwrap();
        assert!(hits.is_empty());
        assert_eq!(kb.len(), 1);
    }
}
