//! Rule-based validation of extracted records.

use std::sync::Arc;

use async_trait::async_trait;
use docflow_core::prelude::*;
use serde_json::Value;
use tracing::{debug, info};

use crate::agent::Agent;

mod rules;

pub use rules::{Check, Rule, RuleBook, RuleSetSource, Severity, Violation};

/// Input for [`ValidationAgent`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationInput {
    pub document_type: DocumentType,
    /// Extracted fields, as stored in the run context.
    pub record: Value,
}

/// Outcome of validating one record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub violations: Vec<Violation>,
    pub rules_checked: usize,
    pub rules_passed: usize,
}

impl ValidationReport {
    pub fn count(&self, severity: Severity) -> usize {
        self.violations
            .iter()
            .filter(|v| v.severity == severity)
            .count()
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    /// Messages of the violations that make the record invalid.
    pub fn blocking_messages(&self, strict: bool) -> Vec<String> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Error || (strict && v.severity == Severity::Warning))
            .map(|v| v.message.clone())
            .collect()
    }
}

/// Checks a record against the rules for its document type.
///
/// Deterministic and free of external calls, so it never retries: an error
/// here is a defect in the rules and is always fatal to the run.
#[derive(Debug, Clone)]
pub struct ValidationAgent {
    rules: Arc<dyn RuleSetSource>,
    strict: bool,
    retry: RetryPolicy,
}

impl ValidationAgent {
    pub fn new(rules: Arc<dyn RuleSetSource>) -> Self {
        Self {
            rules,
            strict: false,
            retry: RetryPolicy::none(),
        }
    }

    /// Count warnings as failures.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }
}

#[async_trait]
impl Agent for ValidationAgent {
    type Input = ValidationInput;
    type Output = ValidationReport;

    fn name(&self) -> &str {
        "validation"
    }

    async fn run(&self, input: &ValidationInput) -> Result<ValidationReport> {
        let checks = self.rules.rules_for(input.document_type)?;
        let mut report = ValidationReport {
            rules_checked: checks.len(),
            ..Default::default()
        };

        for check in &checks {
            let found = check.evaluate(&input.record)?;
            if found.is_empty() {
                report.rules_passed += 1;
            } else {
                debug!(rule = %check.rule.name(), violations = found.len(), "rule failed");
                report.violations.extend(found);
            }
        }

        report.valid = report.blocking_messages(self.strict).is_empty();
        info!(
            document_type = %input.document_type,
            valid = report.valid,
            errors = report.error_count(),
            warnings = report.warning_count(),
            rules_checked = report.rules_checked,
            "validation completed"
        );
        Ok(report)
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn retries_on(&self, _error: &FlowError) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::agent::AgentExt;

    fn input(record: Value) -> ValidationInput {
        ValidationInput {
            document_type: DocumentType::Invoice,
            record,
        }
    }

    #[tokio::test]
    async fn test_clean_record_is_valid() {
        let agent = ValidationAgent::new(Arc::new(RuleBook::standard()));
        let report = agent
            .run(&input(json!({"invoice_number": "INV-1", "vendor": {"name": "Acme"}, "total_amount": 100.0})))
            .await
            .unwrap();

        assert!(report.valid);
        assert_eq!(report.violations, vec![]);
        assert_eq!(report.rules_checked, 7);
        assert_eq!(report.rules_passed, 7);
    }

    #[tokio::test]
    async fn test_missing_fields_make_record_invalid() {
        let agent = ValidationAgent::new(Arc::new(RuleBook::standard()));
        let report = agent.run(&input(json!({"total_amount": -3.0}))).await.unwrap();

        assert!(!report.valid);
        assert_eq!(report.error_count(), 2);
        assert_eq!(
            report.blocking_messages(false),
            vec![
                "Required field 'invoice_number' is missing or empty".to_string(),
                "Field 'total_amount' must not be negative".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_strict_mode_counts_warnings() {
        let record = json!({"invoice_number": "INV-1", "total_amount": 10.0, "invoice_date": "yesterday"});
        let lenient = ValidationAgent::new(Arc::new(RuleBook::standard()));
        let strict = lenient.clone().with_strict(true);

        let report = lenient.run(&input(record.clone())).await.unwrap();
        assert!(report.valid);
        assert_eq!(report.warning_count(), 1);

        let report = strict.run(&input(record)).await.unwrap();
        assert!(!report.valid);
    }

    #[tokio::test]
    async fn test_rule_defect_is_fatal_and_not_retried() {
        let book = RuleBook::new().with_rule(DocumentType::Invoice, Rule::pattern("invoice_number", "(["));
        let agent = ValidationAgent::new(Arc::new(book));

        let err = agent
            .call(&input(json!({"invoice_number": "x"})), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationRule);
        assert!(err.error.is_fatal());
        assert_eq!(err.attempts, 1);
    }

    #[tokio::test]
    async fn test_type_without_rules() {
        let agent = ValidationAgent::new(Arc::new(RuleBook::new()));
        let report = agent
            .run(&ValidationInput {
                document_type: DocumentType::Form,
                record: json!({}),
            })
            .await
            .unwrap();
        assert!(report.valid);
        assert_eq!(report.rules_checked, 0);
    }
}
