//! Field and record level validation rules.

use std::{collections::BTreeMap, fmt::Debug, path::Path};

use chrono::NaiveDate;
use docflow_core::prelude::*;
use regex::Regex;
use serde_json::{Value, json};

const ISO_DATE: &str = "%Y-%m-%d";
const EMAIL_PATTERN: &str = r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$";

fn default_date_format() -> String {
    ISO_DATE.to_string()
}

fn default_tolerance() -> f64 {
    0.01
}

/// How serious a violation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

/// One problem found in an extracted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: String,
    pub field: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
}

/// A check over an extracted record, addressed by dot-separated field paths
/// (`vendor.name`, `line_items.0.total`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rule {
    /// Field must be present and non-empty.
    RequiredField { field: String },
    /// Field, when present, must parse with a chrono date format.
    DateFormat {
        field: String,
        #[serde(default = "default_date_format")]
        format: String,
    },
    /// Two ISO dates, when both present, must be in order.
    DateOrder { earlier: String, later: String },
    /// Numeric field, when present, must not be negative.
    PositiveAmount { field: String },
    /// Numeric field, when present, must lie within `[min, max]`.
    Range { field: String, min: f64, max: f64 },
    /// String field, when present, must match a regular expression.
    Pattern { field: String, pattern: String },
    /// String field, when present, must look like an email address.
    EmailFormat { field: String },
    /// Field, when present, must equal one of the listed values.
    OneOf { field: String, values: Vec<Value> },
    /// `total_amount` must equal `subtotal + tax_amount + tip_amount`.
    TotalMatchesSum {
        #[serde(default = "default_tolerance")]
        tolerance: f64,
    },
    /// Line item amounts must add up to `subtotal`.
    LineItemsTotal {
        #[serde(default = "default_tolerance")]
        tolerance: f64,
    },
}

impl Rule {
    pub fn required(field: &str) -> Self {
        Self::RequiredField {
            field: field.to_string(),
        }
    }

    pub fn iso_date(field: &str) -> Self {
        Self::DateFormat {
            field: field.to_string(),
            format: default_date_format(),
        }
    }

    pub fn date_order(earlier: &str, later: &str) -> Self {
        Self::DateOrder {
            earlier: earlier.to_string(),
            later: later.to_string(),
        }
    }

    pub fn positive(field: &str) -> Self {
        Self::PositiveAmount {
            field: field.to_string(),
        }
    }

    pub fn range(field: &str, min: f64, max: f64) -> Self {
        Self::Range {
            field: field.to_string(),
            min,
            max,
        }
    }

    pub fn pattern(field: &str, pattern: &str) -> Self {
        Self::Pattern {
            field: field.to_string(),
            pattern: pattern.to_string(),
        }
    }

    pub fn email(field: &str) -> Self {
        Self::EmailFormat {
            field: field.to_string(),
        }
    }

    pub fn one_of(field: &str, values: Vec<Value>) -> Self {
        Self::OneOf {
            field: field.to_string(),
            values,
        }
    }

    pub fn total_matches_sum() -> Self {
        Self::TotalMatchesSum {
            tolerance: default_tolerance(),
        }
    }

    pub fn line_items_total() -> Self {
        Self::LineItemsTotal {
            tolerance: default_tolerance(),
        }
    }

    /// Stable identifier used in violations.
    pub fn name(&self) -> String {
        match self {
            Self::RequiredField { field } => format!("required_{field}"),
            Self::DateFormat { field, .. } => format!("date_format_{field}"),
            Self::DateOrder { earlier, later } => format!("date_order_{earlier}_{later}"),
            Self::PositiveAmount { field } => format!("positive_amount_{field}"),
            Self::Range { field, .. } => format!("range_{field}"),
            Self::Pattern { field, .. } => format!("pattern_{field}"),
            Self::EmailFormat { field } => format!("email_format_{field}"),
            Self::OneOf { field, .. } => format!("one_of_{field}"),
            Self::TotalMatchesSum { .. } => "total_matches_sum".to_string(),
            Self::LineItemsTotal { .. } => "line_items_total".to_string(),
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            Self::RequiredField { .. }
            | Self::DateOrder { .. }
            | Self::PositiveAmount { .. }
            | Self::Range { .. }
            | Self::OneOf { .. } => Severity::Error,
            Self::DateFormat { .. }
            | Self::Pattern { .. }
            | Self::EmailFormat { .. }
            | Self::TotalMatchesSum { .. } => Severity::Warning,
            Self::LineItemsTotal { .. } => Severity::Info,
        }
    }

    /// Reject rules that can never be evaluated.
    pub fn check_definition(&self) -> Result<()> {
        let fields: Vec<&str> = match self {
            Self::RequiredField { field }
            | Self::DateFormat { field, .. }
            | Self::PositiveAmount { field }
            | Self::Range { field, .. }
            | Self::Pattern { field, .. }
            | Self::EmailFormat { field }
            | Self::OneOf { field, .. } => vec![field.as_str()],
            Self::DateOrder { earlier, later } => vec![earlier.as_str(), later.as_str()],
            Self::TotalMatchesSum { .. } | Self::LineItemsTotal { .. } => vec![],
        };
        if fields.iter().any(|f| f.split('.').any(str::is_empty)) {
            return Err(FlowError::validation_rule(format!(
                "rule '{}' has an empty field path",
                self.name()
            )));
        }

        match self {
            Self::Pattern { pattern, .. } => compile(pattern).map(|_| ()),
            Self::DateFormat { format, .. } if format.trim().is_empty() => Err(
                FlowError::validation_rule(format!("rule '{}' has an empty date format", self.name())),
            ),
            Self::Range { min, max, .. } if min > max => Err(FlowError::validation_rule(format!(
                "rule '{}' has min {min} greater than max {max}",
                self.name()
            ))),
            Self::TotalMatchesSum { tolerance } | Self::LineItemsTotal { tolerance }
                if !tolerance.is_finite() || *tolerance < 0.0 =>
            {
                Err(FlowError::validation_rule(format!(
                    "rule '{}' has an invalid tolerance {tolerance}",
                    self.name()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Evaluate the rule against `record`.
    ///
    /// An empty result means the rule passed. Errors are defects in the rule
    /// itself, never in the record.
    pub fn evaluate(&self, record: &Value, severity: Severity) -> Result<Vec<Violation>> {
        self.check_definition()?;
        let violation = |field: &str, message: String, expected: Option<Value>, actual: Option<Value>| {
            Violation {
                rule: self.name(),
                field: field.to_string(),
                severity,
                message,
                expected,
                actual,
            }
        };

        let found = match self {
            Self::RequiredField { field } => {
                let value = lookup(record, field);
                let empty = match value {
                    None => true,
                    Some(Value::String(s)) => s.trim().is_empty(),
                    Some(Value::Array(items)) => items.is_empty(),
                    Some(_) => false,
                };
                empty.then(|| {
                    violation(
                        field,
                        format!("Required field '{field}' is missing or empty"),
                        Some(json!("non-empty value")),
                        value.cloned(),
                    )
                })
            }
            Self::DateFormat { field, format } => lookup(record, field).and_then(|value| {
                let parsed = value
                    .as_str()
                    .is_some_and(|s| NaiveDate::parse_from_str(s, format).is_ok());
                (!parsed).then(|| {
                    violation(
                        field,
                        format!("Field '{field}' is not a valid date"),
                        Some(json!(format)),
                        Some(value.clone()),
                    )
                })
            }),
            Self::DateOrder { earlier, later } => {
                match (date_at(record, earlier), date_at(record, later)) {
                    (Some(a), Some(b)) if a > b => Some(violation(
                        &format!("{earlier},{later}"),
                        format!("'{earlier}' must not be after '{later}'"),
                        Some(json!(format!("{earlier} <= {later}"))),
                        Some(json!(format!("{a} > {b}"))),
                    )),
                    _ => None,
                }
            }
            Self::PositiveAmount { field } => number_at(record, field)
                .filter(|n| *n < 0.0)
                .map(|n| {
                    violation(
                        field,
                        format!("Field '{field}' must not be negative"),
                        Some(json!(">= 0")),
                        Some(json!(n)),
                    )
                }),
            Self::Range { field, min, max } => number_at(record, field)
                .filter(|n| n < min || n > max)
                .map(|n| {
                    violation(
                        field,
                        format!("Field '{field}' value {n} is outside range [{min}, {max}]"),
                        Some(json!([min, max])),
                        Some(json!(n)),
                    )
                }),
            Self::Pattern { field, pattern } => {
                let regex = compile(pattern)?;
                mismatched_string(record, field, &regex).map(|actual| {
                    violation(
                        field,
                        format!("Field '{field}' does not match pattern '{pattern}'"),
                        Some(json!(pattern)),
                        Some(actual),
                    )
                })
            }
            Self::EmailFormat { field } => {
                let regex = compile(EMAIL_PATTERN)?;
                mismatched_string(record, field, &regex).map(|actual| {
                    violation(
                        field,
                        format!("Invalid email format in '{field}'"),
                        Some(json!("valid email address")),
                        Some(actual),
                    )
                })
            }
            Self::OneOf { field, values } => lookup(record, field)
                .filter(|value| !values.contains(*value))
                .map(|value| {
                    violation(
                        field,
                        format!("Field '{field}' is not one of the allowed values"),
                        Some(Value::Array(values.clone())),
                        Some(value.clone()),
                    )
                }),
            Self::TotalMatchesSum { tolerance } => {
                match (number_at(record, "subtotal"), number_at(record, "total_amount")) {
                    (Some(subtotal), Some(total)) => {
                        let expected = subtotal
                            + number_at(record, "tax_amount").unwrap_or(0.0)
                            + number_at(record, "tip_amount").unwrap_or(0.0);
                        ((expected - total).abs() > *tolerance).then(|| {
                            violation(
                                "total_amount",
                                "Total does not match subtotal plus tax".to_string(),
                                Some(json!(round_cents(expected))),
                                Some(json!(total)),
                            )
                        })
                    }
                    _ => None,
                }
            }
            Self::LineItemsTotal { tolerance } => {
                let items = lookup(record, "line_items").and_then(Value::as_array);
                match (items, number_at(record, "subtotal")) {
                    (Some(items), Some(subtotal)) if !items.is_empty() => {
                        let sum: f64 = items.iter().filter_map(item_amount).sum();
                        ((sum - subtotal).abs() > *tolerance).then(|| {
                            violation(
                                "line_items",
                                "Line items do not sum to subtotal".to_string(),
                                Some(json!(subtotal)),
                                Some(json!(round_cents(sum))),
                            )
                        })
                    }
                    _ => None,
                }
            }
        };
        Ok(found.into_iter().collect())
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| FlowError::validation_rule(format!("invalid pattern '{pattern}': {e}")))
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Resolve a dot-separated path. `null` counts as absent.
fn lookup<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = record;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    (!current.is_null()).then_some(current)
}

fn number_at(record: &Value, path: &str) -> Option<f64> {
    lookup(record, path).and_then(Value::as_f64)
}

fn date_at(record: &Value, path: &str) -> Option<NaiveDate> {
    lookup(record, path)
        .and_then(Value::as_str)
        .and_then(|s| NaiveDate::parse_from_str(s, ISO_DATE).ok())
}

fn mismatched_string(record: &Value, path: &str, regex: &Regex) -> Option<Value> {
    lookup(record, path)
        .and_then(Value::as_str)
        .filter(|s| !regex.is_match(s))
        .map(|s| json!(s))
}

fn item_amount(item: &Value) -> Option<f64> {
    number_at(item, "total").or_else(|| Some(number_at(item, "quantity")? * number_at(item, "unit_price")?))
}

/// A rule with an optional severity override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    #[serde(flatten)]
    pub rule: Rule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl Check {
    pub fn severity(&self) -> Severity {
        self.severity.unwrap_or_else(|| self.rule.default_severity())
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn evaluate(&self, record: &Value) -> Result<Vec<Violation>> {
        self.rule.evaluate(record, self.severity())
    }
}

impl From<Rule> for Check {
    fn from(rule: Rule) -> Self {
        Self {
            rule,
            severity: None,
        }
    }
}

/// Supplies the ordered checks for a document type.
pub trait RuleSetSource: Send + Sync + Debug {
    fn rules_for(&self, document_type: DocumentType) -> Result<Vec<Check>>;
}

/// Document type to ordered checks.
///
/// YAML form:
///
/// ```yaml
/// invoice:
///   - rule: required_field
///     field: invoice_number
///   - rule: date_format
///     field: invoice_date
///     severity: error
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleBook {
    rules: BTreeMap<DocumentType, Vec<Check>>,
}

impl RuleBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, document_type: DocumentType, check: impl Into<Check>) -> Self {
        self.rules.entry(document_type).or_default().push(check.into());
        self
    }

    /// Add the same check to several document types.
    pub fn with_shared_rule(mut self, document_types: &[DocumentType], check: impl Into<Check>) -> Self {
        let check = check.into();
        for document_type in document_types {
            self = self.with_rule(*document_type, check.clone());
        }
        self
    }

    /// The built-in catalogue.
    pub fn standard() -> Self {
        use DocumentType::{Contract, Form, Invoice, Receipt};

        Self::new()
            .with_rule(Invoice, Rule::required("invoice_number"))
            .with_shared_rule(&[Invoice, Receipt], Rule::required("total_amount"))
            .with_rule(Invoice, Rule::iso_date("invoice_date"))
            .with_rule(Invoice, Rule::date_order("invoice_date", "due_date"))
            .with_shared_rule(&[Invoice, Receipt], Rule::positive("total_amount"))
            .with_rule(Receipt, Rule::required("merchant_name"))
            .with_rule(Receipt, Rule::iso_date("transaction_date"))
            .with_rule(Contract, Rule::date_order("effective_date", "expiration_date"))
            .with_rule(Form, Rule::email("submitted_by.email"))
            .with_shared_rule(&[Invoice, Receipt], Rule::total_matches_sum())
            .with_shared_rule(&[Invoice, Receipt], Rule::line_items_total())
    }

    pub fn validate(&self) -> Result<()> {
        self.rules
            .values()
            .flatten()
            .try_for_each(|check| check.rule.check_definition())
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let book: Self = serde_yaml::from_str(yaml)
            .map_err(|e| FlowError::validation_rule(format!("rule book: {e}")))?;
        book.validate()?;
        Ok(book)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            FlowError::configuration(format!("reading {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn len(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RuleSetSource for RuleBook {
    fn rules_for(&self, document_type: DocumentType) -> Result<Vec<Check>> {
        Ok(self.rules.get(&document_type).cloned().unwrap_or_default())
    }
}
