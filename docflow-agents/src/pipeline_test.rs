use std::{sync::Arc, time::Duration};

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_test::assert_ok;
use tracing_test::traced_test;

use crate::prelude::*;

const INVOICE_TEXT: &str = "INVOICE #INV-2024-001\nBill To: Customer Inc\nTotal: $2,160.00";
const RECEIPT_TEXT: &str = "COFFEE SHOP\n123 Main Street\nLatte 5.50\nThank you!";
const UNKNOWN_TEXT: &str = "Lorem ipsum dolor sit amet";

fn fast_retry() -> RetryPolicy {
    RetryPolicy::default()
        .with_backoff(Duration::from_millis(1), 2.0)
        .with_jitter(false)
}

fn fast_config() -> PipelineConfig {
    PipelineConfig::default().with_agent_retry(fast_retry())
}

fn pipeline(client: Arc<MockLlmClient>, config: PipelineConfig) -> DocumentPipeline {
    DocumentPipeline::builder(client)
        .config(config)
        .build()
        .unwrap()
}

fn presets() -> Arc<MockLlmClient> {
    Arc::new(MockLlmClient::with_document_presets().unwrap())
}

fn doc(id: &str, text: &str) -> Document {
    Document::from_pages(id, [text])
}

#[tokio::test]
#[traced_test]
async fn invoice_runs_end_to_end() {
    let client = Arc::new(
        MockLlmClient::new()
            .with_classification_presets()
            .unwrap()
            .for_schema(
                "invoice",
                json!({"invoice_number": "INV-1", "vendor": {"name": "Acme"}, "total_amount": 100.00}),
            )
            .unwrap(),
    );
    let result = pipeline(client.clone(), fast_config())
        .process(doc("inv-1", INVOICE_TEXT))
        .await;

    assert_eq!(result.status(), RunStatus::Succeeded);
    assert_eq!(
        result.outcomes(),
        vec![
            ("classify", StepOutcome::Succeeded),
            ("retrieve", StepOutcome::Succeeded),
            ("extract", StepOutcome::Succeeded),
            ("validate", StepOutcome::Succeeded),
        ]
    );

    let ctx = result.context();
    assert_eq!(ctx.get_str(keys::DOCUMENT_TYPE), Some("invoice"));
    assert_eq!(ctx.get_raw(keys::EXTRACTED_DATA).unwrap()["vendor"]["name"], json!("Acme"));
    assert_eq!(ctx.get_raw(keys::EXTRACTED_DATA).unwrap()["total_amount"], json!(100.0));
    assert_eq!(ctx.get_raw(keys::VALIDATION_ERRORS), Some(&json!([])));

    let report: ValidationReport = ctx.get_json(keys::VALIDATION_REPORT).unwrap().unwrap();
    assert!(report.valid);
    assert!(ctx.contains(keys::CLASSIFICATION));
    assert!(ctx.contains(keys::RETRIEVED_SNIPPETS));

    assert_eq!(result.state().document().status(), DocumentStatus::Validated);
    assert_eq!(client.calls_for(CLASSIFICATION_SCHEMA), 1);
    assert_eq!(client.calls_for("invoice"), 1);
    assert!(logs_contain("pipeline ready"));
}

#[tokio::test]
async fn unknown_document_skips_extraction() {
    let client = presets();
    let result = pipeline(client.clone(), fast_config())
        .process(doc("unk-1", UNKNOWN_TEXT))
        .await;

    assert_eq!(result.status(), RunStatus::Succeeded);
    assert_eq!(
        result.outcomes(),
        vec![
            ("classify", StepOutcome::Succeeded),
            ("retrieve", StepOutcome::Skipped),
            ("extract", StepOutcome::Skipped),
        ]
    );
    assert_eq!(result.context().get_str(keys::DOCUMENT_TYPE), Some("unknown"));
    assert!(!result.context().contains(keys::EXTRACTED_DATA));
    assert_eq!(client.call_count(), 1);
    assert_eq!(result.state().document().status(), DocumentStatus::Classified);
}

#[tokio::test]
async fn malformed_extraction_fails_after_retry_budget() {
    let client = Arc::new(
        MockLlmClient::new()
            .with_classification_presets()
            .unwrap()
            .for_schema("invoice", MockReply::Raw("I could not find any fields.".into()))
            .unwrap(),
    );
    let result = pipeline(client.clone(), fast_config())
        .process(doc("inv-2", INVOICE_TEXT))
        .await;

    assert_eq!(result.status(), RunStatus::Failed);
    let error = result.error().unwrap();
    assert_eq!(error.kind, ErrorKind::SchemaViolation);
    assert_eq!(error.step.as_deref(), Some("extract"));

    let failures = result.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].step, "extract");
    assert_eq!(failures[0].attempts, 3);
    assert_eq!(failures[0].invocations, 1);
    assert_eq!(client.calls_for("invoice"), 3);

    assert_eq!(result.outcome_of("validate"), None);
    assert_eq!(result.state().document().status(), DocumentStatus::Failed);
}

#[tokio::test]
async fn non_fatal_extraction_degrades_run() {
    let client = Arc::new(
        MockLlmClient::new()
            .with_classification_presets()
            .unwrap()
            .for_schema("invoice", MockReply::Raw("garbage".into()))
            .unwrap(),
    );
    let config = fast_config().with_step(
        HandlerKind::Extract,
        StepOverride {
            fatal: Some(false),
            retry: None,
        },
    );
    let result = pipeline(client, config)
        .process(doc("inv-3", INVOICE_TEXT))
        .await;

    assert_eq!(result.status(), RunStatus::PartiallySucceeded);
    assert!(result.error().is_none());
    assert_eq!(result.outcome_of("extract"), Some(StepOutcome::Failed));
    assert_eq!(result.outcome_of("validate"), None);
    assert_eq!(result.summary().failed, 1);
}

#[tokio::test]
async fn transient_provider_errors_are_absorbed() {
    let client = presets();
    client.fail_times(2, LlmError::rate_limited("429 Too Many Requests"));

    let result = pipeline(client.clone(), fast_config())
        .process(doc("rcpt-1", RECEIPT_TEXT))
        .await;

    assert_eq!(result.status(), RunStatus::Succeeded);
    let classify = &result.state().history()[0];
    assert_eq!(classify.attempts, 3);
    assert_eq!(classify.invocations, 1);
    assert_eq!(result.context().get_str(keys::DOCUMENT_TYPE), Some("receipt"));
    assert_eq!(
        result.context().get_raw(keys::EXTRACTED_DATA).unwrap()["merchant_name"],
        json!("Coffee Shop")
    );
}

#[tokio::test]
async fn retrieval_failure_degrades_but_extraction_runs() {
    let client = presets();
    let pipeline = DocumentPipeline::builder(client.clone())
        .config(fast_config())
        .handler(
            HandlerKind::Retrieve,
            handler_fn("broken-kb", |_| async {
                Err::<StepOutput, _>(FlowError::provider("knowledge base unavailable"))
            }),
        )
        .build()
        .unwrap();

    let result = pipeline.process(doc("inv-4", INVOICE_TEXT)).await;

    assert_eq!(result.status(), RunStatus::PartiallySucceeded);
    assert_eq!(result.outcome_of("retrieve"), Some(StepOutcome::Failed));
    assert_eq!(result.outcome_of("extract"), Some(StepOutcome::Succeeded));
    assert_eq!(result.outcome_of("validate"), Some(StepOutcome::Succeeded));
    assert!(!result.context().contains(keys::RETRIEVED_SNIPPETS));

    let failure = result.failures()[0].error.clone().unwrap();
    assert_eq!(failure.kind, ErrorKind::Provider);
    assert!(failure.message.contains("knowledge base unavailable"));
}

#[tokio::test]
async fn broken_rule_aborts_run() {
    let rules = RuleBook::new().with_rule(DocumentType::Invoice, Rule::pattern("invoice_number", "(["));
    let pipeline = DocumentPipeline::builder(presets())
        .config(fast_config())
        .rules(Arc::new(rules))
        .build()
        .unwrap();

    let result = pipeline.process(doc("inv-5", INVOICE_TEXT)).await;

    assert_eq!(result.status(), RunStatus::Failed);
    let error = result.error().unwrap();
    assert_eq!(error.kind, ErrorKind::ValidationRule);
    assert_eq!(error.step.as_deref(), Some("validate"));
}

#[tokio::test]
async fn strict_validation_reports_warnings() {
    let client = Arc::new(
        MockLlmClient::new()
            .with_classification_presets()
            .unwrap()
            .for_schema(
                "invoice",
                json!({"invoice_number": "INV-7", "invoice_date": "Jan 15th", "total_amount": 50.0}),
            )
            .unwrap(),
    );
    let result = pipeline(client, fast_config().with_strict_validation(true))
        .process(doc("inv-6", INVOICE_TEXT))
        .await;

    assert_eq!(result.status(), RunStatus::Succeeded);
    let report: ValidationReport = result
        .context()
        .get_json(keys::VALIDATION_REPORT)
        .unwrap()
        .unwrap();
    assert!(!report.valid);
    assert_eq!(report.warning_count(), 1);
    assert_eq!(
        result.context().get_raw(keys::VALIDATION_ERRORS),
        Some(&json!(["Field 'invoice_date' is not a valid date"]))
    );
}

#[tokio::test]
async fn cancellation_fails_run() {
    let client = Arc::new(
        MockLlmClient::with_document_presets()
            .unwrap()
            .with_latency(Duration::from_millis(300)),
    );
    let pipeline = pipeline(client, fast_config());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = pipeline
        .process_with_cancel(doc("inv-8", INVOICE_TEXT), cancel)
        .await;

    assert_eq!(result.status(), RunStatus::Failed);
    assert_eq!(result.error().unwrap().kind, ErrorKind::Cancellation);
    assert!(!result.context().contains(keys::DOCUMENT_TYPE));
}

#[tokio::test]
async fn slow_provider_times_out() {
    let client = Arc::new(
        MockLlmClient::with_document_presets()
            .unwrap()
            .with_latency(Duration::from_millis(500)),
    );
    let config = PipelineConfig::default().with_agent_retry(
        fast_retry()
            .with_max_attempts(2)
            .with_attempt_timeout(Duration::from_millis(20)),
    );
    let result = pipeline(client.clone(), config)
        .process(doc("inv-9", INVOICE_TEXT))
        .await;

    assert_eq!(result.status(), RunStatus::Failed);
    assert_eq!(result.error().unwrap().kind, ErrorKind::Provider);
    assert_eq!(result.state().history()[0].attempts, 2);
    assert_eq!(client.calls_for(CLASSIFICATION_SCHEMA), 2);
}

#[tokio::test]
async fn batch_results_keep_input_order() {
    let pipeline = pipeline(presets(), fast_config());
    let documents = vec![
        doc("a", INVOICE_TEXT),
        doc("b", UNKNOWN_TEXT),
        doc("c", RECEIPT_TEXT),
    ];

    let results = pipeline
        .process_batch(documents, CancellationToken::new())
        .await;

    let summary: Vec<(&str, Option<&str>)> = results
        .iter()
        .map(|r| (r.state().document().id.as_str(), r.context().get_str(keys::DOCUMENT_TYPE)))
        .collect();
    assert_eq!(
        summary,
        vec![("a", Some("invoice")), ("b", Some("unknown")), ("c", Some("receipt"))]
    );
    assert!(results.iter().all(WorkflowResult::is_success));
}

#[tokio::test]
async fn equal_inputs_give_equal_outcomes() {
    let pipeline = pipeline(presets(), fast_config());

    let first = pipeline.process(doc("same", RECEIPT_TEXT)).await;
    let second = pipeline.process(doc("same", RECEIPT_TEXT)).await;

    assert_ne!(first.state().run_id(), second.state().run_id());
    assert_eq!(first.outcomes(), second.outcomes());
    assert_eq!(first.context(), second.context());
}

#[tokio::test]
async fn result_survives_json_round_trip() {
    let pipeline = pipeline(presets(), fast_config());
    let result = pipeline.process(doc("unk-2", UNKNOWN_TEXT)).await;

    let json = assert_ok!(serde_json::to_string(&result));
    let back: WorkflowResult = assert_ok!(serde_json::from_str(&json));
    assert_eq!(back, result);

    let resumed = pipeline
        .resume(back.into_state(), CancellationToken::new())
        .await;
    assert_eq!(resumed, result);
}

#[tokio::test]
async fn interrupted_run_resumes_after_last_step() {
    let client = presets();
    let pipeline = pipeline(client.clone(), fast_config());
    let finished = pipeline.process(doc("inv-10", INVOICE_TEXT)).await;
    assert_eq!(finished.status(), RunStatus::Succeeded);

    // Rewind the saved state to just after retrieval.
    let mut saved = serde_json::to_value(finished.state()).unwrap();
    saved["status"] = json!("running");
    saved["finished_at"] = json!(null);
    saved["history"].as_array_mut().unwrap().truncate(2);
    let context = saved["context"].as_object_mut().unwrap();
    for key in [keys::EXTRACTED_DATA, keys::VALIDATION_REPORT, keys::VALIDATION_ERRORS] {
        context.remove(key);
    }
    let state: WorkflowState = serde_json::from_value(saved).unwrap();

    let resumed = pipeline.resume(state, CancellationToken::new()).await;

    assert_eq!(resumed.status(), RunStatus::Succeeded);
    assert_eq!(resumed.state().run_id(), finished.state().run_id());
    assert_eq!(resumed.outcomes(), finished.outcomes());
    assert_eq!(resumed.context(), finished.context());
    assert_eq!(client.calls_for(CLASSIFICATION_SCHEMA), 1);
    assert_eq!(client.calls_for("invoice"), 2);
}
