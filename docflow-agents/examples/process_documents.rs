use std::{sync::Arc, time::Duration};

use docflow_agents::prelude::*;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("📄 Docflow Document Processing Demo");
    println!("===================================\n");

    // 1. A scripted LLM that answers from keyword rules and fixtures
    let client = Arc::new(MockLlmClient::with_document_presets()?.with_latency(Duration::from_millis(25)));

    // 2. Pipeline with fast retries and strict validation
    let config = PipelineConfig::default()
        .with_agent_retry(
            RetryPolicy::default()
                .with_backoff(Duration::from_millis(50), 2.0)
                .with_attempt_timeout(Duration::from_secs(5)),
        )
        .with_strict_validation(true);
    let pipeline = DocumentPipeline::builder(client.clone())
        .config(config)
        .build()?;

    println!(
        "✅ Workflow '{}' with steps: {}\n",
        pipeline.definition().name(),
        pipeline
            .definition()
            .steps()
            .iter()
            .map(|s| s.name())
            .collect::<Vec<_>>()
            .join(" → ")
    );

    // 3. One transient provider failure to show retries
    client.fail_next(LlmError::rate_limited("429 Too Many Requests"));

    let documents = vec![
        Document::from_pages(
            "invoice-001",
            [
                "INVOICE #INV-2024-001\nDate: 2024-01-15\nBill To: Customer Inc",
                "Total: $2,160.00\nPayment Terms: Net 30",
            ],
        ),
        Document::from_pages("receipt-042", ["COFFEE SHOP\nLatte 5.50\nThank you!"]),
        Document::from_pages(
            "contract-007",
            ["SERVICE AGREEMENT\nThe parties hereby agree to the following terms."],
        ),
        Document::from_pages("memo-313", ["Lorem ipsum dolor sit amet"]),
    ];

    println!("🔄 Processing {} documents...\n", documents.len());
    let results = pipeline
        .process_batch(documents, CancellationToken::new())
        .await;

    for result in &results {
        let state = result.state();
        let summary = result.summary();
        println!(
            "📋 {} → {} ({:?}, {} steps, {} attempts, {} ms)",
            state.document().id,
            result.context().get_str(keys::DOCUMENT_TYPE).unwrap_or("-"),
            result.status(),
            summary.steps_run,
            summary.attempts,
            summary.duration_ms,
        );
        for (step, outcome) in result.outcomes() {
            println!("   • {step}: {outcome:?}");
        }
        if let Some(report) = result.context().get_json::<ValidationReport>(keys::VALIDATION_REPORT)? {
            println!(
                "   ✔ validation: valid={} errors={} warnings={}",
                report.valid,
                report.error_count(),
                report.warning_count()
            );
        }
        if let Some(error) = result.error() {
            println!("   ❌ {:?}: {}", error.kind, error.message);
        }
    }

    // 4. Results serialize for storage or hand-off
    println!("\n💾 First result as JSON:");
    println!("{}", serde_json::to_string_pretty(&results[0])?);

    println!("\n🎉 Demo completed! {} LLM calls made.", client.call_count());
    Ok(())
}
