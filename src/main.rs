//! Churn Insight Pipeline - Main Entry Point
//!
//! Consumes customer records from NATS, scores them with every loaded model,
//! attaches attributions and retention insights, and publishes the combined
//! assessment. Records are processed in parallel up to the worker limit.

use anyhow::{Context, Result};
use churn_insight_pipeline::{
    config::AppConfig,
    consumer::{decode_record, RecordConsumer},
    metrics::{MetricsReporter, PipelineMetrics},
    pipeline::ChurnPipeline,
    producer::AssessmentProducer,
};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(
        format!("churn_insight_pipeline={}", config.logging.level)
            .parse()
            .context("Invalid logging.level")?,
    );

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.pretty().init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Optional config path as the first argument
    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load_from_path(&path)?,
        None => AppConfig::load()?,
    };
    init_logging(&config)?;

    info!("Starting Churn Insight Pipeline");
    info!(
        decision_threshold = config.models.decision_threshold,
        medium_from = config.risk_levels.medium,
        high_from = config.risk_levels.high,
        "Configuration loaded"
    );

    let metrics = Arc::new(PipelineMetrics::new());

    let pipeline = Arc::new(ChurnPipeline::from_config(&config)?);
    info!(
        models = ?pipeline.engine().model_names(),
        features = pipeline.extractor().feature_count(),
        primary_model = %pipeline.primary_model(),
        strategies = ?pipeline.generator().strategy_names(),
        "Pipeline initialized"
    );

    let client = async_nats::connect(&config.nats.url).await?;
    info!("Connected to NATS at {}", config.nats.url);

    let consumer = RecordConsumer::new(client.clone(), &config.nats.record_subject);
    let producer = Arc::new(AssessmentProducer::new(
        client.clone(),
        &config.nats.assessment_subject,
    ));

    let num_workers = config.pipeline.workers.max(1);
    info!(
        workers = num_workers,
        records = %config.nats.record_subject,
        assessments = %config.nats.assessment_subject,
        "Starting record processing loop"
    );

    let semaphore = Arc::new(Semaphore::new(num_workers));
    let processed_count = Arc::new(AtomicU64::new(0));
    let generate_insights = config.pipeline.generate_insights;

    let reporter = MetricsReporter::new(metrics.clone(), config.pipeline.metrics_interval_secs);
    tokio::spawn(reporter.start());

    let mut subscription = consumer.subscribe().await?;

    while let Some(message) = subscription.next().await {
        // Limits concurrent tasks; the semaphore is never closed
        let permit = semaphore.clone().acquire_owned().await?;

        let pipeline = pipeline.clone();
        let producer = producer.clone();
        let metrics = metrics.clone();
        let processed_count = processed_count.clone();

        tokio::spawn(async move {
            let start_time = Instant::now();

            let record = match decode_record(&message.payload) {
                Ok(record) => record,
                Err(e) => {
                    metrics.record_decode_error();
                    warn!(error = %e, "Failed to decode customer record");
                    return;
                }
            };

            let assessment = pipeline.assess(&record);
            let processing_time = start_time.elapsed();
            metrics.record_assessment(&assessment, pipeline.primary_model(), processing_time);

            let insights = if generate_insights {
                let started = Instant::now();
                match pipeline.insights_for(&record, &assessment).await {
                    Ok(result) => {
                        metrics.record_insights(&result, started.elapsed());
                        Some(result)
                    }
                    Err(e) => {
                        metrics.record_insight_failure();
                        warn!(assessment_id = %assessment.assessment_id, error = %e, "No insights for record");
                        None
                    }
                }
            } else {
                None
            };

            match producer.publish(&assessment, insights.as_ref()).await {
                Ok(()) => {
                    if let Some(p) = assessment.primary_prediction(pipeline.primary_model()) {
                        debug!(
                            assessment_id = %assessment.assessment_id,
                            model = %p.model,
                            probability = p.probability,
                            risk_level = %p.risk_level,
                            processing_time_us = processing_time.as_micros(),
                            "Assessment published"
                        );
                    }
                }
                Err(e) => {
                    error!(
                        assessment_id = %assessment.assessment_id,
                        error = %e,
                        "Failed to publish assessment"
                    );
                }
            }

            let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 100 == 0 {
                let stats = metrics.get_processing_stats();
                info!(
                    processed = count,
                    throughput = format!("{:.1} rec/s", metrics.get_throughput()),
                    avg_latency_us = stats.mean_us,
                    "Processing milestone"
                );
            }

            drop(permit);
        });
    }

    info!("Pipeline shutting down...");
    metrics.print_summary();

    Ok(())
}
