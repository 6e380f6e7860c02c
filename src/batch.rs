//! Batch analysis over many customer records
//!
//! Records run independently on a bounded worker pool. A record's failure
//! stays in that record's outcome. Cancellation is checked before each
//! record starts; finished outcomes are kept.

use crate::error::PipelineError;
use crate::insights::InsightResult;
use crate::pipeline::ChurnPipeline;
use crate::types::assessment::{ChurnAssessment, RiskLevel};
use crate::types::customer::{CustomerRecord, IdentityKey};
use crate::types::schema::CanonicalVector;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One unit of batch work
#[derive(Debug, Clone)]
pub enum BatchInput {
    /// Raw record, canonicalized by the pipeline
    Record(CustomerRecord),
    /// Vector canonicalized elsewhere, with the record it came from
    Canonical {
        record: CustomerRecord,
        vector: CanonicalVector,
    },
}

impl BatchInput {
    fn record(&self) -> &CustomerRecord {
        match self {
            BatchInput::Record(record) | BatchInput::Canonical { record, .. } => record,
        }
    }
}

impl From<CustomerRecord> for BatchInput {
    fn from(record: CustomerRecord) -> Self {
        BatchInput::Record(record)
    }
}

/// What happened to insights for one record
#[derive(Debug, Clone)]
pub enum InsightStatus {
    NotRequested,
    /// No model produced a prediction, so there was nothing to explain
    Skipped,
    Generated(InsightResult),
    Failed(PipelineError),
}

#[derive(Debug, Clone)]
pub enum RecordOutcome {
    Assessed {
        assessment: ChurnAssessment,
        insights: InsightStatus,
    },
    /// Not started before the batch was cancelled
    Cancelled,
}

impl RecordOutcome {
    pub fn assessment(&self) -> Option<&ChurnAssessment> {
        match self {
            RecordOutcome::Assessed { assessment, .. } => Some(assessment),
            RecordOutcome::Cancelled => None,
        }
    }

    /// At least one model produced a prediction
    pub fn succeeded(&self) -> bool {
        self.assessment()
            .map(|a| a.successful_models() > 0)
            .unwrap_or(false)
    }
}

/// Aggregate counts over a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Failed predictions per model
    pub model_failures: BTreeMap<String, usize>,
    /// Risk tier of the primary prediction
    pub risk_distribution: BTreeMap<RiskLevel, usize>,
    /// Insight results per provenance (`strategy:mode`)
    pub insight_provenance: BTreeMap<String, usize>,
    pub insights_skipped: usize,
    pub insights_failed: usize,
    pub was_cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    /// One outcome per input, in input order
    pub outcomes: Vec<RecordOutcome>,
    pub summary: BatchSummary,
}

pub struct BatchAnalyzer {
    pipeline: Arc<ChurnPipeline>,
    workers: usize,
    generate_insights: bool,
}

impl BatchAnalyzer {
    pub fn new(pipeline: Arc<ChurnPipeline>, workers: usize) -> Self {
        Self {
            pipeline,
            workers: workers.max(1),
            generate_insights: false,
        }
    }

    pub fn with_insights(mut self, enabled: bool) -> Self {
        self.generate_insights = enabled;
        self
    }

    /// Analyze every input. Never fails as a whole.
    pub async fn analyze<I>(&self, inputs: I, cancel: CancellationToken) -> BatchReport
    where
        I: IntoIterator,
        I::Item: Into<BatchInput>,
    {
        let inputs: Vec<BatchInput> = inputs.into_iter().map(Into::into).collect();
        let total = inputs.len();
        info!(records = total, workers = self.workers, "Batch analysis started");

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for (index, input) in inputs.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let pipeline = self.pipeline.clone();
            let cancel = cancel.clone();
            let generate_insights = self.generate_insights;

            tasks.spawn(async move {
                let permit = tokio::select! {
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let outcome = match permit {
                    Some(_permit) if !cancel.is_cancelled() => {
                        analyze_one(&pipeline, input, generate_insights).await
                    }
                    _ => RecordOutcome::Cancelled,
                };
                (index, outcome)
            });
        }

        let mut outcomes = vec![RecordOutcome::Cancelled; total];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = outcome,
                Err(e) => warn!(error = %e, "Batch task did not complete"),
            }
        }

        let summary = summarize(&outcomes, self.pipeline.primary_model(), cancel.is_cancelled());
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Batch analysis finished"
        );
        BatchReport { outcomes, summary }
    }
}

async fn analyze_one(
    pipeline: &ChurnPipeline,
    input: BatchInput,
    generate_insights: bool,
) -> RecordOutcome {
    let assessment = match &input {
        BatchInput::Record(record) => pipeline.assess(record),
        BatchInput::Canonical { record, vector } => {
            let identity = IdentityKey::from_record(record, pipeline.identity_fields()).ok();
            pipeline.assess_vector(identity, vector)
        }
    };

    let insights = if !generate_insights {
        InsightStatus::NotRequested
    } else {
        match pipeline.insights_for(input.record(), &assessment).await {
            Ok(result) => InsightStatus::Generated(result),
            Err(PipelineError::NoPrediction) => {
                debug!(assessment_id = %assessment.assessment_id, "Insights skipped, no prediction");
                InsightStatus::Skipped
            }
            Err(e) => {
                warn!(assessment_id = %assessment.assessment_id, error = %e, "Insight generation failed");
                InsightStatus::Failed(e)
            }
        }
    };

    RecordOutcome::Assessed {
        assessment,
        insights,
    }
}

fn summarize(outcomes: &[RecordOutcome], primary_model: &str, was_cancelled: bool) -> BatchSummary {
    let mut summary = BatchSummary {
        total: outcomes.len(),
        was_cancelled,
        ..BatchSummary::default()
    };

    for outcome in outcomes {
        let RecordOutcome::Assessed {
            assessment,
            insights,
        } = outcome
        else {
            summary.cancelled += 1;
            continue;
        };

        if outcome.succeeded() {
            summary.succeeded += 1;
        } else {
            summary.failed += 1;
        }
        for (model, _) in assessment.failed_models() {
            *summary.model_failures.entry(model.to_string()).or_default() += 1;
        }
        if let Some(prediction) = assessment.primary_prediction(primary_model) {
            *summary
                .risk_distribution
                .entry(prediction.risk_level)
                .or_default() += 1;
        }
        match insights {
            InsightStatus::Generated(result) => {
                *summary
                    .insight_provenance
                    .entry(result.provenance.to_string())
                    .or_default() += 1;
            }
            InsightStatus::Skipped => summary.insights_skipped += 1,
            InsightStatus::Failed(_) => summary.insights_failed += 1,
            InsightStatus::NotRequested => {}
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_extractor::canonicalize;
    use crate::error::StrategyError;
    use crate::insights::{InsightGenerator, InsightRequest, InsightStrategy, StrategyOutput};
    use crate::pipeline::testing::{customer, pipeline, pipeline_with};
    use crate::types::schema::{CategoryMappings, FeatureSchema};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Cancels the batch from inside its `cancel_on`-th generation
    struct CancellingStrategy {
        token: CancellationToken,
        cancel_on: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl InsightStrategy for CancellingStrategy {
        fn name(&self) -> &str {
            "cancelling"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn generate(&self, _request: &InsightRequest) -> Result<StrategyOutput, StrategyError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.cancel_on {
                self.token.cancel();
            }
            Ok(StrategyOutput::Text("Cliente estable.".to_string()))
        }
    }

    fn analyzer() -> BatchAnalyzer {
        BatchAnalyzer::new(Arc::new(pipeline()), 3).with_insights(true)
    }

    #[tokio::test]
    async fn test_one_mismatched_record_does_not_abort_batch() {
        let wide = Arc::new(FeatureSchema::new((0..30).map(|i| format!("f{i}"))).unwrap());
        let mut inputs: Vec<BatchInput> = (0..6)
            .map(|i| customer(&format!("C{i}"), (i % 2) as f64).into())
            .collect();
        let bad = customer("Bad", 1.0);
        inputs[2] = BatchInput::Canonical {
            vector: canonicalize(&bad, &wide, &CategoryMappings::new()),
            record: bad,
        };

        let report = analyzer().analyze(inputs, CancellationToken::new()).await;

        assert_eq!(report.outcomes.len(), 6);
        assert_eq!(report.summary.succeeded, 5);
        assert_eq!(report.summary.failed, 1);
        assert!(!report.outcomes[2].succeeded());
        assert!(report.outcomes[3].succeeded());
        assert_eq!(report.summary.model_failures.get("XGB"), Some(&1));
        assert_eq!(report.summary.model_failures.get("RF"), Some(&1));
        assert_eq!(report.summary.insights_skipped, 1);
        assert_eq!(
            report.summary.insight_provenance.get("rule_based:structured"),
            Some(&5)
        );
        assert!(matches!(
            &report.outcomes[2],
            RecordOutcome::Assessed { insights: InsightStatus::Skipped, .. }
        ));
    }

    #[tokio::test]
    async fn test_outcomes_keep_input_order() {
        let records: Vec<CustomerRecord> =
            (0..10).map(|i| customer(&format!("C{i}"), 0.0)).collect();
        let report = BatchAnalyzer::new(Arc::new(pipeline()), 4)
            .analyze(records, CancellationToken::new())
            .await;

        for (i, outcome) in report.outcomes.iter().enumerate() {
            let identity = outcome.assessment().unwrap().identity.as_ref().unwrap();
            assert_eq!(identity.first_name, format!("C{i}"));
        }
        assert_eq!(report.summary.insight_provenance.len(), 0);
        let tiers: usize = report.summary.risk_distribution.values().sum();
        assert_eq!(tiers, 10);
    }

    #[tokio::test]
    async fn test_cancel_mid_run_keeps_finished_outcomes() {
        let cancel = CancellationToken::new();
        let strategy = Arc::new(CancellingStrategy {
            token: cancel.clone(),
            cancel_on: 2,
            calls: AtomicUsize::new(0),
        });
        let generator = InsightGenerator::new()
            .with_strategy(strategy.clone())
            .with_default_order(vec!["cancelling".to_string()]);
        let records: Vec<CustomerRecord> = (0..6).map(|i| customer(&format!("C{i}"), 0.0)).collect();

        let report = BatchAnalyzer::new(Arc::new(pipeline_with(generator)), 1)
            .with_insights(true)
            .analyze(records, cancel)
            .await;

        assert!(report.summary.was_cancelled);
        assert_eq!(report.summary.succeeded, 2);
        assert_eq!(report.summary.cancelled, 4);
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 2);
        for outcome in &report.outcomes {
            match outcome {
                RecordOutcome::Assessed { assessment, insights } => {
                    assert!(assessment.primary_prediction("XGB").is_some());
                    assert!(matches!(insights, InsightStatus::Generated(_)));
                }
                RecordOutcome::Cancelled => {}
            }
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let records: Vec<CustomerRecord> = (0..4).map(|i| customer(&format!("C{i}"), 0.0)).collect();

        let report = analyzer().analyze(records, cancel).await;
        assert!(report.summary.was_cancelled);
        assert_eq!(report.summary.cancelled, 4);
        assert_eq!(report.summary.succeeded, 0);
        assert!(report
            .outcomes
            .iter()
            .all(|o| matches!(o, RecordOutcome::Cancelled)));
    }
}
