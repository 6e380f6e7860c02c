//! Runtime metrics for the churn pipeline service.

use crate::insights::InsightResult;
use crate::types::assessment::{ChurnAssessment, RiskLevel};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for pipeline activity
pub struct PipelineMetrics {
    /// Records assessed
    pub records_processed: AtomicU64,
    /// Records where every model failed
    pub records_failed: AtomicU64,
    /// Payloads that could not be decoded
    pub decode_errors: AtomicU64,
    /// Failed predictions per model
    model_failures: RwLock<HashMap<String, u64>>,
    /// Primary risk tier counts
    risk_levels: RwLock<BTreeMap<RiskLevel, u64>>,
    /// Insight results per provenance
    insight_provenance: RwLock<BTreeMap<String, u64>>,
    /// Records where insights could not be produced
    pub insight_failures: AtomicU64,
    /// Processing times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Insight generation times (in microseconds)
    insight_times: RwLock<Vec<u64>>,
    /// Model agreement tracking (how often models agree)
    model_agreements: RwLock<Vec<f64>>,
    /// Start time for rate calculation
    start_time: Instant,
}

fn push_bounded<T>(values: &mut Vec<T>, value: T, cap: usize) {
    values.push(value);
    if values.len() > cap {
        values.drain(0..cap / 2);
    }
}

fn latency_stats(times: &[u64]) -> LatencyStats {
    if times.is_empty() {
        return LatencyStats::default();
    }

    let mut sorted = times.to_vec();
    sorted.sort_unstable();

    let count = sorted.len();
    let sum: u64 = sorted.iter().sum();
    let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

    LatencyStats {
        count: count as u64,
        mean_us: sum / count as u64,
        p50_us: at(0.50),
        p95_us: at(0.95),
        p99_us: at(0.99),
        max_us: sorted[count - 1],
    }
}

impl PipelineMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            records_processed: AtomicU64::new(0),
            records_failed: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            model_failures: RwLock::new(HashMap::new()),
            risk_levels: RwLock::new(BTreeMap::new()),
            insight_provenance: RwLock::new(BTreeMap::new()),
            insight_failures: AtomicU64::new(0),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            insight_times: RwLock::new(Vec::with_capacity(1000)),
            model_agreements: RwLock::new(Vec::with_capacity(1000)),
            start_time: Instant::now(),
        }
    }

    /// Record an assessed record
    pub fn record_assessment(
        &self,
        assessment: &ChurnAssessment,
        primary_model: &str,
        processing_time: Duration,
    ) {
        self.records_processed.fetch_add(1, Ordering::Relaxed);
        if assessment.all_failed() {
            self.records_failed.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut times) = self.processing_times.write() {
            push_bounded(&mut times, processing_time.as_micros() as u64, 10000);
        }

        if let Ok(mut failures) = self.model_failures.write() {
            for (model, _) in assessment.failed_models() {
                *failures.entry(model.to_string()).or_insert(0) += 1;
            }
        }

        if let Some(prediction) = assessment.primary_prediction(primary_model) {
            if let Ok(mut levels) = self.risk_levels.write() {
                *levels.entry(prediction.risk_level).or_insert(0) += 1;
            }
        }

        self.record_model_agreement(&assessment.model_scores());
    }

    /// Record a generated insight result
    pub fn record_insights(&self, result: &InsightResult, elapsed: Duration) {
        if let Ok(mut by_provenance) = self.insight_provenance.write() {
            *by_provenance
                .entry(result.provenance.to_string())
                .or_insert(0) += 1;
        }
        if let Ok(mut times) = self.insight_times.write() {
            push_bounded(&mut times, elapsed.as_micros() as u64, 1000);
        }
    }

    pub fn record_insight_failure(&self) {
        self.insight_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record model agreement (1 - std dev of probabilities)
    pub fn record_model_agreement(&self, model_scores: &BTreeMap<String, f64>) {
        if model_scores.len() < 2 {
            return;
        }

        let scores: Vec<f64> = model_scores.values().copied().collect();
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / scores.len() as f64;
        let agreement = 1.0 - variance.sqrt().min(1.0);

        if let Ok(mut agreements) = self.model_agreements.write() {
            push_bounded(&mut agreements, agreement, 1000);
        }
    }

    pub fn get_processing_stats(&self) -> LatencyStats {
        let times = self
            .processing_times
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        latency_stats(&times)
    }

    pub fn get_insight_stats(&self) -> LatencyStats {
        let times = self
            .insight_times
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        latency_stats(&times)
    }

    /// Get average model agreement
    pub fn get_avg_agreement(&self) -> f64 {
        let agreements = self
            .model_agreements
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if agreements.is_empty() {
            return 0.0;
        }
        agreements.iter().sum::<f64>() / agreements.len() as f64
    }

    /// Get current throughput (records per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.records_processed.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_risk_distribution(&self) -> BTreeMap<RiskLevel, u64> {
        self.risk_levels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_model_failures(&self) -> HashMap<String, u64> {
        self.model_failures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_insight_provenance(&self) -> BTreeMap<String, u64> {
        self.insight_provenance
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let processed = self.records_processed.load(Ordering::Relaxed);
        let failed = self.records_failed.load(Ordering::Relaxed);
        let processing = self.get_processing_stats();
        let insight_times = self.get_insight_stats();
        let risk = self.get_risk_distribution();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║            CHURN INSIGHT PIPELINE - METRICS SUMMARY          ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Records Processed: {:>8}  │  Throughput: {:>6.1} rec/s     ║",
            processed,
            self.get_throughput()
        );
        info!(
            "║ All Models Failed: {:>8}  │  Decode Errors: {:>8}       ║",
            failed,
            self.decode_errors.load(Ordering::Relaxed)
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Assessment (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5}  ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        info!(
            "║ Insights (μs):   mean={:>8} p95={:>8} (n={})",
            insight_times.mean_us, insight_times.p95_us, insight_times.count
        );
        info!(
            "║ Model Agreement: {:>5.1}% (higher = models agree more)        ║",
            self.get_avg_agreement() * 100.0
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Risk Level Distribution:                                     ║");
        let total: u64 = risk.values().sum();
        for level in [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High] {
            let count = risk.get(&level).copied().unwrap_or(0);
            let pct = if total > 0 {
                (count as f64 / total as f64) * 100.0
            } else {
                0.0
            };
            let bar = "█".repeat(((pct / 5.0) as usize).min(20));
            info!("║   {:8}: {:>6} ({:>5.1}%) {}", level, count, pct, bar);
        }

        let failures = self.get_model_failures();
        if !failures.is_empty() {
            info!("╠══════════════════════════════════════════════════════════════╣");
            info!("║ Model Failures:                                              ║");
            for (model, count) in &failures {
                info!("║   {:10}: {:>6}", model, count);
            }
        }

        let provenance = self.get_insight_provenance();
        if !provenance.is_empty() {
            info!("╠══════════════════════════════════════════════════════════════╣");
            info!("║ Insights by Provenance:                                      ║");
            for (source, count) in &provenance {
                info!("║   {:24}: {:>6}", source, count);
            }
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency statistics
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Real-time metrics reporter that prints periodic summaries
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs: interval_secs.max(1),
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PredictionError;
    use crate::insights::{InsightSections, ParseMode, Provenance};
    use crate::types::assessment::ModelPrediction;

    fn prediction(model: &str, probability: f64, risk_level: RiskLevel) -> ModelPrediction {
        ModelPrediction {
            model: model.to_string(),
            probability,
            prediction: u8::from(probability >= 0.5),
            risk_level,
        }
    }

    #[test]
    fn test_assessment_recording() {
        let metrics = PipelineMetrics::new();

        let mut ok = ChurnAssessment::new(None);
        ok.predictions
            .insert("XGB".into(), Ok(prediction("XGB", 0.7, RiskLevel::High)));
        ok.predictions
            .insert("RF".into(), Ok(prediction("RF", 0.66, RiskLevel::High)));

        let mut broken = ChurnAssessment::new(None);
        broken.predictions.insert(
            "XGB".into(),
            Err(PredictionError::SchemaMismatch {
                model: "XGB".into(),
                expected: 17,
                actual: 30,
            }),
        );

        metrics.record_assessment(&ok, "XGB", Duration::from_micros(100));
        metrics.record_assessment(&broken, "XGB", Duration::from_micros(300));

        assert_eq!(metrics.records_processed.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.records_failed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.get_model_failures().get("XGB"), Some(&1));
        assert_eq!(metrics.get_risk_distribution().get(&RiskLevel::High), Some(&1));
        assert!(metrics.get_avg_agreement() > 0.95);

        let stats = metrics.get_processing_stats();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.mean_us, 200);
        assert_eq!(stats.max_us, 300);
    }

    #[test]
    fn test_insight_provenance_counts() {
        let metrics = PipelineMetrics::new();
        let result = InsightResult {
            sections: InsightSections::default(),
            provenance: Provenance {
                strategy: "ollama".into(),
                mode: ParseMode::Degraded,
            },
            failures: Vec::new(),
        };
        metrics.record_insights(&result, Duration::from_millis(5));
        metrics.record_insights(&result, Duration::from_millis(7));

        assert_eq!(metrics.get_insight_provenance().get("ollama:degraded"), Some(&2));
        assert_eq!(metrics.get_insight_stats().count, 2);
    }

    #[test]
    fn test_empty_latency_stats() {
        assert_eq!(latency_stats(&[]), LatencyStats::default());
    }
}
