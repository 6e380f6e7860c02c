//! Multi-model inference engine for churn prediction

use crate::config::AppConfig;
use crate::error::PredictionError;
use crate::models::loader::ModelLoader;
use crate::models::LoadedModel;
use crate::types::assessment::{ModelPrediction, RiskCutPoints, RiskLevel};
use crate::types::schema::{CanonicalVector, FeatureSchema};
use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error, info};

/// Per-model outcomes for one vector
pub type ModelOutcomes = BTreeMap<String, Result<ModelPrediction, PredictionError>>;

/// Reject a vector that was not built for the model's schema.
///
/// Length is checked first; at equal length the feature names must match
/// position by position so a reordered schema cannot slip through.
pub(crate) fn check_schema(
    model: &str,
    expected: &FeatureSchema,
    vector: &CanonicalVector,
) -> Result<(), PredictionError> {
    if vector.len() != expected.len() {
        return Err(PredictionError::SchemaMismatch {
            model: model.to_string(),
            expected: expected.len(),
            actual: vector.len(),
        });
    }
    let actual = vector.schema();
    if actual.names() != expected.names() {
        if let Some((position, (e, a))) = expected
            .iter()
            .zip(actual.iter())
            .enumerate()
            .find(|(_, (e, a))| e != a)
        {
            return Err(PredictionError::FeatureOrderMismatch {
                model: model.to_string(),
                position,
                expected: e.to_string(),
                actual: a.to_string(),
            });
        }
    }
    Ok(())
}

/// Runs every loaded model independently against canonical vectors
pub struct InferenceEngine {
    models: Vec<LoadedModel>,
    /// Decision threshold applied when a model has no override
    decision_threshold: f64,
    /// Per-model decision thresholds
    model_thresholds: HashMap<String, f64>,
    cut_points: RiskCutPoints,
}

impl InferenceEngine {
    /// Create a new inference engine from configuration
    pub fn new(config: &AppConfig) -> Result<Self> {
        let loader = ModelLoader::from_config(&config.models)?;
        let models = loader.load_all_models(&config.models.models_dir, &config.models.artifacts)?;

        info!(
            models = models.len(),
            decision_threshold = config.models.decision_threshold,
            "Inference engine initialized"
        );

        Ok(Self::from_models(models)
            .with_decision_threshold(config.models.decision_threshold)
            .with_model_thresholds(config.models.thresholds.clone())
            .with_cut_points(config.risk_levels))
    }

    /// Engine over already-loaded models with default thresholds
    pub fn from_models(models: Vec<LoadedModel>) -> Self {
        Self {
            models,
            decision_threshold: 0.5,
            model_thresholds: HashMap::new(),
            cut_points: RiskCutPoints::default(),
        }
    }

    pub fn with_decision_threshold(mut self, threshold: f64) -> Self {
        self.decision_threshold = threshold;
        self
    }

    /// Per-model overrides. Names match case-insensitively because the
    /// config loader lowercases table keys.
    pub fn with_model_thresholds(mut self, thresholds: HashMap<String, f64>) -> Self {
        self.model_thresholds = thresholds
            .into_iter()
            .map(|(name, t)| (name.to_lowercase(), t))
            .collect();
        self
    }

    pub fn with_cut_points(mut self, cut_points: RiskCutPoints) -> Self {
        self.cut_points = cut_points;
        self
    }

    /// Decision threshold used for a model
    pub fn threshold_for(&self, model: &str) -> f64 {
        self.model_thresholds
            .get(&model.to_lowercase())
            .copied()
            .unwrap_or(self.decision_threshold)
    }

    pub fn cut_points(&self) -> &RiskCutPoints {
        &self.cut_points
    }

    /// Get the number of loaded models
    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// Get loaded model names, in load order
    pub fn model_names(&self) -> Vec<String> {
        self.models.iter().map(|m| m.name.clone()).collect()
    }

    pub fn models(&self) -> &[LoadedModel] {
        &self.models
    }

    pub fn model(&self, name: &str) -> Option<&LoadedModel> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Run one model on a canonical vector.
    ///
    /// The schema check happens before the model is touched; a mismatch
    /// yields no probability at all.
    pub fn predict(
        &self,
        vector: &CanonicalVector,
        model: &str,
    ) -> Result<ModelPrediction, PredictionError> {
        let loaded = self
            .model(model)
            .ok_or_else(|| PredictionError::UnknownModel(model.to_string()))?;
        check_schema(model, loaded.schema(), vector)?;

        let probability = loaded.model.predict_proba(vector.values())?;
        if !(0.0..=1.0).contains(&probability) {
            return Err(PredictionError::Inference {
                model: model.to_string(),
                reason: format!("probability {probability} outside [0, 1]"),
            });
        }

        let threshold = self.threshold_for(model);
        let prediction = ModelPrediction {
            model: model.to_string(),
            probability,
            prediction: u8::from(probability >= threshold),
            risk_level: RiskLevel::from_probability(probability, &self.cut_points),
        };

        debug!(
            model = %model,
            probability = probability,
            risk_level = %prediction.risk_level,
            "Model inference complete"
        );

        Ok(prediction)
    }

    /// Run every model; one model failing never affects the others
    pub fn predict_all(&self, vector: &CanonicalVector) -> ModelOutcomes {
        self.models
            .iter()
            .map(|m| {
                let outcome = self.predict(vector, &m.name);
                if let Err(e) = &outcome {
                    error!(model = %m.name, error = %e, "Model inference failed");
                }
                (m.name.clone(), outcome)
            })
            .collect()
    }

    /// Run inference on a batch of vectors; entries are independent
    pub fn predict_batch(&self, vectors: &[CanonicalVector]) -> Vec<ModelOutcomes> {
        vectors.iter().map(|v| self.predict_all(v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_extractor::canonicalize;
    use crate::models::tree::fixtures::{boosted, forest};
    use crate::models::tree::TreeEnsemble;
    use crate::types::{CategoryMappings, CustomerRecord};
    use serde_json::json;
    use std::sync::Arc;

    const CHURN_FEATURES: [&str; 17] = [
        "purchases_partners",
        "reward_rate",
        "cc_recommended",
        "web_user",
        "received_loan",
        "credit_score",
        "age",
        "deposits",
        "withdrawal",
        "is_referred",
        "registered_phones",
        "ios_user",
        "waiting_4_loan",
        "cancelled_loan",
        "rejected_loan",
        "left_for_two_month_plus",
        "left_for_one_month",
    ];

    /// Single stump on credit_score over the 17 production features
    fn churn_stump(name: &str) -> TreeEnsemble {
        let artifact = json!({
            "family": "random_forest",
            "feature_names": CHURN_FEATURES,
            "trees": [{"nodes": [
                {"feature": 5, "threshold": 600.0, "left": 1, "right": 2, "cover": 10.0},
                {"value": 0.8, "cover": 3.0},
                {"value": 0.2, "cover": 7.0}
            ]}]
        });
        TreeEnsemble::from_json(name, &artifact.to_string()).unwrap()
    }

    fn vector_for(schema: &Arc<FeatureSchema>, record: &CustomerRecord) -> CanonicalVector {
        canonicalize(record, schema, &CategoryMappings::new())
    }

    #[test]
    fn test_predict_thresholds_and_tiers() {
        let engine = InferenceEngine::from_models(vec![LoadedModel::tree(churn_stump("RF"))]);
        let schema = engine.model("RF").unwrap().schema().clone();

        let risky = vector_for(&schema, &CustomerRecord::default().with("credit_score", 550));
        let p = engine.predict(&risky, "RF").unwrap();
        assert!((p.probability - 0.8).abs() < 1e-12);
        assert_eq!(p.prediction, 1);
        assert_eq!(p.risk_level, RiskLevel::High);

        let safe = vector_for(&schema, &CustomerRecord::default().with("credit_score", 720));
        let p = engine.predict(&safe, "RF").unwrap();
        assert_eq!(p.prediction, 0);
        assert_eq!(p.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_per_model_threshold_override() {
        let engine = InferenceEngine::from_models(vec![LoadedModel::tree(churn_stump("RF"))])
            .with_model_thresholds(HashMap::from([("RF".to_string(), 0.1)]));
        let schema = engine.model("RF").unwrap().schema().clone();
        let v = vector_for(&schema, &CustomerRecord::default().with("credit_score", 720));
        assert_eq!(engine.predict(&v, "RF").unwrap().prediction, 1);
    }

    #[test]
    fn test_threshold_override_ignores_key_case() {
        let engine = InferenceEngine::from_models(vec![LoadedModel::tree(churn_stump("XGB"))])
            .with_model_thresholds(HashMap::from([("xgb".to_string(), 0.9)]));
        assert_eq!(engine.threshold_for("XGB"), 0.9);
        assert_eq!(engine.threshold_for("RF"), 0.5);

        let schema = engine.model("XGB").unwrap().schema().clone();
        let risky = vector_for(&schema, &CustomerRecord::default().with("credit_score", 550));
        assert_eq!(engine.predict(&risky, "XGB").unwrap().prediction, 0);
    }

    #[test]
    fn test_predict_is_bit_identical() {
        let engine = InferenceEngine::from_models(vec![LoadedModel::tree(boosted("XGB"))]);
        let schema = engine.model("XGB").unwrap().schema().clone();
        let record = CustomerRecord::default()
            .with("f0", 0.7)
            .with("f1", 0.3)
            .with("f2", 11.0);
        let v = vector_for(&schema, &record);

        let first = engine.predict(&v, "XGB").unwrap().probability;
        for _ in 0..50 {
            let again = engine.predict(&v, "XGB").unwrap().probability;
            assert_eq!(again.to_bits(), first.to_bits());
        }
    }

    #[test]
    fn test_schema_mismatch_yields_no_result() {
        let engine = InferenceEngine::from_models(vec![LoadedModel::tree(churn_stump("XGB"))]);
        let wide = Arc::new(FeatureSchema::new((0..30).map(|i| format!("col_{i}"))).unwrap());
        let v = vector_for(&wide, &CustomerRecord::default());

        let err = engine.predict(&v, "XGB").unwrap_err();
        assert_eq!(
            err,
            PredictionError::SchemaMismatch {
                model: "XGB".to_string(),
                expected: 17,
                actual: 30,
            }
        );
    }

    #[test]
    fn test_feature_order_mismatch() {
        let engine = InferenceEngine::from_models(vec![LoadedModel::tree(boosted("XGB"))]);
        let swapped = Arc::new(FeatureSchema::new(["f1", "f0", "f2"]).unwrap());
        let v = vector_for(&swapped, &CustomerRecord::default());

        match engine.predict(&v, "XGB") {
            Err(PredictionError::FeatureOrderMismatch {
                position,
                expected,
                actual,
                ..
            }) => {
                assert_eq!(position, 0);
                assert_eq!(expected, "f0");
                assert_eq!(actual, "f1");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_batch_isolates_mismatched_record() {
        let engine = InferenceEngine::from_models(vec![
            LoadedModel::tree(boosted("XGB")),
            LoadedModel::tree(forest("RF")),
        ]);
        let schema = engine.model("XGB").unwrap().schema().clone();
        let wide = Arc::new(FeatureSchema::new((0..30).map(|i| format!("col_{i}"))).unwrap());

        let mut vectors: Vec<CanonicalVector> = (0..5)
            .map(|i| vector_for(&schema, &CustomerRecord::default().with("f0", i as f64 / 5.0)))
            .collect();
        vectors.insert(2, vector_for(&wide, &CustomerRecord::default()));

        let outcomes = engine.predict_batch(&vectors);
        assert_eq!(outcomes.len(), 6);

        let failed: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, o)| o.values().all(|r| r.is_err()))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(failed, vec![2]);
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| o.values().all(|r| r.is_ok()))
                .count(),
            5
        );
    }

    #[test]
    fn test_unknown_model() {
        let engine = InferenceEngine::from_models(vec![LoadedModel::tree(boosted("XGB"))]);
        let schema = engine.model("XGB").unwrap().schema().clone();
        let v = vector_for(&schema, &CustomerRecord::default());
        assert_eq!(
            engine.predict(&v, "catboost"),
            Err(PredictionError::UnknownModel("catboost".to_string()))
        );
    }
}
