//! Per-feature additive attributions for model outputs

pub mod permutation;
pub mod tree_shap;

use crate::error::AttributionError;
use crate::models::inference::check_schema;
use crate::models::LoadedModel;
use crate::types::schema::CanonicalVector;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;

pub use permutation::PermutationExplainer;
pub use tree_shap::TreeShapExplainer;

/// Output space the contributions add up in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionSpace {
    /// Boosted trees: contributions sum to the log-odds margin
    LogOdds,
    /// Bagged trees and opaque models: contributions sum to the probability
    Probability,
}

/// Raw explainer output, positionally aligned with the model schema
#[derive(Debug, Clone, PartialEq)]
pub struct Explanation {
    pub base_value: f64,
    pub contributions: Vec<f64>,
}

/// Computes attributions for one model. Built once at load time and only
/// read afterwards.
pub trait Explainer: Send + Sync {
    fn space(&self) -> AttributionSpace;

    fn explain(&self, features: &[f64]) -> Result<Explanation>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureAttribution {
    pub feature: String,
    pub contribution: f64,
}

/// Contributions of every schema feature for one (model, vector) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionVector {
    pub model: String,
    pub space: AttributionSpace,
    pub base_value: f64,
    /// Schema order
    pub entries: Vec<FeatureAttribution>,
}

impl AttributionVector {
    pub fn sum(&self) -> f64 {
        self.entries.iter().map(|e| e.contribution).sum()
    }

    /// Model output reconstructed from the base value and contributions
    pub fn output(&self) -> f64 {
        self.base_value + self.sum()
    }

    pub fn get(&self, feature: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.feature == feature)
            .map(|e| e.contribution)
    }

    /// Largest contributions by magnitude, strongest first
    pub fn top(&self, n: usize) -> Vec<&FeatureAttribution> {
        let mut sorted: Vec<&FeatureAttribution> = self.entries.iter().collect();
        sorted.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));
        sorted.truncate(n);
        sorted
    }

    pub fn to_wire(&self) -> Value {
        Value::Array(
            self.entries
                .iter()
                .map(|e| json!({"feature": e.feature, "contribution": e.contribution}))
                .collect(),
        )
    }
}

/// Looks up the explainer bound to a model and runs it on canonical vectors
pub struct AttributionEngine {
    models: HashMap<String, LoadedModel>,
}

impl AttributionEngine {
    pub fn new(models: &[LoadedModel]) -> Self {
        Self {
            models: models
                .iter()
                .map(|m| (m.name.clone(), m.clone()))
                .collect(),
        }
    }

    pub fn has_model(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    /// Attribute a model's output for a canonical vector.
    ///
    /// The vector is checked against the model schema first, so a
    /// mismatched vector is rejected the same way inference rejects it.
    pub fn attribute(
        &self,
        vector: &CanonicalVector,
        model: &str,
    ) -> Result<AttributionVector, AttributionError> {
        let loaded = self
            .models
            .get(model)
            .ok_or_else(|| AttributionError::NoExplainer(model.to_string()))?;
        let schema = loaded.schema();
        check_schema(model, schema, vector)?;

        let explanation = loaded
            .explainer
            .explain(vector.values())
            .map_err(|e| AttributionError::Explainer {
                model: model.to_string(),
                reason: e.to_string(),
            })?;

        if explanation.contributions.len() != schema.len() {
            return Err(AttributionError::Explainer {
                model: model.to_string(),
                reason: format!(
                    "explainer returned {} contributions for {} features",
                    explanation.contributions.len(),
                    schema.len()
                ),
            });
        }

        let entries = schema
            .iter()
            .zip(explanation.contributions)
            .map(|(feature, contribution)| FeatureAttribution {
                feature: feature.to_string(),
                contribution,
            })
            .collect();

        debug!(model = %model, base_value = explanation.base_value, "Attribution computed");

        Ok(AttributionVector {
            model: model.to_string(),
            space: loaded.explainer.space(),
            base_value: explanation.base_value,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PredictionError;
    use crate::feature_extractor::canonicalize;
    use crate::models::tree::fixtures::{boosted, forest};
    use crate::types::{CategoryMappings, CustomerRecord, FeatureSchema};
    use std::sync::Arc;

    fn vector(schema: &Arc<FeatureSchema>, values: &[f64]) -> CanonicalVector {
        let mut record = CustomerRecord::default();
        for (name, v) in schema.iter().zip(values) {
            record = record.with(name, *v);
        }
        canonicalize(&record, schema, &CategoryMappings::new())
    }

    #[test]
    fn test_attributions_follow_schema_order_and_add_up() {
        let models = vec![LoadedModel::tree(boosted("XGB")), LoadedModel::tree(forest("RF"))];
        let engine = AttributionEngine::new(&models);

        for loaded in &models {
            let v = vector(loaded.schema(), &[0.2, 0.9, 14.0]);
            let attribution = engine.attribute(&v, &loaded.name).unwrap();
            let names: Vec<&str> = attribution.entries.iter().map(|e| e.feature.as_str()).collect();
            assert_eq!(names, vec!["f0", "f1", "f2"]);

            let p = loaded.model.predict_proba(v.values()).unwrap();
            let expected = match attribution.space {
                AttributionSpace::LogOdds => (p / (1.0 - p)).ln(),
                AttributionSpace::Probability => p,
            };
            assert!((attribution.output() - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_mismatched_vector_is_rejected() {
        let models = vec![LoadedModel::tree(boosted("XGB"))];
        let engine = AttributionEngine::new(&models);
        let wide = Arc::new(FeatureSchema::new((0..30).map(|i| format!("x{i}"))).unwrap());
        let v = vector(&wide, &[0.0; 30]);

        let err = engine.attribute(&v, "XGB").unwrap_err();
        assert!(matches!(
            err,
            AttributionError::Prediction(PredictionError::SchemaMismatch {
                expected: 3,
                actual: 30,
                ..
            })
        ));
        assert!(matches!(
            engine.attribute(&v, "RF"),
            Err(AttributionError::NoExplainer(_))
        ));
    }

    #[test]
    fn test_top_contributions_and_wire() {
        let attribution = AttributionVector {
            model: "RF".to_string(),
            space: AttributionSpace::Probability,
            base_value: 0.3,
            entries: vec![
                FeatureAttribution { feature: "a".into(), contribution: 0.05 },
                FeatureAttribution { feature: "b".into(), contribution: -0.2 },
                FeatureAttribution { feature: "c".into(), contribution: 0.1 },
            ],
        };
        let top: Vec<&str> = attribution.top(2).iter().map(|e| e.feature.as_str()).collect();
        assert_eq!(top, vec!["b", "c"]);
        assert_eq!(attribution.to_wire()[1], json!({"feature": "b", "contribution": -0.2}));
    }
}
