//! Prediction and assessment data structures

use crate::error::{AttributionError, PredictionError};
use crate::explain::AttributionVector;
use crate::types::customer::IdentityKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Churn risk tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Determine risk level from a probability and ordered cut points
    pub fn from_probability(probability: f64, cut_points: &RiskCutPoints) -> Self {
        if probability >= cut_points.high {
            RiskLevel::High
        } else if probability >= cut_points.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower bounds of the Medium and High tiers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskCutPoints {
    pub medium: f64,
    pub high: f64,
}

impl Default for RiskCutPoints {
    fn default() -> Self {
        Self {
            medium: 0.30,
            high: 0.60,
        }
    }
}

/// Output of one model for one canonical vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    /// Model identifier, used as the wire suffix
    pub model: String,
    /// Class-1 (churn) probability
    pub probability: f64,
    /// 1 when probability >= decision threshold
    pub prediction: u8,
    pub risk_level: RiskLevel,
}

impl ModelPrediction {
    pub fn churns(&self) -> bool {
        self.prediction == 1
    }
}

/// Prediction and attribution results for one record, per model.
///
/// Each model has its own `Result` so one model's failure never hides
/// another model's output.
#[derive(Debug, Clone)]
pub struct ChurnAssessment {
    pub assessment_id: String,
    pub identity: Option<IdentityKey>,
    pub predictions: BTreeMap<String, Result<ModelPrediction, PredictionError>>,
    pub attributions: BTreeMap<String, Result<AttributionVector, AttributionError>>,
    pub timestamp: DateTime<Utc>,
}

impl ChurnAssessment {
    pub fn new(identity: Option<IdentityKey>) -> Self {
        Self {
            assessment_id: uuid::Uuid::new_v4().to_string(),
            identity,
            predictions: BTreeMap::new(),
            attributions: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Successful prediction for a model, if any
    pub fn prediction(&self, model: &str) -> Option<&ModelPrediction> {
        self.predictions.get(model).and_then(|r| r.as_ref().ok())
    }

    /// Successful attribution for a model, if any
    pub fn attribution(&self, model: &str) -> Option<&AttributionVector> {
        self.attributions.get(model).and_then(|r| r.as_ref().ok())
    }

    /// Prediction of the preferred model, or the first successful one
    pub fn primary_prediction(&self, preferred: &str) -> Option<&ModelPrediction> {
        self.prediction(preferred)
            .or_else(|| self.predictions.values().find_map(|r| r.as_ref().ok()))
    }

    pub fn successful_models(&self) -> usize {
        self.predictions.values().filter(|r| r.is_ok()).count()
    }

    pub fn failed_models(&self) -> impl Iterator<Item = (&str, &PredictionError)> {
        self.predictions
            .iter()
            .filter_map(|(name, r)| r.as_ref().err().map(|e| (name.as_str(), e)))
    }

    pub fn all_failed(&self) -> bool {
        !self.predictions.is_empty() && self.successful_models() == 0
    }

    /// Probabilities of the successful models, keyed by model name
    pub fn model_scores(&self) -> BTreeMap<String, f64> {
        self.predictions
            .iter()
            .filter_map(|(name, r)| r.as_ref().ok().map(|p| (name.clone(), p.probability)))
            .collect()
    }

    /// Flat wire representation with one suffixed key set per model.
    ///
    /// Failed models contribute a `prediction_error_<MODEL>` key instead of
    /// the probability / decision / tier triple.
    pub fn to_wire(&self) -> Map<String, Value> {
        let mut out = Map::new();
        for (model, result) in &self.predictions {
            match result {
                Ok(p) => {
                    out.insert(format!("churn_probability_{model}"), json!(p.probability));
                    out.insert(format!("churn_prediction_{model}"), json!(p.prediction));
                    out.insert(format!("risk_level_{model}"), json!(p.risk_level.as_str()));
                }
                Err(e) => {
                    out.insert(format!("prediction_error_{model}"), json!(e.to_string()));
                }
            }
        }
        for (model, result) in &self.attributions {
            match result {
                Ok(attribution) => {
                    out.insert(format!("attribution_{model}"), attribution.to_wire());
                    out.insert(format!("base_value_{model}"), json!(attribution.base_value));
                }
                Err(e) => {
                    out.insert(format!("attribution_error_{model}"), json!(e.to_string()));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_from_probability() {
        let cuts = RiskCutPoints::default();

        assert_eq!(RiskLevel::from_probability(0.1, &cuts), RiskLevel::Low);
        assert_eq!(RiskLevel::from_probability(0.2999, &cuts), RiskLevel::Low);
        assert_eq!(RiskLevel::from_probability(0.30, &cuts), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_probability(0.5999, &cuts), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_probability(0.60, &cuts), RiskLevel::High);
        assert_eq!(RiskLevel::from_probability(1.0, &cuts), RiskLevel::High);
    }

    #[test]
    fn test_wire_shape_isolates_failed_model() {
        let mut assessment = ChurnAssessment::new(None);
        assessment.predictions.insert(
            "XGB".to_string(),
            Ok(ModelPrediction {
                model: "XGB".to_string(),
                probability: 0.72,
                prediction: 1,
                risk_level: RiskLevel::High,
            }),
        );
        assessment.predictions.insert(
            "RF".to_string(),
            Err(PredictionError::SchemaMismatch {
                model: "RF".to_string(),
                expected: 17,
                actual: 30,
            }),
        );

        let wire = assessment.to_wire();
        assert_eq!(wire["churn_probability_XGB"], json!(0.72));
        assert_eq!(wire["churn_prediction_XGB"], json!(1));
        assert_eq!(wire["risk_level_XGB"], json!("High"));
        assert!(!wire.contains_key("churn_probability_RF"));
        assert!(wire["prediction_error_RF"]
            .as_str()
            .unwrap()
            .contains("expected 17"));
        assert_eq!(assessment.primary_prediction("RF").unwrap().model, "XGB");
        assert!(!assessment.all_failed());
    }
}
