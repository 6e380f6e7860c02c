//! Churn classifiers and the inference engine that runs them

pub mod inference;
pub mod loader;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod tree;

use crate::error::PredictionError;
use crate::explain::Explainer;
use crate::types::schema::FeatureSchema;
use std::sync::Arc;

pub use inference::InferenceEngine;
pub use loader::{ModelLoader, ModelSpec};
pub use tree::TreeEnsemble;

/// Binary churn classifier over a fixed feature schema.
///
/// Implementations are immutable after loading and are shared across
/// threads without locks.
pub trait ChurnModel: Send + Sync {
    fn name(&self) -> &str;

    /// Features the model was trained on, in training order
    fn schema(&self) -> &Arc<FeatureSchema>;

    /// Class-1 probability for a vector already checked against `schema()`
    fn predict_proba(&self, features: &[f64]) -> Result<f64, PredictionError>;
}

/// Model paired with the explainer built for it at load time
#[derive(Clone)]
pub struct LoadedModel {
    pub name: String,
    pub model: Arc<dyn ChurnModel>,
    pub explainer: Arc<dyn Explainer>,
}

impl LoadedModel {
    pub fn new(model: Arc<dyn ChurnModel>, explainer: Arc<dyn Explainer>) -> Self {
        Self {
            name: model.name().to_string(),
            model,
            explainer,
        }
    }

    /// Native tree ensemble with an exact TreeSHAP explainer
    pub fn tree(ensemble: TreeEnsemble) -> Self {
        let ensemble = Arc::new(ensemble);
        let explainer = Arc::new(crate::explain::TreeShapExplainer::new(ensemble.clone()));
        Self::new(ensemble, explainer)
    }

    pub fn schema(&self) -> &Arc<FeatureSchema> {
        self.model.schema()
    }
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("name", &self.name)
            .field("features", &self.model.schema().len())
            .finish()
    }
}
