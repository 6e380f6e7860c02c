//! Model artifact loader

use crate::config::ModelsConfig;
use crate::explain::permutation::{PermutationExplainer, DEFAULT_PERMUTATIONS};
use crate::models::tree::TreeEnsemble;
use crate::models::{ChurnModel, LoadedModel};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Artifact encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFormat {
    /// Native tree-ensemble JSON, explained with TreeSHAP
    #[default]
    Tree,
    /// ONNX graph with a sidecar metadata file, explained by sampling
    Onnx,
}

/// One configured model artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Model identifier, also the wire suffix
    pub name: String,
    /// Artifact file, relative to the models directory
    pub path: String,
    #[serde(default)]
    pub format: ModelFormat,
    /// Sidecar metadata JSON listing `feature_columns` (ONNX only)
    #[serde(default)]
    pub metadata: Option<String>,
    /// Reference vector for the sampling explainer (ONNX only)
    #[serde(default)]
    pub baseline: Option<Vec<f64>>,
    #[serde(default = "default_permutations")]
    pub permutations: usize,
}

fn default_permutations() -> usize {
    DEFAULT_PERMUTATIONS
}

impl ModelSpec {
    pub fn tree(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            format: ModelFormat::Tree,
            metadata: None,
            baseline: None,
            permutations: DEFAULT_PERMUTATIONS,
        }
    }
}

/// Loader for model artifacts
pub struct ModelLoader {
    /// Number of threads for ONNX inference
    onnx_threads: usize,
}

impl ModelLoader {
    /// Create a new model loader with default settings (1 thread)
    pub fn new() -> Result<Self> {
        Self::with_threads(1)
    }

    pub fn from_config(config: &ModelsConfig) -> Result<Self> {
        Self::with_threads(config.onnx_threads)
    }

    /// Create a new model loader with specified number of ONNX threads
    pub fn with_threads(onnx_threads: usize) -> Result<Self> {
        #[cfg(feature = "onnx")]
        {
            ort::init().commit()?;
            info!(onnx_threads = onnx_threads, "ONNX Runtime initialized");
        }
        Ok(Self { onnx_threads })
    }

    /// Load a single model and build its explainer
    pub fn load_model<P: AsRef<Path>>(&self, models_dir: P, spec: &ModelSpec) -> Result<LoadedModel> {
        let path = models_dir.as_ref().join(&spec.path);

        info!(model = %spec.name, path = %path.display(), format = ?spec.format, "Loading model");

        let loaded = match spec.format {
            ModelFormat::Tree => LoadedModel::tree(TreeEnsemble::from_file(&spec.name, &path)?),
            ModelFormat::Onnx => {
                let model = self.load_onnx(models_dir.as_ref(), &path, spec)?;
                let mut explainer = PermutationExplainer::new(model.clone())
                    .with_permutations(spec.permutations);
                if let Some(baseline) = &spec.baseline {
                    explainer = explainer.with_baseline(baseline.clone())?;
                }
                LoadedModel::new(model, Arc::new(explainer))
            }
        };

        info!(
            model = %spec.name,
            features = loaded.schema().len(),
            "Model loaded successfully"
        );

        Ok(loaded)
    }

    #[cfg(feature = "onnx")]
    fn load_onnx(&self, models_dir: &Path, path: &Path, spec: &ModelSpec) -> Result<Arc<dyn ChurnModel>> {
        let Some(metadata) = &spec.metadata else {
            bail!("ONNX model '{}' needs a metadata file with feature_columns", spec.name);
        };
        let model = crate::models::onnx::OnnxModel::load(
            &spec.name,
            path,
            models_dir.join(metadata),
            self.onnx_threads,
        )?;
        Ok(Arc::new(model))
    }

    #[cfg(not(feature = "onnx"))]
    fn load_onnx(&self, _models_dir: &Path, _path: &Path, spec: &ModelSpec) -> Result<Arc<dyn ChurnModel>> {
        bail!(
            "model '{}' is ONNX but this build has no ONNX backend ({} threads requested); enable the `onnx` feature",
            spec.name,
            self.onnx_threads
        )
    }

    /// Load every configured model, skipping the ones that fail
    pub fn load_all_models<P: AsRef<Path>>(
        &self,
        models_dir: P,
        specs: &[ModelSpec],
    ) -> Result<Vec<LoadedModel>> {
        let models_dir = models_dir.as_ref();
        let mut models = Vec::new();

        for spec in specs {
            let path = models_dir.join(&spec.path);
            if path.exists() {
                match self.load_model(models_dir, spec) {
                    Ok(model) => models.push(model),
                    Err(e) => {
                        warn!(model = %spec.name, error = %format!("{e:#}"), "Failed to load model, skipping");
                    }
                }
            } else {
                warn!(model = %spec.name, path = %path.display(), "Model file not found");
            }
        }

        if models.is_empty() {
            bail!("No models loaded from {}", models_dir.display());
        }

        info!(
            count = models.len(),
            "Loaded {} models from {}",
            models.len(),
            models_dir.display()
        );

        Ok(models)
    }
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self { onnx_threads: 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const STUMP: &str = r#"{
        "family": "random_forest",
        "feature_names": ["credit_score", "age"],
        "trees": [{"nodes": [
            {"feature": 0, "threshold": 600.0, "left": 1, "right": 2, "cover": 4.0},
            {"value": 0.75, "cover": 1.0},
            {"value": 0.25, "cover": 3.0}
        ]}]
    }"#;

    #[test]
    fn test_load_all_skips_missing_and_broken() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("rf.json"), STUMP).unwrap();
        fs::write(dir.path().join("broken.json"), "{not json").unwrap();

        let specs = vec![
            ModelSpec::tree("RF", "rf.json"),
            ModelSpec::tree("XGB", "xgb.json"),
            ModelSpec::tree("BROKEN", "broken.json"),
        ];
        let models = ModelLoader::default()
            .load_all_models(dir.path(), &specs)
            .unwrap();

        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "RF");
        assert_eq!(models[0].schema().names(), &["credit_score", "age"]);
    }

    #[test]
    fn test_load_all_fails_when_nothing_loads() {
        let dir = tempfile::tempdir().unwrap();
        let specs = vec![ModelSpec::tree("XGB", "xgb.json")];
        assert!(ModelLoader::default()
            .load_all_models(dir.path(), &specs)
            .is_err());
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_onnx_requires_feature() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("xgb.onnx"), b"\x08\x01").unwrap();
        let spec = ModelSpec {
            format: ModelFormat::Onnx,
            ..ModelSpec::tree("XGB", "xgb.onnx")
        };
        let err = ModelLoader::default()
            .load_model(dir.path(), &spec)
            .unwrap_err();
        assert!(err.to_string().contains("onnx"));
    }
}
