//! ONNX Runtime backend for classifiers exported to ONNX
//!
//! The graph carries no feature names, so the schema comes from a sidecar
//! metadata file written at export time (`{"feature_columns": [...]}`).

use crate::error::PredictionError;
use crate::models::ChurnModel;
use crate::types::schema::FeatureSchema;
use anyhow::{anyhow, Context, Result};
use ort::memory::Allocator;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, Tensor};
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct OnnxMetadata {
    feature_columns: Vec<String>,
}

/// Loaded ONNX session with its schema
pub struct OnnxModel {
    name: String,
    schema: Arc<FeatureSchema>,
    /// `Session::run` needs exclusive access
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxModel {
    pub fn load<P: AsRef<Path>, M: AsRef<Path>>(
        name: &str,
        path: P,
        metadata: M,
        threads: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        let metadata = metadata.as_ref();

        let raw = std::fs::read_to_string(metadata)
            .with_context(|| format!("Failed to read metadata from {:?}", metadata))?;
        let meta: OnnxMetadata = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid metadata in {:?}", metadata))?;
        let schema = FeatureSchema::new(meta.feature_columns)?;

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {:?}", path))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob"))
            .or_else(|| session.outputs.last())
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "probabilities".to_string());

        info!(
            model = %name,
            input = %input_name,
            output = %output_name,
            features = schema.len(),
            "ONNX model loaded"
        );

        Ok(Self {
            name: name.to_string(),
            schema: Arc::new(schema),
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }

    fn run(&self, features: &[f64]) -> Result<f64> {
        let input: Vec<f32> = features.iter().map(|&v| v as f32).collect();
        let shape = vec![1_i64, input.len() as i64];
        let tensor = Tensor::from_array((shape, input)).context("Failed to create input tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow!("Lock error: {}", e))?;
        let outputs = session.run(ort::inputs![self.input_name.as_str() => tensor])?;

        if let Some(output) = outputs.get(self.output_name.as_str()) {
            if let Some(p) = extract_probability(&output)? {
                return Ok(p);
            }
        }
        for (name, output) in outputs.iter() {
            if name.contains("label") {
                continue;
            }
            if let Some(p) = extract_probability(&output)? {
                debug!(model = %self.name, output = %name, "Probability from fallback output");
                return Ok(p);
            }
        }
        Err(anyhow!("no probability output found"))
    }
}

/// Class-1 probability from a `[batch, classes]` tensor or a
/// `seq(map(int64, float))` output
fn extract_probability(output: &ort::value::DynValue) -> Result<Option<f64>> {
    if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
        let classes = shape.last().copied().unwrap_or(1);
        return Ok(match (classes, data) {
            (c, [_, p1, ..]) if c >= 2 => Some(*p1 as f64),
            (_, [p]) => Some(*p as f64),
            _ => None,
        });
    }

    if DynSequenceValueType::can_downcast(&output.dtype()) {
        let allocator = Allocator::default();
        let sequence = output
            .downcast_ref::<DynSequenceValueType>()
            .map_err(|e| anyhow!("Failed to downcast to sequence: {}", e))?;
        let maps = sequence.try_extract_sequence::<DynMapValueType>(&allocator)?;
        let Some(first) = maps.first() else {
            return Ok(None);
        };
        let pairs = first.try_extract_key_values::<i64, f32>()?;
        if let Some((_, p)) = pairs.iter().find(|(class, _)| *class == 1) {
            return Ok(Some(*p as f64));
        }
        if let Some((_, p)) = pairs.iter().find(|(class, _)| *class == 0) {
            return Ok(Some(1.0 - *p as f64));
        }
    }

    Ok(None)
}

impl ChurnModel for OnnxModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    fn predict_proba(&self, features: &[f64]) -> Result<f64, PredictionError> {
        self.run(features).map_err(|e| PredictionError::Inference {
            model: self.name.clone(),
            reason: e.to_string(),
        })
    }
}
