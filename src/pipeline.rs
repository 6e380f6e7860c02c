//! Per-customer pipeline: canonicalize, predict, attribute, explain
//!
//! The pipeline itself holds only read-only resources, so one instance is
//! shared by every worker. Interactive callers go through a
//! [`SelectionManager`] so derived results are reused until the selected
//! customer changes.

use crate::config::AppConfig;
use crate::error::{PipelineError, SelectionError};
use crate::explain::AttributionEngine;
use crate::feature_extractor::FeatureExtractor;
use crate::insights::{InsightGenerator, InsightResult};
use crate::models::inference::InferenceEngine;
use crate::selection::SelectionManager;
use crate::types::assessment::ChurnAssessment;
use crate::types::customer::{CustomerRecord, IdentityFields, IdentityKey};
use crate::types::schema::{CanonicalVector, CategoryMappings, FeatureSchema};
use anyhow::{bail, Result};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct ChurnPipeline {
    extractor: FeatureExtractor,
    engine: InferenceEngine,
    attribution: AttributionEngine,
    generator: InsightGenerator,
    identity: IdentityFields,
    primary_model: String,
    strategy_order: Vec<String>,
}

impl ChurnPipeline {
    /// Load models and build every component from configuration
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let engine = InferenceEngine::new(config)?;
        let generator = InsightGenerator::from_config(&config.insights, &config.identity)?;

        Ok(Self::from_parts(
            engine,
            config.pipeline_schema()?,
            config.category_mappings()?,
            generator,
        )?
        .with_identity(config.identity.clone())
        .with_primary_model(&config.insights.primary_model)
        .with_strategy_order(config.insights.strategy_order.clone()))
    }

    /// Assemble a pipeline from loaded components.
    ///
    /// Records are canonicalized against `schema` when given, otherwise
    /// against the first model's schema.
    pub fn from_parts(
        engine: InferenceEngine,
        schema: Option<FeatureSchema>,
        mappings: CategoryMappings,
        generator: InsightGenerator,
    ) -> Result<Self> {
        let schema = match schema {
            Some(schema) => Arc::new(schema),
            None => match engine.models().first() {
                Some(model) => model.schema().clone(),
                None => bail!("No feature schema configured and no models loaded"),
            },
        };

        for model in engine.models() {
            if model.schema().names() != schema.names() {
                // Predictions for this model will fail per record
                warn!(
                    model = %model.name,
                    model_features = model.schema().len(),
                    pipeline_features = schema.len(),
                    "Model schema differs from the pipeline schema"
                );
            }
        }

        info!(
            features = schema.len(),
            models = ?engine.model_names(),
            "Churn pipeline ready"
        );

        let attribution = AttributionEngine::new(engine.models());
        let primary_model = engine.model_names().into_iter().next().unwrap_or_default();
        Ok(Self {
            extractor: FeatureExtractor::new(schema, Arc::new(mappings)),
            engine,
            attribution,
            generator,
            identity: IdentityFields::default(),
            primary_model,
            strategy_order: Vec::new(),
        })
    }

    pub fn with_identity(mut self, identity: IdentityFields) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_primary_model(mut self, model: &str) -> Self {
        self.primary_model = model.to_string();
        self
    }

    /// Strategy order for insight generation; empty means the generator's default
    pub fn with_strategy_order(mut self, order: Vec<String>) -> Self {
        self.strategy_order = order;
        self
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }

    pub fn generator(&self) -> &InsightGenerator {
        &self.generator
    }

    pub fn identity_fields(&self) -> &IdentityFields {
        &self.identity
    }

    pub fn primary_model(&self) -> &str {
        &self.primary_model
    }

    /// Canonicalize once and run every model, attributing each success
    pub fn assess(&self, record: &CustomerRecord) -> ChurnAssessment {
        let identity = IdentityKey::from_record(record, &self.identity).ok();
        let vector = self.extractor.extract(record);
        self.assess_vector(identity, &vector)
    }

    /// Assess an already canonical vector
    pub fn assess_vector(
        &self,
        identity: Option<IdentityKey>,
        vector: &CanonicalVector,
    ) -> ChurnAssessment {
        let mut assessment = ChurnAssessment::new(identity);
        assessment.predictions = self.engine.predict_all(vector);

        let succeeded: Vec<String> = assessment
            .predictions
            .iter()
            .filter(|(_, r)| r.is_ok())
            .map(|(name, _)| name.clone())
            .collect();
        for model in succeeded {
            let result = self.attribution.attribute(vector, &model);
            if let Err(e) = &result {
                error!(model = %model, error = %e, "Attribution failed");
            }
            assessment.attributions.insert(model, result);
        }

        debug!(
            assessment_id = %assessment.assessment_id,
            succeeded = assessment.successful_models(),
            models = assessment.predictions.len(),
            "Record assessed"
        );
        assessment
    }

    /// Generate insights from the primary model's prediction
    pub async fn insights_for(
        &self,
        record: &CustomerRecord,
        assessment: &ChurnAssessment,
    ) -> Result<InsightResult, PipelineError> {
        let prediction = assessment
            .primary_prediction(&self.primary_model)
            .ok_or(PipelineError::NoPrediction)?;
        let attribution = assessment.attribution(&prediction.model);

        let result = if self.strategy_order.is_empty() {
            self.generator
                .generate_default(record, prediction, attribution)
                .await?
        } else {
            self.generator
                .generate(record, prediction, attribution, &self.strategy_order)
                .await?
        };
        Ok(result)
    }

    /// Assessment for the selected customer, computed at most once per selection
    pub fn assess_selected(
        &self,
        selection: &mut SelectionManager,
    ) -> Result<Arc<ChurnAssessment>, SelectionError> {
        selection.get_or_compute_assessment(|record, _| self.assess(record))
    }

    /// Insights for the selected customer, computed at most once per selection
    pub async fn insights_for_selected(
        &self,
        selection: &mut SelectionManager,
    ) -> Result<Arc<InsightResult>, PipelineError> {
        let assessment = self.assess_selected(selection)?;
        if let Some(cached) = selection.cached_insights() {
            return Ok(cached);
        }

        let generation = selection.generation();
        let record = selection
            .record()
            .cloned()
            .ok_or(SelectionError::NoSelection)?;
        let insights = Arc::new(self.insights_for(&record, &assessment).await?);
        selection.store_insights(generation, insights.clone());
        Ok(insights)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::models::tree::fixtures::{boosted, forest};
    use crate::models::LoadedModel;

    /// Pipeline over the boosted and forest fixtures with rule-based insights
    pub fn pipeline() -> ChurnPipeline {
        pipeline_with(InsightGenerator::new())
    }

    pub fn pipeline_with(generator: InsightGenerator) -> ChurnPipeline {
        let engine = InferenceEngine::from_models(vec![
            LoadedModel::tree(boosted("XGB")),
            LoadedModel::tree(forest("RF")),
        ]);
        ChurnPipeline::from_parts(engine, None, CategoryMappings::new(), generator)
            .unwrap()
            .with_primary_model("XGB")
    }

    pub fn customer(name: &str, f0: f64) -> CustomerRecord {
        CustomerRecord::default()
            .with("Name", name)
            .with("Surname", "Ruiz")
            .with("email", format!("{}@example.com", name.to_lowercase()))
            .with("f0", f0)
            .with("f1", 0)
            .with("f2", 20)
    }
}
