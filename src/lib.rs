//! Churn Insight Pipeline Library
//!
//! Predicts customer churn risk with tree-ensemble classifiers, attributes
//! each prediction to the features that drove it, and turns the result into
//! retention insights through a chain of generative and rule-based
//! strategies.

pub mod batch;
pub mod config;
pub mod consumer;
pub mod error;
pub mod explain;
pub mod feature_extractor;
pub mod insights;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod producer;
pub mod selection;
pub mod types;

pub use batch::{BatchAnalyzer, BatchReport, BatchSummary};
pub use config::AppConfig;
pub use consumer::RecordConsumer;
pub use explain::{AttributionEngine, AttributionVector};
pub use feature_extractor::{canonicalize, FeatureExtractor};
pub use insights::{InsightGenerator, InsightResult};
pub use models::inference::InferenceEngine;
pub use pipeline::ChurnPipeline;
pub use producer::AssessmentProducer;
pub use selection::SelectionManager;
pub use types::{ChurnAssessment, CustomerRecord, FeatureSchema, IdentityKey, RiskLevel};
