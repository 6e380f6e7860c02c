//! Type definitions for the churn insight pipeline

pub mod assessment;
pub mod customer;
pub mod schema;

pub use assessment::{ChurnAssessment, ModelPrediction, RiskCutPoints, RiskLevel};
pub use customer::{CustomerRecord, IdentityFields, IdentityKey};
pub use schema::{CanonicalVector, CategoryDomainConfig, CategoryMappings, FeatureSchema};
