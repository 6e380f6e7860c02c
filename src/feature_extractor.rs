//! Feature canonicalization for churn model inference.
//!
//! Turns a heterogeneous customer record into the exact fixed-order numeric
//! vector a trained model expects. The vector always has one finite value per
//! schema feature, in schema order, regardless of which fields the record
//! carries.

use crate::types::customer::{value_as_f64, CustomerRecord};
use crate::types::schema::{CanonicalVector, CategoryMappings, FeatureSchema};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Categorical value that was not found in its domain and fell back to the
/// domain default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCategory {
    pub feature: String,
    pub value: String,
    pub default_code: i64,
}

/// Canonicalize a record against a schema.
///
/// Pure function of its inputs; unknown categories are resolved silently.
/// Use [`canonicalize_reporting`] to observe them.
pub fn canonicalize(
    record: &CustomerRecord,
    schema: &Arc<FeatureSchema>,
    mappings: &CategoryMappings,
) -> CanonicalVector {
    canonicalize_reporting(record, schema, mappings).0
}

/// Canonicalize a record and report every categorical value that had to fall
/// back to its domain default.
pub fn canonicalize_reporting(
    record: &CustomerRecord,
    schema: &Arc<FeatureSchema>,
    mappings: &CategoryMappings,
) -> (CanonicalVector, Vec<UnknownCategory>) {
    let mut values = Vec::with_capacity(schema.len());
    let mut unknown = Vec::new();

    for feature in schema.iter() {
        let raw = record.get(feature).filter(|v| !v.is_null());

        let value = match mappings.domain(feature) {
            Some(domain) => match raw {
                None => domain.default_code() as f64,
                Some(raw) => {
                    let label = category_label(raw);
                    match domain.lookup(&label) {
                        Some(code) => code as f64,
                        None => {
                            // Blank labels are treated as missing, not as unseen categories
                            if !label.trim().is_empty() {
                                unknown.push(UnknownCategory {
                                    feature: feature.to_string(),
                                    value: label,
                                    default_code: domain.default_code(),
                                });
                            }
                            domain.default_code() as f64
                        }
                    }
                }
            },
            None => raw.and_then(value_as_f64).unwrap_or(0.0),
        };

        values.push(value);
    }

    (CanonicalVector::from_parts(values, schema.clone()), unknown)
}

fn category_label(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Canonicalizer bound to a schema and a set of category mappings.
///
/// Both are loaded once at startup and shared read-only between requests.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    schema: Arc<FeatureSchema>,
    mappings: Arc<CategoryMappings>,
}

impl FeatureExtractor {
    /// Create a new feature extractor.
    pub fn new(schema: Arc<FeatureSchema>, mappings: Arc<CategoryMappings>) -> Self {
        Self { schema, mappings }
    }

    /// Canonicalize a record, logging unknown categories.
    pub fn extract(&self, record: &CustomerRecord) -> CanonicalVector {
        let (vector, unknown) = canonicalize_reporting(record, &self.schema, &self.mappings);
        for u in &unknown {
            warn!(
                feature = %u.feature,
                value = %u.value,
                default_code = u.default_code,
                "Unknown category, using domain default"
            );
        }
        vector
    }

    /// Get the number of features produced.
    pub fn feature_count(&self) -> usize {
        self.schema.len()
    }

    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    pub fn mappings(&self) -> &CategoryMappings {
        &self.mappings
    }
}
