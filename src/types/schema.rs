//! Feature schema, canonical vectors and category mappings

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Ordered list of feature names a model was trained on.
///
/// Immutable once built; share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct FeatureSchema {
    names: Vec<String>,
}

impl FeatureSchema {
    pub fn new<I, S>(names: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(ConfigError::EmptySchema);
        }
        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateFeature(name.clone()));
            }
        }
        Ok(Self { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl TryFrom<Vec<String>> for FeatureSchema {
    type Error = ConfigError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(names)
    }
}

impl From<FeatureSchema> for Vec<String> {
    fn from(schema: FeatureSchema) -> Self {
        schema.names
    }
}

/// Fixed-order numeric encoding of a record for one schema.
///
/// Only the canonicalizer builds these, so every instance is guaranteed to
/// have exactly one finite value per schema feature, in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalVector {
    values: Vec<f64>,
    schema: Arc<FeatureSchema>,
}

impl CanonicalVector {
    pub(crate) fn from_parts(values: Vec<f64>, schema: Arc<FeatureSchema>) -> Self {
        debug_assert_eq!(values.len(), schema.len());
        debug_assert!(values.iter().all(|v| v.is_finite()));
        Self { values, schema }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Schema this vector was built against
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Value of a named feature
    pub fn get(&self, feature: &str) -> Option<f64> {
        self.schema.position(feature).map(|i| self.values[i])
    }

    /// (feature, value) pairs in schema order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.schema.iter().zip(self.values.iter().copied())
    }
}

/// Category domain as written in configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryDomainConfig {
    /// Code used for unknown, misspelled or missing values
    pub default: Option<i64>,
    /// Label -> code; labels are normalized (trimmed, lower-cased) at load
    #[serde(default)]
    pub labels: BTreeMap<String, i64>,
}

/// Validated lookup table for one category domain
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryDomain {
    default: i64,
    labels: HashMap<String, i64>,
}

impl CategoryDomain {
    pub fn default_code(&self) -> i64 {
        self.default
    }

    /// Resolve a raw label. `None` means the label is unknown to the domain.
    pub fn lookup(&self, raw: &str) -> Option<i64> {
        self.labels.get(&normalize_label(raw)).copied()
    }

    /// Resolve a raw label, falling back to the domain default
    pub fn encode(&self, raw: &str) -> i64 {
        self.lookup(raw).unwrap_or(self.default)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

pub(crate) fn normalize_label(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// All category domains, keyed by the feature name they encode
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryMappings {
    domains: HashMap<String, CategoryDomain>,
}

impl CategoryMappings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and validate mappings from configuration.
    ///
    /// Every domain must declare a default; labels must be non-blank and must
    /// not collide after normalization.
    pub fn from_config(config: &BTreeMap<String, CategoryDomainConfig>) -> Result<Self, ConfigError> {
        let mut mappings = Self::new();
        for (domain, entry) in config {
            let default = entry
                .default
                .ok_or_else(|| ConfigError::MissingCategoryDefault(domain.clone()))?;
            mappings.insert(domain, default, entry.labels.iter().map(|(k, v)| (k.as_str(), *v)))?;
        }
        Ok(mappings)
    }

    /// Add one domain
    pub fn insert<'a, I>(&mut self, domain: &str, default: i64, labels: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (&'a str, i64)>,
    {
        let mut table: HashMap<String, i64> = HashMap::new();
        for (label, code) in labels {
            let key = normalize_label(label);
            if key.is_empty() {
                return Err(ConfigError::BlankCategoryLabel {
                    domain: domain.to_string(),
                });
            }
            if let Some(&existing) = table.get(&key) {
                if existing != code {
                    return Err(ConfigError::ConflictingCategoryLabel {
                        domain: domain.to_string(),
                        label: key,
                        first: existing,
                        second: code,
                    });
                }
            }
            table.insert(key, code);
        }
        self.domains.insert(
            domain.to_string(),
            CategoryDomain {
                default,
                labels: table,
            },
        );
        Ok(())
    }

    pub fn domain(&self, name: &str) -> Option<&CategoryDomain> {
        self.domains.get(name)
    }

    pub fn is_categorical(&self, feature: &str) -> bool {
        self.domains.contains_key(feature)
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn housing() -> CategoryMappings {
        let mut m = CategoryMappings::new();
        m.insert("housing", 0, [("own", 0), ("rent", 1), ("mortgage", 2)])
            .unwrap();
        m
    }

    #[test]
    fn test_category_lookup_is_case_and_whitespace_insensitive() {
        let m = housing();
        let d = m.domain("housing").unwrap();
        assert_eq!(d.encode("own"), 0);
        assert_eq!(d.encode("OWN"), 0);
        assert_eq!(d.encode(" Own "), 0);
        assert_eq!(d.encode("Rent"), 1);
        assert_eq!(d.encode("MORTGAGE"), 2);
        assert_eq!(d.encode("condo"), 0);
        assert_eq!(d.encode(""), 0);
        assert_eq!(d.lookup("cash"), None);
    }

    #[test]
    fn test_from_config_requires_default() {
        let mut config = BTreeMap::new();
        config.insert(
            "housing".to_string(),
            CategoryDomainConfig {
                default: None,
                labels: BTreeMap::from([("own".to_string(), 0)]),
            },
        );
        assert_eq!(
            CategoryMappings::from_config(&config),
            Err(ConfigError::MissingCategoryDefault("housing".to_string()))
        );
    }

    #[test]
    fn test_conflicting_labels_rejected() {
        let mut m = CategoryMappings::new();
        let err = m
            .insert("housing", 0, [("Own", 0), ("own ", 1)])
            .unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingCategoryLabel { .. }));
    }

    #[test]
    fn test_schema_rejects_duplicates_and_empty() {
        assert_eq!(
            FeatureSchema::new(Vec::<String>::new()),
            Err(ConfigError::EmptySchema)
        );
        assert_eq!(
            FeatureSchema::new(["age", "age"]),
            Err(ConfigError::DuplicateFeature("age".to_string()))
        );
        let schema = FeatureSchema::new(["age", "credit_score"]).unwrap();
        assert_eq!(schema.position("credit_score"), Some(1));
    }
}
