//! Configuration management for the churn insight pipeline

use crate::error::ConfigError;
use crate::models::loader::ModelSpec;
use crate::types::assessment::RiskCutPoints;
use crate::types::customer::IdentityFields;
use crate::types::schema::{CategoryDomainConfig, CategoryMappings, FeatureSchema};
use anyhow::{Context, Result};
use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub models: ModelsConfig,
    pub schema: SchemaConfig,
    pub risk_levels: RiskCutPoints,
    /// Category domains keyed by the feature they encode
    pub categories: BTreeMap<String, CategoryDomainConfig>,
    pub identity: IdentityFields,
    pub insights: InsightsConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for incoming customer records
    pub record_subject: String,
    /// Subject for outgoing assessments
    pub assessment_subject: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            record_subject: "customers.records".to_string(),
            assessment_subject: "churn.assessments".to_string(),
        }
    }
}

/// Model artifacts and decision thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Directory containing model artifacts
    pub models_dir: String,
    pub artifacts: Vec<ModelSpec>,
    /// Churn decision threshold applied to every model without an override
    pub decision_threshold: f64,
    /// Per-model decision thresholds
    pub thresholds: HashMap<String, f64>,
    /// Number of threads for ONNX inference per model (default: 1)
    pub onnx_threads: usize,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            models_dir: "models".to_string(),
            artifacts: vec![
                ModelSpec::tree("XGB", "xgb_model.json"),
                ModelSpec::tree("RF", "rf_model.json"),
            ],
            decision_threshold: 0.5,
            thresholds: HashMap::new(),
            onnx_threads: 1,
        }
    }
}

/// Pipeline feature schema. When absent, the first loaded model's schema
/// is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub features: Option<Vec<String>>,
}

/// Insight generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightsConfig {
    /// Strategy names tried in order
    pub strategy_order: Vec<String>,
    /// Append the rule-based strategy when it is not already in the order
    pub fallback_to_rules: bool,
    /// Per-call timeout for generative strategies
    pub timeout_secs: u64,
    /// Recommendation length kept by the degraded parser
    pub truncation_chars: usize,
    pub max_action_items: usize,
    /// Model whose prediction drives insight generation
    pub primary_model: String,
    pub ollama: OllamaConfig,
    pub gemini: GeminiConfig,
}

impl InsightsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            strategy_order: vec!["rule_based".to_string()],
            fallback_to_rules: true,
            timeout_secs: 60,
            truncation_chars: 300,
            max_action_items: 5,
            primary_model: "XGB".to_string(),
            ollama: OllamaConfig::default(),
            gemini: GeminiConfig::default(),
        }
    }
}

/// Local Ollama server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
    /// Timeout of the availability probe
    pub probe_timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 1000,
            probe_timeout_secs: 5,
        }
    }
}

/// Google Gemini API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            temperature: 0.7,
            max_output_tokens: 2048,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum records processed concurrently
    pub workers: usize,
    /// Generate insights for every record in batch and service mode
    pub generate_insights: bool,
    /// Seconds between metrics summaries in service mode
    pub metrics_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            generate_insights: true,
            metrics_interval_secs: 10,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// Category domains shipped with the default configuration
pub fn default_categories() -> BTreeMap<String, CategoryDomainConfig> {
    fn domain(labels: &[(&str, i64)]) -> CategoryDomainConfig {
        CategoryDomainConfig {
            default: Some(0),
            labels: labels.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    BTreeMap::from([
        (
            "housing".to_string(),
            domain(&[("own", 0), ("o", 0), ("rent", 1), ("r", 1), ("mortgage", 2)]),
        ),
        (
            "payment_type".to_string(),
            domain(&[("credit_card", 0), ("debit_card", 1), ("bank_transfer", 2)]),
        ),
        (
            "zodiac_sign".to_string(),
            domain(&[
                ("aries", 0),
                ("taurus", 1),
                ("gemini", 2),
                ("cancer", 3),
                ("leo", 4),
                ("virgo", 5),
                ("libra", 6),
                ("scorpio", 7),
                ("sagittarius", 8),
                ("capricorn", 9),
                ("aquarius", 10),
                ("pisces", 11),
            ]),
        ),
    ])
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path and validate it
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        let app: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app.validate().context("Invalid configuration")?;
        Ok(app)
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let RiskCutPoints { medium, high } = self.risk_levels;
        if !(0.0..=1.0).contains(&medium) || !(0.0..=1.0).contains(&high) || medium > high {
            return Err(ConfigError::InvalidCutPoints { medium, high });
        }

        let thresholds = std::iter::once(self.models.decision_threshold)
            .chain(self.models.thresholds.values().copied());
        for t in thresholds {
            if !(0.0..=1.0).contains(&t) {
                return Err(ConfigError::InvalidThreshold(t));
            }
        }

        self.category_mappings()?;
        self.pipeline_schema()?;
        Ok(())
    }

    /// Validated category lookup tables.
    ///
    /// An empty `categories` section falls back to the shipped domains.
    pub fn category_mappings(&self) -> Result<CategoryMappings, ConfigError> {
        if self.categories.is_empty() {
            CategoryMappings::from_config(&default_categories())
        } else {
            CategoryMappings::from_config(&self.categories)
        }
    }

    /// Explicit pipeline schema, if configured
    pub fn pipeline_schema(&self) -> Result<Option<FeatureSchema>, ConfigError> {
        self.schema
            .features
            .as_ref()
            .map(|names| FeatureSchema::new(names.iter().cloned()))
            .transpose()
    }
}
