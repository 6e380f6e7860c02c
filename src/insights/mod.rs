//! Retention insight generation
//!
//! Strategies are tried in the caller's order. Each one is probed, then
//! called under a timeout; failures are recorded and the chain moves on.
//! Free-form text goes through the [`SectionParser`]; the rule-based
//! strategy produces sections directly.

pub mod gemini;
pub mod ollama;
pub mod parser;
pub mod prompt;
pub mod rules;

use crate::config::InsightsConfig;
use crate::error::{InsightError, StrategyError};
use crate::explain::AttributionVector;
use crate::types::assessment::ModelPrediction;
use crate::types::customer::{CustomerRecord, IdentityFields};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub use gemini::GeminiStrategy;
pub use ollama::OllamaStrategy;
pub use parser::SectionParser;
pub use rules::{RuleBasedStrategy, RULE_BASED};

/// The three insight sections
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightSections {
    pub recommendations: String,
    pub key_insights: String,
    pub action_items: String,
}

/// How the sections were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    /// Produced as sections, no parsing involved
    Structured,
    /// Text carried all three section headers
    Direct,
    /// Text lacked structure; fallback heuristics applied
    Degraded,
}

impl ParseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseMode::Structured => "structured",
            ParseMode::Direct => "direct",
            ParseMode::Degraded => "degraded",
        }
    }
}

/// Which strategy produced a result and how it was parsed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    pub strategy: String,
    pub mode: ParseMode,
}

impl Provenance {
    pub fn is_degraded(&self) -> bool {
        self.mode == ParseMode::Degraded
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.strategy, self.mode.as_str())
    }
}

/// Insight sections with provenance and the failures that preceded them
#[derive(Debug, Clone, PartialEq)]
pub struct InsightResult {
    pub sections: InsightSections,
    pub provenance: Provenance,
    /// Strategies that failed before this one succeeded, in order
    pub failures: Vec<StrategyError>,
}

impl InsightResult {
    /// Wire shape: four string fields
    pub fn to_wire(&self) -> Value {
        json!({
            "recommendations": self.sections.recommendations,
            "key_insights": self.sections.key_insights,
            "action_items": self.sections.action_items,
            "provenance": self.provenance.to_string(),
        })
    }
}

/// Input handed to strategies. Personal fields are already stripped.
#[derive(Debug, Clone)]
pub struct InsightRequest {
    pub record: CustomerRecord,
    pub prediction: ModelPrediction,
    pub attribution: Option<AttributionVector>,
}

/// What a strategy returns on success
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutput {
    Structured(InsightSections),
    Text(String),
}

/// One way of producing insights
#[async_trait]
pub trait InsightStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap availability probe. Never retried within one generation.
    async fn is_available(&self) -> bool;

    async fn generate(&self, request: &InsightRequest) -> Result<StrategyOutput, StrategyError>;
}

/// Runs the strategy chain
pub struct InsightGenerator {
    strategies: HashMap<String, Arc<dyn InsightStrategy>>,
    default_order: Vec<String>,
    fallback_to_rules: bool,
    timeout: Duration,
    parser: SectionParser,
    identity: IdentityFields,
}

impl InsightGenerator {
    /// Generator with only the rule-based strategy registered
    pub fn new() -> Self {
        let mut generator = Self {
            strategies: HashMap::new(),
            default_order: vec![RULE_BASED.to_string()],
            fallback_to_rules: true,
            timeout: Duration::from_secs(60),
            parser: SectionParser::default(),
            identity: IdentityFields::default(),
        };
        generator.register(Arc::new(RuleBasedStrategy));
        generator
    }

    /// Generator with every built-in strategy registered
    pub fn from_config(config: &InsightsConfig, identity: &IdentityFields) -> Result<Self> {
        let mut generator = Self::new()
            .with_default_order(config.strategy_order.clone())
            .with_fallback_to_rules(config.fallback_to_rules)
            .with_timeout(config.timeout())
            .with_parser(SectionParser::new(
                config.truncation_chars,
                config.max_action_items,
            ))
            .with_identity(identity.clone());

        generator.register(Arc::new(OllamaStrategy::new(&config.ollama, config.timeout())?));
        generator.register(Arc::new(GeminiStrategy::new(&config.gemini, config.timeout())?));

        info!(
            order = ?config.strategy_order,
            fallback_to_rules = config.fallback_to_rules,
            timeout_secs = config.timeout_secs,
            "Insight generator initialized"
        );
        Ok(generator)
    }

    pub fn register(&mut self, strategy: Arc<dyn InsightStrategy>) {
        self.strategies.insert(strategy.name().to_string(), strategy);
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn InsightStrategy>) -> Self {
        self.register(strategy);
        self
    }

    pub fn with_default_order(mut self, order: Vec<String>) -> Self {
        self.default_order = order;
        self
    }

    pub fn with_fallback_to_rules(mut self, enabled: bool) -> Self {
        self.fallback_to_rules = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_parser(mut self, parser: SectionParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_identity(mut self, identity: IdentityFields) -> Self {
        self.identity = identity;
        self
    }

    pub fn default_order(&self) -> &[String] {
        &self.default_order
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Order actually tried: the requested one plus the rule-based fallback
    fn effective_order(&self, order: &[String]) -> Vec<String> {
        let mut effective = order.to_vec();
        if self.fallback_to_rules && !effective.iter().any(|s| s == RULE_BASED) {
            effective.push(RULE_BASED.to_string());
        }
        effective
    }

    /// Generate insights using the configured default order
    pub async fn generate_default(
        &self,
        record: &CustomerRecord,
        prediction: &ModelPrediction,
        attribution: Option<&AttributionVector>,
    ) -> Result<InsightResult, InsightError> {
        self.generate(record, prediction, attribution, &self.default_order)
            .await
    }

    /// Try strategies in order until one produces sections
    pub async fn generate(
        &self,
        record: &CustomerRecord,
        prediction: &ModelPrediction,
        attribution: Option<&AttributionVector>,
        order: &[String],
    ) -> Result<InsightResult, InsightError> {
        let request = InsightRequest {
            record: record.without(&self.identity.personal_fields()),
            prediction: prediction.clone(),
            attribution: attribution.cloned(),
        };

        let mut failures = Vec::new();
        for name in self.effective_order(order) {
            match self.attempt(&name, &request).await {
                Ok((sections, mode)) => {
                    let provenance = Provenance {
                        strategy: name,
                        mode,
                    };
                    if provenance.is_degraded() {
                        warn!(provenance = %provenance, "Insight text had no section structure");
                    }
                    debug!(provenance = %provenance, skipped = failures.len(), "Insights generated");
                    return Ok(InsightResult {
                        sections,
                        provenance,
                        failures,
                    });
                }
                Err(e) => {
                    warn!(strategy = %name, error = %e, "Insight strategy skipped");
                    failures.push(e);
                }
            }
        }

        Err(InsightError::Exhausted { failures })
    }

    async fn attempt(
        &self,
        name: &str,
        request: &InsightRequest,
    ) -> Result<(InsightSections, ParseMode), StrategyError> {
        let strategy = self
            .strategies
            .get(name)
            .ok_or_else(|| StrategyError::NotRegistered(name.to_string()))?;

        let started = Instant::now();
        let timed_out = |_| StrategyError::Timeout {
            strategy: name.to_string(),
            elapsed: started.elapsed(),
        };

        let available = tokio::time::timeout(self.timeout, strategy.is_available())
            .await
            .map_err(timed_out)?;
        if !available {
            return Err(StrategyError::Unavailable(name.to_string()));
        }

        let output = tokio::time::timeout(self.timeout, strategy.generate(request))
            .await
            .map_err(timed_out)??;

        match output {
            StrategyOutput::Structured(sections) => Ok((sections, ParseMode::Structured)),
            StrategyOutput::Text(text) if text.trim().is_empty() => {
                Err(StrategyError::EmptyResponse(name.to_string()))
            }
            StrategyOutput::Text(text) => Ok(self.parser.parse(&text)),
        }
    }
}

impl Default for InsightGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Scripted strategies for tests across the crate
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub enum Behavior {
        Unavailable,
        Text(String),
        Fail,
        Hang,
    }

    pub struct ScriptedStrategy {
        pub name: String,
        pub behavior: Behavior,
        pub probes: AtomicUsize,
        pub calls: AtomicUsize,
        pub seen: std::sync::Mutex<Option<CustomerRecord>>,
    }

    impl ScriptedStrategy {
        pub fn new(name: &str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                behavior,
                probes: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                seen: std::sync::Mutex::new(None),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn probes(&self) -> usize {
            self.probes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InsightStrategy for ScriptedStrategy {
        fn name(&self) -> &str {
            &self.name
        }

        async fn is_available(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            !matches!(self.behavior, Behavior::Unavailable)
        }

        async fn generate(&self, request: &InsightRequest) -> Result<StrategyOutput, StrategyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen.lock().unwrap() = Some(request.record.clone());
            match &self.behavior {
                Behavior::Text(t) => Ok(StrategyOutput::Text(t.clone())),
                Behavior::Fail => Err(StrategyError::Failed {
                    strategy: self.name.clone(),
                    reason: "HTTP 500".to_string(),
                }),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!()
                }
                Behavior::Unavailable => unreachable!(),
            }
        }
    }
}
