//! Google Gemini strategy

use super::prompt::build_prompt;
use super::{InsightRequest, InsightStrategy, StrategyOutput};
use crate::config::GeminiConfig;
use crate::error::StrategyError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const GEMINI: &str = "gemini";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

pub struct GeminiStrategy {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiStrategy {
    pub fn new(config: &GeminiConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Gemini HTTP client")?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// API key from the configured environment variable, if set
    fn api_key(&self) -> Option<String> {
        std::env::var(&self.config.api_key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }

    fn failed(&self, reason: impl ToString) -> StrategyError {
        StrategyError::Failed {
            strategy: GEMINI.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl InsightStrategy for GeminiStrategy {
    fn name(&self) -> &str {
        GEMINI
    }

    async fn is_available(&self) -> bool {
        self.api_key().is_some()
    }

    async fn generate(&self, request: &InsightRequest) -> Result<StrategyOutput, StrategyError> {
        let key = self
            .api_key()
            .ok_or_else(|| StrategyError::Unavailable(GEMINI.to_string()))?;

        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: build_prompt(request),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .query(&[("key", key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| self.failed(e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.failed(format!("HTTP {status}")));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| self.failed(e.without_url()))?;
        let text = parsed.text();
        debug!(model = %self.config.model, chars = text.len(), "Gemini response received");
        Ok(StrategyOutput::Text(text.trim().to_string()))
    }
}
