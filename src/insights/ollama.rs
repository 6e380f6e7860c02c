//! Local Ollama server strategy

use super::prompt::build_prompt;
use super::{InsightRequest, InsightStrategy, StrategyOutput};
use crate::config::OllamaConfig;
use crate::error::StrategyError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const OLLAMA: &str = "ollama";

/// Cut generation short if the model starts role-playing a dialogue
const STOP_SEQUENCES: [&str; 4] = ["Human:", "Assistant:", "Usuario:", "Analista:"];

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f64,
    top_p: f64,
    #[serde(rename = "num_predict")]
    max_tokens: u32,
    stop: [&'static str; 4],
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

pub struct OllamaStrategy {
    client: reqwest::Client,
    config: OllamaConfig,
    probe_timeout: Duration,
}

impl OllamaStrategy {
    pub fn new(config: &OllamaConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Ollama HTTP client")?;

        Ok(Self {
            client,
            config: config.clone(),
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn failed(&self, reason: impl ToString) -> StrategyError {
        StrategyError::Failed {
            strategy: OLLAMA.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl InsightStrategy for OllamaStrategy {
    fn name(&self) -> &str {
        OLLAMA
    }

    async fn is_available(&self) -> bool {
        let probe = self
            .client
            .get(self.url("api/tags"))
            .timeout(self.probe_timeout)
            .send()
            .await;

        match probe {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Ollama probe failed");
                false
            }
        }
    }

    async fn generate(&self, request: &InsightRequest) -> Result<StrategyOutput, StrategyError> {
        let prompt = build_prompt(request);
        let body = GenerateRequest {
            model: &self.config.model,
            prompt: &prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                max_tokens: self.config.max_tokens,
                stop: STOP_SEQUENCES,
            },
        };

        let response = self
            .client
            .post(self.url("api/generate"))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.failed(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.failed(format!("HTTP {status}")));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| self.failed(e))?;
        debug!(model = %self.config.model, chars = parsed.response.len(), "Ollama response received");
        Ok(StrategyOutput::Text(parsed.response.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = GenerateRequest {
            model: "llama3.2",
            prompt: "hola",
            stream: false,
            options: GenerateOptions {
                temperature: 0.7,
                top_p: 0.9,
                max_tokens: 1000,
                stop: STOP_SEQUENCES,
            },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["stream"], false);
        assert_eq!(value["options"]["num_predict"], 1000);
        assert!(value["options"].get("max_tokens").is_none());
        assert_eq!(value["options"]["stop"][2], "Usuario:");
    }

    #[test]
    fn test_url_joining() {
        let config = OllamaConfig {
            base_url: "http://localhost:11434/".to_string(),
            ..OllamaConfig::default()
        };
        let strategy = OllamaStrategy::new(&config, Duration::from_secs(1)).unwrap();
        assert_eq!(strategy.url("api/tags"), "http://localhost:11434/api/tags");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let config = OllamaConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            probe_timeout_secs: 1,
            ..OllamaConfig::default()
        };
        let strategy = OllamaStrategy::new(&config, Duration::from_secs(1)).unwrap();
        assert!(!strategy.is_available().await);
    }
}
