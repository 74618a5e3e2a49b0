//! Generative provider clients.
//!
//! A provider turns one prompt into zero or more raw candidate payloads. Multiple
//! candidates come from the provider itself (Gemini `candidateCount`), never from a
//! loop on our side.

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{NlqError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

/// Failure of a single provider request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("{0}")]
    Upstream(String),
}

/// Raw candidate texts, one per provider candidate
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub payloads: Vec<String>,
}

impl ProviderResponse {
    pub fn new(payloads: Vec<String>) -> Self {
        Self { payloads }
    }
}

#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> std::result::Result<ProviderResponse, ProviderError>;

    fn name(&self) -> &str;
}

/// HTTP client for the configured provider
pub struct LlmClient {
    config: ProviderConfig,
    client: Client,
}

impl LlmClient {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        if config.kind == ProviderKind::Gemini && config.api_key.is_none() {
            return Err(NlqError::Config(
                "GOOGLE_API_KEY not found in environment".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NlqError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn into_shared(self) -> Arc<dyn GenerativeProvider> {
        Arc::new(self)
    }

    async fn call_gemini(&self, prompt: &str) -> std::result::Result<ProviderResponse, ProviderError> {
        let api_key = self.config.api_key.as_deref().unwrap_or_default();
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.model,
            api_key
        );

        let mut generation_config = serde_json::json!({
            "temperature": self.config.temperature,
            "topP": self.config.top_p,
            "maxOutputTokens": self.config.max_tokens,
            "candidateCount": self.config.candidate_count,
            "responseMimeType": "application/json"
        });
        if let Some(top_k) = self.config.top_k {
            generation_config["topK"] = serde_json::json!(top_k);
        }

        let body = serde_json::json!({
            "systemInstruction": {"parts": [{"text": self.config.system_instruction}]},
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": generation_config
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Upstream(format!("Gemini API call failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Upstream(format!("Failed to read Gemini response: {}", e)))?;

        if !status.is_success() {
            return Err(classify_http_failure("Gemini", status, &text));
        }

        let parsed: GeminiResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Upstream(format!("Failed to parse Gemini response: {}", e)))?;

        let payloads: Vec<String> = parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .filter_map(|content| content.parts.into_iter().next())
            .filter_map(|part| part.text)
            .collect();

        debug!("Gemini returned {} candidate payload(s)", payloads.len());
        Ok(ProviderResponse::new(payloads))
    }

    async fn call_ollama(&self, prompt: &str) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/api/generate", self.config.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "system": self.config.system_instruction,
            "stream": false,
            "format": "json",
            "options": {
                "temperature": self.config.temperature,
                "top_p": self.config.top_p,
                "num_predict": self.config.max_tokens
            }
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Upstream(format!("Ollama API call failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Upstream(format!("Failed to read Ollama response: {}", e)))?;

        if !status.is_success() {
            return Err(classify_http_failure("Ollama", status, &text));
        }

        let parsed: OllamaResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Upstream(format!("Failed to parse Ollama response: {}", e)))?;

        if let Some(err) = parsed.error {
            return Err(classify_message(&err));
        }

        Ok(ProviderResponse::new(parsed.response.into_iter().collect()))
    }
}

#[async_trait]
impl GenerativeProvider for LlmClient {
    async fn generate(&self, prompt: &str) -> std::result::Result<ProviderResponse, ProviderError> {
        let result = match self.config.kind {
            ProviderKind::Gemini => self.call_gemini(prompt).await,
            ProviderKind::Ollama => self.call_ollama(prompt).await,
        };
        if let Err(ProviderError::Upstream(ref msg)) = result {
            error!("Error generating content with {}: {}", self.name(), msg);
        }
        result
    }

    fn name(&self) -> &str {
        match self.config.kind {
            ProviderKind::Gemini => "gemini",
            ProviderKind::Ollama => "ollama",
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: Option<String>,
    error: Option<String>,
}

/// Map a non-2xx response to a provider error; quota exhaustion is rate limiting.
fn classify_http_failure(provider: &str, status: StatusCode, body: &str) -> ProviderError {
    let message = format!("{} request failed with status {}: {}", provider, status, body);
    if status == StatusCode::TOO_MANY_REQUESTS || body.contains("RESOURCE_EXHAUSTED") {
        ProviderError::RateLimited(message)
    } else {
        classify_message(&message)
    }
}

fn classify_message(message: &str) -> ProviderError {
    let lower = message.to_lowercase();
    if lower.contains("rate limit") || lower.contains("quota") || lower.contains("too many requests") {
        ProviderError::RateLimited(message.to_string())
    } else {
        ProviderError::Upstream(message.to_string())
    }
}
