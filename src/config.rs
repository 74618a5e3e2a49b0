//! Pipeline Configuration
//!
//! Every threshold, blocklist and endpoint used by the pipeline lives here and is
//! handed to components at construction time. Defaults match the production
//! deployment; `from_env` and `from_file` override them per deployment.

use crate::error::{NlqError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub retry: RetryConfig,
    pub safety: SafetyConfig,
    pub rerank: RerankConfig,
    pub admission: AdmissionConfig,
    pub executor: ExecutorConfig,
    pub provider: ProviderConfig,
    pub scorer: ScorerConfig,
    pub database: DatabaseConfig,
    /// Whole-request deadline in seconds (0 disables it)
    pub request_deadline_secs: u64,
    pub prompt_template: Option<PathBuf>,
    pub schema_context: Option<PathBuf>,
    pub audit_log: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            safety: SafetyConfig::default(),
            rerank: RerankConfig::default(),
            admission: AdmissionConfig::default(),
            executor: ExecutorConfig::default(),
            provider: ProviderConfig::default(),
            scorer: ScorerConfig::default(),
            database: DatabaseConfig::default(),
            request_deadline_secs: 120,
            prompt_template: None,
            schema_context: None,
            audit_log: None,
        }
    }
}

/// Retry Gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the initial attempt
    pub retries: u32,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 5,
            backoff_factor: 2.0,
        }
    }
}

/// Keyword blocklists and injection shapes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Checked by the basic gate (whole word, case-insensitive)
    pub blocked_keywords: Vec<String>,
    /// Added on top of `blocked_keywords` by the enhanced gate
    pub extended_keywords: Vec<String>,
    /// Regexes run against the normalized (lowercased) query
    pub injection_patterns: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            blocked_keywords: to_strings(&[
                "INSERT", "UPDATE", "DELETE", "DROP", "TRUNCATE", "ALTER", "CREATE", "GRANT",
                "REVOKE", "MERGE",
            ]),
            extended_keywords: to_strings(&["EXECUTE", "EXEC", "CALL"]),
            injection_patterns: to_strings(&[
                r";.*--",
                r"union\s+select",
                r"or\s+1\s*=\s*1",
                r"and\s+1\s*=\s*1",
                r"'.*or.*'.*=.*'",
            ]),
        }
    }
}

/// Reranker weights and heuristics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub model_weight: f64,
    pub rule_weight: f64,
    pub top_k: usize,
    /// Any of these as a whole word zeroes the rule score
    pub penalized_keywords: Vec<String>,
    pub star_penalty: f64,
    /// Score with rules only when the relevance model fails
    pub degrade_to_rules: bool,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            model_weight: 0.7,
            rule_weight: 0.3,
            top_k: 1,
            penalized_keywords: to_strings(&["DELETE", "UPDATE", "INSERT", "ALTER"]),
            star_penalty: 0.1,
            degrade_to_rules: false,
        }
    }
}

/// Admission control ceilings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub cost_ceiling: f64,
    pub row_ceiling: u64,
    /// Use the static complexity estimate when the database cannot explain
    pub heuristic_fallback: bool,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            cost_ceiling: 1_000_000.0,
            row_ceiling: 200_000,
            heuristic_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Decimal places kept for fractional result values
    pub round_precision: u32,
    pub statement_timeout_ms: Option<u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            round_precision: 2,
            statement_timeout_ms: Some(60_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Ollama,
}

impl FromStr for ProviderKind {
    type Err = NlqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(ProviderKind::Gemini),
            "ollama" => Ok(ProviderKind::Ollama),
            other => Err(NlqError::Config(format!("Unknown LLM provider: {}", other))),
        }
    }
}

/// Generative provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: String,
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub candidate_count: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: Option<u32>,
    pub max_tokens: u32,
    pub system_instruction: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Gemini,
            model: "gemini-2.0-flash-lite".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: None,
            candidate_count: 3,
            temperature: 0.0,
            top_p: 0.5,
            top_k: Some(60),
            max_tokens: 1024,
            system_instruction: "You are a PostgreSQL expert. ALWAYS return valid JSON following the agreed schema. \
                 Never use aliases that form offensive or inappropriate words in any language; \
                 prefer neutral, professional abbreviations."
                .to_string(),
        }
    }
}

impl ProviderConfig {
    /// Defaults for a local Ollama model (single candidate, slightly warmer)
    pub fn ollama(model: String) -> Self {
        Self {
            kind: ProviderKind::Ollama,
            model,
            base_url: "http://localhost:11434".to_string(),
            api_key: None,
            candidate_count: 1,
            temperature: 0.1,
            top_p: 0.6,
            top_k: None,
            max_tokens: 2048,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Cross-encoder rerank endpoint
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/rerank".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    #[serde(skip_serializing)]
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_secs: 30,
        }
    }
}

impl PipelineConfig {
    /// Load from the environment (a `.env` file is honoured if present)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = Self::default();

        if let Ok(kind) = std::env::var("LLM_PROVIDER") {
            if kind.parse::<ProviderKind>()? == ProviderKind::Ollama {
                let model = std::env::var("OLLAMA_MODEL")
                    .unwrap_or_else(|_| "qwen2.5-coder:1.5b".to_string());
                config.provider = ProviderConfig::ollama(model);
                if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
                    config.provider.base_url = url;
                }
            }
        }
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            if config.provider.kind == ProviderKind::Gemini {
                config.provider.model = model;
            }
        }
        config.provider.api_key = std::env::var("GOOGLE_API_KEY").ok();

        config.database.url = std::env::var("PG_CONNECTION_STRING")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .ok();
        if let Ok(url) = std::env::var("RERANKER_URL") {
            config.scorer.endpoint = url;
        }

        config.retry.retries = env_parse("NLQ_RETRIES", config.retry.retries)?;
        config.retry.backoff_factor = env_parse("NLQ_BACKOFF_FACTOR", config.retry.backoff_factor)?;
        config.admission.cost_ceiling = env_parse("NLQ_COST_CEILING", config.admission.cost_ceiling)?;
        config.admission.row_ceiling = env_parse("NLQ_ROW_CEILING", config.admission.row_ceiling)?;
        config.rerank.top_k = env_parse("NLQ_TOP_K", config.rerank.top_k)?;
        config.rerank.degrade_to_rules =
            env_parse("NLQ_DEGRADE_TO_RULES", config.rerank.degrade_to_rules)?;
        config.request_deadline_secs =
            env_parse("NLQ_REQUEST_DEADLINE_SECS", config.request_deadline_secs)?;

        config.prompt_template = std::env::var("NLQ_PROMPT_TEMPLATE").ok().map(PathBuf::from);
        config.schema_context = std::env::var("NLQ_SCHEMA_CONTEXT").ok().map(PathBuf::from);
        config.audit_log = std::env::var("NLQ_AUDIT_LOG").ok().map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration document; missing fields keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: PipelineConfig = serde_json::from_str(&content)?;
        // Secrets never live in the file
        config.provider.api_key = std::env::var("GOOGLE_API_KEY").ok();
        if config.database.url.is_none() {
            config.database.url = std::env::var("PG_CONNECTION_STRING")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .ok();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.backoff_factor < 1.0 {
            return Err(NlqError::Config(format!(
                "backoff_factor must be >= 1.0, got {}",
                self.retry.backoff_factor
            )));
        }
        if self.rerank.top_k == 0 {
            return Err(NlqError::Config("top_k must be at least 1".to_string()));
        }
        if self.admission.cost_ceiling < 0.0 {
            return Err(NlqError::Config("cost_ceiling must be non-negative".to_string()));
        }
        Ok(())
    }

    pub fn request_deadline(&self) -> Option<Duration> {
        match self.request_deadline_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| NlqError::Config(format!("Invalid value for {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.retry.retries, 5);
        assert_eq!(config.retry.backoff_factor, 2.0);
        assert_eq!(config.admission.cost_ceiling, 1_000_000.0);
        assert_eq!(config.admission.row_ceiling, 200_000);
        assert_eq!(config.rerank.top_k, 1);
        assert_eq!(config.safety.blocked_keywords.len(), 10);
        assert_eq!(config.request_deadline(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"admission": {"row_ceiling": 50}, "request_deadline_secs": 0}"#)
                .unwrap();
        assert_eq!(config.admission.row_ceiling, 50);
        assert_eq!(config.admission.cost_ceiling, 1_000_000.0);
        assert_eq!(config.request_deadline(), None);
        assert_eq!(config.provider.kind, ProviderKind::Gemini);
    }

    #[test]
    fn test_validate_rejects_zero_top_k() {
        let mut config = PipelineConfig::default();
        config.rerank.top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("Ollama".parse::<ProviderKind>().unwrap(), ProviderKind::Ollama);
        assert!("openai".parse::<ProviderKind>().is_err());
    }
}
