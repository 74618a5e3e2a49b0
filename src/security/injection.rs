//! Enhanced validation used before execution and for audit: extended keyword
//! blocklist, injection shapes and multi-statement detection, all run against the
//! normalized query.

use crate::config::SafetyConfig;
use crate::error::{NlqError, Result};
use crate::security::integrity::{normalize_query, query_hash};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationMetadata {
    pub query_length: usize,
    pub query_hash: String,
    pub checks_performed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub safe: bool,
    pub reason: Option<String>,
    pub metadata: ValidationMetadata,
}

impl ValidationReport {
    fn reject(metadata: ValidationMetadata, reason: impl Into<String>) -> Self {
        Self {
            safe: false,
            reason: Some(reason.into()),
            metadata,
        }
    }
}

pub struct EnhancedValidator {
    keywords: Vec<(String, Regex)>,
    injection: Vec<Regex>,
}

impl EnhancedValidator {
    pub fn new(config: &SafetyConfig) -> Result<Self> {
        let keywords = config
            .blocked_keywords
            .iter()
            .chain(config.extended_keywords.iter())
            .map(|k| {
                let pattern = format!(r"\b{}\b", regex::escape(&k.to_lowercase()));
                Regex::new(&pattern)
                    .map(|re| (k.to_uppercase(), re))
                    .map_err(|e| NlqError::Config(format!("Invalid keyword {}: {}", k, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        let injection = config
            .injection_patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("(?i){}", p))
                    .map_err(|e| NlqError::Config(format!("Invalid injection pattern {}: {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { keywords, injection })
    }

    pub fn validate(&self, sql: &str) -> ValidationReport {
        let mut metadata = ValidationMetadata {
            query_length: sql.len(),
            query_hash: query_hash(sql),
            checks_performed: Vec::new(),
        };

        if sql.trim().is_empty() {
            return ValidationReport::reject(metadata, "empty or whitespace-only query");
        }

        let normalized = normalize_query(sql);

        metadata.checks_performed.push("dangerous_keywords".to_string());
        if let Some((keyword, _)) = self.keywords.iter().find(|(_, re)| re.is_match(&normalized)) {
            let reason = format!("dangerous keyword detected: {}", keyword);
            return ValidationReport::reject(metadata, reason);
        }

        metadata.checks_performed.push("injection_patterns".to_string());
        if self.injection.iter().any(|re| re.is_match(&normalized)) {
            return ValidationReport::reject(metadata, "suspicious SQL injection pattern detected");
        }

        metadata.checks_performed.push("multiple_statements".to_string());
        let trimmed = normalized.trim_end();
        let body = trimmed.strip_suffix(';').unwrap_or(trimmed);
        if body.contains(';') {
            return ValidationReport::reject(metadata, "multiple SQL statements are not allowed");
        }

        metadata.checks_performed.push("all_passed".to_string());
        ValidationReport {
            safe: true,
            reason: None,
            metadata,
        }
    }
}
