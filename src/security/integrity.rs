//! Query integrity
//!
//! Hashing and audit helpers that guarantee the executed query is exactly the
//! one that was generated and approved.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

lazy_static! {
    static ref LINE_COMMENT: Regex = Regex::new(r"(?m)--.*$").unwrap();
    static ref BLOCK_COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
}

const PREVIEW_CHARS: usize = 100;

/// Strip comments, collapse whitespace and lowercase, for comparison only
pub fn normalize_query(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }
    let without_line = LINE_COMMENT.replace_all(query, "");
    let without_block = BLOCK_COMMENT.replace_all(&without_line, "");
    without_block
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// SHA-256 hex digest of the normalized query
pub fn query_hash(query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_query(query).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Check that `executing` is the same query as `stored`, modulo formatting
pub fn validate_query_integrity(stored: &str, executing: &str) -> Result<(), String> {
    if stored.trim().is_empty() {
        return Err("empty query detected".to_string());
    }
    verify_query_hash(&query_hash(stored), executing)
}

/// Check `executing` against a hash recorded when the query was approved
pub fn verify_query_hash(stored_hash: &str, executing: &str) -> Result<(), String> {
    if executing.trim().is_empty() {
        return Err("empty query detected".to_string());
    }
    let executing_hash = query_hash(executing);
    if stored_hash != executing_hash {
        warn!(
            "Query integrity compromised. Stored hash: {}..., execution hash: {}...",
            stored_hash.get(..16).unwrap_or(stored_hash),
            &executing_hash[..16]
        );
        return Err("query was modified after generation".to_string());
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Generated,
    Validated,
    Executed,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditAction::Generated => write!(f, "generated"),
            AuditAction::Validated => write!(f, "validated"),
            AuditAction::Executed => write!(f, "executed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub query_hash: String,
    pub query_length: usize,
    pub action: AuditAction,
    pub normalized_preview: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl AuditRecord {
    pub fn new(query: &str, action: AuditAction) -> Self {
        let normalized = normalize_query(query);
        let normalized_preview = if normalized.chars().count() > PREVIEW_CHARS {
            let head: String = normalized.chars().take(PREVIEW_CHARS).collect();
            format!("{}...", head)
        } else {
            normalized
        };

        Self {
            timestamp: Utc::now(),
            query_hash: query_hash(query),
            query_length: query.len(),
            action,
            normalized_preview,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_comments_and_case() {
        let q = "SELECT a -- trailing\nFROM  t /* block\n comment */ WHERE b = 1";
        assert_eq!(normalize_query(q), "select a from t where b = 1");
    }

    #[test]
    fn test_hash_ignores_formatting() {
        assert_eq!(
            query_hash("SELECT *\n  FROM t"),
            query_hash("select * from t -- note")
        );
        assert_eq!(query_hash("SELECT 1").len(), 64);
    }

    #[test]
    fn test_integrity_detects_modification() {
        assert!(validate_query_integrity("SELECT a FROM t", "select a\nfrom t").is_ok());
        assert_eq!(
            validate_query_integrity("SELECT a FROM t", "SELECT b FROM t").unwrap_err(),
            "query was modified after generation"
        );
        assert!(validate_query_integrity("", "SELECT 1").is_err());
    }

    #[test]
    fn test_verify_against_recorded_hash() {
        let recorded = query_hash("SELECT a FROM t");
        assert!(verify_query_hash(&recorded, "select a from t -- ok").is_ok());
        assert!(verify_query_hash(&recorded, "SELECT a FROM t WHERE 1 = 1").is_err());
        assert!(verify_query_hash(&recorded, "  ").is_err());
    }

    #[test]
    fn test_audit_preview_is_truncated() {
        let long = format!("SELECT {} FROM t", vec!["col"; 60].join(", "));
        let record = AuditRecord::new(&long, AuditAction::Generated).with_metadata("candidates", 3);
        assert!(record.normalized_preview.ends_with("..."));
        assert_eq!(record.normalized_preview.chars().count(), PREVIEW_CHARS + 3);
        assert_eq!(record.query_length, long.len());
        assert_eq!(record.metadata["candidates"], 3);
    }
}
