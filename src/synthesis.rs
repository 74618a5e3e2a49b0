//! Candidate Synthesizer
//!
//! One provider request yields N structured candidates. Each payload is decoded on
//! its own; malformed ones are dropped and the batch only fails when nothing
//! viable is left.

use crate::error::{NlqError, Result};
use crate::llm::GenerativeProvider;
use crate::rerank::normalize_sql;
use crate::retry::RetryGateway;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_TEMPLATE: &str = r#"You are a PostgreSQL expert working on the database "{db_name}".
Write ONE read-only SELECT query that answers the question below, using only the
tables, views and columns described in the schema context.

Question: {natural_language_query}

Schema context:
{context}

Answer with a JSON object of the form:
{"sql_query": "...", "explanation": "...", "used_tables": ["schema.table"], "ml_algorithm": "KMeans | RandomForestRegressor | RandomForestClassifier | IsolationForest | PCA | "}
"#;

/// One proposed query, immutable once parsed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub raw_sql: String,
    pub normalized_sql: String,
    pub explanation: String,
    pub referenced_tables: Vec<String>,
    pub suggested_algorithm: Option<String>,
}

impl Candidate {
    pub fn new(raw_sql: String) -> Self {
        let normalized_sql = normalize_sql(&raw_sql);
        Self {
            raw_sql,
            normalized_sql,
            explanation: String::new(),
            referenced_tables: Vec::new(),
            suggested_algorithm: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CandidatePayload {
    sql_query: String,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    used_tables: Option<Vec<String>>,
    #[serde(default)]
    ml_algorithm: Option<String>,
}

impl From<CandidatePayload> for Candidate {
    fn from(payload: CandidatePayload) -> Self {
        let mut candidate = Candidate::new(payload.sql_query.trim().to_string());
        candidate.explanation = payload.explanation.unwrap_or_default();
        candidate.referenced_tables = payload.used_tables.unwrap_or_default();
        candidate.suggested_algorithm = payload
            .ml_algorithm
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());
        candidate
    }
}

/// How `used_tables` is derived across candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableMergePolicy {
    /// Tables of the last decoded payload that lists any
    #[default]
    LastWins,
    /// Ordered union over all decoded payloads
    Union,
}

#[derive(Debug, Clone)]
pub struct Synthesis {
    pub candidates: Vec<Candidate>,
    pub used_tables: Vec<String>,
    pub dropped: usize,
}

pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    /// Read the template file, falling back to the built-in one
    pub fn load(path: Option<&Path>) -> Self {
        let template = match path {
            Some(p) => match std::fs::read_to_string(p) {
                Ok(content) => content,
                Err(e) => {
                    warn!("Prompt template {} unreadable ({}), using default", p.display(), e);
                    DEFAULT_TEMPLATE.to_string()
                }
            },
            None => DEFAULT_TEMPLATE.to_string(),
        };
        Self { template }
    }

    pub fn from_string(template: String) -> Self {
        Self { template }
    }

    /// Fill the three placeholders; any other braces are left as written
    pub fn render(&self, question: &str, context: &str, db_name: &str) -> String {
        self.template
            .replace("{db_name}", db_name)
            .replace("{context}", context)
            .replace("{natural_language_query}", question)
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::load(None)
    }
}

pub struct CandidateSynthesizer {
    provider: Arc<dyn GenerativeProvider>,
    gateway: RetryGateway,
    template: PromptTemplate,
    table_policy: TableMergePolicy,
}

impl CandidateSynthesizer {
    pub fn new(provider: Arc<dyn GenerativeProvider>, gateway: RetryGateway, template: PromptTemplate) -> Self {
        Self {
            provider,
            gateway,
            template,
            table_policy: TableMergePolicy::default(),
        }
    }

    pub fn with_table_policy(mut self, policy: TableMergePolicy) -> Self {
        self.table_policy = policy;
        self
    }

    pub async fn synthesize(&self, question: &str, context: &str, db_name: &str) -> Result<Synthesis> {
        let prompt = self.template.render(question, context, db_name);
        let provider = Arc::clone(&self.provider);
        debug!("Sending generation prompt ({} chars) to {}", prompt.len(), provider.name());

        let response = self
            .gateway
            .invoke(|| {
                let provider = Arc::clone(&provider);
                let prompt = prompt.clone();
                async move { provider.generate(&prompt).await }
            })
            .await?;

        let synthesis = assemble(&response.payloads, self.table_policy)?;
        info!(
            "Synthesized {} candidate(s) ({} dropped) via {}",
            synthesis.candidates.len(),
            synthesis.dropped,
            self.provider.name()
        );
        Ok(synthesis)
    }
}

/// Decode every payload, keep the viable ones, derive `used_tables`
pub fn assemble(payloads: &[String], policy: TableMergePolicy) -> Result<Synthesis> {
    let parsed: Vec<std::result::Result<CandidatePayload, NlqError>> =
        payloads.iter().flat_map(|p| decode_payload(p)).collect();

    let mut dropped = 0;
    let mut used_tables: Vec<String> = Vec::new();
    let mut candidates = Vec::new();

    for result in parsed {
        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Dropping candidate: {}", e);
                dropped += 1;
                continue;
            }
        };

        if let Some(ref tables) = payload.used_tables {
            match policy {
                TableMergePolicy::LastWins => used_tables = tables.clone(),
                TableMergePolicy::Union => {
                    for table in tables {
                        if !used_tables.contains(table) {
                            used_tables.push(table.clone());
                        }
                    }
                }
            }
        }

        let candidate = Candidate::from(payload);
        if candidate.normalized_sql.is_empty() {
            debug!("Discarding candidate with empty SQL");
            dropped += 1;
            continue;
        }
        candidates.push(candidate);
    }

    if candidates.is_empty() {
        return Err(NlqError::NoViableCandidates);
    }

    Ok(Synthesis {
        candidates,
        used_tables,
        dropped,
    })
}

/// A payload holds one JSON object or an array of them, possibly fenced
fn decode_payload(text: &str) -> Vec<std::result::Result<CandidatePayload, NlqError>> {
    let body = strip_code_fence(text);
    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => return vec![Err(NlqError::MalformedCandidate(format!("invalid JSON: {}", e)))],
    };

    let items = match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };

    items
        .into_iter()
        .map(|item| {
            serde_json::from_value::<CandidatePayload>(item)
                .map_err(|e| NlqError::MalformedCandidate(e.to_string()))
        })
        .collect()
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::llm::{ProviderError, ProviderResponse};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn payloads(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_malformed_payloads_are_dropped() {
        let synthesis = assemble(
            &payloads(&[
                r#"{"sql_query": "SELECT a FROM t", "explanation": "a", "used_tables": ["t"], "ml_algorithm": "KMeans"}"#,
                r#"{"explanation": "no sql here"}"#,
                r#"not json at all"#,
                r#"{"sql_query": 42}"#,
            ]),
            TableMergePolicy::LastWins,
        )
        .unwrap();

        assert_eq!(synthesis.candidates.len(), 1);
        assert_eq!(synthesis.dropped, 3);
        let c = &synthesis.candidates[0];
        assert_eq!(c.normalized_sql, "SELECT a FROM t");
        assert_eq!(c.suggested_algorithm.as_deref(), Some("KMeans"));
        assert_eq!(c.referenced_tables, vec!["t".to_string()]);
    }

    #[test]
    fn test_all_malformed_is_no_viable_candidates() {
        let result = assemble(&payloads(&["{}", "[1, 2]"]), TableMergePolicy::LastWins);
        assert!(matches!(result, Err(NlqError::NoViableCandidates)));
        let result = assemble(&[], TableMergePolicy::LastWins);
        assert!(matches!(result, Err(NlqError::NoViableCandidates)));
    }

    #[test]
    fn test_empty_sql_is_filtered() {
        let result = assemble(
            &payloads(&[r#"{"sql_query": "   "}"#, r#"{"sql_query": "-- nothing"}"#]),
            TableMergePolicy::LastWins,
        );
        assert!(matches!(result, Err(NlqError::NoViableCandidates)));
    }

    #[test]
    fn test_used_tables_last_wins() {
        let synthesis = assemble(
            &payloads(&[
                r#"{"sql_query": "SELECT a FROM t", "used_tables": ["t", "u"]}"#,
                r#"{"sql_query": "SELECT b FROM v", "used_tables": ["v"]}"#,
                r#"{"sql_query": "SELECT c FROM w"}"#,
            ]),
            TableMergePolicy::LastWins,
        )
        .unwrap();
        assert_eq!(synthesis.used_tables, vec!["v".to_string()]);
    }

    #[test]
    fn test_used_tables_union() {
        let synthesis = assemble(
            &payloads(&[
                r#"{"sql_query": "SELECT a FROM t", "used_tables": ["t", "u"]}"#,
                r#"{"sql_query": "SELECT b FROM v", "used_tables": ["v", "t"]}"#,
            ]),
            TableMergePolicy::Union,
        )
        .unwrap();
        assert_eq!(synthesis.used_tables, vec!["t", "u", "v"]);
    }

    #[test]
    fn test_array_and_fenced_payloads() {
        let synthesis = assemble(
            &payloads(&[
                "```json\n[{\"sql_query\": \"SELECT 1\"}, {\"sql_query\": \"SELECT 2\", \"ml_algorithm\": \"\"}]\n```",
            ]),
            TableMergePolicy::LastWins,
        )
        .unwrap();
        assert_eq!(synthesis.candidates.len(), 2);
        assert_eq!(synthesis.candidates[1].suggested_algorithm, None);
    }

    #[test]
    fn test_template_placeholders() {
        let template = PromptTemplate::from_string(
            "db={db_name} q={natural_language_query} ctx={context} json={\"k\": 1}".to_string(),
        );
        assert_eq!(
            template.render("how many?", "table t", "sales"),
            "db=sales q=how many? ctx=table t json={\"k\": 1}"
        );
    }

    struct ScriptedProvider {
        prompts: Mutex<Vec<String>>,
        payloads: Vec<String>,
    }

    #[async_trait]
    impl GenerativeProvider for ScriptedProvider {
        async fn generate(&self, prompt: &str) -> std::result::Result<ProviderResponse, ProviderError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(ProviderResponse::new(self.payloads.clone()))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn test_synthesize_issues_single_request() {
        let provider = Arc::new(ScriptedProvider {
            prompts: Mutex::new(Vec::new()),
            payloads: payloads(&[
                r#"{"sql_query": "select a from t"}"#,
                r#"{"sql_query": "select b from t"}"#,
            ]),
        });
        let synthesizer = CandidateSynthesizer::new(
            provider.clone(),
            RetryGateway::new(RetryConfig::default()),
            PromptTemplate::default(),
        );

        let synthesis = synthesizer.synthesize("count rows", "table t(a, b)", "analytics").await.unwrap();
        assert_eq!(synthesis.candidates.len(), 2);
        let prompts = provider.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("count rows"));
        assert!(prompts[0].contains("table t(a, b)"));
        assert!(prompts[0].contains("analytics"));
    }
}
