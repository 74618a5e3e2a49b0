//! Schema context retrieval
//!
//! Vector retrieval is an external collaborator; this module defines the seam, a
//! file-backed retriever for local use, and the prompt context assembly.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Object kinds that can appear in a SELECT
pub const SELECTABLE_KINDS: [&str; 3] = ["TABLE", "VIEW", "MATERIALIZED_VIEW"];

/// Excerpts kept per question
pub const MAX_EXCERPTS: usize = 30;

/// Metadata keys left out of the prompt
const HIDDEN_METADATA: [&str; 2] = ["rows", "summary"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaExcerpt {
    pub content: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Most relevant first
    async fn retrieve(&self, question: &str, limit: usize) -> Result<Vec<SchemaExcerpt>>;
}

/// Excerpts loaded from a JSON array, ranked by word overlap with the question
pub struct FileContextRetriever {
    excerpts: Vec<SchemaExcerpt>,
}

impl FileContextRetriever {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let excerpts: Vec<SchemaExcerpt> = serde_json::from_str(&content)?;
        Ok(Self { excerpts })
    }

    pub fn from_excerpts(excerpts: Vec<SchemaExcerpt>) -> Self {
        Self { excerpts }
    }
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| w.len() > 2)
        .map(|w| w.to_lowercase())
        .collect()
}

#[async_trait]
impl ContextRetriever for FileContextRetriever {
    async fn retrieve(&self, question: &str, limit: usize) -> Result<Vec<SchemaExcerpt>> {
        let question_words = words(question);
        let mut scored: Vec<(usize, &SchemaExcerpt)> = self
            .excerpts
            .iter()
            .map(|e| {
                let text = format!("{} {}", e.name, e.content);
                (words(&text).intersection(&question_words).count(), e)
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(limit).map(|(_, e)| e.clone()).collect())
    }
}

/// Keep SELECT-able objects only
pub fn selectable(excerpts: Vec<SchemaExcerpt>) -> Vec<SchemaExcerpt> {
    excerpts
        .into_iter()
        .filter(|e| SELECTABLE_KINDS.contains(&e.kind.to_uppercase().as_str()))
        .collect()
}

/// Render excerpts as prompt context: content, then visible metadata
pub fn build_context(excerpts: &[SchemaExcerpt]) -> String {
    excerpts
        .iter()
        .map(|e| {
            let mut metadata = serde_json::Map::new();
            metadata.insert("kind".to_string(), serde_json::json!(e.kind));
            metadata.insert("name".to_string(), serde_json::json!(e.name));
            for (k, v) in &e.metadata {
                if !HIDDEN_METADATA.contains(&k.as_str()) {
                    metadata.insert(k.clone(), v.clone());
                }
            }
            format!(
                "{}\nMetadata:\n{}\n\n",
                e.content,
                serde_json::Value::Object(metadata)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn excerpt(kind: &str, name: &str, content: &str) -> SchemaExcerpt {
        SchemaExcerpt {
            content: content.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_file_retriever_ranks_by_overlap() {
        let retriever = FileContextRetriever::from_excerpts(vec![
            excerpt("TABLE", "customers", "Table customers(id, name, city)"),
            excerpt("TABLE", "sales", "Table sales(id, category, amount)"),
        ]);
        let found = retriever.retrieve("total amount by category", 10).await.unwrap();
        assert_eq!(found[0].name, "sales");
        assert_eq!(retriever.retrieve("anything", 1).await.unwrap().len(), 1);
    }

    #[test]
    fn test_selectable_filter() {
        let kept = selectable(vec![
            excerpt("TABLE", "a", ""),
            excerpt("view", "b", ""),
            excerpt("FUNCTION", "c", ""),
            excerpt("SEQUENCE", "d", ""),
            excerpt("MATERIALIZED_VIEW", "e", ""),
        ]);
        let names: Vec<&str> = kept.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "e"]);
    }

    #[test]
    fn test_context_hides_bulky_metadata() {
        let mut e = excerpt("TABLE", "sales", "Table sales(id, amount)");
        e.metadata.insert("rows".to_string(), serde_json::json!([[1, 2]]));
        e.metadata.insert("schema".to_string(), serde_json::json!("public"));
        let context = build_context(&[e]);
        assert!(context.starts_with("Table sales(id, amount)\nMetadata:\n"));
        assert!(context.contains("\"schema\":\"public\""));
        assert!(!context.contains("rows"));
    }
}
