//! Relevance scoring of (question, query) pairs by a cross-encoder.

use crate::config::ScorerConfig;
use crate::error::{NlqError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    /// One score per query, in input order
    async fn score(&self, question: &str, queries: &[String]) -> Result<Vec<f64>>;
}

/// Cross-encoder served over HTTP with the text-embeddings-inference `/rerank`
/// contract: `{query, texts}` in, `[{index, score}]` out.
pub struct HttpCrossEncoder {
    endpoint: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct RerankHit {
    index: usize,
    score: f64,
}

impl HttpCrossEncoder {
    pub fn new(config: &ScorerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NlqError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            endpoint: config.endpoint.clone(),
            client,
        })
    }
}

#[async_trait]
impl RelevanceScorer for HttpCrossEncoder {
    async fn score(&self, question: &str, queries: &[String]) -> Result<Vec<f64>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "query": question,
            "texts": queries,
            "raw_scores": false,
            "truncate": true
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| NlqError::RerankerUnavailable(format!("Rerank request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(NlqError::RerankerUnavailable(format!(
                "Rerank endpoint returned {}: {}",
                status, text
            )));
        }

        let hits: Vec<RerankHit> = response
            .json()
            .await
            .map_err(|e| NlqError::RerankerUnavailable(format!("Failed to parse rerank response: {}", e)))?;

        scores_in_order(hits, queries.len())
    }
}

fn scores_in_order(hits: Vec<RerankHit>, expected: usize) -> Result<Vec<f64>> {
    let mut scores: Vec<Option<f64>> = vec![None; expected];
    for hit in hits {
        if let Some(slot) = scores.get_mut(hit.index) {
            *slot = Some(hit.score);
        }
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(idx, s)| {
            s.ok_or_else(|| NlqError::RerankerUnavailable(format!("No score returned for candidate {}", idx)))
        })
        .collect()
}
