//! Reranker
//!
//! Blends a learned relevance score with a deterministic rule score and returns
//! candidates in a stable total order.

pub mod normalize;
pub mod scorer;

pub use normalize::normalize_sql;
pub use scorer::{HttpCrossEncoder, RelevanceScorer};

use crate::config::RerankConfig;
use crate::error::{NlqError, Result};
use crate::security::query_guards::keyword_pattern;
use crate::synthesis::Candidate;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

lazy_static! {
    static ref SELECT_STAR: Regex = Regex::new(r"(?i)\bSELECT\s+\*").unwrap();
    static ref DEFAULT_RULES: RuleScorer =
        RuleScorer::new(&RerankConfig::default()).expect("default rerank config compiles");
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub candidate: Candidate,
    pub model_score: f64,
    pub rule_score: f64,
    pub final_score: f64,
    pub rank: usize,
}

/// Deterministic heuristics over the normalized SQL
pub struct RuleScorer {
    penalized: Option<Regex>,
    star_penalty: f64,
}

impl RuleScorer {
    pub fn new(config: &RerankConfig) -> Result<Self> {
        Ok(Self {
            penalized: keyword_pattern(&config.penalized_keywords)?,
            star_penalty: config.star_penalty,
        })
    }

    pub fn score(&self, sql: &str) -> f64 {
        if self.penalized.as_ref().map_or(false, |re| re.is_match(sql)) {
            return 0.0;
        }
        let mut score = 1.0;
        if SELECT_STAR.is_match(sql) {
            score -= self.star_penalty;
        }
        f64::max(0.0, score)
    }
}

/// Rule score with the default penalties
pub fn rule_score(sql: &str) -> f64 {
    DEFAULT_RULES.score(sql)
}

pub struct Reranker {
    scorer: Arc<dyn RelevanceScorer>,
    rules: RuleScorer,
    model_weight: f64,
    rule_weight: f64,
    degrade_to_rules: bool,
}

impl Reranker {
    pub fn new(scorer: Arc<dyn RelevanceScorer>, config: &RerankConfig) -> Result<Self> {
        Ok(Self {
            scorer,
            rules: RuleScorer::new(config)?,
            model_weight: config.model_weight,
            rule_weight: config.rule_weight,
            degrade_to_rules: config.degrade_to_rules,
        })
    }

    /// Score, order and truncate to `top_k` (1-based ranks)
    pub async fn rank(
        &self,
        question: &str,
        candidates: &[Candidate],
        top_k: usize,
    ) -> Result<Vec<RankedCandidate>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let normalized: Vec<String> = candidates.iter().map(|c| normalize_sql(&c.raw_sql)).collect();

        let model_scores = match self.scorer.score(question, &normalized).await {
            Ok(scores) if scores.len() == normalized.len() => scores,
            Ok(scores) => {
                return Err(NlqError::RerankerUnavailable(format!(
                    "expected {} scores, got {}",
                    normalized.len(),
                    scores.len()
                )))
            }
            Err(e) if self.degrade_to_rules => {
                warn!("Relevance model unavailable, ranking by rules only: {}", e);
                vec![0.0; normalized.len()]
            }
            Err(NlqError::RerankerUnavailable(msg)) => return Err(NlqError::RerankerUnavailable(msg)),
            Err(e) => return Err(NlqError::RerankerUnavailable(e.to_string())),
        };

        let mut ranked: Vec<RankedCandidate> = candidates
            .iter()
            .zip(normalized)
            .zip(model_scores)
            .map(|((candidate, norm), model)| {
                let model_score = if model.is_finite() { model.clamp(0.0, 1.0) } else { 0.0 };
                let rule_score = self.rules.score(&norm);
                let mut candidate = candidate.clone();
                candidate.normalized_sql = norm;
                RankedCandidate {
                    candidate,
                    model_score,
                    rule_score,
                    final_score: self.model_weight * model_score + self.rule_weight * rule_score,
                    rank: 0,
                }
            })
            .collect();

        // `sort_by` is stable: ties keep input order
        ranked.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
        ranked.truncate(top_k);
        for (i, r) in ranked.iter_mut().enumerate() {
            r.rank = i + 1;
            debug!(
                "rank {} final={:.4} model={:.4} rule={:.2}: {}",
                r.rank, r.final_score, r.model_score, r.rule_score, r.candidate.normalized_sql
            );
        }
        Ok(ranked)
    }
}
