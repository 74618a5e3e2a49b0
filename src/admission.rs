//! Admission Controller
//!
//! Estimates cost and row volume with a non-committing EXPLAIN before any real
//! execution and rejects queries over the configured ceilings. An EXPLAIN that
//! fails doubles as a syntax and relation check.

use crate::config::AdmissionConfig;
use crate::db::Database;
use crate::error::{NlqError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

lazy_static! {
    static ref RELATION_REF: Regex = Regex::new(r"(?i)\b(?:FROM|JOIN)\s+[A-Za-z_\x22(]").unwrap();
    static ref JOIN_REF: Regex = Regex::new(r"(?i)\bJOIN\b").unwrap();
    static ref LIMIT_CLAUSE: Regex = Regex::new(r"(?i)\bLIMIT\s+(\d+)").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanSource {
    Explain,
    /// Static estimate, lower fidelity than a real plan
    Heuristic,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub total_cost: f64,
    pub plan_rows: u64,
    pub source: PlanSource,
}

impl Plan {
    pub fn new(total_cost: f64, plan_rows: u64) -> Self {
        Self {
            total_cost: total_cost.max(0.0),
            plan_rows,
            source: PlanSource::Explain,
        }
    }

    /// Read the top-level node of `EXPLAIN (FORMAT JSON)` output
    pub fn from_explain(value: &serde_json::Value) -> Result<Self> {
        let root = match value {
            serde_json::Value::Array(items) => items
                .first()
                .ok_or_else(|| NlqError::PlanUnavailable("empty EXPLAIN output".to_string()))?,
            other => other,
        };
        let node = root
            .get("Plan")
            .ok_or_else(|| NlqError::PlanUnavailable("EXPLAIN output has no top-level plan node".to_string()))?;

        let total_cost = node.get("Total Cost").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let plan_rows = node
            .get("Plan Rows")
            .and_then(|v| v.as_f64())
            .map(|r| if r.is_finite() && r > 0.0 { r.round() as u64 } else { 0 })
            .unwrap_or(0);

        Ok(Plan::new(total_cost, plan_rows))
    }
}

/// Relation and join counting for databases that cannot explain
pub struct StaticComplexityEstimator;

impl StaticComplexityEstimator {
    const COST_PER_RELATION: f64 = 1_000.0;
    const ROWS_PER_RELATION: u64 = 1_000;
    const JOIN_FANOUT: u64 = 10;

    pub fn estimate(sql: &str) -> Plan {
        let relations = RELATION_REF.find_iter(sql).count().max(1) as u64;
        let joins = JOIN_REF.find_iter(sql).count() as u32;
        let fanout = Self::JOIN_FANOUT.saturating_pow(joins);

        let mut rows = Self::ROWS_PER_RELATION.saturating_mul(fanout);
        if let Some(limit) = LIMIT_CLAUSE
            .captures(sql)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
        {
            rows = rows.min(limit);
        }

        Plan {
            total_cost: Self::COST_PER_RELATION * relations as f64 * fanout as f64,
            plan_rows: rows,
            source: PlanSource::Heuristic,
        }
    }
}

pub struct AdmissionController {
    config: AdmissionConfig,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        Self { config }
    }

    /// Dry-run the query plan. The database adapter rolls the transaction back on
    /// every path.
    pub async fn check(&self, sql: &str, db: &dyn Database) -> Result<Plan> {
        if !db.supports_explain() {
            if self.config.heuristic_fallback {
                warn!("Database cannot explain; using static complexity estimate");
                return Ok(StaticComplexityEstimator::estimate(sql));
            }
            return Err(NlqError::PlanUnavailable(
                "database cannot produce execution plans".to_string(),
            ));
        }

        let raw = db.explain(sql).await.map_err(|e| match e {
            NlqError::Database(msg) | NlqError::PlanUnavailable(msg) => NlqError::PlanUnavailable(msg),
            other => NlqError::PlanUnavailable(other.to_string()),
        })?;
        let plan = Plan::from_explain(&raw)?;
        info!("Plan estimate: cost={}, rows={}", plan.total_cost, plan.plan_rows);
        Ok(plan)
    }

    /// Reason for rejection when the plan is over either ceiling
    pub fn exceeds_limits(&self, plan: &Plan) -> Option<String> {
        if plan.total_cost > self.config.cost_ceiling || plan.plan_rows > self.config.row_ceiling {
            return Some(format!(
                "plan exceeds limits: cost={}, rows={}",
                plan.total_cost, plan.plan_rows
            ));
        }
        None
    }

    /// `check` followed by the ceiling test
    pub async fn admit(&self, sql: &str, db: &dyn Database) -> Result<Plan> {
        let plan = self.check(sql, db).await?;
        if let Some(reason) = self.exceeds_limits(&plan) {
            warn!("Execution blocked: {}", reason);
            return Err(NlqError::PlanLimitExceeded {
                total_cost: plan.total_cost,
                plan_rows: plan.plan_rows,
                reason,
            });
        }
        Ok(plan)
    }
}
