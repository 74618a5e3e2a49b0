//! Append-only history of executed queries

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// One execution's metadata with the admitted plan's estimates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionAudit {
    pub query_text: String,
    pub execution_time_ms: u64,
    pub plan_total_cost: f64,
    pub plan_rows: u64,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn record_execution(&self, audit: &ExecutionAudit) -> Result<()>;
}

pub struct PgHistoryStore {
    pool: PgPool,
}

impl PgHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    async fn record_execution(&self, audit: &ExecutionAudit) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO metadata.query_history
                (query_text, execution_time_ms, plan_total_cost, plan_rows, db_user)
            VALUES ($1, $2, $3, $4, current_user)
            "#,
        )
        .bind(&audit.query_text)
        .bind(audit.execution_time_ms as i64)
        .bind(audit.plan_total_cost)
        .bind(audit.plan_rows as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
