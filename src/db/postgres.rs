//! PostgreSQL adapter for plan estimation and read-only execution

use crate::error::{NlqError, Result};
use crate::execution::Table;
use async_trait::async_trait;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use sqlx::PgPool;
use tracing::{debug, warn};

#[async_trait]
pub trait Database: Send + Sync {
    /// `EXPLAIN (FORMAT JSON)` inside a transaction that is never committed
    async fn explain(&self, sql: &str) -> Result<serde_json::Value>;

    /// Run a read query and return its rows
    async fn query(&self, sql: &str) -> Result<Table>;

    /// Adapters without a cost estimator return false
    fn supports_explain(&self) -> bool {
        true
    }
}

pub struct PgDatabase {
    pool: PgPool,
    statement_timeout_ms: Option<u64>,
}

impl PgDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            statement_timeout_ms: None,
        }
    }

    pub fn with_statement_timeout(mut self, timeout_ms: Option<u64>) -> Self {
        self.statement_timeout_ms = timeout_ms;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Statement text without trailing comments, whitespace or `;`, so it can be
/// embedded in EXPLAIN or a subquery
fn statement_body(sql: &str) -> &str {
    let dialect = PostgreSqlDialect {};
    let tokens = match Tokenizer::new(&dialect, sql).tokenize_with_location() {
        Ok(tokens) => tokens,
        Err(_) => return sql.trim().trim_end_matches(';').trim_end(),
    };

    let last = tokens
        .iter()
        .rposition(|t| !matches!(t.token, Token::Whitespace(_) | Token::SemiColon | Token::EOF));
    let end = match last {
        Some(idx) => match tokens.get(idx + 1) {
            Some(next) => byte_offset(sql, next.location.line, next.location.column),
            None => sql.len(),
        },
        None => 0,
    };
    sql[..end].trim()
}

/// Tokenizer locations are 1-based and count characters
fn byte_offset(sql: &str, line: u64, column: u64) -> usize {
    let (mut l, mut c) = (1u64, 1u64);
    for (idx, ch) in sql.char_indices() {
        if l == line && c == column {
            return idx;
        }
        if ch == '\n' {
            l += 1;
            c = 1;
        } else {
            c += 1;
        }
    }
    sql.len()
}

/// One JSON object per row. The subquery closes on its own line so a stray
/// line comment cannot swallow it.
fn row_json_query(sql: &str) -> String {
    format!("SELECT row_to_json(q)::text FROM (\n{}\n) AS q", statement_body(sql))
}

/// Prefer the server's diagnostic text over sqlx's wrapper
fn diagnostic(err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) => db_err.message().to_string(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn explain(&self, sql: &str) -> Result<serde_json::Value> {
        let statement = format!("EXPLAIN (FORMAT JSON) {}", statement_body(sql));
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query_scalar::<_, serde_json::Value>(&statement)
            .fetch_one(&mut *tx)
            .await;

        if let Err(e) = tx.rollback().await {
            warn!("Failed to roll back plan transaction: {}", e);
        }

        result.map_err(|e| NlqError::PlanUnavailable(diagnostic(&e)))
    }

    async fn query(&self, sql: &str) -> Result<Table> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SET TRANSACTION READ ONLY").execute(&mut *tx).await?;
        if let Some(ms) = self.statement_timeout_ms {
            sqlx::query(&format!("SET LOCAL statement_timeout = {}", ms))
                .execute(&mut *tx)
                .await?;
        }

        let wrapped = row_json_query(sql);
        debug!("Executing: {}", wrapped);
        let result = sqlx::query_scalar::<_, String>(&wrapped).fetch_all(&mut *tx).await;

        if let Err(e) = tx.rollback().await {
            warn!("Failed to close read-only transaction: {}", e);
        }

        let raw_rows = result.map_err(|e| NlqError::Execution(diagnostic(&e)))?;
        let objects = raw_rows
            .iter()
            .map(|r| serde_json::from_str(r))
            .collect::<std::result::Result<Vec<serde_json::Value>, _>>()?;

        Ok(Table::from_json_rows(objects))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_body_drops_terminator() {
        assert_eq!(statement_body("SELECT 1;"), "SELECT 1");
        assert_eq!(statement_body("  SELECT 1 ;  "), "SELECT 1");
        assert_eq!(statement_body("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_statement_body_drops_trailing_comments() {
        assert_eq!(statement_body("SELECT 1 AS n -- count rows"), "SELECT 1 AS n");
        assert_eq!(statement_body("SELECT 1 AS n; -- done"), "SELECT 1 AS n");
        assert_eq!(statement_body("SELECT 1 /* tail */ ;\n"), "SELECT 1");
        assert_eq!(
            statement_body("SELECT a -- first column\nFROM t -- source\n;"),
            "SELECT a -- first column\nFROM t"
        );
    }

    #[test]
    fn test_statement_body_keeps_literals() {
        assert_eq!(statement_body("SELECT '--x;' AS s;"), "SELECT '--x;' AS s");
        assert_eq!(statement_body("SELECT 'é' AS s; -- done"), "SELECT 'é' AS s");
    }

    #[test]
    fn test_row_json_query_survives_comments() {
        let wrapped = row_json_query("SELECT a -- first\nFROM t -- trailing");
        assert_eq!(
            wrapped,
            "SELECT row_to_json(q)::text FROM (\nSELECT a -- first\nFROM t\n) AS q"
        );
        // Unterminated literals still get the closing parenthesis on its own line
        assert!(row_json_query("SELECT 'x -- c").ends_with("\n) AS q"));
    }
}
