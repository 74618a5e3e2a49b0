//! Database connection management using sqlx

use crate::config::DatabaseConfig;
use crate::error::{NlqError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Initialize the database connection pool
pub async fn init_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let url = config
        .url
        .as_deref()
        .ok_or_else(|| NlqError::Config("no database url configured".to_string()))?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(url)
        .await?;

    // Test the connection
    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_url_is_a_config_error() {
        let config = DatabaseConfig {
            url: None,
            ..DatabaseConfig::default()
        };
        assert!(matches!(init_pool(&config).await, Err(NlqError::Config(_))));
    }
}
