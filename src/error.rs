use thiserror::Error;

#[derive(Error, Debug)]
pub enum NlqError {
    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Provider still rate limited after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Provider error: {0}")]
    Upstream(String),

    #[error("Malformed candidate: {0}")]
    MalformedCandidate(String),

    #[error("No viable SQL candidate was generated")]
    NoViableCandidates,

    #[error("No relevant schema metadata found for the question")]
    NoSchemaContext,

    #[error("Query blocked for security reasons: {0}")]
    UnsafeQuery(String),

    #[error("Query integrity check failed: {0}")]
    IntegrityViolation(String),

    #[error("Execution plan unavailable: {0}")]
    PlanUnavailable(String),

    #[error("Execution blocked: {reason}")]
    PlanLimitExceeded {
        total_cost: f64,
        plan_rows: u64,
        reason: String,
    },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Reranker unavailable: {0}")]
    RerankerUnavailable(String),

    #[error("Request exceeded its deadline of {0:?}")]
    DeadlineExceeded(std::time::Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NlqError {
    /// Whether the caller should treat this as a temporarily unavailable service.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NlqError::RateLimited(_)
                | NlqError::RetriesExhausted { .. }
                | NlqError::DeadlineExceeded(_)
        )
    }
}

impl From<sqlx::Error> for NlqError {
    fn from(err: sqlx::Error) -> Self {
        NlqError::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NlqError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_retryable_classes() {
        assert!(NlqError::RetriesExhausted { attempts: 6, last: "429".into() }.is_retryable());
        assert!(NlqError::DeadlineExceeded(Duration::from_secs(1)).is_retryable());
        assert!(!NlqError::UnsafeQuery("DELETE".into()).is_retryable());
        assert!(!NlqError::NoViableCandidates.is_retryable());
    }

    #[test]
    fn test_limit_message_carries_numbers() {
        let err = NlqError::PlanLimitExceeded {
            total_cost: 2_000_000.0,
            plan_rows: 10,
            reason: "plan exceeds limits: cost=2000000, rows=10".into(),
        };
        assert!(err.to_string().contains("cost=2000000"));
    }
}
