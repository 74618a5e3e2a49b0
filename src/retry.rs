//! Retry Gateway
//!
//! Wraps provider calls with bounded exponential backoff. Only rate-limit
//! failures are retried; everything else propagates on the first attempt.

use crate::config::RetryConfig;
use crate::error::{NlqError, Result};
use crate::llm::ProviderError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, warn};

/// Suspends the current task between attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Success,
    RateLimited { message: String, wait_secs: Option<f64> },
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub timestamp: DateTime<Utc>,
}

/// Append-only record of provider attempts
#[derive(Debug, Default)]
pub struct InteractionHistory {
    records: Mutex<Vec<InteractionRecord>>,
}

impl InteractionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, attempt: u32, outcome: AttemptOutcome) {
        let record = InteractionRecord {
            attempt,
            outcome,
            timestamp: Utc::now(),
        };
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }

    pub fn records(&self) -> Vec<InteractionRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

pub struct RetryGateway {
    config: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
    history: Option<Arc<InteractionHistory>>,
}

impl RetryGateway {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            sleeper: Arc::new(TokioSleeper),
            history: None,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_history(mut self, history: Arc<InteractionHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// Wait before retry number `attempt` (1-based): `backoff_factor ^ attempt` seconds
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64(self.config.backoff_factor.powi(attempt as i32))
    }

    /// Run `request` until it succeeds, fails with a non-rate-limit error, or the
    /// retry budget is spent.
    pub async fn invoke<F, Fut, T>(&self, mut request: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match request().await {
                Ok(value) => {
                    self.record(attempt, AttemptOutcome::Success);
                    return Ok(value);
                }
                Err(ProviderError::RateLimited(message)) => {
                    if attempt >= self.config.retries {
                        self.record(
                            attempt,
                            AttemptOutcome::RateLimited {
                                message: message.clone(),
                                wait_secs: None,
                            },
                        );
                        error!("Maximum attempts reached while rate limited");
                        return Err(NlqError::RetriesExhausted {
                            attempts: attempt + 1,
                            last: message,
                        });
                    }
                    attempt += 1;
                    let wait = self.delay_for_attempt(attempt);
                    self.record(
                        attempt - 1,
                        AttemptOutcome::RateLimited {
                            message,
                            wait_secs: Some(wait.as_secs_f64()),
                        },
                    );
                    warn!(
                        "Rate limit reached. Retrying in {:.1}s (attempt {}/{})",
                        wait.as_secs_f64(),
                        attempt,
                        self.config.retries
                    );
                    self.sleeper.sleep(wait).await;
                }
                Err(ProviderError::Upstream(message)) => {
                    self.record(attempt, AttemptOutcome::Failed { message: message.clone() });
                    error!("Unexpected error sending message to the model: {}", message);
                    return Err(NlqError::Upstream(message));
                }
            }
        }
    }

    fn record(&self, attempt: u32, outcome: AttemptOutcome) {
        if let Some(ref history) = self.history {
            history.push(attempt, outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    fn gateway(retries: u32, sleeper: Arc<RecordingSleeper>) -> RetryGateway {
        RetryGateway::new(RetryConfig {
            retries,
            backoff_factor: 2.0,
        })
        .with_sleeper(sleeper)
    }

    #[tokio::test]
    async fn test_three_rate_limits_then_success() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let history = Arc::new(InteractionHistory::new());
        let gw = gateway(5, sleeper.clone()).with_history(history.clone());
        let calls = AtomicU32::new(0);

        let result = gw
            .invoke(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(ProviderError::RateLimited("429".to_string()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "done");
        assert_eq!(
            *sleeper.slept.lock().unwrap(),
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8)
            ]
        );
        let records = history.records();
        assert_eq!(records.len(), 4);
        assert_eq!(records.last().unwrap().outcome, AttemptOutcome::Success);
    }

    #[tokio::test]
    async fn test_six_rate_limits_exhaust_five_retries() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let gw = gateway(5, sleeper.clone());
        let calls = AtomicU32::new(0);

        let result: Result<()> = gw
            .invoke(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::RateLimited("quota".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(NlqError::RetriesExhausted { attempts: 6, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(sleeper.slept.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let sleeper = Arc::new(RecordingSleeper::default());
        let gw = gateway(5, sleeper.clone());
        let calls = AtomicU32::new(0);

        let result: Result<()> = gw
            .invoke(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::Upstream("bad request".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(NlqError::Upstream(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.slept.lock().unwrap().is_empty());
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let gw = RetryGateway::new(RetryConfig::default());
        assert!(gw.delay_for_attempt(2) > gw.delay_for_attempt(1));
        assert_eq!(gw.delay_for_attempt(3), Duration::from_secs(8));
    }
}
