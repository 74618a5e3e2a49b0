//! Executor
//!
//! Runs an admitted query, times it, and records the execution in the history
//! store without holding up the caller. Pending history writes are awaited by
//! `flush`.

use crate::admission::Plan;
use crate::config::ExecutorConfig;
use crate::db::{Database, ExecutionAudit, HistoryStore};
use crate::error::NlqError;
use crate::execution::result::{ExecutionOutcome, FailureKind};
use crate::security::SafetyValidator;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct Executor {
    db: Arc<dyn Database>,
    guard: Arc<SafetyValidator>,
    history: Option<Arc<dyn HistoryStore>>,
    pending: Mutex<Vec<JoinHandle<()>>>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(db: Arc<dyn Database>, guard: Arc<SafetyValidator>, config: ExecutorConfig) -> Self {
        Self {
            db,
            guard,
            history: None,
            pending: Mutex::new(Vec::new()),
            config,
        }
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Execute `sql`. The keyword guard runs again here whatever the caller checked.
    pub async fn execute(&self, sql: &str, plan: &Plan) -> ExecutionOutcome {
        if let Some(keyword) = self.guard.blocked_keyword(sql) {
            warn!("Executor refused query containing {}", keyword);
            return ExecutionOutcome::failure(
                FailureKind::Blocked,
                format!("keyword {} is not allowed", keyword),
            );
        }

        let start = Instant::now();
        let table = match self.db.query(sql).await {
            Ok(table) => table,
            Err(e) => {
                let detail = match e {
                    NlqError::Execution(msg) | NlqError::Database(msg) => msg,
                    other => other.to_string(),
                };
                warn!("Query failed: {}", detail);
                return ExecutionOutcome::failure(FailureKind::Execution, detail);
            }
        };
        let execution_time_ms = start.elapsed().as_millis() as u64;
        let rows = table.rounded(self.config.round_precision);

        info!(
            "Query returned {} rows in {} ms (estimated cost={}, rows={})",
            rows.row_count(),
            execution_time_ms,
            plan.total_cost,
            plan.plan_rows
        );

        if let Some(history) = &self.history {
            let history = Arc::clone(history);
            let audit = ExecutionAudit {
                query_text: sql.to_string(),
                execution_time_ms,
                plan_total_cost: plan.total_cost,
                plan_rows: plan.plan_rows,
            };
            let handle = tokio::spawn(async move {
                if let Err(e) = history.record_execution(&audit).await {
                    warn!("Failed to record query history: {}", e);
                }
            });
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.retain(|h| !h.is_finished());
            pending.push(handle);
        }

        ExecutionOutcome::Success {
            rows,
            execution_time_ms,
        }
    }

    /// Wait for every history write started so far
    pub async fn flush(&self) {
        let handles: Vec<_> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain(..).collect()
        };
        debug!("Waiting on {} history writes", handles.len());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("History write task failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SafetyConfig;
    use crate::error::Result;
    use crate::execution::Table;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct StubDb {
        result: std::result::Result<Vec<serde_json::Value>, String>,
        queries: AtomicUsize,
    }

    impl StubDb {
        fn returning(rows: Vec<serde_json::Value>) -> Self {
            Self {
                result: Ok(rows),
                queries: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Database for StubDb {
        async fn explain(&self, _sql: &str) -> Result<serde_json::Value> {
            Ok(json!([{"Plan": {"Total Cost": 1.0, "Plan Rows": 1}}]))
        }

        async fn query(&self, _sql: &str) -> Result<Table> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.result
                .clone()
                .map(Table::from_json_rows)
                .map_err(NlqError::Execution)
        }
    }

    struct ChannelHistory(mpsc::UnboundedSender<ExecutionAudit>);

    #[async_trait]
    impl HistoryStore for ChannelHistory {
        async fn record_execution(&self, audit: &ExecutionAudit) -> Result<()> {
            let _ = self.0.send(audit.clone());
            Ok(())
        }
    }

    struct BrokenHistory;

    #[async_trait]
    impl HistoryStore for BrokenHistory {
        async fn record_execution(&self, _audit: &ExecutionAudit) -> Result<()> {
            Err(NlqError::Database("relation \"metadata.query_history\" does not exist".to_string()))
        }
    }

    /// History store that takes a while to commit
    struct SlowHistory(AtomicBool);

    #[async_trait]
    impl HistoryStore for SlowHistory {
        async fn record_execution(&self, _audit: &ExecutionAudit) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn guard() -> Arc<SafetyValidator> {
        Arc::new(SafetyValidator::new(&SafetyConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn test_success_rounds_and_audits() {
        let db = Arc::new(StubDb::returning(vec![json!({"cat_id": "a", "avg_amt": 10.4567})]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let executor = Executor::new(db, guard(), ExecutorConfig::default())
            .with_history(Arc::new(ChannelHistory(tx)));

        let outcome = executor.execute("SELECT cat_id, avg(amt) AS avg_amt FROM t", &Plan::new(12.5, 3)).await;
        match outcome {
            ExecutionOutcome::Success { rows, .. } => {
                assert_eq!(rows.columns, vec!["cat_id", "avg_amt"]);
                assert_eq!(rows.rows[0][1], json!(10.46));
            }
            other => panic!("unexpected: {:?}", other),
        }

        let audit = rx.recv().await.unwrap();
        assert_eq!(audit.query_text, "SELECT cat_id, avg(amt) AS avg_amt FROM t");
        assert_eq!(audit.plan_total_cost, 12.5);
        assert_eq!(audit.plan_rows, 3);
    }

    #[tokio::test]
    async fn test_history_failure_is_not_fatal() {
        let db = Arc::new(StubDb::returning(vec![json!({"n": 1})]));
        let executor = Executor::new(db, guard(), ExecutorConfig::default()).with_history(Arc::new(BrokenHistory));
        assert!(executor.execute("SELECT 1 AS n", &Plan::new(0.0, 1)).await.is_success());
    }

    #[tokio::test]
    async fn test_guard_runs_before_database() {
        let db = Arc::new(StubDb::returning(Vec::new()));
        let executor = Executor::new(db.clone(), guard(), ExecutorConfig::default());
        let outcome = executor.execute("DROP TABLE t", &Plan::new(0.0, 0)).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Blocked));
        assert_eq!(db.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_database_error_is_surfaced() {
        let db = Arc::new(StubDb {
            result: Err("division by zero".to_string()),
            queries: AtomicUsize::new(0),
        });
        let executor = Executor::new(db, guard(), ExecutorConfig::default());
        match executor.execute("SELECT 1/0", &Plan::new(0.0, 1)).await {
            ExecutionOutcome::Failure { kind, message } => {
                assert_eq!(kind, FailureKind::Execution);
                assert_eq!(message, "error executing query: division by zero");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_flush_waits_for_pending_history_write() {
        let db = Arc::new(StubDb::returning(vec![json!({"n": 1})]));
        let history = Arc::new(SlowHistory(AtomicBool::new(false)));
        let executor = Executor::new(db, guard(), ExecutorConfig::default()).with_history(history.clone());

        assert!(executor.execute("SELECT 1 AS n", &Plan::new(0.0, 1)).await.is_success());
        executor.flush().await;
        assert!(history.0.load(Ordering::SeqCst));

        // Nothing left to wait on
        executor.flush().await;
        assert!(executor.pending.lock().unwrap().is_empty());
    }

    #[test]
    fn test_flush_before_runtime_shutdown_keeps_the_write() {
        let history = Arc::new(SlowHistory(AtomicBool::new(false)));
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let db = Arc::new(StubDb::returning(vec![json!({"n": 1})]));
            let executor = Executor::new(db, guard(), ExecutorConfig::default()).with_history(history.clone());
            executor.execute("SELECT 1 AS n", &Plan::new(0.0, 1)).await;
            executor.flush().await;
        });
        drop(runtime);
        assert!(history.0.load(Ordering::SeqCst));
    }
}
