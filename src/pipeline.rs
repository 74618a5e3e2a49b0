//! Pipeline
//!
//! Wires the stages together in their fixed order:
//! intake → context → synthesize → safety pre-filter → rerank → safety confirm
//! for the generation half, and enhanced validation → admission → execution for
//! the execution half. Both halves run under the request deadline.

use crate::admission::AdmissionController;
use crate::config::PipelineConfig;
use crate::db::{Database, HistoryStore};
use crate::error::{NlqError, Result};
use crate::execution::{ExecutionOutcome, Executor, FailureKind, RunReport};
use crate::intake::{self, IntakeReply};
use crate::llm::GenerativeProvider;
use crate::observability::{AuditTrail, DEFAULT_IN_MEMORY_RECORDS};
use crate::rerank::{RelevanceScorer, Reranker};
use crate::retry::{InteractionHistory, InteractionRecord, RetryGateway, Sleeper};
use crate::schema_rag::{build_context, selectable, ContextRetriever, MAX_EXCERPTS};
use crate::security::{validate_query_integrity, verify_query_hash, AuditAction, AuditRecord, SafetyValidator};
use crate::synthesis::{CandidateSynthesizer, PromptTemplate, TableMergePolicy};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// External capabilities the pipeline consumes
pub struct Collaborators {
    pub provider: Arc<dyn GenerativeProvider>,
    pub retriever: Arc<dyn ContextRetriever>,
    pub scorer: Arc<dyn RelevanceScorer>,
    pub database: Arc<dyn Database>,
    pub history: Option<Arc<dyn HistoryStore>>,
    /// Overrides the real backoff sleep
    pub sleeper: Option<Arc<dyn Sleeper>>,
}

/// Selected query handed back by the generation half
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedQuery {
    /// Ties the query to its `generated` audit record
    pub request_id: String,
    pub sql: String,
    pub explanation: String,
    pub used_tables: Vec<String>,
    pub suggested_algorithm: Option<String>,
    pub final_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Sql(GeneratedQuery),
    Message(IntakeReply),
}

pub struct Pipeline {
    retriever: Arc<dyn ContextRetriever>,
    synthesizer: CandidateSynthesizer,
    safety: Arc<SafetyValidator>,
    reranker: Reranker,
    admission: AdmissionController,
    executor: Executor,
    database: Arc<dyn Database>,
    audit: Arc<AuditTrail>,
    interactions: Arc<InteractionHistory>,
    top_k: usize,
    deadline: Option<Duration>,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let interactions = Arc::new(InteractionHistory::new());
        let mut gateway = RetryGateway::new(config.retry.clone()).with_history(Arc::clone(&interactions));
        if let Some(sleeper) = collaborators.sleeper {
            gateway = gateway.with_sleeper(sleeper);
        }

        let template = PromptTemplate::load(config.prompt_template.as_deref());
        let synthesizer = CandidateSynthesizer::new(collaborators.provider, gateway, template);

        let safety = Arc::new(SafetyValidator::new(&config.safety)?);
        let mut executor = Executor::new(
            Arc::clone(&collaborators.database),
            Arc::clone(&safety),
            config.executor.clone(),
        );
        if let Some(history) = collaborators.history {
            executor = executor.with_history(history);
        }

        Ok(Self {
            retriever: collaborators.retriever,
            synthesizer,
            safety,
            reranker: Reranker::new(collaborators.scorer, &config.rerank)?,
            admission: AdmissionController::new(config.admission.clone()),
            executor,
            database: collaborators.database,
            audit: Arc::new(AuditTrail::new(config.audit_log.clone(), DEFAULT_IN_MEMORY_RECORDS)),
            interactions,
            top_k: config.rerank.top_k,
            deadline: config.request_deadline(),
        })
    }

    pub fn with_table_policy(mut self, policy: TableMergePolicy) -> Self {
        self.synthesizer = self.synthesizer.with_table_policy(policy);
        self
    }

    pub fn with_audit_trail(mut self, audit: Arc<AuditTrail>) -> Self {
        self.audit = audit;
        self
    }

    pub fn audit_trail(&self) -> Arc<AuditTrail> {
        Arc::clone(&self.audit)
    }

    /// Provider attempts made so far, in order
    pub fn interactions(&self) -> Vec<InteractionRecord> {
        self.interactions.records()
    }

    /// Generation half: question in, one vetted query (or a conversational reply) out
    pub async fn process(&self, question: &str, db_name: &str) -> Result<Reply> {
        self.with_deadline(self.generate(question, db_name)).await
    }

    /// Execution half
    pub async fn run(&self, sql: &str) -> Result<RunReport> {
        self.with_deadline(self.execute(sql)).await
    }

    /// `run` after checking that `sql` is the query that was approved
    pub async fn run_verified(&self, approved_sql: &str, sql: &str) -> Result<RunReport> {
        validate_query_integrity(approved_sql, sql).map_err(NlqError::IntegrityViolation)?;
        self.run(sql).await
    }

    /// `run` for a query returned by `process`, checked against the hash recorded
    /// when it was selected
    pub async fn run_generated(&self, generated: &GeneratedQuery) -> Result<RunReport> {
        let approval = self
            .audit
            .find(AuditAction::Generated, &generated.request_id)
            .ok_or_else(|| {
                NlqError::IntegrityViolation(format!(
                    "no approval record for request {}",
                    generated.request_id
                ))
            })?;
        verify_query_hash(&approval.query_hash, &generated.sql).map_err(NlqError::IntegrityViolation)?;
        self.run(&generated.sql).await
    }

    /// Wait for background history writes. Call before the runtime shuts down.
    pub async fn flush(&self) {
        self.executor.flush().await;
    }

    async fn with_deadline<T, F>(&self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.deadline {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| NlqError::DeadlineExceeded(limit))?,
            None => work.await,
        }
    }

    async fn generate(&self, question: &str, db_name: &str) -> Result<Reply> {
        let request_id = Uuid::new_v4().to_string();
        info!("[{}] Processing question for {}", request_id, db_name);

        if let Some(reply) = intake::reply_for(intake::classify(question)) {
            return Ok(Reply::Message(reply));
        }

        let excerpts = self.retriever.retrieve(question, MAX_EXCERPTS).await?;
        let excerpts: Vec<_> = selectable(excerpts).into_iter().take(MAX_EXCERPTS).collect();
        if excerpts.is_empty() {
            return Err(NlqError::NoSchemaContext);
        }
        let context = build_context(&excerpts);

        let synthesis = self.synthesizer.synthesize(question, &context, db_name).await?;

        let mut blocked = Vec::new();
        let admitted: Vec<_> = synthesis
            .candidates
            .into_iter()
            .filter(|c| match self.safety.blocked_keyword(&c.raw_sql) {
                Some(keyword) => {
                    warn!("Candidate blocked before ranking ({}): {}", keyword, c.raw_sql);
                    blocked.push(keyword);
                    false
                }
                None => true,
            })
            .collect();
        if admitted.is_empty() {
            return Err(NlqError::UnsafeQuery(format!(
                "every generated candidate contained a blocked keyword ({})",
                blocked.join(", ")
            )));
        }

        let ranked = self.reranker.rank(question, &admitted, self.top_k).await?;
        let best = ranked.into_iter().next().ok_or(NlqError::NoViableCandidates)?;

        if let Some(keyword) = self.safety.blocked_keyword(&best.candidate.raw_sql) {
            return Err(NlqError::UnsafeQuery(format!("selected query contains {}", keyword)));
        }

        info!(
            "[{}] Selected candidate with score {:.4} out of {}",
            request_id,
            best.final_score,
            admitted.len()
        );
        self.append_audit(
            AuditRecord::new(&best.candidate.raw_sql, AuditAction::Generated)
                .with_metadata("request_id", request_id.as_str())
                .with_metadata("final_score", best.final_score)
                .with_metadata("candidates", admitted.len())
                .with_metadata("dropped", synthesis.dropped),
        );

        Ok(Reply::Sql(GeneratedQuery {
            request_id,
            sql: best.candidate.raw_sql,
            explanation: best.candidate.explanation,
            used_tables: synthesis.used_tables,
            suggested_algorithm: best.candidate.suggested_algorithm,
            final_score: best.final_score,
        }))
    }

    async fn execute(&self, sql: &str) -> Result<RunReport> {
        let request_id = Uuid::new_v4().to_string();
        let validation = self.safety.validate(sql);
        self.append_audit(
            AuditRecord::new(sql, AuditAction::Validated)
                .with_metadata("request_id", request_id.as_str())
                .with_metadata("safe", validation.safe)
                .with_metadata("reason", validation.reason.clone())
                .with_metadata("checks_performed", validation.metadata.checks_performed.clone()),
        );
        if !validation.safe {
            let reason = validation.reason.unwrap_or_default();
            warn!("Query rejected by enhanced validation: {}", reason);
            return Ok(RunReport::without_plan(ExecutionOutcome::failure(FailureKind::Blocked, reason)));
        }

        let plan = match self.admission.admit(sql, self.database.as_ref()).await {
            Ok(plan) => plan,
            Err(NlqError::PlanLimitExceeded {
                total_cost,
                plan_rows,
                reason,
            }) => {
                return Ok(RunReport {
                    outcome: ExecutionOutcome::failure(FailureKind::PlanLimitExceeded, reason),
                    total_cost: Some(total_cost),
                    plan_rows: Some(plan_rows),
                });
            }
            Err(e) => {
                let detail = match e {
                    NlqError::PlanUnavailable(msg) => msg,
                    other => other.to_string(),
                };
                warn!("Execution plan unavailable: {}", detail);
                return Ok(RunReport::without_plan(ExecutionOutcome::failure(
                    FailureKind::PlanUnavailable,
                    detail,
                )));
            }
        };

        let outcome = self.executor.execute(sql, &plan).await;
        let mut record = AuditRecord::new(sql, AuditAction::Executed)
            .with_metadata("request_id", request_id.as_str())
            .with_metadata("success", outcome.is_success());
        if let ExecutionOutcome::Success { execution_time_ms, .. } = &outcome {
            record = record.with_metadata("execution_time_ms", *execution_time_ms);
        }
        self.append_audit(record);

        Ok(RunReport {
            outcome,
            total_cost: Some(plan.total_cost),
            plan_rows: Some(plan.plan_rows),
        })
    }

    fn append_audit(&self, record: AuditRecord) {
        if let Err(e) = self.audit.record(record) {
            warn!("Failed to write audit record: {}", e);
        }
    }
}
