pub mod admission;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod intake;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod rerank;
pub mod retry;
pub mod schema_rag;
pub mod security;
pub mod synthesis;

pub use admission::{AdmissionController, Plan, PlanSource, StaticComplexityEstimator};
pub use config::PipelineConfig;
pub use error::{NlqError, Result};
pub use execution::{ExecutionOutcome, FailureKind, RunReport, Table};
pub use pipeline::{Collaborators, GeneratedQuery, Pipeline, Reply};
pub use synthesis::Candidate;
