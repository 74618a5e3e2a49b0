use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nlq_engine::config::PipelineConfig;
use nlq_engine::db::{init_pool, PgDatabase, PgHistoryStore};
use nlq_engine::llm::LlmClient;
use nlq_engine::rerank::HttpCrossEncoder;
use nlq_engine::schema_rag::FileContextRetriever;
use nlq_engine::security::{is_safe, query_hash, SafetyValidator};
use nlq_engine::{Collaborators, Pipeline, Reply};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nlq-engine")]
#[command(about = "Turn natural-language questions into vetted, read-only SQL and run it")]
struct Args {
    /// JSON configuration file (defaults come from the environment)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate SQL for a question
    Ask {
        question: String,

        #[arg(long, default_value = "postgres")]
        db_name: String,

        /// Run the selected query after generating it
        #[arg(long)]
        execute: bool,
    },
    /// Validate, admit and run a SQL query
    Run { sql: String },
    /// Print safety verdicts for a SQL query
    Check { sql: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::from_env()?,
    };

    match args.command {
        Command::Check { sql } => {
            let validator = SafetyValidator::new(&config.safety)?;
            let report = validator.validate(&sql);
            let verdict = serde_json::json!({
                "basic_safe": validator.is_safe(&sql),
                "default_blocklist_safe": is_safe(&sql),
                "enhanced": report,
                "query_hash": query_hash(&sql),
            });
            println!("{}", serde_json::to_string_pretty(&verdict)?);
        }
        Command::Run { sql } => {
            let pipeline = build_pipeline(&config).await?;
            let report = pipeline.run(&sql).await?;
            pipeline.flush().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Ask {
            question,
            db_name,
            execute,
        } => {
            let pipeline = build_pipeline(&config).await?;
            let reply = pipeline.process(&question, &db_name).await?;
            println!("{}", serde_json::to_string_pretty(&reply)?);

            if let (true, Reply::Sql(generated)) = (execute, &reply) {
                info!("Executing selected query");
                let report = pipeline.run_generated(generated).await?;
                pipeline.flush().await;
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
    }

    Ok(())
}

async fn build_pipeline(config: &PipelineConfig) -> Result<Pipeline> {
    let context_path = config
        .schema_context
        .as_deref()
        .context("no schema context file configured (set NLQ_SCHEMA_CONTEXT)")?;
    let retriever = FileContextRetriever::load(context_path)
        .with_context(|| format!("loading schema context from {}", context_path.display()))?;

    let pool = init_pool(&config.database).await.context("connecting to PostgreSQL")?;
    let database = PgDatabase::new(pool.clone()).with_statement_timeout(config.executor.statement_timeout_ms);

    let collaborators = Collaborators {
        provider: LlmClient::new(config.provider.clone())?.into_shared(),
        retriever: Arc::new(retriever),
        scorer: Arc::new(HttpCrossEncoder::new(&config.scorer)?),
        database: Arc::new(database),
        history: Some(Arc::new(PgHistoryStore::new(pool))),
        sleeper: None,
    };

    Ok(Pipeline::new(config, collaborators)?)
}
