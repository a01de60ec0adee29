//! Dataset generation pipeline.
//!
//! - [`state`]: generated artifacts and the `state.json` checkpoint
//! - [`generation`]: the LLM stages of one child pipeline
//! - [`orchestrator`]: fan-out/fan-in, resume, execution, validation, export
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sql_forge::config::ForgeConfig;
//! use sql_forge::llm::LiteLlmClient;
//! use sql_forge::pipeline::PipelineOrchestrator;
//!
//! let config = ForgeConfig::from_env()?;
//! let client = Arc::new(LiteLlmClient::from_config(&config));
//! let orchestrator = PipelineOrchestrator::new(config, client, "output");
//! let summary = orchestrator.run(2).await?;
//! println!("{}/{} queries valid", summary.valid_queries, summary.total_queries);
//! ```

pub mod generation;
pub mod orchestrator;
pub mod state;

pub use generation::DatabaseGenerator;
pub use orchestrator::{PipelineOrchestrator, RunSummary, CHECKPOINT_FILE_NAME, DATABASE_DIR_NAME};
pub use state::{
    CompanyDatabaseDescriptions, DatabaseArtifact, PipelineState, QuestionSqlPair,
    QuestionSqlPairs,
};
