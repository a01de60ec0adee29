//! sql-forge: LLM-driven text-to-SQL dataset generator.
//!
//! This library generates company database designs with an LLM, realizes
//! them as SQLite files by running the generated scripts, validates the
//! generated question/SQL pairs against them and exports the results.

// Core modules
pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod export;
pub mod extraction;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod validation;

// Re-export commonly used error types
pub use error::{
    DatabaseError, ExecutionError, ExportError, ExtractionError, LlmError, PipelineError,
};
