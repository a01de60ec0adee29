//! Error types for sql-forge operations.
//!
//! Defines error types for each stage of the dataset pipeline:
//! - LLM API interactions and structured output validation
//! - Response payload extraction
//! - Execution of generated scripts
//! - SQL validation against realized databases
//! - Dataset export and checkpoint persistence

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Response for '{schema}' does not match the requested schema: {message}")]
    SchemaValidation { schema: String, message: String },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Response contained no content")]
    EmptyResponse,
}

impl LlmError {
    /// Whether a caller-side retry may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RequestFailed(_) | LlmError::RateLimited(_) | LlmError::Stream(_) => true,
            LlmError::ApiError { code, .. } => *code >= 500,
            _ => false,
        }
    }
}

/// Errors that can occur while pulling a payload out of raw LLM text.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractionError {
    #[error("No JSON content found in response. Content starts with: '{content_preview}'")]
    JsonNotFound { content_preview: String },

    #[error("JSON appears truncated: {unclosed} unclosed delimiters")]
    JsonTruncated { unclosed: usize },
}

/// Errors that can occur while executing generated code.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Script execution timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Script failed with return code {code}{}", render_streams(.stderr, .stdout))]
    NonZeroExit {
        code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Failed to spawn '{interpreter}': {source}")]
    Spawn {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn render_streams(stderr: &str, stdout: &str) -> String {
    let mut rendered = String::new();
    if !stderr.is_empty() {
        rendered.push_str("\nSTDERR: ");
        rendered.push_str(stderr);
    }
    if !stdout.is_empty() {
        rendered.push_str("\nSTDOUT: ");
        rendered.push_str(stdout);
    }
    rendered
}

/// Errors raised while realizing or inspecting a database file.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to create schema: {0}")]
    Schema(#[source] ExecutionError),

    #[error("Failed to populate database: {0}")]
    Populate(#[source] ExecutionError),

    #[error("Failed to open database '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    #[error("Query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during dataset export.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by the pipeline orchestrator itself.
///
/// Per-database failures never appear here; they are folded into the
/// dataset as invalid records.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to generate company descriptions: {0}")]
    Descriptions(#[source] LlmError),

    #[error("Failed to read checkpoint '{path}': {source}")]
    CheckpointRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint '{path}' is malformed: {source}")]
    CheckpointFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_zero_exit_renders_both_streams() {
        let err = ExecutionError::NonZeroExit {
            code: 1,
            stdout: "partial".to_string(),
            stderr: "IntegrityError".to_string(),
        };
        let message = err.to_string();
        assert!(message.starts_with("Script failed with return code 1"));
        assert!(message.contains("STDERR: IntegrityError"));
        assert!(message.contains("STDOUT: partial"));
    }

    #[test]
    fn test_non_zero_exit_omits_empty_streams() {
        let err = ExecutionError::NonZeroExit {
            code: 2,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "Script failed with return code 2");
    }

    #[test]
    fn test_database_error_prefixes() {
        let err = DatabaseError::Populate(ExecutionError::Timeout { seconds: 30 });
        assert_eq!(
            err.to_string(),
            "Failed to populate database: Script execution timed out after 30 seconds"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(LlmError::RateLimited("slow down".into()).is_transient());
        assert!(LlmError::ApiError {
            code: 503,
            message: "unavailable".into()
        }
        .is_transient());
        assert!(!LlmError::ApiError {
            code: 400,
            message: "bad".into()
        }
        .is_transient());
        assert!(!LlmError::SchemaValidation {
            schema: "x".into(),
            message: "y".into()
        }
        .is_transient());
    }
}
