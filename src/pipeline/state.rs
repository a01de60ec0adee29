//! Pipeline state and its JSON checkpoint.
//!
//! `PipelineState` accumulates everything the LLM stages produce. It is
//! written to `state.json` before any generated code runs, so an interrupted
//! run can resume execution and validation without new API calls.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::PipelineError;
use crate::llm::StructuredOutput;

/// A natural-language question and the SQL answering it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionSqlPair {
    pub question: String,
    pub sql: String,
}

impl QuestionSqlPair {
    pub fn new(question: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            sql: sql.into(),
        }
    }
}

/// Question stage output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionSqlPairs {
    pub questions: Vec<QuestionSqlPair>,
}

impl StructuredOutput for QuestionSqlPairs {
    const NAME: &'static str = "QuestionSqlPairs";

    fn json_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "questions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "question": {"type": "string"},
                            "sql": {"type": "string"}
                        },
                        "required": ["question", "sql"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["questions"],
            "additionalProperties": false
        })
    }

    fn validate(&self) -> Result<(), String> {
        if self.questions.is_empty() {
            return Err("no questions were generated".to_string());
        }
        if let Some(pos) = self.questions.iter().position(|p| p.sql.trim().is_empty()) {
            return Err(format!("question {} has an empty query", pos));
        }
        Ok(())
    }
}

/// Description stage output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyDatabaseDescriptions {
    pub descriptions: Vec<String>,
}

impl StructuredOutput for CompanyDatabaseDescriptions {
    const NAME: &'static str = "CompanyDatabaseDescriptions";

    fn json_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "descriptions": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["descriptions"],
            "additionalProperties": false
        })
    }

    fn validate(&self) -> Result<(), String> {
        if self.descriptions.iter().any(|d| d.trim().is_empty()) {
            return Err("descriptions must not be blank".to_string());
        }
        Ok(())
    }
}

/// Everything generated for one company database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseArtifact {
    /// Description the artifact was generated from.
    pub database_request: String,
    /// Schema source code.
    #[serde(default)]
    pub database_models: String,
    /// Population script source code.
    #[serde(default)]
    pub populate_database_script: String,
    #[serde(default)]
    pub question_sql_pairs: QuestionSqlPairs,
    /// Set when a generation stage failed; names the stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_error: Option<String>,
}

impl DatabaseArtifact {
    pub fn new(database_request: impl Into<String>) -> Self {
        Self {
            database_request: database_request.into(),
            ..Self::default()
        }
    }

    /// Marks the artifact as failed at `stage`, keeping what was produced so far.
    pub fn fail(mut self, stage: &str, error: impl std::fmt::Display) -> Self {
        self.generation_error = Some(format!("{} generation failed: {}", stage, error));
        self
    }

    /// All three sub-stages succeeded; only such artifacts are executed.
    pub fn is_complete(&self) -> bool {
        self.generation_error.is_none()
            && !self.database_models.trim().is_empty()
            && !self.populate_database_script.trim().is_empty()
    }

    pub fn pairs(&self) -> &[QuestionSqlPair] {
        &self.question_sql_pairs.questions
    }
}

/// Accumulated output of the generation stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    pub company_descriptions: Vec<String>,
    pub databases: Vec<DatabaseArtifact>,
    pub num_requests: usize,
}

impl PipelineState {
    pub fn new(num_requests: usize) -> Self {
        Self {
            num_requests,
            ..Self::default()
        }
    }

    /// Appends fan-in results in order.
    pub fn merge(&mut self, artifacts: impl IntoIterator<Item = DatabaseArtifact>) {
        self.databases.extend(artifacts);
    }

    pub fn complete_count(&self) -> usize {
        self.databases.iter().filter(|db| db.is_complete()).count()
    }

    /// Loads a checkpoint, or `None` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, PipelineError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path).map_err(|source| PipelineError::CheckpointRead {
            path: path.to_path_buf(),
            source,
        })?;
        let state = serde_json::from_str(&raw).map_err(|source| PipelineError::CheckpointFormat {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(state))
    }

    /// Writes the checkpoint as 4-space indented JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        self.serialize(&mut serializer)?;

        let mut file = fs::File::create(path)?;
        file.write_all(&buffer)?;
        file.flush()?;
        Ok(())
    }
}
