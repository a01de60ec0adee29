//! Pipeline orchestrator.
//!
//! Drives a run end to end:
//!
//! ```text
//! descriptions → fan-out (schema → population script → questions) → fan-in
//!     → state.json → realize databases → validate queries → parquet
//! ```
//!
//! An existing checkpoint short-circuits every LLM stage.

use std::any::Any;
use std::fs;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::generation::DatabaseGenerator;
use super::state::{DatabaseArtifact, PipelineState};
use crate::config::{EmptyDatabasePolicy, ForgeConfig};
use crate::error::PipelineError;
use crate::execution::{DatabaseBuilder, ScriptExecutor};
use crate::export::{write_dataset, DATASET_FILE_NAME};
use crate::llm::{LlmProvider, ThrottledProvider};
use crate::validation::{failure_records, QueryValidator, ValidationResult};

/// File name of the checkpoint inside the output directory.
pub const CHECKPOINT_FILE_NAME: &str = "state.json";

/// Name of the database directory inside the output directory.
pub const DATABASE_DIR_NAME: &str = "db";

/// Outcome of a full run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Generation was skipped because a checkpoint existed.
    pub resumed: bool,
    /// Artifacts in the state, complete or not.
    pub databases_total: usize,
    /// Database files whose scripts both succeeded.
    pub databases_created: Vec<PathBuf>,
    pub total_queries: usize,
    pub valid_queries: usize,
    pub checkpoint_path: PathBuf,
    pub dataset_path: PathBuf,
}

impl RunSummary {
    /// Share of valid records, 0.0 when there are none.
    pub fn validity_rate(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.valid_queries as f64 / self.total_queries as f64
        }
    }

    fn log(&self) {
        info!(
            total_queries = self.total_queries,
            valid_queries = self.valid_queries,
            validity_rate = %format!("{:.1}%", self.validity_rate() * 100.0),
            dataset = %self.dataset_path.display(),
            "Validation summary"
        );
        info!(
            created = self.databases_created.len(),
            total = self.databases_total,
            "Databases created"
        );
        for path in &self.databases_created {
            info!(db = %path.display(), "Database available");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("task panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("task panicked: {}", message)
    } else {
        "task panicked".to_string()
    }
}

/// Coordinates generation, realization, validation and export.
pub struct PipelineOrchestrator {
    config: ForgeConfig,
    output_dir: PathBuf,
    generator: Arc<DatabaseGenerator>,
    builder: DatabaseBuilder,
    validator: QueryValidator,
}

impl PipelineOrchestrator {
    /// Creates an orchestrator writing under `output_dir`.
    ///
    /// `provider` is wrapped in a [`ThrottledProvider`] shared by every
    /// child pipeline.
    pub fn new(
        config: ForgeConfig,
        provider: Arc<dyn LlmProvider>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        let output_dir = output_dir.into();
        let throttled: Arc<dyn LlmProvider> =
            Arc::new(ThrottledProvider::from_config(provider, &config));
        let generator = Arc::new(DatabaseGenerator::new(throttled, &config));
        let builder = DatabaseBuilder::new(
            output_dir.join(DATABASE_DIR_NAME),
            ScriptExecutor::from_config(&config),
        );

        Self {
            config,
            output_dir,
            generator,
            builder,
            validator: QueryValidator::new(),
        }
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.output_dir.join(CHECKPOINT_FILE_NAME)
    }

    pub fn dataset_path(&self) -> PathBuf {
        self.output_dir.join(DATASET_FILE_NAME)
    }

    /// Runs every LLM stage and returns the merged state.
    ///
    /// Fails only when the descriptions themselves cannot be generated;
    /// child failures are recorded on their artifacts.
    pub async fn generate_state(&self, num_requests: usize) -> Result<PipelineState, PipelineError> {
        info!(num_requests, "Generating company database descriptions");
        let descriptions = self
            .generator
            .generate_descriptions(num_requests)
            .await
            .map_err(PipelineError::Descriptions)?;

        let mut state = PipelineState::new(num_requests);
        state.company_descriptions = descriptions.clone();

        info!(children = descriptions.len(), "Generating databases");
        let artifacts = self.generate_databases(descriptions).await;
        state.merge(artifacts);

        info!(
            databases = state.databases.len(),
            complete = state.complete_count(),
            "Generation finished"
        );
        Ok(state)
    }

    /// Fan-out/fan-in over the descriptions, preserving input order.
    async fn generate_databases(&self, descriptions: Vec<String>) -> Vec<DatabaseArtifact> {
        let mut tasks = JoinSet::new();
        for (index, description) in descriptions.iter().cloned().enumerate() {
            let generator = Arc::clone(&self.generator);
            tasks.spawn(async move {
                let outcome = AssertUnwindSafe(generator.generate_database(description.clone()))
                    .catch_unwind()
                    .await;
                let artifact = match outcome {
                    Ok(artifact) => artifact,
                    Err(payload) => {
                        DatabaseArtifact::new(description).fail("database", panic_message(&*payload))
                    }
                };
                (index, artifact)
            });
        }

        let mut slots: Vec<Option<DatabaseArtifact>> = vec![None; descriptions.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, artifact)) => {
                    match &artifact.generation_error {
                        Some(reason) => error!(index, error = %reason, "Database generation failed"),
                        None => info!(index, "Database generated"),
                    }
                    slots[index] = Some(artifact);
                }
                Err(e) => error!(error = %e, "Generation task did not complete"),
            }
        }

        slots
            .into_iter()
            .zip(descriptions)
            .map(|(slot, description)| {
                slot.unwrap_or_else(|| {
                    DatabaseArtifact::new(description).fail("database", "task did not complete")
                })
            })
            .collect()
    }

    /// Loads the checkpoint if present, otherwise generates and saves it.
    ///
    /// The boolean is `true` when the state came from the checkpoint.
    pub async fn load_or_generate(
        &self,
        num_requests: usize,
    ) -> Result<(PipelineState, bool), PipelineError> {
        let path = self.checkpoint_path();
        if let Some(state) = PipelineState::load(&path)? {
            info!(
                path = %path.display(),
                databases = state.databases.len(),
                "Resuming from checkpoint; skipping generation"
            );
            if state.num_requests != num_requests {
                warn!(
                    checkpoint = state.num_requests,
                    requested = num_requests,
                    "Checkpoint was generated for a different number of databases"
                );
            }
            return Ok((state, true));
        }

        let state = self.generate_state(num_requests).await?;
        state.save(&path)?;
        info!(path = %path.display(), "Checkpoint written");
        Ok((state, false))
    }

    /// Realizes every complete artifact and validates its queries.
    ///
    /// Returns the records in artifact order and the created database files.
    pub async fn realize_and_validate(
        &self,
        state: &PipelineState,
    ) -> (Vec<ValidationResult>, Vec<PathBuf>) {
        let mut results = Vec::new();
        let mut created = Vec::new();

        for (index, artifact) in state.databases.iter().enumerate() {
            if let Some(reason) = &artifact.generation_error {
                warn!(index, error = %reason, "Skipping execution of incomplete artifact");
                results.extend(failure_records("", artifact.pairs(), reason));
                continue;
            }
            if !artifact.is_complete() {
                warn!(index, "Skipping artifact without schema or population script");
                results.extend(failure_records(
                    "",
                    artifact.pairs(),
                    "Artifact is missing its schema or population script",
                ));
                continue;
            }

            let realized = match self.builder.create_and_populate(artifact, index).await {
                Ok(realized) => realized,
                Err(e) => {
                    error!(index, error = %e, "Database creation failed");
                    let db_path = self
                        .builder
                        .database_path(index)
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    results.extend(failure_records(
                        &db_path,
                        artifact.pairs(),
                        &format!("Database creation failed: {}", e),
                    ));
                    continue;
                }
            };

            created.push(realized.path.clone());
            if realized.is_empty() && self.config.empty_database_policy == EmptyDatabasePolicy::Skip {
                results.extend(failure_records(
                    &realized.path.display().to_string(),
                    artifact.pairs(),
                    "Database is empty after population",
                ));
                continue;
            }

            let records = self
                .validator
                .validate_queries(&realized.path, artifact.pairs())
                .await;
            info!(
                index,
                queries = records.len(),
                valid = records.iter().filter(|r| r.is_valid).count(),
                "Queries validated"
            );
            results.extend(records);
        }

        (results, created)
    }

    /// Full run: checkpoint or generation, execution, validation, export.
    pub async fn run(&self, num_requests: usize) -> Result<RunSummary, PipelineError> {
        fs::create_dir_all(&self.output_dir)?;

        let (state, resumed) = self.load_or_generate(num_requests).await?;
        let (results, databases_created) = self.realize_and_validate(&state).await;

        let dataset_path = self.dataset_path();
        write_dataset(&results, &dataset_path)?;

        let summary = RunSummary {
            resumed,
            databases_total: state.databases.len(),
            databases_created,
            total_queries: results.len(),
            valid_queries: results.iter().filter(|r| r.is_valid).count(),
            checkpoint_path: self.checkpoint_path(),
            dataset_path,
        };
        summary.log();
        Ok(summary)
    }
}
