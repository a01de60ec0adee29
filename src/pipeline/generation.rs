//! LLM generation stages.
//!
//! One [`DatabaseGenerator`] is shared by every child pipeline. A child
//! runs schema → population script → questions for a single description and
//! always returns an artifact; stage failures are recorded on it.

use std::sync::Arc;

use tracing::{info, warn};

use super::state::{CompanyDatabaseDescriptions, DatabaseArtifact, QuestionSqlPairs};
use crate::config::ForgeConfig;
use crate::error::LlmError;
use crate::extraction::extract_code;
use crate::llm::{generate_structured, GenerationRequest, LlmProvider, RetryPolicy};
use crate::prompts::PromptStage;

/// Runs the generation stages against a (throttled) provider.
pub struct DatabaseGenerator {
    provider: Arc<dyn LlmProvider>,
    model: String,
    code_language: String,
    schema_retry: RetryPolicy,
}

impl DatabaseGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, config: &ForgeConfig) -> Self {
        Self {
            provider,
            model: config.model.clone(),
            code_language: config.code_language.clone(),
            schema_retry: RetryPolicy::from_config(config),
        }
    }

    fn request(&self, stage: &PromptStage) -> GenerationRequest {
        GenerationRequest::prompt(self.model.clone(), stage.render())
    }

    /// Asks for `num_requests` company database descriptions.
    ///
    /// Zero requests short-circuits without an API call. Extra descriptions
    /// are dropped; a short list is kept as is.
    pub async fn generate_descriptions(&self, num_requests: usize) -> Result<Vec<String>, LlmError> {
        if num_requests == 0 {
            return Ok(Vec::new());
        }

        let stage = PromptStage::DatabaseRequests { num_requests };
        let mut descriptions =
            generate_structured::<CompanyDatabaseDescriptions>(self.provider.as_ref(), self.request(&stage))
                .await?
                .descriptions;

        if descriptions.len() > num_requests {
            descriptions.truncate(num_requests);
        } else if descriptions.len() < num_requests {
            warn!(
                requested = num_requests,
                received = descriptions.len(),
                "Model returned fewer descriptions than requested"
            );
        }
        Ok(descriptions)
    }

    /// Child pipeline for one description.
    pub async fn generate_database(&self, database_request: String) -> DatabaseArtifact {
        let mut artifact = DatabaseArtifact::new(database_request);

        match self.generate_schema(&artifact.database_request).await {
            Ok(code) => artifact.database_models = code,
            Err(e) => return artifact.fail("schema", e),
        }

        match self.generate_population_script(&artifact.database_models).await {
            Ok(code) => artifact.populate_database_script = code,
            Err(e) => return artifact.fail("population script", e),
        }

        match self.generate_questions(&artifact.database_models).await {
            Ok(pairs) => artifact.question_sql_pairs = pairs,
            Err(e) => return artifact.fail("questions", e),
        }

        info!(
            questions = artifact.pairs().len(),
            "Database artifact generated"
        );
        artifact
    }

    /// Schema code, retried with the configured policy.
    pub async fn generate_schema(&self, database_request: &str) -> Result<String, LlmError> {
        let stage = PromptStage::SchemaCode {
            database_request: database_request.to_string(),
        };
        self.schema_retry
            .run(stage.name(), |_| self.generate_code(&stage))
            .await
    }

    pub async fn generate_population_script(&self, orm_code: &str) -> Result<String, LlmError> {
        let stage = PromptStage::PopulationScript {
            orm_code: orm_code.to_string(),
        };
        self.generate_code(&stage).await
    }

    pub async fn generate_questions(&self, orm_code: &str) -> Result<QuestionSqlPairs, LlmError> {
        let stage = PromptStage::Questions {
            orm_code: orm_code.to_string(),
        };
        generate_structured::<QuestionSqlPairs>(self.provider.as_ref(), self.request(&stage)).await
    }

    async fn generate_code(&self, stage: &PromptStage) -> Result<String, LlmError> {
        let content = self
            .provider
            .generate(self.request(stage))
            .await?
            .into_content()?;

        let extraction = extract_code(&content, &self.code_language);
        if !extraction.is_confident() {
            warn!(
                stage = stage.name(),
                strategy = extraction.strategy(),
                "Generated code was not fenced"
            );
        }

        let code = extraction.into_code();
        if code.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(code)
    }
}
