//! Run configuration for the dataset pipeline.
//!
//! `ForgeConfig` is built once per run (normally from the environment) and
//! handed to each component at construction time.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Default OpenAI-compatible endpoint.
pub const DEFAULT_API_BASE: &str = "https://openrouter.ai/api/v1";

/// Default model for every generation stage.
pub const DEFAULT_MODEL: &str = "meta-llama/llama-3.3-70b-instruct";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// What to do with a database whose population script succeeded but left
/// every table empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyDatabasePolicy {
    /// Log a warning and validate the queries anyway.
    #[default]
    Validate,
    /// Log a warning and report every query of that database as invalid.
    Skip,
}

impl FromStr for EmptyDatabasePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "validate" => Ok(Self::Validate),
            "skip" => Ok(Self::Skip),
            other => Err(format!("expected 'validate' or 'skip', got '{}'", other)),
        }
    }
}

/// Configuration shared by the LLM client, the orchestrator and the executor.
#[derive(Debug, Clone)]
pub struct ForgeConfig {
    // LLM settings
    /// Base URL of the OpenAI-compatible API.
    pub api_base: String,
    /// Bearer token for the API.
    pub api_key: Option<String>,
    /// Model used for every stage.
    pub model: String,
    /// HTTP timeout for a single completion call.
    pub request_timeout: Duration,

    // Rate limiting
    /// Maximum number of completion calls in flight.
    pub max_concurrent_requests: usize,
    /// Minimum spacing between the starts of two completion calls.
    pub request_delay: Duration,

    // Retry policy for the schema stage
    /// Maximum attempts for schema generation.
    pub schema_max_attempts: u32,
    /// Fixed wait between attempts.
    pub retry_backoff: Duration,

    // Execution settings
    /// Interpreter used to run generated scripts.
    pub interpreter: String,
    /// Language tag expected on fenced code blocks.
    pub code_language: String,
    /// Wall-clock limit for one generated script.
    pub script_timeout: Duration,
    /// Handling of databases that end up with zero rows.
    pub empty_database_policy: EmptyDatabasePolicy,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(120),

            max_concurrent_requests: 3,
            request_delay: Duration::from_millis(500),

            schema_max_attempts: 4,
            retry_backoff: Duration::from_secs(15),

            interpreter: "python3".to_string(),
            code_language: "python".to_string(),
            script_timeout: Duration::from_secs(30),
            empty_database_policy: EmptyDatabasePolicy::Validate,
        }
    }
}

impl ForgeConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `OPENROUTER_API_KEY`: API key (required)
    /// - `OPENROUTER_API_URL`: API base URL (default: https://openrouter.ai/api/v1)
    /// - `FORGE_MODEL`: model identifier
    /// - `FORGE_MAX_CONCURRENT_REQUESTS`: in-flight LLM calls (default: 3)
    /// - `FORGE_REQUEST_DELAY_MS`: delay between LLM calls (default: 500)
    /// - `FORGE_SCHEMA_MAX_ATTEMPTS`: schema stage attempts (default: 4)
    /// - `FORGE_RETRY_BACKOFF_SECS`: wait between attempts (default: 15)
    /// - `FORGE_SCRIPT_TIMEOUT_SECS`: generated script timeout (default: 30)
    /// - `FORGE_PYTHON`: interpreter for generated scripts (default: python3)
    /// - `FORGE_EMPTY_DATABASE_POLICY`: `validate` or `skip` (default: validate)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.api_key = Some(
            env::var("OPENROUTER_API_KEY")
                .map_err(|_| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?,
        );

        if let Ok(base) = env::var("OPENROUTER_API_URL") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Ok(model) = env::var("FORGE_MODEL") {
            config.model = model;
        }
        if let Some(n) = parse_env::<usize>("FORGE_MAX_CONCURRENT_REQUESTS")? {
            config.max_concurrent_requests = n;
        }
        if let Some(ms) = parse_env::<u64>("FORGE_REQUEST_DELAY_MS")? {
            config.request_delay = Duration::from_millis(ms);
        }
        if let Some(n) = parse_env::<u32>("FORGE_SCHEMA_MAX_ATTEMPTS")? {
            config.schema_max_attempts = n;
        }
        if let Some(secs) = parse_env::<u64>("FORGE_RETRY_BACKOFF_SECS")? {
            config.retry_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>("FORGE_SCRIPT_TIMEOUT_SECS")? {
            config.script_timeout = Duration::from_secs(secs);
        }
        if let Ok(interpreter) = env::var("FORGE_PYTHON") {
            config.interpreter = interpreter;
        }
        if let Ok(raw) = env::var("FORGE_EMPTY_DATABASE_POLICY") {
            config.empty_database_policy =
                raw.parse().map_err(|message| ConfigError::InvalidValue {
                    key: "FORGE_EMPTY_DATABASE_POLICY".to_string(),
                    message,
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_requests must be greater than 0".to_string(),
            ));
        }
        if self.schema_max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "schema_max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.script_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "script_timeout must be greater than 0".to_string(),
            ));
        }
        if self.interpreter.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "interpreter must not be empty".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn with_script_timeout(mut self, timeout: Duration) -> Self {
        self.script_timeout = timeout;
        self
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_max_concurrent_requests(mut self, n: usize) -> Self {
        self.max_concurrent_requests = n;
        self
    }

    pub fn with_empty_database_policy(mut self, policy: EmptyDatabasePolicy) -> Self {
        self.empty_database_policy = policy;
        self
    }
}

fn parse_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ForgeConfig::default();
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.schema_max_attempts, 4);
        assert_eq!(config.script_timeout, Duration::from_secs(30));
        assert_eq!(config.empty_database_policy, EmptyDatabasePolicy::Validate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = ForgeConfig::default().with_max_concurrent_requests(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_interpreter() {
        let config = ForgeConfig::default().with_interpreter("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_database_policy_parsing() {
        assert_eq!(
            "skip".parse::<EmptyDatabasePolicy>(),
            Ok(EmptyDatabasePolicy::Skip)
        );
        assert_eq!(
            " Validate ".parse::<EmptyDatabasePolicy>(),
            Ok(EmptyDatabasePolicy::Validate)
        );
        assert!("drop".parse::<EmptyDatabasePolicy>().is_err());
    }

    #[test]
    fn test_builders() {
        let config = ForgeConfig::new()
            .with_model("openai/gpt-4o-mini")
            .with_interpreter("sh")
            .with_script_timeout(Duration::from_secs(5))
            .with_empty_database_policy(EmptyDatabasePolicy::Skip);
        assert_eq!(config.model, "openai/gpt-4o-mini");
        assert_eq!(config.interpreter, "sh");
        assert_eq!(config.script_timeout, Duration::from_secs(5));
        assert_eq!(config.empty_database_policy, EmptyDatabasePolicy::Skip);
    }
}
