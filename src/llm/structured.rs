//! Schema-constrained generation.
//!
//! Stages that need typed output (company descriptions, question/SQL pairs)
//! request a JSON-schema response format and then check the answer against
//! the target type. A response that does not deserialize, or that fails the
//! type's own [`StructuredOutput::validate`] check, is rejected with
//! [`LlmError::SchemaValidation`] so the caller's retry policy can kick in.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::litellm::{GenerationRequest, LlmProvider};
use crate::error::LlmError;
use crate::extraction::extract_json_payload;

/// `response_format` body of an OpenAI-compatible request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Any valid JSON object.
    JsonObject,
    /// JSON conforming to the attached schema.
    JsonSchema { json_schema: JsonSchemaSpec },
}

/// Named JSON schema, as carried in `response_format.json_schema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSchemaSpec {
    pub name: String,
    pub schema: Value,
    #[serde(default)]
    pub strict: bool,
}

impl ResponseFormat {
    /// Strict JSON-schema response format.
    pub fn json_schema(name: impl Into<String>, schema: Value) -> Self {
        Self::JsonSchema {
            json_schema: JsonSchemaSpec {
                name: name.into(),
                schema,
                strict: true,
            },
        }
    }
}

/// A type the LLM can be asked to produce directly.
pub trait StructuredOutput: DeserializeOwned + Send {
    /// Schema name sent to the API.
    const NAME: &'static str;

    /// JSON schema of the serialized form.
    fn json_schema() -> Value;

    /// Semantic checks serde cannot express (non-empty lists, blank fields).
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    fn response_format() -> ResponseFormat {
        ResponseFormat::json_schema(Self::NAME, Self::json_schema())
    }
}

/// Parses and validates raw completion text as `T`.
pub fn parse_structured<T: StructuredOutput>(content: &str) -> Result<T, LlmError> {
    let schema_error = |message: String| LlmError::SchemaValidation {
        schema: T::NAME.to_string(),
        message,
    };

    let payload = extract_json_payload(content).map_err(|e| schema_error(e.to_string()))?;
    let value: T = serde_json::from_str(&payload).map_err(|e| schema_error(e.to_string()))?;
    value.validate().map_err(schema_error)?;
    Ok(value)
}

/// Runs `request` with `T`'s response format and returns the typed answer.
pub async fn generate_structured<T: StructuredOutput>(
    provider: &dyn LlmProvider,
    request: GenerationRequest,
) -> Result<T, LlmError> {
    let request = request.with_response_format(T::response_format());
    let response = provider.generate(request).await?;
    let content = response.into_content()?;

    let parsed = parse_structured::<T>(&content);
    if let Err(ref e) = parsed {
        tracing::warn!(schema = T::NAME, error = %e, "Structured response rejected");
    }
    parsed
}
