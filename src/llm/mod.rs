//! LLM integration for sql-forge.
//!
//! - [`litellm`]: OpenAI-compatible client and the [`LlmProvider`] trait
//! - [`stream`]: server-sent-event decoding for streamed completions
//! - [`structured`]: JSON-schema constrained generation
//! - [`throttle`]: shared concurrency and pacing limits
//! - [`retry`]: caller-side bounded retry
//!
//! ```ignore
//! use std::sync::Arc;
//! use sql_forge::config::ForgeConfig;
//! use sql_forge::llm::{GenerationRequest, LiteLlmClient, LlmProvider, ThrottledProvider};
//!
//! let config = ForgeConfig::from_env()?;
//! let client = Arc::new(LiteLlmClient::from_config(&config));
//! let provider = ThrottledProvider::from_config(client, &config);
//! let response = provider
//!     .generate(GenerationRequest::prompt(&config.model, "Name three SQL joins."))
//!     .await?;
//! ```

pub mod litellm;
pub mod retry;
pub mod stream;
pub mod structured;
pub mod throttle;

pub use litellm::{
    Choice, FragmentStream, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider,
    Message, Usage,
};
pub use retry::RetryPolicy;
pub use structured::{
    generate_structured, parse_structured, JsonSchemaSpec, ResponseFormat, StructuredOutput,
};
pub use throttle::ThrottledProvider;
