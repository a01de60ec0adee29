//! Payload extraction from raw LLM text.
//!
//! - [`code`] pulls generated source code out of markdown-ish responses.
//! - [`json`] pulls the JSON value out of structured-output responses.

pub mod code;
pub mod json;

pub use code::{extract_code, CodeExtraction};
pub use json::{extract_json_payload, find_matching_delimiter};
