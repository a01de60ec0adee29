//! Validation of generated SQL against realized databases.

pub mod query_validator;

pub use query_validator::{
    execute_query, failure_records, is_row_returning, QueryValidator, ValidationResult,
};
