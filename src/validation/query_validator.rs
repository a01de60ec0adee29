//! Execution of generated SQL against realized databases.
//!
//! Each query runs on one direct connection per database. Row-returning
//! statements yield their rows as a JSON array of arrays; other statements
//! yield the number of affected rows. Any failure is recorded on the result
//! rather than raised.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Connection, Row, SqliteConnection, TypeInfo, ValueRef};
use tracing::{debug, warn};

use crate::execution::connect;
use crate::pipeline::QuestionSqlPair;

/// Outcome of running one generated query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Database the query ran against.
    pub db_path: String,
    pub question: String,
    pub query: String,
    /// Rows or affected-row count; `None` whenever the query is invalid.
    pub answer: Option<Value>,
    pub is_valid: bool,
    /// Failure reason; `None` whenever the query is valid.
    pub error: Option<String>,
}

impl ValidationResult {
    /// A query that ran successfully.
    pub fn pass(db_path: impl Into<String>, pair: &QuestionSqlPair, answer: Value) -> Self {
        Self {
            db_path: db_path.into(),
            question: pair.question.clone(),
            query: pair.sql.clone(),
            answer: Some(answer),
            is_valid: true,
            error: None,
        }
    }

    /// A query that failed or could not be attempted.
    pub fn fail(
        db_path: impl Into<String>,
        question: impl Into<String>,
        query: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            db_path: db_path.into(),
            question: question.into(),
            query: query.into(),
            answer: None,
            is_valid: false,
            error: Some(error.into()),
        }
    }
}

/// Marks every pair as invalid with `error`.
///
/// With no pairs at all, a single record with an empty question and query
/// carries the error so the failure still shows up in the dataset.
pub fn failure_records(db_path: &str, pairs: &[QuestionSqlPair], error: &str) -> Vec<ValidationResult> {
    if pairs.is_empty() {
        return vec![ValidationResult::fail(db_path, "", "", error)];
    }
    pairs
        .iter()
        .map(|pair| ValidationResult::fail(db_path, &pair.question, &pair.sql, error))
        .collect()
}

/// Whether `sql` produces a result set.
pub fn is_row_returning(sql: &str) -> bool {
    let keyword: String = skip_leading_comments(sql)
        .trim_start_matches(|c: char| c == '(' || c.is_whitespace())
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();
    matches!(
        keyword.as_str(),
        "SELECT" | "WITH" | "VALUES" | "PRAGMA" | "EXPLAIN"
    )
}

fn skip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.find('\n').map_or("", |i| &after[i + 1..]).trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.find("*/").map_or("", |i| &after[i + 2..]).trim_start();
        } else {
            return rest;
        }
    }
}

fn column_value(row: &SqliteRow, index: usize) -> Value {
    let type_name = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return Value::Null,
    };

    let decoded = match type_name.as_str() {
        "INTEGER" => row.try_get::<i64, _>(index).map(Value::from),
        "REAL" => row.try_get::<f64, _>(index).map(|v| json!(v)),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(index)
            .map(|bytes| Value::String(BASE64.encode(bytes))),
        _ => row.try_get::<String, _>(index).map(Value::String),
    };
    decoded.unwrap_or(Value::Null)
}

fn row_to_json(row: &SqliteRow) -> Value {
    Value::Array(
        (0..row.columns().len())
            .map(|index| column_value(row, index))
            .collect(),
    )
}

/// Runs one statement and converts its outcome to JSON.
pub async fn execute_query(conn: &mut SqliteConnection, sql: &str) -> Result<Value, sqlx::Error> {
    if is_row_returning(sql) {
        let rows = sqlx::query(sql).fetch_all(&mut *conn).await?;
        Ok(Value::Array(rows.iter().map(row_to_json).collect()))
    } else {
        let done = sqlx::query(sql).execute(&mut *conn).await?;
        Ok(Value::from(done.rows_affected()))
    }
}

/// Validates question/SQL pairs against realized databases.
#[derive(Debug, Clone, Default)]
pub struct QueryValidator;

impl QueryValidator {
    pub fn new() -> Self {
        Self
    }

    /// Runs every pair against `db_path`; exactly one record per pair.
    pub async fn validate_queries(
        &self,
        db_path: &Path,
        pairs: &[QuestionSqlPair],
    ) -> Vec<ValidationResult> {
        let db = db_path.display().to_string();
        if pairs.is_empty() {
            return Vec::new();
        }

        let mut conn = match connect(db_path).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(db = %db, error = %e, "Cannot open database for validation");
                return failure_records(&db, pairs, &e.to_string());
            }
        };

        let mut results = Vec::with_capacity(pairs.len());
        for pair in pairs {
            match execute_query(&mut conn, &pair.sql).await {
                Ok(answer) => results.push(ValidationResult::pass(&db, pair, answer)),
                Err(e) => {
                    debug!(db = %db, query = %pair.sql, error = %e, "Query failed");
                    results.push(ValidationResult::fail(
                        &db,
                        &pair.question,
                        &pair.sql,
                        e.to_string(),
                    ));
                }
            }
        }

        if let Err(e) = conn.close().await {
            warn!(db = %db, error = %e, "Failed to close validation connection");
        }

        let valid = results.iter().filter(|r| r.is_valid).count();
        debug!(db = %db, total = results.len(), valid, "Queries validated");
        results
    }
}
