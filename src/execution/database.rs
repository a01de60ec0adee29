//! Realization of generated databases as SQLite files.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{ConnectOptions, Connection, Row, SqliteConnection};
use tracing::{info, warn};

use super::sandbox::{absolute_path, rewrite_database_urls, ScriptExecutor};
use crate::error::DatabaseError;
use crate::pipeline::DatabaseArtifact;

/// File name of the SQLite database for artifact `index`.
pub fn database_file_name(index: usize) -> String {
    format!("database_{}.db", index)
}

/// A database whose schema and population scripts both succeeded.
#[derive(Debug, Clone)]
pub struct RealizedDatabase {
    pub path: PathBuf,
    /// Rows per user table, in table-name order.
    pub table_rows: Vec<(String, i64)>,
}

impl RealizedDatabase {
    pub fn total_rows(&self) -> i64 {
        self.table_rows.iter().map(|(_, rows)| rows).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_rows() == 0
    }
}

/// Creates one SQLite file per artifact under a database directory.
pub struct DatabaseBuilder {
    db_dir: PathBuf,
    executor: ScriptExecutor,
}

impl DatabaseBuilder {
    pub fn new(db_dir: impl Into<PathBuf>, executor: ScriptExecutor) -> Self {
        Self {
            db_dir: db_dir.into(),
            executor,
        }
    }

    /// Absolute path of the database file for artifact `index`.
    pub fn database_path(&self, index: usize) -> Result<PathBuf, DatabaseError> {
        Ok(absolute_path(&self.db_dir.join(database_file_name(index)))?)
    }

    /// Runs the schema code and then the population script for `artifact`.
    ///
    /// A stale file from an earlier run is replaced. While the population
    /// script runs, the schema code is also available as a temporary file
    /// for scripts taking `--input`.
    pub async fn create_and_populate(
        &self,
        artifact: &DatabaseArtifact,
        index: usize,
    ) -> Result<RealizedDatabase, DatabaseError> {
        fs::create_dir_all(&self.db_dir)?;
        let db_path = self.database_path(index)?;
        if db_path.exists() {
            fs::remove_file(&db_path)?;
        }
        create_empty_database(&db_path).await?;

        info!(index, db = %db_path.display(), "Creating database schema");
        self.executor
            .run(&artifact.database_models, &db_path, None)
            .await
            .map_err(DatabaseError::Schema)?;

        let mut models_file = tempfile::Builder::new()
            .prefix("sql-forge-models-")
            .suffix(".py")
            .tempfile()?;
        models_file.write_all(rewrite_database_urls(&artifact.database_models, &db_path).as_bytes())?;
        models_file.flush()?;

        info!(index, "Populating database");
        self.executor
            .run(
                &artifact.populate_database_script,
                &db_path,
                Some(models_file.path()),
            )
            .await
            .map_err(DatabaseError::Populate)?;

        // inspection only informs the log; it never fails the database
        let table_rows = match count_rows(&db_path).await {
            Ok(table_rows) => table_rows,
            Err(e) => {
                warn!(index, db = %db_path.display(), error = %e, "Could not inspect populated database");
                Vec::new()
            }
        };
        let realized = RealizedDatabase {
            path: db_path,
            table_rows,
        };

        if realized.is_empty() {
            warn!(
                index,
                db = %realized.path.display(),
                tables = realized.table_rows.len(),
                "Database is empty after population"
            );
        } else {
            info!(
                index,
                tables = realized.table_rows.len(),
                rows = realized.total_rows(),
                "Database populated"
            );
        }
        Ok(realized)
    }
}

async fn open(path: &Path, create: bool) -> Result<SqliteConnection, DatabaseError> {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create)
        .journal_mode(SqliteJournalMode::Delete)
        .connect()
        .await
        .map_err(|source| DatabaseError::Open {
            path: path.to_path_buf(),
            source,
        })
}

/// Opens a read-write connection to an existing database file.
pub async fn connect(path: &Path) -> Result<SqliteConnection, DatabaseError> {
    open(path, false).await
}

async fn create_empty_database(path: &Path) -> Result<(), DatabaseError> {
    let conn = open(path, true).await?;
    conn.close().await?;
    Ok(())
}

/// Row count of every user table, ordered by table name.
pub async fn count_rows(path: &Path) -> Result<Vec<(String, i64)>, DatabaseError> {
    let mut conn = connect(path).await?;

    let tables: Vec<String> = sqlx::query(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(&mut conn)
    .await?
    .iter()
    .map(|row| row.get::<String, _>("name"))
    .collect();

    let mut counts = Vec::with_capacity(tables.len());
    for table in tables {
        let sql = format!("SELECT COUNT(*) FROM \"{}\"", table.replace('"', "\"\""));
        let rows: i64 = sqlx::query_scalar(&sql).fetch_one(&mut conn).await?;
        counts.push((table, rows));
    }

    conn.close().await?;
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutionError;
    use std::time::Duration;
    use tempfile::TempDir;

    fn builder(dir: &TempDir) -> DatabaseBuilder {
        DatabaseBuilder::new(
            dir.path().join("db"),
            ScriptExecutor::new("sh", Duration::from_secs(10)),
        )
    }

    fn artifact(schema: &str, populate: &str) -> DatabaseArtifact {
        DatabaseArtifact {
            database_request: "A shop".to_string(),
            database_models: schema.to_string(),
            populate_database_script: populate.to_string(),
            ..DatabaseArtifact::default()
        }
    }

    #[tokio::test]
    async fn test_creates_file_per_index() {
        let dir = TempDir::new().unwrap();
        let realized = builder(&dir)
            .create_and_populate(&artifact("true", "true"), 3)
            .await
            .unwrap();

        assert!(realized.path.is_absolute());
        assert!(realized.path.ends_with("db/database_3.db"));
        assert!(realized.path.exists());
        assert!(realized.is_empty());
        assert_eq!(fs::read_dir(dir.path().join("db")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_schema_failure_is_prefixed() {
        let dir = TempDir::new().unwrap();
        let err = builder(&dir)
            .create_and_populate(&artifact("echo boom >&2; exit 3", "true"), 0)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DatabaseError::Schema(ExecutionError::NonZeroExit { code: 3, .. })
        ));
        let message = err.to_string();
        assert!(message.starts_with("Failed to create schema: Script failed with return code 3"));
        assert!(message.contains("STDERR: boom"));
    }

    #[tokio::test]
    async fn test_population_failure_is_prefixed() {
        let dir = TempDir::new().unwrap();
        let err = builder(&dir)
            .create_and_populate(
                &artifact("true", "echo IntegrityError >&2; exit 1"),
                0,
            )
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.starts_with("Failed to populate database:"));
        assert!(message.contains("IntegrityError"));
    }

    #[tokio::test]
    async fn test_uninspectable_database_is_not_a_failure() {
        let dir = TempDir::new().unwrap();
        // exits 0 after overwriting the database with garbage
        let populate = "url='sqlite:///target.db'\n\
printf 'this is definitely not a sqlite database file, only plain text padding it out' > \"${url#sqlite:///}\"";

        let realized = builder(&dir)
            .create_and_populate(&artifact("true", populate), 0)
            .await
            .unwrap();

        assert!(realized.path.ends_with("db/database_0.db"));
        assert!(realized.table_rows.is_empty());
        assert!(fs::read_to_string(&realized.path)
            .unwrap()
            .starts_with("this is definitely not"));
    }

    #[tokio::test]
    async fn test_stale_database_is_replaced() {
        let dir = TempDir::new().unwrap();
        let db_dir = dir.path().join("db");
        fs::create_dir_all(&db_dir).unwrap();
        fs::write(db_dir.join("database_0.db"), b"not a sqlite file").unwrap();

        let realized = builder(&dir)
            .create_and_populate(&artifact("true", "true"), 0)
            .await
            .unwrap();
        assert!(realized.table_rows.is_empty());
    }

    #[tokio::test]
    async fn test_count_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shop.db");
        create_empty_database(&path).await.unwrap();

        let mut conn = connect(&path).await.unwrap();
        sqlx::query("CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT)")
            .execute(&mut conn)
            .await
            .unwrap();
        sqlx::query("CREATE TABLE orders (id INTEGER PRIMARY KEY)")
            .execute(&mut conn)
            .await
            .unwrap();
        sqlx::query("INSERT INTO customers (name) VALUES ('a'), ('b')")
            .execute(&mut conn)
            .await
            .unwrap();
        conn.close().await.unwrap();

        let counts = count_rows(&path).await.unwrap();
        assert_eq!(
            counts,
            vec![("customers".to_string(), 2), ("orders".to_string(), 0)]
        );
    }
}
