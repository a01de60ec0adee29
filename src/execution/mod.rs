//! Execution layer for generated code.
//!
//! - [`sandbox`]: runs one script in a child process with a timeout
//! - [`database`]: turns an artifact's schema and population scripts into a
//!   SQLite file and inspects the result
//!
//! ```ignore
//! use sql_forge::execution::{DatabaseBuilder, ScriptExecutor};
//!
//! let builder = DatabaseBuilder::new("output/db", ScriptExecutor::from_config(&config));
//! let realized = builder.create_and_populate(&artifact, 0).await?;
//! println!("{} rows", realized.total_rows());
//! ```

pub mod database;
pub mod sandbox;

pub use database::{connect, count_rows, database_file_name, DatabaseBuilder, RealizedDatabase};
pub use sandbox::{rewrite_database_urls, ScriptExecutor, ScriptOutput};
