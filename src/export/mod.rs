//! Export module for validated datasets.
//!
//! Provides Parquet dataset export and read-back.

pub mod parquet_writer;

pub use parquet_writer::{
    dataset_schema, read_dataset, results_to_record_batch, write_dataset, DATASET_FILE_NAME,
};
