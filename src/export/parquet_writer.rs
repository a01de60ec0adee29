//! Parquet writer for the validated text-to-SQL dataset.
//!
//! One row per validation record. `answer` holds the JSON-encoded result
//! (rows as an array of arrays, or an affected-row count) and is null for
//! invalid queries.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray, BooleanBuilder, StringArray, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::error::ExportError;
use crate::validation::ValidationResult;

/// File name of the dataset inside the output directory.
pub const DATASET_FILE_NAME: &str = "validated_dataset.parquet";

/// Column layout of the dataset file.
pub fn dataset_schema() -> Schema {
    Schema::new(vec![
        Field::new("db_path", DataType::Utf8, false),
        Field::new("question", DataType::Utf8, false),
        Field::new("query", DataType::Utf8, false),
        Field::new("answer", DataType::Utf8, true),
        Field::new("is_valid", DataType::Boolean, false),
        Field::new("error", DataType::Utf8, true),
    ])
}

/// Convert validation records into an Arrow RecordBatch.
pub fn results_to_record_batch(results: &[ValidationResult]) -> Result<RecordBatch, ExportError> {
    let schema = Arc::new(dataset_schema());

    let mut db_path = StringBuilder::new();
    let mut question = StringBuilder::new();
    let mut query = StringBuilder::new();
    let mut answer = StringBuilder::new();
    let mut is_valid = BooleanBuilder::new();
    let mut error = StringBuilder::new();

    for result in results {
        db_path.append_value(&result.db_path);
        question.append_value(&result.question);
        query.append_value(&result.query);
        match &result.answer {
            Some(value) => answer.append_value(serde_json::to_string(value)?),
            None => answer.append_null(),
        }
        is_valid.append_value(result.is_valid);
        error.append_option(result.error.as_deref());
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(db_path.finish()),
        Arc::new(question.finish()),
        Arc::new(query.finish()),
        Arc::new(answer.finish()),
        Arc::new(is_valid.finish()),
        Arc::new(error.finish()),
    ];

    Ok(RecordBatch::try_new(schema, columns)?)
}

/// Write the dataset to a Parquet file, creating parent directories.
///
/// An empty result set still produces a file with the full schema.
pub fn write_dataset(results: &[ValidationResult], output_path: &Path) -> Result<(), ExportError> {
    let batch = results_to_record_batch(results)?;

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(output_path)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(Default::default()))
        .build();

    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    tracing::info!(
        path = %output_path.display(),
        rows = results.len(),
        "Dataset written"
    );

    Ok(())
}

/// Read a dataset file back into validation records.
pub fn read_dataset(input_path: &Path) -> Result<Vec<ValidationResult>, ExportError> {
    let file = File::open(input_path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut results = Vec::new();
    for batch in reader {
        let batch = batch?;
        let num_rows = batch.num_rows();

        let strings = |name: &str| -> Vec<Option<String>> {
            batch
                .column_by_name(name)
                .and_then(|col| col.as_any().downcast_ref::<StringArray>())
                .map(|arr| {
                    (0..num_rows)
                        .map(|i| (!arr.is_null(i)).then(|| arr.value(i).to_string()))
                        .collect()
                })
                .unwrap_or_else(|| vec![None; num_rows])
        };

        let db_paths = strings("db_path");
        let questions = strings("question");
        let queries = strings("query");
        let answers = strings("answer");
        let errors = strings("error");
        let validity: Vec<bool> = batch
            .column_by_name("is_valid")
            .and_then(|col| col.as_any().downcast_ref::<BooleanArray>())
            .map(|arr| {
                (0..num_rows)
                    .map(|i| !arr.is_null(i) && arr.value(i))
                    .collect()
            })
            .unwrap_or_else(|| vec![false; num_rows]);

        for i in 0..num_rows {
            let answer = match &answers[i] {
                Some(raw) => Some(serde_json::from_str(raw)?),
                None => None,
            };
            results.push(ValidationResult {
                db_path: db_paths[i].clone().unwrap_or_default(),
                question: questions[i].clone().unwrap_or_default(),
                query: queries[i].clone().unwrap_or_default(),
                answer,
                is_valid: validity[i],
                error: errors[i].clone(),
            });
        }
    }

    Ok(results)
}
