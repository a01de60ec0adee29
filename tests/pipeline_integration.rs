//! End-to-end pipeline runs against a scripted provider.
//!
//! Generated "code" is plain shell so the runs need no Python; queries run
//! against the SQLite files the pipeline creates.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use sql_forge::config::ForgeConfig;
use sql_forge::export::{read_dataset, DATASET_FILE_NAME};
use sql_forge::llm::{Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage};
use sql_forge::pipeline::{
    PipelineOrchestrator, PipelineState, CHECKPOINT_FILE_NAME, DATABASE_DIR_NAME,
};
use sql_forge::LlmError;

const QUESTIONS: &str = r#"{"questions": [
    {"question": "How many objects are in the schema?", "sql": "SELECT COUNT(*) FROM sqlite_master"},
    {"question": "List all customers", "sql": "SELECT * FROM customers"}
]}"#;

struct ScriptedProvider {
    populate_script: &'static str,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(populate_script: &'static str) -> Arc<Self> {
        Arc::new(Self {
            populate_script,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn response(content: &str) -> GenerationResponse {
    GenerationResponse {
        id: "scripted".to_string(),
        model: "scripted-model".to_string(),
        choices: vec![Choice {
            index: 0,
            message: Message::assistant(content),
            finish_reason: Some("stop".to_string()),
        }],
        usage: Usage::default(),
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = &request.messages[0].content;

        let content = if prompt.contains("distinct requests") {
            r#"{"descriptions": ["A bakery", "A bookshop"]}"#.to_string()
        } else if prompt.contains("ORM models for the following") {
            "```python\ntrue\n```".to_string()
        } else if prompt.contains("populates this database") {
            format!("```python\n{}\n```", self.populate_script)
        } else {
            QUESTIONS.to_string()
        };
        Ok(response(&content))
    }
}

fn config() -> ForgeConfig {
    ForgeConfig::default()
        .with_interpreter("sh")
        .with_request_delay(Duration::ZERO)
        .with_retry_backoff(Duration::ZERO)
        .with_script_timeout(Duration::from_secs(10))
}

#[tokio::test]
async fn test_fresh_run_writes_all_outputs() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new("true");
    let orchestrator = PipelineOrchestrator::new(config(), provider.clone(), dir.path());

    let summary = orchestrator.run(2).await.unwrap();

    assert!(!summary.resumed);
    assert_eq!(summary.databases_total, 2);
    assert_eq!(summary.databases_created.len(), 2);
    // descriptions + 3 stages per database
    assert_eq!(provider.calls(), 7);

    assert!(dir.path().join(CHECKPOINT_FILE_NAME).exists());
    let db_dir = dir.path().join(DATABASE_DIR_NAME);
    let mut db_files: Vec<String> = fs::read_dir(&db_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    db_files.sort();
    assert_eq!(db_files, vec!["database_0.db", "database_1.db"]);

    let records = read_dataset(&summary.dataset_path).unwrap();
    assert_eq!(records.len(), 4);
    assert_eq!(summary.total_queries, 4);
    assert_eq!(summary.valid_queries, 2);

    let first = &records[0];
    assert!(first.db_path.ends_with("database_0.db"));
    assert_eq!(first.query, "SELECT COUNT(*) FROM sqlite_master");
    assert!(first.is_valid);
    assert_eq!(first.answer, Some(serde_json::json!([[0]])));

    let missing = &records[1];
    assert!(!missing.is_valid);
    assert!(missing.error.as_deref().unwrap().contains("no such table"));

    assert!(records[2].db_path.ends_with("database_1.db"));
}

#[tokio::test]
async fn test_missing_output_dir_is_created() {
    let dir = TempDir::new().unwrap();
    let output_dir = dir.path().join("fresh").join("out");
    assert!(!output_dir.exists());

    let provider = ScriptedProvider::new("true");
    let summary = PipelineOrchestrator::new(config(), provider, &output_dir)
        .run(2)
        .await
        .unwrap();

    assert!(output_dir.is_dir());
    assert!(output_dir.join(CHECKPOINT_FILE_NAME).is_file());
    assert!(output_dir.join(DATASET_FILE_NAME).is_file());
    assert_eq!(summary.dataset_path, output_dir.join(DATASET_FILE_NAME));

    let db_dir = output_dir.join(DATABASE_DIR_NAME);
    assert_eq!(fs::read_dir(&db_dir).unwrap().count(), summary.databases_total);
    for i in 0..summary.databases_total {
        assert!(db_dir.join(format!("database_{}.db", i)).is_file());
    }
}

#[tokio::test]
async fn test_resume_makes_no_llm_calls() {
    let dir = TempDir::new().unwrap();

    let first = ScriptedProvider::new("true");
    PipelineOrchestrator::new(config(), first.clone(), dir.path())
        .run(2)
        .await
        .unwrap();
    let checkpoint = dir.path().join(CHECKPOINT_FILE_NAME);
    let saved = PipelineState::load(&checkpoint).unwrap().unwrap();

    let second = ScriptedProvider::new("true");
    let summary = PipelineOrchestrator::new(config(), second.clone(), dir.path())
        .run(2)
        .await
        .unwrap();

    assert!(summary.resumed);
    assert_eq!(second.calls(), 0);
    assert_eq!(PipelineState::load(&checkpoint).unwrap().unwrap(), saved);
    assert_eq!(summary.total_queries, 4);
    assert_eq!(summary.databases_created.len(), 2);
}

#[tokio::test]
async fn test_population_failure_invalidates_every_query() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new(
        "echo 'sqlite3.IntegrityError: UNIQUE constraint failed: customers.email' >&2; exit 1",
    );
    let orchestrator = PipelineOrchestrator::new(config(), provider, dir.path());

    let summary = orchestrator.run(2).await.unwrap();

    assert_eq!(summary.valid_queries, 0);
    assert!(summary.databases_created.is_empty());
    let records = read_dataset(&summary.dataset_path).unwrap();
    assert_eq!(records.len(), 4);
    for record in &records {
        assert!(!record.is_valid);
        assert!(record.answer.is_none());
        let error = record.error.as_deref().unwrap();
        assert!(error.starts_with("Database creation failed: Failed to populate database"));
        assert!(error.contains("IntegrityError"));
    }
}

#[tokio::test]
async fn test_records_pair_validity_with_error() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new("true");
    let summary = PipelineOrchestrator::new(config(), provider, dir.path())
        .run(2)
        .await
        .unwrap();

    for record in read_dataset(&summary.dataset_path).unwrap() {
        if record.is_valid {
            assert!(record.error.is_none());
            assert!(record.answer.is_some());
        } else {
            assert!(record.error.is_some());
            assert!(record.answer.is_none());
        }
    }
}
