//! CLI definition for sql-forge.
//!
//! A single command: generate (or resume) a run in the output directory.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::config::ForgeConfig;
use crate::llm::LiteLlmClient;
use crate::pipeline::PipelineOrchestrator;

/// Default output directory for runs.
const DEFAULT_OUTPUT_DIR: &str = "output";

/// Text-to-SQL dataset generator.
#[derive(Parser, Debug)]
#[command(name = "sql-forge")]
#[command(about = "Generate a validated text-to-SQL dataset with an LLM")]
#[command(version)]
#[command(
    long_about = "sql-forge asks an LLM for company database designs, runs the generated schema and population scripts against SQLite, and validates generated question/SQL pairs against the result.\n\nAn existing <output-dir>/state.json is reused and no LLM call is made.\n\nExample usage:\n  sql-forge --num-databases 5 --output-dir ./output"
)]
pub struct Cli {
    /// Number of company databases to generate.
    #[arg(long, default_value_t = 2)]
    pub num_databases: usize,

    /// Directory receiving state.json, db/ and the dataset file.
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,
}

/// Parse CLI arguments without running.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse CLI arguments and run.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run with already-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = ForgeConfig::from_env().context("Invalid configuration")?;
    info!(
        model = %config.model,
        api_base = %config.api_base,
        num_databases = cli.num_databases,
        output_dir = %cli.output_dir.display(),
        "Starting sql-forge"
    );

    let client = Arc::new(LiteLlmClient::from_config(&config));
    let orchestrator = PipelineOrchestrator::new(config, client, &cli.output_dir);
    let summary = orchestrator
        .run(cli.num_databases)
        .await
        .context("Pipeline run failed")?;

    println!(
        "{} of {} queries valid ({:.1}%), {} database(s) created, dataset: {}",
        summary.valid_queries,
        summary.total_queries,
        summary.validity_rate() * 100.0,
        summary.databases_created.len(),
        summary.dataset_path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["sql-forge"]).unwrap();
        assert_eq!(cli.num_databases, 2);
        assert_eq!(cli.output_dir, PathBuf::from("output"));
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "sql-forge",
            "--num-databases",
            "7",
            "--output-dir",
            "/tmp/run",
        ])
        .unwrap();
        assert_eq!(cli.num_databases, 7);
        assert_eq!(cli.output_dir, PathBuf::from("/tmp/run"));
    }

    #[test]
    fn test_rejects_negative_count() {
        assert!(Cli::try_parse_from(["sql-forge", "--num-databases", "-1"]).is_err());
    }
}
