//! sql-forge CLI entry point.
//!
//! Loads `.env`, initializes logging and delegates to the CLI module.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = sql_forge::cli::parse_cli();

    // a missing .env is fine
    let _ = dotenvy::dotenv();

    // RUST_LOG overrides the default "info"
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    sql_forge::cli::run_with_cli(cli).await
}
