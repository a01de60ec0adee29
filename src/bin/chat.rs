//! Interactive terminal chat against the configured model.
//!
//! Reads one user turn per line from stdin and streams the reply to stdout.
//! An empty line or EOF ends the session.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use futures::{pin_mut, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sql_forge::chat::{ChatSession, DEFAULT_SYSTEM_PROMPT};
use sql_forge::config::ForgeConfig;
use sql_forge::llm::LiteLlmClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // logs go to stderr so they do not interleave with the reply
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let config = ForgeConfig::from_env().context("Invalid configuration")?;
    let client = Arc::new(LiteLlmClient::from_config(&config));
    let mut session = ChatSession::new(client, config.model.clone(), DEFAULT_SYSTEM_PROMPT);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            break;
        }

        let replies = session.send(line);
        pin_mut!(replies);
        let mut printed = 0;
        while let Some(reply) = replies.next().await {
            match reply {
                Ok(text) => {
                    print!("{}", &text[printed..]);
                    stdout.flush()?;
                    printed = text.len();
                }
                Err(e) => {
                    eprintln!("\nerror: {e}");
                    break;
                }
            }
        }
        println!();
    }

    Ok(())
}
