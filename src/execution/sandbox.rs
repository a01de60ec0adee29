//! Child-process execution of generated scripts.
//!
//! Generated code is untrusted. It runs in its own process with a wall-clock
//! limit and captured output; there is no further isolation.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::{NoExpand, Regex};
use tokio::process::Command;

use crate::config::ForgeConfig;
use crate::error::ExecutionError;

/// Output of a script that exited with status 0.
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Runs generated code with an interpreter under a timeout.
#[derive(Debug, Clone)]
pub struct ScriptExecutor {
    interpreter: String,
    timeout: Duration,
}

fn sqlite_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"sqlite:///([^'")\s]+\.db)"#).expect("sqlite url pattern is valid")
    })
}

/// Points every `sqlite:///<file>.db` URL in `code` at `db_path`.
///
/// Only plain URLs are recognized; paths containing quotes, parentheses or
/// whitespace are left untouched.
pub fn rewrite_database_urls(code: &str, db_path: &Path) -> String {
    let replacement = format!("sqlite:///{}", db_path.display());
    sqlite_url_pattern()
        .replace_all(code, NoExpand(&replacement))
        .into_owned()
}

/// Scripts that parse `--input`/`--output` receive the schema and database paths.
fn expects_path_arguments(code: &str) -> bool {
    code.contains("argparse") && code.contains("--input")
}

pub(crate) fn absolute_path(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

impl ScriptExecutor {
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ForgeConfig) -> Self {
        Self::new(config.interpreter.clone(), config.script_timeout)
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `code` against the database at `db_path`.
    ///
    /// The code is written to a temporary `.py` file that is removed when
    /// this call returns, whatever the outcome. `models_path` is forwarded
    /// as `--input` to scripts that declare such an argument.
    pub async fn run(
        &self,
        code: &str,
        db_path: &Path,
        models_path: Option<&Path>,
    ) -> Result<ScriptOutput, ExecutionError> {
        let db_path = absolute_path(db_path)?;
        let code = rewrite_database_urls(code, &db_path);

        let mut script = tempfile::Builder::new()
            .prefix("sql-forge-")
            .suffix(".py")
            .tempfile()?;
        script.write_all(code.as_bytes())?;
        script.flush()?;

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(script.path());
        if let Some(models_path) = models_path {
            if expects_path_arguments(&code) {
                cmd.arg("--input")
                    .arg(absolute_path(models_path)?)
                    .arg("--output")
                    .arg(&db_path);
            }
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let child = cmd.spawn().map_err(|source| ExecutionError::Spawn {
            interpreter: self.interpreter.clone(),
            source,
        })?;

        tracing::debug!(
            interpreter = %self.interpreter,
            script = %script.path().display(),
            db = %db_path.display(),
            "Running generated script"
        );

        // dropping the wait future on timeout kills the child
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs(),
                    db = %db_path.display(),
                    "Generated script timed out"
                );
                return Err(ExecutionError::Timeout {
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        let duration = start.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            tracing::debug!(code, %stdout, %stderr, "Generated script failed");
            return Err(ExecutionError::NonZeroExit {
                code,
                stdout,
                stderr,
            });
        }

        tracing::debug!(
            duration_ms = duration.as_millis() as u64,
            %stdout,
            "Generated script finished"
        );
        Ok(ScriptOutput {
            stdout,
            stderr,
            duration,
        })
    }
}
