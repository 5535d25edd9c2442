//! Text-generation collaborators
//!
//! An analyzer takes a file and returns raw model text. The repair loop
//! only awaits it; retries, model fallback, and prompting live behind
//! the implementation.

use crate::util::run_command_with_timeout;
use anyhow::Context;
use std::future::Future;
use std::pin::Pin;
use std::process::Command;
use std::time::Duration;

pub trait Analyzer: Send + Sync {
    fn analyze<'a>(
        &'a self,
        path: &'a str,
        content: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;
}

/// Runs an external command per analysis.
///
/// The file content goes to stdin, the path to `PATCHWRIGHT_FILE`, and the
/// command's stdout is the model text.
#[derive(Debug, Clone)]
pub struct CommandAnalyzer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandAnalyzer {
    pub fn new(command: &[String], timeout: Duration) -> anyhow::Result<Self> {
        let (program, args) = command
            .split_first()
            .context("analyzer command is empty")?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }

    fn run(&self, path: &str, content: &str) -> anyhow::Result<String> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).env("PATCHWRIGHT_FILE", path);

        let result = run_command_with_timeout(&mut command, Some(content), self.timeout)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Failed to run analyzer '{}'", self.program))?;

        if result.timed_out {
            anyhow::bail!(
                "Analyzer '{}' timed out after {}s",
                self.program,
                self.timeout.as_secs()
            );
        }
        if !result.status.is_some_and(|s| s.success()) {
            anyhow::bail!(
                "Analyzer '{}' failed: {}",
                self.program,
                crate::util::truncate(result.stderr.trim(), 400)
            );
        }
        Ok(result.stdout)
    }
}

impl Analyzer for CommandAnalyzer {
    fn analyze<'a>(
        &'a self,
        path: &'a str,
        content: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        let this = self.clone();
        let path = path.to_string();
        let content = content.to_string();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || this.run(&path, &content))
                .await
                .context("analyzer task panicked")?
        })
    }
}
