//! Step executors.
//!
//! The engine never performs step work itself. An executor receives a
//! [`StepRequest`] and answers with a [`StepReport`].

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use folio_config::ExecutorConfig;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::decision::StepReport;

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;

/// Everything an executor needs to perform one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepRequest {
    pub run_id: String,
    pub workflow_type: String,
    pub owner_id: String,
    pub step: String,
    pub command: String,
    pub preconditions: Vec<String>,
    pub postconditions: Vec<String>,
    /// 1 for the first try, incremented on each retry.
    pub attempt: u32,
    /// Item of a fan-out step this request covers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    /// Agent routed to rework a rejected attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    pub prior_results: BTreeMap<String, Value>,
    pub data: Map<String, Value>,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Failed to start step command: {0}")]
    Spawn(String),

    #[error("Step command timed out after {0} seconds")]
    Timeout(u64),

    #[error("Failed to encode step request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Performs a step out of process.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, request: &StepRequest) -> Result<StepReport, ExecutorError>;
}

/// Runs a step's command through a shell.
///
/// The request is written to the command's stdin as JSON and the run
/// identity is exported as `FOLIO_*` variables, with `FOLIO_ITEM` and
/// `FOLIO_HANDLER` set when the request carries them. The last stdout line that
/// parses as a [`StepReport`] is the answer; a non-zero exit or output with
/// no report becomes a failed report.
pub struct ShellStepExecutor {
    config: ExecutorConfig,
}

impl ShellStepExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }
}

impl Default for ShellStepExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

#[async_trait]
impl StepExecutor for ShellStepExecutor {
    async fn execute(&self, request: &StepRequest) -> Result<StepReport, ExecutorError> {
        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c")
            .arg(&request.command)
            .env("FOLIO_RUN_ID", &request.run_id)
            .env("FOLIO_STEP", &request.step)
            .env("FOLIO_OWNER_ID", &request.owner_id)
            .env("FOLIO_ATTEMPT", request.attempt.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(item) = &request.item {
            cmd.env("FOLIO_ITEM", item);
        }
        if let Some(handler) = &request.handler {
            cmd.env("FOLIO_HANDLER", handler);
        }

        if let Some(dir) = self.config.resolved_working_dir() {
            cmd.current_dir(dir);
        }

        debug!(
            "Executing step {} of run {}: {}",
            request.step, request.run_id, request.command
        );

        let payload = serde_json::to_vec(request)?;
        let mut child = cmd
            .spawn()
            .map_err(|e| ExecutorError::Spawn(e.to_string()))?;

        // The request is fed from its own task so a command that never reads
        // stdin, or fills stdout first, cannot stall the timed wait.
        let writer = child.stdin.take().map(|mut stdin| {
            let step = request.step.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&payload).await {
                    debug!("Step {} did not read its request: {}", step, e);
                }
            })
        });

        let secs = self.config.timeout_secs;
        let waited = timeout(Duration::from_secs(secs), child.wait_with_output()).await;
        if let Some(writer) = writer {
            writer.abort();
        }
        let output = waited.map_err(|_| ExecutorError::Timeout(secs))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            warn!(
                "Step {} of run {} exited with code {}",
                request.step, request.run_id, code
            );
            let mut message = format!("Command failed with exit code {}", code);
            if !stderr.trim().is_empty() {
                message.push_str(": ");
                message.push_str(stderr.trim());
            }
            return Ok(StepReport::failed(message));
        }

        Ok(parse_report(&stdout).unwrap_or_else(|| {
            StepReport::failed(format!(
                "Step {} produced no step report on stdout",
                request.step
            ))
        }))
    }
}

/// Last stdout line that is a JSON step report, or the whole output.
fn parse_report(stdout: &str) -> Option<StepReport> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str(line).ok())
        .or_else(|| serde_json::from_str(stdout.trim()).ok())
}
