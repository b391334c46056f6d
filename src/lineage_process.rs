//! Lineage analyzer backed by an external process.
//!
//! The command receives one JSON request on stdin:
//!
//! ```json
//! {"sql": "SELECT ...", "dialect": "duckdb", "schema": {"tables": [...]}}
//! ```
//!
//! and must print a lineage report on stdout:
//!
//! ```json
//! {"summary": {"hasErrors": false},
//!  "statements": [{"nodes": [{"type": "table", "label": "orders"}]}]}
//! ```
//!
//! A non-zero exit, unparseable output or a timeout is an analyzer error,
//! which makes the resolver fall back to lexical extraction.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use pondnote_core::lineage::{LineageAnalyzer, LineageError, LineageReport, SchemaHint};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    sql: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dialect: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a SchemaHint>,
}

/// Runs `program args...` once per analyzed SQL text.
#[derive(Debug, Clone)]
pub struct ProcessLineageAnalyzer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessLineageAnalyzer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        ProcessLineageAnalyzer {
            program: program.into(),
            args,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Parse a whitespace-separated command line (no quoting).
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, input: Vec<u8>) -> Result<Vec<u8>, LineageError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LineageError::analyzer(format!("cannot start {}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&input)
                .await
                .map_err(|e| LineageError::analyzer(format!("cannot write request: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| LineageError::analyzer(format!("analyzer did not finish: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LineageError::analyzer(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl LineageAnalyzer for ProcessLineageAnalyzer {
    async fn analyze(
        &self,
        sql: &str,
        schema: Option<&SchemaHint>,
        dialect: Option<&str>,
    ) -> Result<LineageReport, LineageError> {
        let request = AnalyzeRequest {
            sql,
            dialect,
            schema,
        };
        let input = serde_json::to_vec(&request)
            .map_err(|e| LineageError::analyzer(format!("cannot encode request: {}", e)))?;

        let stdout = tokio::time::timeout(self.timeout, self.run(input))
            .await
            .map_err(|_| LineageError::analyzer(format!("timed out after {:?}", self.timeout)))??;

        let report: LineageReport = serde_json::from_slice(&stdout)
            .map_err(|e| LineageError::analyzer(format!("invalid report: {}", e)))?;
        debug!(
            program = %self.program,
            statements = report.statements.len(),
            has_errors = report.summary.has_errors,
            "lineage report"
        );
        Ok(report)
    }
}

// ============================================================================
// Tests
// ============================================================================
