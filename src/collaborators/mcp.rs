//! JSON-RPC-over-stdio transport to a collaborator subprocess (architect,
//! contract engine, codebase intel, graph RAG). Each call spawns a fresh
//! child process, writes one JSON-RPC request line to stdin, reads one
//! response line from stdout, and tears the child down.
//!
//! Grounded on the subprocess-spawn-with-piped-stdio shape shared by the
//! teacher's process-runner code; the line-delimited JSON-RPC framing itself
//! has no teacher precedent and is new.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::error::CollaboratorError;

pub type McpError = CollaboratorError;

/// A single collaborator tool invocation: spawn `command`, send a JSON-RPC
/// `tools/call` request for `tool_name` with `params`, and parse the result.
pub struct McpClient {
    pub tool_name: String,
    pub command: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl McpClient {
    pub fn new(tool_name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            command: command.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Minimal child environment: PATH and an explicit allowlist only, no
    /// spreading of the parent's full environment (which may carry secrets).
    fn child_env(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        if let Ok(path) = std::env::var("PATH") {
            env.insert("PATH".to_string(), path);
        }
        env
    }

    pub async fn call<T: DeserializeOwned>(&self, params: Value) -> Result<T, CollaboratorError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {
                "name": self.tool_name,
                "arguments": params,
            }
        });
        let mut line = serde_json::to_string(&request)
            .map_err(|e| CollaboratorError::MalformedResponse {
                tool: self.tool_name.clone(),
                reason: e.to_string(),
            })?;
        line.push('\n');

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .env_clear()
            .envs(self.child_env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| CollaboratorError::SpawnFailed {
                tool: self.tool_name.clone(),
                source,
            })?;

        let mut stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let mut reader = BufReader::new(stdout).lines();

        let write_fut = stdin.write_all(line.as_bytes());
        let read_fut = reader.next_line();

        let response_line = tokio::select! {
            _ = tokio::time::sleep(self.timeout) => {
                let _ = child.start_kill();
                return Err(CollaboratorError::Timeout {
                    tool: self.tool_name.clone(),
                    seconds: self.timeout.as_secs(),
                });
            }
            result = async {
                write_fut.await.map_err(|source| CollaboratorError::SpawnFailed {
                    tool: self.tool_name.clone(),
                    source,
                })?;
                stdin.shutdown().await.ok();
                read_fut.await.map_err(|source| CollaboratorError::SpawnFailed {
                    tool: self.tool_name.clone(),
                    source,
                })
            } => result?,
        };

        let _ = child.kill().await;

        let line = response_line.ok_or_else(|| CollaboratorError::MalformedResponse {
            tool: self.tool_name.clone(),
            reason: "no output from collaborator".to_string(),
        })?;

        let envelope: Value =
            serde_json::from_str(&line).map_err(|e| CollaboratorError::MalformedResponse {
                tool: self.tool_name.clone(),
                reason: e.to_string(),
            })?;

        if let Some(error) = envelope.get("error") {
            return Err(CollaboratorError::ToolError {
                tool: self.tool_name.clone(),
                message: error.to_string(),
            });
        }

        let result = envelope.get("result").cloned().ok_or_else(|| {
            CollaboratorError::MalformedResponse {
                tool: self.tool_name.clone(),
                reason: "response missing 'result' field".to_string(),
            }
        })?;

        serde_json::from_value(result).map_err(|e| CollaboratorError::MalformedResponse {
            tool: self.tool_name.clone(),
            reason: e.to_string(),
        })
    }
}

</content>
