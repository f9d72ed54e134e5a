//! Bash tool: execute a shell command in the working directory.
//!
//! Commands run through `sh -c` (or `cmd /C` on Windows) with the session
//! working directory as their current directory. A non-zero exit status is a
//! tool failure whose reason carries the exit code and captured output.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use taskloom_core::error::ToolError;
use taskloom_core::tool::{Tool, ToolContext};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{optional_usize, str_arg};

/// Seconds a command may run when the caller gives no `timeout`.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Runs shell commands.
#[derive(Debug)]
pub struct BashTool {
    default_timeout: Duration,
}

impl BashTool {
    pub fn new() -> Self {
        Self {
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

impl Default for BashTool {
    fn default() -> Self {
        Self::new()
    }
}

fn failed(reason: String) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: "bash".into(),
        reason,
    }
}

fn shell_command(command: &str) -> Command {
    if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a bash command in the working directory and return its stdout/stderr. Use this for running programs, listing files, git operations, etc."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, arguments: Map<String, Value>, ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        let command = str_arg(&arguments, "command")?;
        let timeout = optional_usize(&arguments, "timeout")?
            .map(|secs| Duration::from_secs(secs as u64))
            .unwrap_or(self.default_timeout);

        debug!(call_id = ctx.call_id, command = %command, "Executing shell command");

        let mut cmd = shell_command(command);
        cmd.current_dir(ctx.working_dir).kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(failed(e.to_string())),
            Err(_) => {
                warn!(command = %command, timeout_secs = timeout.as_secs(), "Command timed out");
                return Err(failed(format!("Command timed out after {}s", timeout.as_secs())));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            let text = if stderr.is_empty() {
                stdout
            } else {
                format!("{stdout}\n[stderr]: {stderr}")
            };
            Ok(text.trim().to_string())
        } else {
            let code = output.status.code().unwrap_or(-1);
            warn!(command = %command, exit_code = code, "Command failed");
            let text = format!("[exit code: {code}]\n{stdout}\n{stderr}");
            Err(failed(text.trim().to_string()))
        }
    }
}
