//! Read tool: return a file's contents with line numbers.

use async_trait::async_trait;
use serde_json::{Map, Value};
use taskloom_core::error::ToolError;
use taskloom_core::tool::{Tool, ToolContext};
use tracing::debug;

use crate::{optional_usize, path_arg};

/// Lines returned when the caller gives no `limit`.
pub const DEFAULT_LINE_LIMIT: usize = 2000;

/// Reads UTF-8 text files relative to the session working directory.
#[derive(Debug, Default)]
pub struct ReadTool;

impl ReadTool {
    pub fn new() -> Self {
        Self
    }
}

/// Render `content` as numbered lines, starting at 1-based `offset`.
fn number_lines(content: &str, offset: usize, limit: usize) -> String {
    let start = offset.max(1);
    content
        .lines()
        .enumerate()
        .skip(start - 1)
        .take(limit)
        .map(|(idx, line)| format!("{:>6}\t{line}", idx + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Output is line-numbered; use offset and limit to page through large files."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file to read, absolute or relative to the working directory"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-based line to start reading from"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return"
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, arguments: Map<String, Value>, ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        let raw = path_arg(&arguments)?;
        let offset = optional_usize(&arguments, "offset")?.unwrap_or(1);
        let limit = optional_usize(&arguments, "limit")?.unwrap_or(DEFAULT_LINE_LIMIT);
        let path = ctx.resolve_path(raw);

        debug!(call_id = ctx.call_id, path = %path.display(), "Reading file");

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "read".into(),
                reason: format!("Failed to read {raw}: {e}"),
            })?;

        if content.is_empty() {
            return Ok(format!("{raw} is empty"));
        }
        Ok(number_lines(&content, offset, limit))
    }
}
