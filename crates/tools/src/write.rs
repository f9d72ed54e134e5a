//! Write tool: create or overwrite a file.

use async_trait::async_trait;
use serde_json::{Map, Value};
use taskloom_core::error::ToolError;
use taskloom_core::tool::{Tool, ToolContext};
use tracing::debug;

use crate::{path_arg, str_arg};

/// Writes text files, creating parent directories as needed.
#[derive(Debug, Default)]
pub struct WriteTool;

impl WriteTool {
    pub fn new() -> Self {
        Self
    }
}

fn failed(reason: String) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: "write".into(),
        reason,
    }
}

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file and any missing parent directories; overwrites existing files."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file to write, absolute or relative to the working directory"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                }
            },
            "required": ["file_path", "content"]
        })
    }

    async fn execute(&self, arguments: Map<String, Value>, ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        let raw = path_arg(&arguments)?;
        let content = str_arg(&arguments, "content")?;
        let path = ctx.resolve_path(raw);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| failed(format!("Failed to create directory: {e}")))?;
        }

        tokio::fs::write(&path, content)
            .await
            .map_err(|e| failed(format!("Failed to write {raw}: {e}")))?;

        debug!(call_id = ctx.call_id, path = %path.display(), bytes = content.len(), "File written");
        Ok(format!("Successfully wrote {} bytes to {raw}", content.len()))
    }
}
