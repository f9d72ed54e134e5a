//! Built-in tool implementations for Taskloom.
//!
//! Tools give the agent the ability to act in its working directory:
//! read files, write files, and run shell commands.

pub mod bash;
pub mod read;
pub mod write;

use serde_json::{Map, Value};
use taskloom_core::error::ToolError;
use taskloom_core::tool::ToolRegistry;

pub use bash::BashTool;
pub use read::ReadTool;
pub use write::WriteTool;

/// Create a registry with every built-in tool, in the order the model sees them.
pub fn default_registry() -> ToolRegistry {
    ToolRegistry::new()
        .with(Box::new(ReadTool::new()))
        .with(Box::new(WriteTool::new()))
        .with(Box::new(BashTool::new()))
}

/// A required string argument.
pub(crate) fn str_arg<'a>(arguments: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

/// The target path, accepted as either `file_path` or `path`.
pub(crate) fn path_arg(arguments: &Map<String, Value>) -> Result<&str, ToolError> {
    arguments
        .get("file_path")
        .or_else(|| arguments.get("path"))
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments("Missing 'file_path' argument".into()))
}

/// An optional non-negative integer argument.
pub(crate) fn optional_usize(arguments: &Map<String, Value>, key: &str) -> Result<Option<usize>, ToolError> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| ToolError::InvalidArguments(format!("'{key}' must be a non-negative integer"))),
    }
}
