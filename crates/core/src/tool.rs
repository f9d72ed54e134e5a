//! Tool capability: the abstraction over agent actions.
//!
//! Tools are what give the agent the ability to act in the world:
//! read and write files, run shell commands, etc.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::ToolError;
use crate::message::Message;
use crate::provider::ToolDefinition;

/// What a tool can see while it runs.
#[derive(Debug, Clone, Copy)]
pub struct ToolContext<'a> {
    /// The call ID being answered
    pub call_id: &'a str,

    /// Session working directory
    pub working_dir: &'a Path,

    /// Read-only view of the session so far
    pub messages: &'a [Message],
}

impl<'a> ToolContext<'a> {
    pub fn new(call_id: &'a str, working_dir: &'a Path, messages: &'a [Message]) -> Self {
        Self {
            call_id,
            working_dir,
            messages,
        }
    }

    /// Resolve a possibly-relative path against the working directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.working_dir.join(p)
        }
    }
}

/// The core Tool trait.
///
/// Each tool (read, write, bash) implements this trait. Tools are registered
/// in the [`ToolRegistry`] before a run and stay fixed while it lasts.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "bash", "read").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: Map<String, Value>, ctx: &ToolContext<'_>) -> Result<String, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// An ordered registry of available tools.
///
/// Definitions go to the model in registration order, so the request a run
/// sends is stable across turns.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool. Replaces any existing tool with the same name in place.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        match self.tools.iter().position(|t| t.name() == tool.name()) {
            Some(idx) => self.tools[idx] = tool,
            None => self.tools.push(tool),
        }
    }

    /// Builder-style register.
    pub fn with(mut self, tool: Box<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    /// All tool definitions (for sending to the model).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
