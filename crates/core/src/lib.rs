//! # Taskloom Core
//!
//! Domain types, capability traits, and the extension bus for the Taskloom
//! agent engine. This crate has **no I/O**. It defines the content model and
//! the seams that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here. Implementations live in their
//! respective crates:
//! - [`ModelProvider`] → `taskloom-providers`
//! - [`Tool`] → `taskloom-tools`
//! - [`SessionStore`] → `taskloom-store`
//!
//! The agent loop in `taskloom-agent` depends only on these traits.

pub mod agent;
pub mod content;
pub mod error;
pub mod event;
pub mod extension;
pub mod message;
pub mod provider;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{LoopConfig, LoopState, RunResult, TerminalState};
pub use content::{ContentBlock, ContentDecodeError, ImageContent, ImageSource, ToolCallRequest, ToolCallResult};
pub use error::{Error, ExtensionError, ProviderError, Result, StoreError, ToolError};
pub use event::{Event, EventKind};
pub use extension::{
    Extension, ExtensionApi, ExtensionBus, ExtensionCommand, ExtensionContext, ExtensionHandler, Notifier,
    NotifyLevel, TracingNotifier, handler_fn,
};
pub use message::{Message, Role, Session, SessionId, Usage};
pub use provider::{Delta, DeltaStream, ModelProvider, ModelRequest, ToolDefinition};
pub use store::{SessionInfo, SessionStore};
pub use tool::{Tool, ToolContext, ToolRegistry};
