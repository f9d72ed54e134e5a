//! Error types for the Taskloom domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant. Only provider and decode
//! failures ever cross the engine boundary; tool and extension errors are
//! contained where they happen.

use thiserror::Error;

use crate::content::ContentDecodeError;

/// The top-level error type for all Taskloom operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model provider errors (fatal to the current run) ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Session reconstruction ---
    #[error("Content decode error: {0}")]
    Decode(#[from] ContentDecodeError),

    // --- Persistence ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Tool errors (only surfaced outside the dispatcher) ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures talking to the language-model service.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures raised by a tool, or on the way to one.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool '{0}' not found")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Failures in a persistence sink.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupted entry in session {session_id} at line {line}: {source}")]
    Corrupted {
        session_id: String,
        line: usize,
        #[source]
        source: ContentDecodeError,
    },
}

/// A failure inside an extension handler or command. Never surfaced to the
/// caller of the engine; the bus logs it and moves on.
#[derive(Debug, Clone, Error)]
pub enum ExtensionError {
    #[error("Handler '{handler}' failed: {reason}")]
    HandlerFailed { handler: String, reason: String },

    #[error("Handler '{handler}' panicked: {message}")]
    Panicked { handler: String, message: String },

    #[error("Command '{0}' not found")]
    CommandNotFound(String),

    #[error("Command '{command}' failed: {reason}")]
    CommandFailed { command: String, reason: String },
}

impl ExtensionError {
    /// Shorthand for a handler returning a plain failure reason.
    pub fn failed(handler: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HandlerFailed {
            handler: handler.into(),
            reason: reason.into(),
        }
    }
}
