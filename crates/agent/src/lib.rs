//! The agent engine for Taskloom.
//!
//! The loop follows a **call → dispatch → repeat** cycle:
//!
//! 1. **Receive** a prompt and append it to the session
//! 2. **Call the model** with the full history and the tool definitions,
//!    consuming its delta stream into one assistant message
//! 3. **If tool calls**: run them in order, append one result per call, loop
//! 4. **If text only**: the run is complete
//!
//! Runs also end on the turn limit, on cancellation, or on a model error.
//! Lifecycle events go to the extension bus at every step.

pub mod dispatcher;
pub mod loop_runner;
pub mod permission;
pub mod session;
pub mod stream_event;

#[cfg(test)]
mod test_helpers;

pub use dispatcher::{DispatchOutcome, ToolDispatcher};
pub use loop_runner::AgentLoop;
pub use permission::{PermissionRuleset, extract_pattern};
pub use session::AgentSession;
pub use stream_event::AgentStreamEvent;
