//! Session store implementations for Taskloom.
//!
//! All stores implement the `taskloom_core::SessionStore` trait.

pub mod in_memory;
pub mod jsonl;
pub mod noop;

pub use in_memory::InMemoryStore;
pub use jsonl::JsonlStore;
pub use noop::NoopStore;
