//! Persistence sink: where finalized messages go.
//!
//! The agent loop hands each message to the store as soon as it is appended
//! to the session. Appends are best-effort from the loop's point of view: a
//! failure is logged and the run carries on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::message::{Message, SessionId};

/// Summary of one stored session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: SessionId,

    /// Messages currently stored
    pub message_count: usize,

    /// Last modification, when the backend tracks it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// The core persistence trait.
///
/// Implementations: JSON-lines files, in-memory, no-op.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Human-readable backend name.
    fn name(&self) -> &str;

    /// Create an empty session. Creating one that exists is a no-op.
    async fn create(&self, id: &SessionId) -> Result<(), StoreError>;

    /// Append one finalized message.
    async fn append(&self, id: &SessionId, message: &Message) -> Result<(), StoreError>;

    /// Load every message in append order.
    ///
    /// Fails with [`StoreError::NotFound`] for an unknown session and with
    /// [`StoreError::Corrupted`] if any entry cannot be decoded.
    async fn load(&self, id: &SessionId) -> Result<Vec<Message>, StoreError>;

    /// List stored sessions.
    async fn list(&self) -> Result<Vec<SessionInfo>, StoreError>;

    /// Remove a session and its messages.
    async fn delete(&self, id: &SessionId) -> Result<(), StoreError>;

    /// Whether a session exists.
    async fn exists(&self, id: &SessionId) -> Result<bool, StoreError> {
        match self.load(id).await {
            Ok(_) | Err(StoreError::Corrupted { .. }) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
