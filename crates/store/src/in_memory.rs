//! In-memory store: useful for testing and ephemeral sessions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use taskloom_core::error::StoreError;
use taskloom_core::message::{Message, SessionId};
use taskloom_core::store::{SessionInfo, SessionStore};
use tokio::sync::RwLock;

/// Sessions kept in a map. Nothing survives the process.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    sessions: Arc<RwLock<HashMap<SessionId, Vec<Message>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a session's messages, if it exists.
    pub async fn snapshot(&self, id: &SessionId) -> Option<Vec<Message>> {
        self.sessions.read().await.get(id).cloned()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn create(&self, id: &SessionId) -> Result<(), StoreError> {
        self.sessions.write().await.entry(id.clone()).or_default();
        Ok(())
    }

    async fn append(&self, id: &SessionId, message: &Message) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .entry(id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn load(&self, id: &SessionId) -> Result<Vec<Message>, StoreError> {
        self.snapshot(id)
            .await
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<SessionInfo>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut list: Vec<SessionInfo> = sessions
            .iter()
            .map(|(id, messages)| SessionInfo {
                session_id: id.clone(),
                message_count: messages.len(),
                updated_at: messages.last().map(|m| m.timestamp),
            })
            .collect();
        list.sort_by(|a, b| a.session_id.as_str().cmp(b.session_id.as_str()));
        Ok(list)
    }

    async fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        match self.sessions.write().await.remove(id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }
}
