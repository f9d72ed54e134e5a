//! No-op store: disables session persistence entirely.

use async_trait::async_trait;
use taskloom_core::error::StoreError;
use taskloom_core::message::{Message, SessionId};
use taskloom_core::store::{SessionInfo, SessionStore};

/// A store that keeps nothing. Every load reports the session missing.
pub struct NoopStore;

#[async_trait]
impl SessionStore for NoopStore {
    fn name(&self) -> &str {
        "none"
    }

    async fn create(&self, _id: &SessionId) -> Result<(), StoreError> {
        Ok(())
    }

    async fn append(&self, _id: &SessionId, _message: &Message) -> Result<(), StoreError> {
        Ok(())
    }

    async fn load(&self, id: &SessionId) -> Result<Vec<Message>, StoreError> {
        Err(StoreError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<SessionInfo>, StoreError> {
        Ok(Vec::new())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        Err(StoreError::NotFound(id.to_string()))
    }
}
