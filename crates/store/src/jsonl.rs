//! JSON-lines session store: one file per session.
//!
//! Each line of `<dir>/<session_id>.jsonl` is one message in its canonical
//! encoded form, appended as the engine finalizes it. Files are plain text,
//! portable, and human-inspectable.
//!
//! Storage location: `~/.taskloom/sessions/` by default.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskloom_core::error::StoreError;
use taskloom_core::message::{Message, SessionId};
use taskloom_core::store::{SessionInfo, SessionStore};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

const EXTENSION: &str = "jsonl";

/// A directory of JSON-lines session files.
pub struct JsonlStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "JSONL session store opened");
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing a session.
    pub fn session_path(&self, id: &SessionId) -> Result<PathBuf, StoreError> {
        let raw = id.as_str();
        let valid = !raw.is_empty()
            && raw != "."
            && raw != ".."
            && !raw.contains(['/', '\\'])
            && !raw.starts_with('.');
        if !valid {
            return Err(StoreError::Storage(format!("invalid session id '{raw}'")));
        }
        Ok(self.dir.join(format!("{raw}.{EXTENSION}")))
    }

    async fn ensure_dir(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to create session directory: {e}")))
    }
}

/// Decode every non-blank line, failing on the first corrupted one.
fn decode_lines(id: &SessionId, content: &str) -> Result<Vec<Message>, StoreError> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            Message::from_json_str(line).map_err(|source| StoreError::Corrupted {
                session_id: id.to_string(),
                line: idx + 1,
                source,
            })
        })
        .collect()
}

#[async_trait]
impl SessionStore for JsonlStore {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn create(&self, id: &SessionId) -> Result<(), StoreError> {
        let path = self.session_path(id)?;
        let _guard = self.write_lock.lock().await;
        self.ensure_dir().await?;
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to create session file: {e}")))?;
        debug!(session_id = %id, path = %path.display(), "Session created");
        Ok(())
    }

    async fn append(&self, id: &SessionId, message: &Message) -> Result<(), StoreError> {
        let path = self.session_path(id)?;
        let mut line = message.to_json_string();
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        self.ensure_dir().await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open session file: {e}")))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to append message: {e}")))?;
        file.flush()
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to flush session file: {e}")))?;
        Ok(())
    }

    async fn load(&self, id: &SessionId) -> Result<Vec<Message>, StoreError> {
        let path = self.session_path(id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Err(e) => return Err(StoreError::Storage(format!("Failed to read session file: {e}"))),
        };
        let messages = decode_lines(id, &content)?;
        debug!(session_id = %id, count = messages.len(), "Session loaded");
        Ok(messages)
    }

    async fn list(&self) -> Result<Vec<SessionInfo>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Storage(format!("Failed to list sessions: {e}"))),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to list sessions: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let content = tokio::fs::read_to_string(&path).await.unwrap_or_default();
            let message_count = content.lines().filter(|l| !l.trim().is_empty()).count();
            let updated_at = entry
                .metadata()
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from);

            sessions.push(SessionInfo {
                session_id: SessionId::from(stem),
                message_count,
                updated_at,
            });
        }

        sessions.sort_by(|a, b| a.session_id.as_str().cmp(b.session_id.as_str()));
        Ok(sessions)
    }

    async fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        let path = self.session_path(id)?;
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(session_id = %id, "Session deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(id.to_string())),
            Err(e) => Err(StoreError::Storage(format!("Failed to delete session file: {e}"))),
        }
    }
}
