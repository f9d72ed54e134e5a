//! `taskloom sessions`: inspect and remove stored sessions.

use std::path::Path;

use taskloom_core::message::SessionId;
use taskloom_core::store::SessionStore;

use super::runtime::{load_config, open_store};

pub async fn list(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config);
    let sessions = store.list().await?;

    if sessions.is_empty() {
        println!("  No sessions in {}", store.dir().display());
        return Ok(());
    }

    println!("  {:<38} {:>8}  {}", "SESSION", "MESSAGES", "UPDATED");
    for info in sessions {
        let updated = info
            .updated_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".into());
        println!("  {:<38} {:>8}  {updated}", info.session_id.as_str(), info.message_count);
    }
    Ok(())
}

pub async fn delete(config_path: Option<&Path>, id: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config);
    store.delete(&SessionId::from(id)).await?;
    println!("  Deleted session {id}");
    Ok(())
}
