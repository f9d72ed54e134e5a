//! `taskloom init`: write the default configuration.

use std::path::Path;

use taskloom_config::AppConfig;

pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    if path.exists() {
        println!("  Config already exists at: {}", path.display());
        println!("  Edit it manually or delete it and re-run init.");
    } else {
        tokio::fs::write(&path, AppConfig::default_toml()).await?;
        println!("  Created {}", path.display());
    }

    let config = AppConfig::load_from(&path)?;
    let sessions = config.session_dir();
    tokio::fs::create_dir_all(&sessions).await?;
    println!("  Sessions are stored in {}", sessions.display());

    println!();
    println!("  Next steps:");
    println!("    1. Set TASKLOOM_API_KEY (or OPENAI_API_KEY), or add api_key to the config");
    println!("    2. Run: taskloom chat");
    println!();
    Ok(())
}
