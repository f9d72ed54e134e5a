//! Model provider implementations for Taskloom.
//!
//! All providers implement the `taskloom_core::ModelProvider` trait.
//! [`build_from_config`] picks the right one from configuration.

pub mod openai_compat;
pub mod scripted;

use std::sync::Arc;
use std::time::Duration;

use taskloom_config::AppConfig;
use taskloom_core::error::ProviderError;
use taskloom_core::provider::ModelProvider;

pub use openai_compat::OpenAiCompatProvider;
pub use scripted::{ScriptedProvider, ScriptedTurn, tool_call};

/// Build the configured model provider.
///
/// The hosted OpenAI endpoint requires an API key; self-hosted endpoints
/// (Ollama, vLLM, llama.cpp) are accepted without one.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn ModelProvider>, ProviderError> {
    let hosted = config.api_url.contains("api.openai.com");
    let api_key = match (&config.api_key, hosted) {
        (Some(key), _) => key.clone(),
        (None, false) => String::new(),
        (None, true) => {
            return Err(ProviderError::NotConfigured(
                "no API key: set TASKLOOM_API_KEY or OPENAI_API_KEY, or api_key in config.toml".into(),
            ));
        }
    };

    let name = if hosted { "openai" } else { "openai_compat" };
    Ok(Arc::new(OpenAiCompatProvider::with_timeout(
        name,
        &config.api_url,
        api_key,
        Duration::from_secs(config.request_timeout_secs),
    )))
}
