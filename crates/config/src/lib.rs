//! Configuration loading, validation, and management for Taskloom.
//!
//! Loads configuration from `~/.taskloom/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use taskloom_core::agent::{DEFAULT_MAX_TOOL_CALLS_PER_TURN, DEFAULT_MAX_TURNS};
use taskloom_core::provider::DEFAULT_MAX_TOKENS;
use taskloom_core::LoopConfig;

/// The root configuration structure.
///
/// Maps directly to `~/.taskloom/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,

    /// HTTP request timeout
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Agent loop limits and prompt
    #[serde(default)]
    pub agent: AgentSettings,

    /// Session persistence
    #[serde(default)]
    pub session: SessionSettings,

    /// Tool permission rules
    #[serde(default, skip_serializing_if = "PermissionsConfig::is_empty")]
    pub permissions: PermissionsConfig,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_timeout_secs() -> u64 {
    120
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("agent", &self.agent)
            .field("session", &self.session)
            .field("permissions", &self.permissions)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls_per_turn: usize,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_max_turns() -> u32 {
    DEFAULT_MAX_TURNS
}
fn default_max_tool_calls() -> usize {
    DEFAULT_MAX_TOOL_CALLS_PER_TURN
}
fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_tool_calls_per_turn: default_max_tool_calls(),
            max_tokens: default_max_tokens(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Where JSON-lines session files live (default: `~/.taskloom/sessions`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

// ── Permissions ──────────────────────────────────────────────────────────

/// What to do when a rule matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    Allow,
    Deny,
    #[default]
    Ask,
}

impl PermissionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Ask => "ask",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            "ask" => Some(Self::Ask),
            _ => None,
        }
    }
}

/// One permission rule. Both fields are shell-style wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRule {
    /// Tool name pattern (e.g., "bash", "*")
    pub tool: String,
    /// Argument pattern (e.g., "*.env", "rm")
    pub pattern: String,
    pub action: PermissionAction,
}

impl PermissionRule {
    pub fn new(tool: impl Into<String>, pattern: impl Into<String>, action: PermissionAction) -> Self {
        Self {
            tool: tool.into(),
            pattern: pattern.into(),
            action,
        }
    }
}

/// Ordered permission rules; later rules take priority.
///
/// Accepts two TOML shapes:
///
/// ```toml
/// # action-keyed
/// [permissions]
/// allow = ["read"]
/// deny = ["bash"]
///
/// # tool-keyed
/// [permissions]
/// "*" = "allow"
/// bash = { "*" = "allow", "rm" = "deny" }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionsConfig {
    pub rules: Vec<PermissionRule>,
}

impl PermissionsConfig {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn from_entries<E: de::Error>(entries: Vec<(String, PermissionEntry)>) -> Result<Self, E> {
        let action_keyed = entries.iter().any(|(k, _)| PermissionAction::parse(k).is_some());
        let mut rules = Vec::new();

        if action_keyed {
            for action in [PermissionAction::Allow, PermissionAction::Deny, PermissionAction::Ask] {
                let Some((_, entry)) = entries.iter().find(|(k, _)| k == action.as_str()) else {
                    continue;
                };
                match entry {
                    PermissionEntry::Single(tool) => rules.push(PermissionRule::new(tool, "*", action)),
                    PermissionEntry::List(tools) => {
                        rules.extend(tools.iter().map(|tool| PermissionRule::new(tool, "*", action)));
                    }
                    PermissionEntry::Patterns(_) => {
                        return Err(E::custom(format!(
                            "permissions.{} must be a tool name or a list of tool names",
                            action.as_str()
                        )));
                    }
                }
            }
        } else {
            for (tool, entry) in entries {
                match entry {
                    PermissionEntry::Single(action) => rules.push(PermissionRule::new(&tool, "*", parse_action(&action)?)),
                    PermissionEntry::Patterns(OrderedPairs(pairs)) => {
                        for (pattern, action) in pairs {
                            rules.push(PermissionRule::new(&tool, pattern, parse_action(&action)?));
                        }
                    }
                    PermissionEntry::List(_) => {
                        return Err(E::custom(format!(
                            "permissions.{tool} must be an action or a table of pattern = action"
                        )));
                    }
                }
            }
        }

        Ok(Self { rules })
    }
}

fn parse_action<E: de::Error>(s: &str) -> Result<PermissionAction, E> {
    PermissionAction::parse(s)
        .ok_or_else(|| E::custom(format!("unknown permission action '{s}' (expected allow, deny or ask)")))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PermissionEntry {
    Single(String),
    List(Vec<String>),
    Patterns(OrderedPairs),
}

/// A table read as key/value pairs in document order.
struct OrderedPairs(Vec<(String, String)>);

impl<'de> Deserialize<'de> for OrderedPairs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(PairsVisitor).map(OrderedPairs)
    }
}

struct PairsVisitor;

impl<'de> Visitor<'de> for PairsVisitor {
    type Value = Vec<(String, String)>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a table of string values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut pairs = Vec::new();
        while let Some((key, value)) = map.next_entry::<String, String>()? {
            pairs.push((key, value));
        }
        Ok(pairs)
    }
}

impl<'de> Deserialize<'de> for PermissionsConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = Vec<(String, PermissionEntry)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a permissions table")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some(entry) = map.next_entry::<String, PermissionEntry>()? {
                    entries.push(entry);
                }
                Ok(entries)
            }
        }

        let entries = deserializer.deserialize_map(EntriesVisitor)?;
        Self::from_entries(entries)
    }
}

impl Serialize for PermissionsConfig {
    /// Written back in tool-keyed form, grouped by tool in first-seen order.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tools: Vec<&str> = Vec::new();
        for rule in &self.rules {
            if !tools.contains(&rule.tool.as_str()) {
                tools.push(&rule.tool);
            }
        }

        let mut map = serializer.serialize_map(Some(tools.len()))?;
        for tool in tools {
            let patterns: Vec<(&str, &str)> = self
                .rules
                .iter()
                .filter(|r| r.tool == tool)
                .map(|r| (r.pattern.as_str(), r.action.as_str()))
                .collect();
            map.serialize_entry(tool, &PatternTable(&patterns))?;
        }
        map.end()
    }
}

struct PatternTable<'a>(&'a [(&'a str, &'a str)]);

impl Serialize for PatternTable<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (pattern, action) in self.0 {
            map.serialize_entry(pattern, action)?;
        }
        map.end()
    }
}

// ── Loading ──────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from the default path (~/.taskloom/config.toml).
    ///
    /// Environment variables then override file values:
    /// - `TASKLOOM_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `TASKLOOM_MODEL`
    /// - `TASKLOOM_BASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config = Self::from_toml(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::new(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using the given lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("TASKLOOM_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(model) = lookup("TASKLOOM_MODEL") {
            self.model = model;
        }
        if let Some(url) = lookup("TASKLOOM_BASE_URL") {
            self.api_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".taskloom")
    }

    /// Directory holding session files.
    pub fn session_dir(&self) -> PathBuf {
        self.session
            .directory
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("sessions"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_turns == 0 {
            return Err(ConfigError::ValidationError("agent.max_turns must be at least 1".into()));
        }
        if self.agent.max_tool_calls_per_turn == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_calls_per_turn must be at least 1".into(),
            ));
        }
        if self.agent.max_tokens == 0 {
            return Err(ConfigError::ValidationError("agent.max_tokens must be at least 1".into()));
        }
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "api_url must be an http(s) URL, got '{}'",
                self.api_url
            )));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("model must not be empty".into()));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Loop configuration for a run rooted at `working_dir`.
    pub fn loop_config(&self, working_dir: impl Into<PathBuf>) -> LoopConfig {
        let mut config = LoopConfig::new(&self.model, working_dir)
            .with_max_turns(self.agent.max_turns)
            .with_max_tool_calls_per_turn(self.agent.max_tool_calls_per_turn)
            .with_max_tokens(self.agent.max_tokens);
        config.system_prompt = self.agent.system_prompt.clone();
        config
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            request_timeout_secs: default_timeout_secs(),
            agent: AgentSettings::default(),
            session: SessionSettings::default(),
            permissions: PermissionsConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for taskloom_core::Error {
    fn from(e: ConfigError) -> Self {
        taskloom_core::Error::Config { message: e.to_string() }
    }
}
