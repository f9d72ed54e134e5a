//! Permission gate: rule-based allow/deny for tool calls.
//!
//! Rules are evaluated from last to first, so later rules override earlier
//! ones. When nothing matches the verdict is `ask`, which this engine treats
//! as `allow` (there is no interactive prompt inside a run).

use globset::{GlobBuilder, GlobMatcher};
use serde_json::{Map, Value};
use taskloom_config::{PermissionAction, PermissionRule, PermissionsConfig};
use taskloom_core::error::ToolError;
use tracing::{debug, warn};

/// A compiled wildcard. Falls back to exact comparison when the pattern
/// does not compile.
#[derive(Debug, Clone)]
enum Wildcard {
    Glob(GlobMatcher),
    Literal(String),
}

impl Wildcard {
    fn compile(pattern: &str) -> Self {
        match GlobBuilder::new(pattern).literal_separator(false).build() {
            Ok(glob) => Self::Glob(glob.compile_matcher()),
            Err(e) => {
                warn!(pattern, error = %e, "Invalid permission pattern, matching literally");
                Self::Literal(pattern.to_string())
            }
        }
    }

    fn is_match(&self, text: &str) -> bool {
        match self {
            Self::Glob(m) => m.is_match(text),
            Self::Literal(s) => s == text,
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: PermissionRule,
    tool: Wildcard,
    pattern: Wildcard,
}

/// Ordered permission rules, compiled for matching.
#[derive(Debug, Clone, Default)]
pub struct PermissionRuleset {
    rules: Vec<CompiledRule>,
}

impl PermissionRuleset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rules(rules: impl IntoIterator<Item = PermissionRule>) -> Self {
        let mut set = Self::new();
        for rule in rules {
            set.push(rule);
        }
        set
    }

    pub fn from_config(config: &PermissionsConfig) -> Self {
        Self::from_rules(config.rules.iter().cloned())
    }

    /// Append a rule. It takes priority over every rule added before it.
    pub fn push(&mut self, rule: PermissionRule) {
        self.rules.push(CompiledRule {
            tool: Wildcard::compile(&rule.tool),
            pattern: Wildcard::compile(&rule.pattern),
            rule,
        });
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, tool: &str, pattern: &str, action: PermissionAction) -> Self {
        self.push(PermissionRule::new(tool, pattern, action));
        self
    }

    /// Combine two rulesets; `other`'s rules win on conflict.
    pub fn merge(mut self, other: &PermissionRuleset) -> Self {
        self.rules.extend(other.rules.iter().cloned());
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn matching_rule(&self, tool: &str, pattern: &str) -> Option<&PermissionRule> {
        self.rules
            .iter()
            .rev()
            .find(|r| r.tool.is_match(tool) && r.pattern.is_match(pattern))
            .map(|r| &r.rule)
    }

    /// The action for `tool` applied to `pattern`.
    pub fn evaluate(&self, tool: &str, pattern: &str) -> PermissionAction {
        self.matching_rule(tool, pattern)
            .map(|r| r.action)
            .unwrap_or_default()
    }

    /// Gate one tool call. `Err` only on a deny verdict.
    pub fn check(&self, tool: &str, arguments: &Map<String, Value>) -> Result<(), ToolError> {
        let pattern = extract_pattern(tool, arguments);
        match self.matching_rule(tool, &pattern) {
            Some(rule) if rule.action == PermissionAction::Deny => {
                debug!(tool, pattern = %pattern, "Tool call denied");
                Err(ToolError::PermissionDenied {
                    tool_name: tool.to_string(),
                    reason: format!(
                        "pattern '{pattern}' denied by rule {} '{}' = {}",
                        rule.tool,
                        rule.pattern,
                        rule.action.as_str()
                    ),
                })
            }
            _ => Ok(()),
        }
    }

    /// Whether a tool is usable at all, for filtering definitions sent to the model.
    pub fn is_tool_allowed(&self, tool: &str) -> bool {
        self.evaluate(tool, "*") != PermissionAction::Deny
    }
}

/// The argument a rule's pattern is matched against.
pub fn extract_pattern(tool: &str, arguments: &Map<String, Value>) -> String {
    let field = |key: &str| arguments.get(key).and_then(Value::as_str);
    match tool {
        "read" | "write" | "edit" => field("file_path")
            .or_else(|| field("path"))
            .unwrap_or("*")
            .to_string(),
        "bash" => field("command")
            .and_then(|c| c.split_whitespace().next())
            .unwrap_or("*")
            .to_string(),
        "grep" | "glob" => field("pattern").unwrap_or("*").to_string(),
        _ => "*".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn default_is_ask() {
        let set = PermissionRuleset::new();
        assert_eq!(set.evaluate("bash", "ls"), PermissionAction::Ask);
        assert!(set.check("bash", &args(json!({"command": "rm -rf /"}))).is_ok());
    }

    #[test]
    fn later_rules_win() {
        let set = PermissionRuleset::new()
            .with("bash", "*", PermissionAction::Allow)
            .with("bash", "rm", PermissionAction::Deny);
        assert_eq!(set.evaluate("bash", "ls"), PermissionAction::Allow);
        assert_eq!(set.evaluate("bash", "rm"), PermissionAction::Deny);

        let reversed = PermissionRuleset::new()
            .with("bash", "rm", PermissionAction::Deny)
            .with("bash", "*", PermissionAction::Allow);
        assert_eq!(reversed.evaluate("bash", "rm"), PermissionAction::Allow);
    }

    #[test]
    fn wildcards_match_tool_and_pattern() {
        let set = PermissionRuleset::new()
            .with("*", "*", PermissionAction::Allow)
            .with("read", "*.env", PermissionAction::Deny)
            .with("writ?", "/etc/*", PermissionAction::Deny);
        assert_eq!(set.evaluate("read", "config/.env"), PermissionAction::Deny);
        assert_eq!(set.evaluate("read", "main.rs"), PermissionAction::Allow);
        assert_eq!(set.evaluate("write", "/etc/passwd"), PermissionAction::Deny);
        assert_eq!(set.evaluate("grep", "anything"), PermissionAction::Allow);
    }

    #[test]
    fn check_uses_extracted_pattern() {
        let set = PermissionRuleset::new().with("bash", "rm", PermissionAction::Deny);
        let err = set
            .check("bash", &args(json!({"command": "rm -rf build"})))
            .unwrap_err();
        match err {
            ToolError::PermissionDenied { tool_name, reason } => {
                assert_eq!(tool_name, "bash");
                assert!(reason.contains("'rm'"));
            }
            other => panic!("expected PermissionDenied, got {other:?}"),
        }
        assert!(set.check("bash", &args(json!({"command": "ls -la"}))).is_ok());
    }

    #[test]
    fn pattern_extraction_per_tool() {
        assert_eq!(extract_pattern("read", &args(json!({"file_path": "a.rs"}))), "a.rs");
        assert_eq!(extract_pattern("write", &args(json!({"path": "b.rs"}))), "b.rs");
        assert_eq!(extract_pattern("bash", &args(json!({"command": "git status"}))), "git");
        assert_eq!(extract_pattern("bash", &args(json!({"command": ""}))), "*");
        assert_eq!(extract_pattern("grep", &args(json!({"pattern": "TODO"}))), "TODO");
        assert_eq!(extract_pattern("custom", &args(json!({"x": 1}))), "*");
    }

    #[test]
    fn tool_filtering() {
        let set = PermissionRuleset::new()
            .with("bash", "*", PermissionAction::Deny)
            .with("read", "*.env", PermissionAction::Deny);
        assert!(!set.is_tool_allowed("bash"));
        assert!(set.is_tool_allowed("read"));
        assert!(set.is_tool_allowed("write"));
    }

    #[test]
    fn builds_from_both_config_shapes() {
        let action_keyed = taskloom_config::AppConfig::from_toml(
            "[permissions]\nallow = [\"read\"]\ndeny = [\"bash\"]\n",
        )
        .unwrap();
        let set = PermissionRuleset::from_config(&action_keyed.permissions);
        assert_eq!(set.len(), 2);
        assert!(!set.is_tool_allowed("bash"));
        assert_eq!(set.evaluate("read", "x"), PermissionAction::Allow);

        let tool_keyed = taskloom_config::AppConfig::from_toml(
            "[permissions]\n\"*\" = \"allow\"\nbash = { \"*\" = \"allow\", \"rm\" = \"deny\" }\n",
        )
        .unwrap();
        let set = PermissionRuleset::from_config(&tool_keyed.permissions);
        assert_eq!(set.evaluate("bash", "rm"), PermissionAction::Deny);
        assert_eq!(set.evaluate("bash", "ls"), PermissionAction::Allow);
        assert_eq!(set.evaluate("write", "x"), PermissionAction::Allow);
    }

    #[test]
    fn merge_appends_with_priority() {
        let base = PermissionRuleset::new().with("bash", "*", PermissionAction::Deny);
        let overrides = PermissionRuleset::new().with("bash", "ls", PermissionAction::Allow);
        let merged = base.merge(&overrides);
        assert_eq!(merged.evaluate("bash", "ls"), PermissionAction::Allow);
        assert_eq!(merged.evaluate("bash", "rm"), PermissionAction::Deny);
    }
}
