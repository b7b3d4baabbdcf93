//! Shared types for a minion run.
//!
//! These types carry no I/O. They are the records the orchestrator appends to,
//! the shapes handed to the model backends, and the audit trail callers read
//! after a run.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Speaker of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One entry of the model's context window. Order is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Audit record of one executed tool call (or a synthetic step such as `create_pr`).
///
/// `result` is always text: failures are recorded as `"Error: ..."`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub tool: String,
    pub params: Map<String, Value>,
    pub result: String,
}

impl Action {
    pub fn new(tool: impl Into<String>, params: Map<String, Value>, result: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            params,
            result: result.into(),
        }
    }

    /// Record for a step the orchestrator performed itself (no model parameters).
    pub fn synthetic(tool: impl Into<String>, result: impl Into<String>) -> Self {
        Self::new(tool, Map::new(), result)
    }

    /// The `path` parameter, when present and non-empty.
    pub fn path(&self) -> Option<&str> {
        self.params
            .get("path")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// Outcome of one lint facade invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintResult {
    pub ok: bool,
    pub output: String,
}

/// Orchestrator state-machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Hydrating,
    AgentLoop,
    Git,
    PullRequest,
    Finished,
}

impl Phase {
    /// Human-readable name passed to `on_phase` observers.
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Hydrating => "context hydration",
            Phase::AgentLoop => "agent loop",
            Phase::Git => "git",
            Phase::PullRequest => "pull request",
            Phase::Finished => "finished",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_serializes_as_role_and_content() {
        let value = serde_json::to_value(Message::assistant("hi")).expect("serialize");
        assert_eq!(value, json!({"role": "assistant", "content": "hi"}));
    }

    #[test]
    fn action_path_ignores_blank_and_non_string_values() {
        let mut params = Map::new();
        params.insert("path".to_string(), json!("  "));
        assert_eq!(Action::new("edit_file", params, "Wrote").path(), None);

        let mut params = Map::new();
        params.insert("path".to_string(), json!(3));
        assert_eq!(Action::new("edit_file", params, "Wrote").path(), None);

        let mut params = Map::new();
        params.insert("path".to_string(), json!("src/lib.rs"));
        assert_eq!(
            Action::new("edit_file", params, "Wrote").path(),
            Some("src/lib.rs")
        );
    }
}
