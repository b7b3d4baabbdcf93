//! Tool-execution engine.
//!
//! Interprets [`ToolCall`]s extracted from model output and performs their
//! side effects inside the repository root. Every path returns a string; a
//! failure is reported as `"Error: ..."` and never raised.

mod files;
mod shell;

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, instrument};

use crate::core::tool_call::{ToolCall, ToolRequest};
use crate::io::config::AgentConfig;

pub use self::files::resolve_in_root;

/// Result prefix that marks a failed tool call.
pub const ERROR_PREFIX: &str = "Error: ";

/// Caps applied to tool side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolLimits {
    pub read_limit_chars: usize,
    pub shell_timeout: Duration,
    pub shell_output_limit_chars: usize,
}

impl From<&AgentConfig> for ToolLimits {
    fn from(config: &AgentConfig) -> Self {
        Self {
            read_limit_chars: config.read_limit_chars,
            shell_timeout: Duration::from_secs(config.shell_timeout_secs),
            shell_output_limit_chars: config.shell_output_limit_chars,
        }
    }
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct ToolEngine {
    root: PathBuf,
    limits: ToolLimits,
}

impl ToolEngine {
    pub fn new(root: impl Into<PathBuf>, limits: ToolLimits) -> Self {
        Self {
            root: root.into(),
            limits,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Execute one call and return its textual result.
    #[instrument(skip_all, fields(tool = %call.name))]
    pub fn execute(&self, call: &ToolCall) -> String {
        let result = match call.request() {
            ToolRequest::EditFile { path, .. } if path.is_empty() => required("path"),
            ToolRequest::EditFile { path, content } => files::edit_file(self, path, content),
            ToolRequest::ReadFile { path } if path.is_empty() => required("path"),
            ToolRequest::ReadFile { path } => files::read_file(self, path),
            ToolRequest::RunShell { command } if command.trim().is_empty() => required("command"),
            ToolRequest::RunShell { command } => shell::run_shell(self, command),
            ToolRequest::Done { summary } => format!("Done: {summary}"),
            ToolRequest::Unknown { name } => format!("Unknown tool: {name}"),
        };
        debug!(
            failed = result.starts_with(ERROR_PREFIX),
            chars = result.len(),
            "tool executed"
        );
        result
    }

    pub(crate) fn limits(&self) -> &ToolLimits {
        &self.limits
    }
}

fn required(param: &str) -> String {
    format!("{ERROR_PREFIX}{param} required")
}

fn error(err: &anyhow::Error) -> String {
    format!("{ERROR_PREFIX}{err:#}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(value: serde_json::Value) -> ToolCall {
        ToolCall::from_value(value).expect("tool call")
    }

    #[test]
    fn missing_required_params_are_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let engine = ToolEngine::new(temp.path(), ToolLimits::default());
        assert_eq!(
            engine.execute(&call(json!({"name": "edit_file", "parameters": {"content": "x"}}))),
            "Error: path required"
        );
        assert_eq!(
            engine.execute(&call(json!({"name": "read_file", "parameters": {"path": "  "}}))),
            "Error: path required"
        );
        assert_eq!(
            engine.execute(&call(json!({"name": "run_shell", "parameters": {}}))),
            "Error: command required"
        );
    }

    #[test]
    fn done_and_unknown_never_fail() {
        let temp = tempfile::tempdir().expect("tempdir");
        let engine = ToolEngine::new(temp.path(), ToolLimits::default());
        assert_eq!(
            engine.execute(&call(json!({"name": "done", "parameters": {"summary": "fixed it"}}))),
            "Done: fixed it"
        );
        assert_eq!(
            engine.execute(&call(json!({"name": "rm_rf", "parameters": {}}))),
            "Unknown tool: rm_rf"
        );
    }

    #[test]
    fn edit_then_read_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let engine = ToolEngine::new(temp.path(), ToolLimits::default());
        let content = "def greet():\n    return 'hi'\n";
        let wrote = engine.execute(&call(json!({
            "name": "edit_file",
            "parameters": {"path": "pkg/greet.py", "content": content}
        })));
        assert_eq!(wrote, "Wrote pkg/greet.py");
        let read = engine.execute(&call(json!({
            "name": "read_file",
            "parameters": {"path": "pkg/greet.py"}
        })));
        assert_eq!(read, content);
    }
}
