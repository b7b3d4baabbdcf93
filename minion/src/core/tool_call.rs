//! Tool-call protocol: fenced JSON blocks embedded in model prose.
//!
//! A block qualifies only if it is fenced as `minion_tool`, `json`, or untagged,
//! parses as a JSON object, and carries a string `name`. Everything else is
//! ignored, so explanatory code fences in a reply never become errors.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

pub const EDIT_FILE: &str = "edit_file";
pub const READ_FILE: &str = "read_file";
pub const RUN_SHELL: &str = "run_shell";
pub const DONE: &str = "done";

static TOOL_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(?:minion_tool|json)?\s*(\{[\s\S]*?\})\s*```")
        .expect("tool block regex should be valid")
});

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub params: Map<String, Value>,
}

/// Typed view of a [`ToolCall`]. Missing string parameters read as `""`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolRequest<'a> {
    EditFile { path: &'a str, content: &'a str },
    ReadFile { path: &'a str },
    RunShell { command: &'a str },
    Done { summary: &'a str },
    Unknown { name: &'a str },
}

impl ToolCall {
    /// Build a call from a parsed block. Parameters come from a nested
    /// `parameters` object when there is one, otherwise from the block itself.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(obj) = value else {
            return None;
        };
        let name = obj.get("name")?.as_str()?.to_string();
        let params = match obj.get("parameters") {
            Some(Value::Object(params)) => params.clone(),
            _ => obj,
        };
        Some(Self { name, params })
    }

    pub fn request(&self) -> ToolRequest<'_> {
        match self.name.as_str() {
            EDIT_FILE => ToolRequest::EditFile {
                path: self.str_param("path").trim(),
                content: self.str_param("content"),
            },
            READ_FILE => ToolRequest::ReadFile {
                path: self.str_param("path").trim(),
            },
            RUN_SHELL => ToolRequest::RunShell {
                command: self.str_param("command"),
            },
            DONE => ToolRequest::Done {
                summary: self.str_param("summary"),
            },
            other => ToolRequest::Unknown { name: other },
        }
    }

    /// Path targeted by an `edit_file` call, if any.
    pub fn edited_path(&self) -> Option<&str> {
        match self.request() {
            ToolRequest::EditFile { path, .. } if !path.is_empty() => Some(path),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.name == DONE
    }

    fn str_param(&self, key: &str) -> &str {
        self.params.get(key).and_then(Value::as_str).unwrap_or("")
    }
}

/// Extract every qualifying tool call from `response`, in order of appearance.
pub fn extract_tool_calls(response: &str) -> Vec<ToolCall> {
    TOOL_BLOCK_RE
        .captures_iter(response)
        .filter_map(|caps| {
            let block = caps.get(1)?.as_str();
            let value: Value = serde_json::from_str(block).ok()?;
            ToolCall::from_value(value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_minion_tool_block_with_nested_parameters() {
        let response = "I'll fix it.\n```minion_tool\n{\"name\": \"edit_file\", \"parameters\": {\"path\": \"src/app.py\", \"content\": \"def f():\\n    return {}\\n\"}}\n```\n";
        let calls = extract_tool_calls(response);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, EDIT_FILE);
        assert_eq!(
            calls[0].request(),
            ToolRequest::EditFile {
                path: "src/app.py",
                content: "def f():\n    return {}\n"
            }
        );
    }

    #[test]
    fn flat_block_uses_object_as_parameters() {
        let response = "```json\n{\"name\": \"run_shell\", \"command\": \"ls\"}\n```";
        let calls = extract_tool_calls(response);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].request(), ToolRequest::RunShell { command: "ls" });
    }

    #[test]
    fn untagged_fence_qualifies() {
        let response = "```\n{\"name\": \"done\", \"parameters\": {\"summary\": \"ok\"}}\n```";
        let calls = extract_tool_calls(response);
        assert_eq!(calls.len(), 1);
        assert!(calls[0].is_done());
        assert_eq!(calls[0].request(), ToolRequest::Done { summary: "ok" });
    }

    #[test]
    fn skips_malformed_and_nameless_blocks() {
        let response = concat!(
            "```json\n{not json}\n```\n",
            "```json\n{\"path\": \"a.txt\"}\n```\n",
            "```json\n{\"name\": 7}\n```\n",
            "```python\nprint('hi')\n```\n",
        );
        assert!(extract_tool_calls(response).is_empty());
    }

    #[test]
    fn keeps_order_of_multiple_blocks() {
        let response = concat!(
            "```minion_tool\n{\"name\": \"read_file\", \"parameters\": {\"path\": \"a\"}}\n```\n",
            "then\n",
            "```minion_tool\n{\"name\": \"edit_file\", \"parameters\": {\"path\": \"b\", \"content\": \"x\"}}\n```\n",
            "```minion_tool\n{\"name\": \"done\", \"parameters\": {\"summary\": \"s\"}}\n```\n",
        );
        let names: Vec<String> = extract_tool_calls(response)
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["read_file", "edit_file", "done"]);
    }

    #[test]
    fn unknown_names_are_still_calls() {
        let response = "```minion_tool\n{\"name\": \"deploy\", \"parameters\": {}}\n```";
        let calls = extract_tool_calls(response);
        assert_eq!(calls[0].request(), ToolRequest::Unknown { name: "deploy" });
    }

    #[test]
    fn edited_path_requires_non_empty_path() {
        let with_path = ToolCall::from_value(serde_json::json!({
            "name": "edit_file",
            "parameters": {"path": " src/a.py ", "content": ""}
        }))
        .expect("call");
        assert_eq!(with_path.edited_path(), Some("src/a.py"));

        let without = ToolCall::from_value(serde_json::json!({
            "name": "edit_file",
            "parameters": {"content": "x"}
        }))
        .expect("call");
        assert_eq!(without.edited_path(), None);
    }
}
