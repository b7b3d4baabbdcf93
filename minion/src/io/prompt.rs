//! System prompt rendering.

use anyhow::Result;
use minijinja::{Environment, context};

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .expect("system template should be valid");
        Self { env }
    }

    /// System prompt: hydrated context, then the tool protocol and rules.
    pub fn render_system(&self, hydrated_context: &str, shell_timeout_secs: u64) -> Result<String> {
        let template = self.env.get_template("system")?;
        let rendered = template.render(context! {
            context => Some(hydrated_context.trim()).filter(|s| !s.is_empty()),
            shell_timeout_secs => shell_timeout_secs,
        })?;
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tool_call::extract_tool_calls;

    #[test]
    fn includes_context_before_tools() {
        let prompt = PromptEngine::new()
            .render_system("# Task\n\nFix the bug", 30)
            .expect("render");
        let context_at = prompt.find("# Task").expect("context");
        let tools_at = prompt.find("## Tools").expect("tools");
        assert!(context_at < tools_at);
        assert!(prompt.contains("(30s limit)"));
    }

    #[test]
    fn omits_empty_context_section() {
        let prompt = PromptEngine::new().render_system("  ", 30).expect("render");
        assert!(!prompt.contains("## Context"));
    }

    #[test]
    fn protocol_example_is_not_itself_a_tool_call() {
        let prompt = PromptEngine::new().render_system("ctx", 30).expect("render");
        assert!(prompt.contains("```minion_tool\n{\"name\": \"tool_name\", \"parameters\": {...}}\n```"));
        assert!(extract_tool_calls(&prompt).is_empty());
    }
}
