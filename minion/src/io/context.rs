//! Pre-run context hydration.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::io::config::AgentRulesConfig;

const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// Supplies the context block placed at the top of the system prompt.
pub trait ContextProvider: Send {
    fn hydrate(&self, task: &str, links: &[String], ticket_id: Option<&str>) -> Result<String>;
}

/// Collects agent rule files from the repository, then frames the task.
#[derive(Debug, Clone)]
pub struct RulesContextProvider {
    root: PathBuf,
    patterns: Vec<String>,
}

impl RulesContextProvider {
    pub fn new(root: impl Into<PathBuf>, config: &AgentRulesConfig) -> Self {
        Self {
            root: root.into(),
            patterns: config.paths.clone(),
        }
    }

    /// Rule files matching the configured patterns, deduplicated, in pattern order.
    pub fn rule_files(&self) -> Result<Vec<PathBuf>> {
        let escaped_root = glob::Pattern::escape(&self.root.to_string_lossy());
        let mut files: Vec<PathBuf> = Vec::new();
        for pattern in &self.patterns {
            let full = format!("{}/{}", escaped_root, pattern.trim_start_matches('/'));
            let mut matched: Vec<PathBuf> = glob::glob(&full)
                .with_context(|| format!("invalid rule pattern {pattern}"))?
                .filter_map(|entry| match entry {
                    Ok(path) => Some(path),
                    Err(err) => {
                        warn!(err = %err, "unreadable rule path");
                        None
                    }
                })
                .filter(|p| p.is_file())
                .collect();
            matched.sort();
            for path in matched {
                if !files.contains(&path) {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }

    fn rules_section(&self) -> Result<Option<String>> {
        let mut sections = Vec::new();
        for path in self.rule_files()? {
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(path = %path.display(), err = %err, "skipping unreadable rule file");
                    continue;
                }
            };
            let text = String::from_utf8_lossy(&bytes);
            sections.push(format!(
                "## Rules from {}\n\n{}",
                relative_display(&self.root, &path),
                text
            ));
        }
        debug!(rule_files = sections.len(), "collected agent rules");
        if sections.is_empty() {
            return Ok(None);
        }
        Ok(Some(format!(
            "# Agent Rules (applicable to this task)\n\n{}",
            sections.join(SECTION_SEPARATOR)
        )))
    }
}

impl ContextProvider for RulesContextProvider {
    fn hydrate(&self, task: &str, links: &[String], ticket_id: Option<&str>) -> Result<String> {
        let mut parts = Vec::new();
        if let Some(rules) = self.rules_section()? {
            parts.push(rules);
        }
        parts.push(format!("# Task\n\n{task}"));
        if !links.is_empty() {
            let list: Vec<String> = links.iter().map(|l| format!("- {l}")).collect();
            parts.push(format!(
                "# Provided links (for reference)\n\n{}",
                list.join("\n")
            ));
        }
        if let Some(ticket) = ticket_id.filter(|t| !t.trim().is_empty()) {
            parts.push(format!("# Ticket ID: {ticket}"));
        }
        Ok(parts.join(SECTION_SEPARATOR))
    }
}

fn relative_display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
