//! Minion configuration (TOML).
//!
//! Looked up per repository, then per user, falling back to defaults. Every
//! section is optional and missing fields take their default value.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Repository-local config path, relative to the repo root.
pub const REPO_CONFIG_PATH: &str = ".minions/config.toml";
/// Alternate repository-local config file.
pub const REPO_CONFIG_ALT_PATH: &str = "minions.toml";
/// Per-user config path, relative to the home directory.
pub const USER_CONFIG_PATH: &str = ".minions/config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MinionConfig {
    pub llm: LlmConfig,
    pub git: GitConfig,
    pub agent: AgentConfig,
    pub lint: LintConfig,
    pub agent_rules: AgentRulesConfig,
    pub github: GithubConfig,
}

/// Hosted model backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    pub model: String,
    /// `""` in the file disables the fallback; omitting the key keeps the default.
    #[serde(with = "empty_as_none")]
    pub fallback_provider: Option<ProviderKind>,
    #[serde(with = "empty_as_none")]
    pub fallback_model: Option<String>,
    pub anthropic_base_url: String,
    pub openai_base_url: String,
    /// Environment variable holding the Anthropic API key.
    pub anthropic_api_key_env: String,
    /// Environment variable holding the OpenAI API key.
    pub openai_api_key_env: String,
    /// HTTP timeout for one model request.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Anthropic,
            model: "claude-sonnet-4-20250514".to_string(),
            fallback_provider: Some(ProviderKind::OpenAi),
            fallback_model: Some("gpt-4o".to_string()),
            anthropic_base_url: "https://api.anthropic.com".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            anthropic_api_key_env: "ANTHROPIC_API_KEY".to_string(),
            openai_api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 300,
        }
    }
}

impl LlmConfig {
    /// The configured fallback pair, when both halves are present.
    pub fn fallback(&self) -> Option<(ProviderKind, &str)> {
        match (self.fallback_provider, self.fallback_model.as_deref()) {
            (Some(kind), Some(model)) if !model.trim().is_empty() => Some((kind, model)),
            _ => None,
        }
    }

    pub fn base_url(&self, kind: ProviderKind) -> &str {
        match kind {
            ProviderKind::Anthropic => &self.anthropic_base_url,
            ProviderKind::OpenAi => &self.openai_base_url,
        }
    }

    pub fn api_key_env(&self, kind: ProviderKind) -> &str {
        match kind {
            ProviderKind::Anthropic => &self.anthropic_api_key_env,
            ProviderKind::OpenAi => &self.openai_api_key_env,
        }
    }
}

/// Optional string-like values written as `""` when unset.
///
/// TOML has no null, and skipping the key would bring the default back on load.
mod empty_as_none {
    use serde::de::IntoDeserializer;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(v) => v.serialize(serializer),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        T::deserialize(IntoDeserializer::<D::Error>::into_deserializer(raw)).map(Some)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    pub branch_prefix: String,
    pub remote: String,
    pub base_branch: String,
    /// Upper bound on CI fix rounds (1..=5).
    pub max_ci_rounds: u32,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            branch_prefix: "minion/".to_string(),
            remote: "origin".to_string(),
            base_branch: "main".to_string(),
            max_ci_rounds: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub max_turns: u32,
    pub max_tokens: u32,
    pub temperature: f32,
    /// `read_file` result cap, in characters.
    pub read_limit_chars: usize,
    pub shell_timeout_secs: u64,
    /// `run_shell` result cap, in characters.
    pub shell_output_limit_chars: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            max_tokens: 8192,
            temperature: 0.2,
            read_limit_chars: 20_000,
            shell_timeout_secs: 30,
            shell_output_limit_chars: 10_000,
        }
    }
}

/// One linter bucket: files with any of `extensions` are appended to `command`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinterConfig {
    pub label: String,
    pub extensions: Vec<String>,
    pub command: Vec<String>,
}

impl LinterConfig {
    fn new(label: &str, extensions: &[&str], command: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            extensions: extensions.iter().map(|e| (*e).to_string()).collect(),
            command: command.iter().map(|c| (*c).to_string()).collect(),
        }
    }

    /// True when `path` ends with one of this bucket's extensions.
    pub fn matches(&self, path: &str) -> bool {
        self.extensions.iter().any(|ext| path.ends_with(ext.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LintConfig {
    pub timeout_secs: u64,
    pub linters: Vec<LinterConfig>,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            linters: vec![
                LinterConfig::new("ruff", &[".py"], &["ruff", "check"]),
                LinterConfig::new(
                    "eslint",
                    &[".js", ".jsx", ".ts", ".tsx"],
                    &["npx", "eslint", "--no-error-on-unmatched-pattern"],
                ),
                LinterConfig::new("rustfmt", &[".rs"], &["rustfmt", "--check"]),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentRulesConfig {
    /// Glob patterns, relative to the repo root.
    pub paths: Vec<String>,
}

impl Default for AgentRulesConfig {
    fn default() -> Self {
        Self {
            paths: vec![
                ".cursor/rules/*.mdc".to_string(),
                "AGENTS.md".to_string(),
                ".cursorrules".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GithubConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub api_base_url: String,
    /// Program used for the CLI fallback when creating pull requests.
    pub cli_program: String,
    pub pr_timeout_secs: u64,
    pub wait_for_ci: bool,
    pub ci_timeout_secs: u64,
    pub ci_poll_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base_url: "https://api.github.com".to_string(),
            cli_program: "gh".to_string(),
            pr_timeout_secs: 60,
            wait_for_ci: false,
            ci_timeout_secs: 600,
            ci_poll_secs: 30,
        }
    }
}

impl GithubConfig {
    /// Token from config, else from `GITHUB_TOKEN`.
    pub fn token_resolved(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
            .filter(|t| !t.trim().is_empty())
    }
}

impl MinionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.llm.model.trim().is_empty() {
            return Err(anyhow!("llm.model must be non-empty"));
        }
        if self.llm.request_timeout_secs == 0 {
            return Err(anyhow!("llm.request_timeout_secs must be > 0"));
        }
        if self.git.branch_prefix.trim().is_empty() {
            return Err(anyhow!("git.branch_prefix must be non-empty"));
        }
        if self.git.remote.trim().is_empty() {
            return Err(anyhow!("git.remote must be non-empty"));
        }
        if !(1..=5).contains(&self.git.max_ci_rounds) {
            return Err(anyhow!("git.max_ci_rounds must be between 1 and 5"));
        }
        if self.agent.max_turns == 0 {
            return Err(anyhow!("agent.max_turns must be > 0"));
        }
        if self.agent.max_tokens == 0 {
            return Err(anyhow!("agent.max_tokens must be > 0"));
        }
        if self.agent.read_limit_chars == 0 || self.agent.shell_output_limit_chars == 0 {
            return Err(anyhow!("agent output caps must be > 0"));
        }
        if self.agent.shell_timeout_secs == 0 {
            return Err(anyhow!("agent.shell_timeout_secs must be > 0"));
        }
        if self.lint.timeout_secs == 0 {
            return Err(anyhow!("lint.timeout_secs must be > 0"));
        }
        for linter in &self.lint.linters {
            if linter.command.is_empty() || linter.command[0].trim().is_empty() {
                return Err(anyhow!(
                    "lint.linters[{}].command must be a non-empty array",
                    linter.label
                ));
            }
        }
        if self.github.pr_timeout_secs == 0 || self.github.ci_poll_secs == 0 {
            return Err(anyhow!("github timeouts must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `MinionConfig::default()`.
pub fn load_config(path: &Path) -> Result<MinionConfig> {
    if !path.exists() {
        let cfg = MinionConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: MinionConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Candidate config files for `repo_root`, most specific first.
pub fn config_candidates(repo_root: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![
        repo_root.join(REPO_CONFIG_PATH),
        repo_root.join(REPO_CONFIG_ALT_PATH),
    ];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(USER_CONFIG_PATH));
    }
    candidates
}

/// Load the first existing candidate config, or defaults when none exists.
pub fn discover_config(repo_root: &Path) -> Result<MinionConfig> {
    for path in config_candidates(repo_root) {
        if path.is_file() {
            debug!(path = %path.display(), "loading config");
            return load_config(&path);
        }
    }
    debug!("no config file found, using defaults");
    let cfg = MinionConfig::default();
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &MinionConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
