//! Test-only helpers: temp git repositories, scripted models, recording observers.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use serde_json::Value;
use tempfile::TempDir;

use crate::core::types::Action;
use crate::io::config::{GitConfig, LintConfig, MinionConfig};
use crate::io::git::Git;
use crate::llm::{CompletionModel, CompletionRequest, TextStream};
use crate::orchestrator::RunObserver;

/// A temporary git repository on `main` with one commit, optionally wired to a bare `origin`.
pub struct TestRepo {
    dir: TempDir,
    remote: Option<TempDir>,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        git(dir.path(), &["init", "--quiet"]);
        git(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(dir.path(), &["config", "user.email", "minion@example.com"]);
        git(dir.path(), &["config", "user.name", "Minion Test"]);
        git(dir.path(), &["config", "commit.gpgsign", "false"]);
        fs::write(dir.path().join("README.md"), "# test repo\n").expect("write readme");
        git(dir.path(), &["add", "-A"]);
        git(dir.path(), &["commit", "--quiet", "-m", "initial"]);
        Self { dir, remote: None }
    }

    /// Repository whose `origin` is a local bare repository.
    pub fn with_remote() -> Self {
        let mut repo = Self::new();
        let remote = tempfile::tempdir().expect("remote tempdir");
        git(remote.path(), &["init", "--quiet", "--bare"]);
        let url = remote.path().to_string_lossy().to_string();
        git(repo.path(), &["remote", "add", "origin", &url]);
        git(repo.path(), &["push", "--quiet", "-u", "origin", "main"]);
        repo.remote = Some(remote);
        repo
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self) -> Git {
        Git::new(self.path(), &GitConfig::default())
    }

    /// Point `origin` at a GitHub-looking URL while pushes still reach the bare repo.
    pub fn set_github_origin(&self, owner: &str, repo: &str) {
        let remote = self.remote.as_ref().expect("repo has no remote");
        let github = format!("https://github.com/{owner}/{repo}.git");
        git(self.path(), &["remote", "set-url", "origin", &github]);
        let bare = remote.path().to_string_lossy().to_string();
        git(self.path(), &["remote", "set-url", "--push", "origin", &bare]);
    }

    pub fn remote_has_branch(&self, branch: &str) -> bool {
        let Some(remote) = &self.remote else {
            return false;
        };
        Command::new("git")
            .args(["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .current_dir(remote.path())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Files changed by the last commit on `branch` in the local repository.
    pub fn files_in_commit(&self, branch: &str) -> Vec<String> {
        let out = Command::new("git")
            .args(["show", "--name-only", "--pretty=format:", branch])
            .current_dir(self.path())
            .output()
            .expect("git show");
        String::from_utf8_lossy(&out.stdout)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn last_commit_subject(&self, branch: &str) -> String {
        let out = Command::new("git")
            .args(["log", "-1", "--pretty=%s", branch])
            .current_dir(self.path())
            .output()
            .expect("git log");
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("spawn git");
    assert!(status.success(), "git {} failed", args.join(" "));
}

enum Script {
    Queue(VecDeque<String>),
    Repeat(String),
    Fail(String),
}

/// Model double that replays canned replies and records what it was asked.
pub struct ScriptedModel {
    script: Mutex<Script>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// What one `complete` call received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub message_count: usize,
    pub last_message: Option<String>,
    pub system: Option<String>,
}

impl ScriptedModel {
    /// Replies in order; running out is an error.
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_script(Script::Queue(replies.into_iter().map(Into::into).collect()))
    }

    /// The same reply forever.
    pub fn repeating(reply: impl Into<String>) -> Self {
        Self::with_script(Script::Repeat(reply.into()))
    }

    /// Every call fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_script(Script::Fail(message.into()))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn systems(&self) -> Vec<Option<String>> {
        self.requests().into_iter().map(|r| r.system).collect()
    }

    fn next_reply(&self) -> Result<String> {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        match &mut *script {
            Script::Queue(queue) => queue
                .pop_front()
                .ok_or_else(|| anyhow!("scripted model ran out of replies")),
            Script::Repeat(reply) => Ok(reply.clone()),
            Script::Fail(message) => Err(anyhow!("{message}")),
        }
    }
}

impl CompletionModel for ScriptedModel {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedRequest {
                message_count: request.messages.len(),
                last_message: request.messages.last().map(|m| m.content.clone()),
                system: request.system.map(str::to_string),
            });
        self.next_reply()
    }

    fn stream(&self, request: &CompletionRequest<'_>) -> Result<TextStream> {
        let text = self.complete(request)?;
        let words: Vec<Result<String>> = text
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        Ok(Box::new(words.into_iter()))
    }
}

/// Observer that keeps every event it sees.
#[derive(Default)]
pub struct RecordingObserver {
    phases: Mutex<Vec<String>>,
    steps: Mutex<Vec<String>>,
    actions: Mutex<Vec<Action>>,
}

impl RecordingObserver {
    pub fn phases(&self) -> Vec<String> {
        self.phases.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn steps(&self) -> Vec<String> {
        self.steps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn actions(&self) -> Vec<Action> {
        self.actions.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl RunObserver for RecordingObserver {
    fn on_phase(&self, phase: &str) {
        self.phases
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(phase.to_string());
    }

    fn on_step(&self, description: &str) {
        self.steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(description.to_string());
    }

    fn on_action(&self, action: &Action) {
        self.actions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(action.clone());
    }
}

/// A fenced `minion_tool` block calling `name` with `parameters`.
pub fn tool_block(name: &str, parameters: Value) -> String {
    let call = serde_json::json!({"name": name, "parameters": parameters});
    format!("```minion_tool\n{call}\n```")
}

/// Config that never reaches the network or real tools: no linters, a missing
/// `gh`, and unroutable API endpoints.
pub fn test_config() -> MinionConfig {
    let mut cfg = MinionConfig::default();
    cfg.lint = LintConfig {
        timeout_secs: 10,
        linters: Vec::new(),
    };
    cfg.github.cli_program = "minion-test-missing-gh".to_string();
    cfg.github.api_base_url = "http://127.0.0.1:9".to_string();
    cfg.github.token = None;
    cfg.llm.anthropic_base_url = "http://127.0.0.1:9".to_string();
    cfg.llm.openai_base_url = "http://127.0.0.1:9".to_string();
    cfg
}

/// Write an executable shell script into `dir`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = fs::metadata(&path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod script");
    path
}
