//! PR publisher: hosted API first, `gh` CLI as the fallback.
//!
//! Publishing is best effort. Every failure is logged and reported as `None`.

use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::text::{TITLE_TASK_CHARS, truncate_chars};
use crate::github::{GitHubClient, NewPullRequest};
use crate::io::config::GithubConfig;
use crate::io::git::Git;
use crate::io::process::run_command_with_timeout;
use crate::orchestrator::RunState;

/// Longest title handed to the CLI.
pub const CLI_TITLE_MAX_CHARS: usize = 200;

const CLI_OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

pub fn pr_title(task: &str) -> String {
    format!("Minion: {}", truncate_chars(task, TITLE_TASK_CHARS))
}

pub fn pr_body(task: &str, action_count: usize) -> String {
    format!(
        "Automated by minion.\n\n**Task:** {task}\n\n**Actions:** {action_count} steps\n\n---\n_This PR was created by a one-shot coding agent._"
    )
}

/// Ways of opening a pull request, tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route<'a> {
    HostedApi { token: &'a str },
    Cli,
}

impl Route<'_> {
    fn label(&self) -> &'static str {
        match self {
            Route::HostedApi { .. } => "hosted api",
            Route::Cli => "cli",
        }
    }
}

fn routes<'a>(token: Option<&'a str>) -> Vec<Route<'a>> {
    let mut routes = Vec::with_capacity(2);
    if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
        routes.push(Route::HostedApi { token });
    }
    routes.push(Route::Cli);
    routes
}

#[derive(Debug, Clone)]
pub struct PrPublisher {
    git: Git,
    github: GithubConfig,
    base_branch: String,
}

impl PrPublisher {
    pub fn new(git: Git, github: &GithubConfig, base_branch: &str) -> Self {
        Self {
            git,
            github: github.clone(),
            base_branch: base_branch.to_string(),
        }
    }

    /// Open a PR for the run's branch and return its URL.
    #[instrument(skip_all)]
    pub fn create(&self, state: &RunState, task: &str, token: Option<&str>) -> Option<String> {
        let Some(branch) = state.branch_name.as_deref() else {
            debug!("no branch, skipping pull request");
            return None;
        };
        let title = pr_title(task);
        let body = pr_body(task, state.actions.len());
        for route in routes(token) {
            let attempt = match route {
                Route::HostedApi { token } => self.create_via_api(token, branch, &title, &body),
                Route::Cli => self.create_via_cli(branch, &title, &body),
            };
            match attempt {
                Ok(url) => {
                    info!(url = %url, "pull request created");
                    return Some(url);
                }
                Err(err) => warn!(
                    route = route.label(),
                    err = %format!("{err:#}"),
                    "pull request route failed"
                ),
            }
        }
        None
    }

    fn create_via_api(&self, token: &str, branch: &str, title: &str, body: &str) -> Result<String> {
        let remote_url = self.git.remote_url()?;
        let client = GitHubClient::from_remote_url(&self.github.api_base_url, token, &remote_url)?;
        let pr = client.create_pull_request(&NewPullRequest {
            title,
            head: branch,
            base: &self.base_branch,
            body,
            draft: false,
        })?;
        Ok(pr.html_url)
    }

    fn create_via_cli(&self, branch: &str, title: &str, body: &str) -> Result<String> {
        let mut cmd = Command::new(&self.github.cli_program);
        cmd.args(["pr", "create", "--base", &self.base_branch, "--head", branch])
            .arg("--title")
            .arg(truncate_chars(title, CLI_TITLE_MAX_CHARS))
            .arg("--body")
            .arg(body)
            .current_dir(self.git.workdir());
        let out = run_command_with_timeout(
            cmd,
            Duration::from_secs(self.github.pr_timeout_secs),
            CLI_OUTPUT_LIMIT_BYTES,
        )?;
        if out.timed_out {
            return Err(anyhow!(
                "{} timed out after {}s",
                self.github.cli_program,
                self.github.pr_timeout_secs
            ));
        }
        if !out.status.success() {
            return Err(anyhow!(
                "{} pr create failed: {}",
                self.github.cli_program,
                out.stderr_text().trim()
            ));
        }
        let url = out.stdout_text().trim().to_string();
        if url.is_empty() {
            return Err(anyhow!("{} pr create printed no URL", self.github.cli_program));
        }
        Ok(url)
    }
}
