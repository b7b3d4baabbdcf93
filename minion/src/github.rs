//! Blocking GitHub REST client: pull requests and check runs.

use std::fmt;
use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::core::text::truncate_chars;
use crate::llm::{ensure_success, is_loopback_base_url};

const API_VERSION: &str = "2022-11-28";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const FAILURE_SUMMARY_CHARS: usize = 500;

static REMOTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"github\.com[:/]([^/]+)/([^/.]+)").expect("remote regex should be valid")
});

/// `(owner, repo)` from an ssh or https GitHub remote URL.
pub fn parse_remote(remote_url: &str) -> Option<(String, String)> {
    let caps = REMOTE_RE.captures(remote_url)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPullRequest<'a> {
    pub title: &'a str,
    pub head: &'a str,
    pub base: &'a str,
    pub body: &'a str,
    pub draft: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    Success,
    Failure,
    Pending,
}

impl CheckState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckState::Success => "success",
            CheckState::Failure => "failure",
            CheckState::Pending => "pending",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, CheckState::Pending)
    }
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckFailure {
    pub name: String,
    pub summary: String,
    pub details_url: String,
}

/// Combined check-run status for one ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckStatus {
    pub state: CheckState,
    pub total: u64,
    pub passed: u64,
    pub failures: Vec<CheckFailure>,
}

impl CheckStatus {
    /// `"{state}: {passed}/{total} passed"`.
    pub fn summary(&self) -> String {
        format!("{}: {}/{} passed", self.state, self.passed, self.total)
    }
}

#[derive(Debug, Deserialize)]
struct CheckRunsPage {
    #[serde(default)]
    total_count: u64,
    #[serde(default)]
    check_runs: Vec<CheckRun>,
}

#[derive(Debug, Deserialize)]
struct CheckRun {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    conclusion: Option<String>,
    #[serde(default)]
    details_url: Option<String>,
    #[serde(default)]
    output: Option<CheckRunOutput>,
}

#[derive(Debug, Deserialize)]
struct CheckRunOutput {
    #[serde(default)]
    summary: Option<String>,
}

impl CheckRunsPage {
    fn into_status(self) -> CheckStatus {
        let passed = self
            .check_runs
            .iter()
            .filter(|r| r.conclusion.as_deref() == Some("success"))
            .count() as u64;
        let failures: Vec<CheckFailure> = self
            .check_runs
            .into_iter()
            .filter(|r| r.conclusion.as_deref() == Some("failure"))
            .map(|r| CheckFailure {
                name: r.name.unwrap_or_else(|| "unknown".to_string()),
                summary: r
                    .output
                    .and_then(|o| o.summary)
                    .map(|s| truncate_chars(&s, FAILURE_SUMMARY_CHARS).to_string())
                    .unwrap_or_default(),
                details_url: r.details_url.unwrap_or_default(),
            })
            .collect();
        let state = if !failures.is_empty() {
            CheckState::Failure
        } else if self.total_count > 0 && passed == self.total_count {
            CheckState::Success
        } else {
            CheckState::Pending
        };
        CheckStatus {
            state,
            total: self.total_count,
            passed,
            failures,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: Client,
    api_base: String,
    owner: String,
    repo: String,
}

impl GitHubClient {
    pub fn new(api_base: &str, token: &str, owner: &str, repo: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .context("GitHub token is not a valid header value")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static(API_VERSION));
        let mut builder = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("minion/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT);
        if is_loopback_base_url(api_base) {
            builder = builder.no_proxy();
        }
        let http = builder.build().context("build GitHub HTTP client")?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    /// Client for the repository named by a git remote URL.
    pub fn from_remote_url(api_base: &str, token: &str, remote_url: &str) -> Result<Self> {
        let (owner, repo) = parse_remote(remote_url)
            .ok_or_else(|| anyhow!("cannot parse GitHub owner/repo from: {remote_url}"))?;
        Self::new(api_base, token, &owner, &repo)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.api_base, self.owner, self.repo, path
        )
    }

    #[instrument(skip_all, fields(head = pr.head, base = pr.base))]
    pub fn create_pull_request(&self, pr: &NewPullRequest<'_>) -> Result<PullRequest> {
        let response = self
            .http
            .post(self.repo_url("/pulls"))
            .json(pr)
            .send()
            .context("call GitHub create pull request")?;
        let created: PullRequest = ensure_success(response, "GitHub")?
            .json()
            .context("decode pull request response")?;
        info!(number = created.number, url = %created.html_url, "created pull request");
        Ok(created)
    }

    #[instrument(skip_all, fields(git_ref))]
    pub fn get_check_status(&self, git_ref: &str) -> Result<CheckStatus> {
        let response = self
            .http
            .get(self.repo_url(&format!("/commits/{git_ref}/check-runs")))
            .query(&[("per_page", "100")])
            .send()
            .context("call GitHub check runs")?;
        let page: CheckRunsPage = ensure_success(response, "GitHub")?
            .json()
            .context("decode check runs response")?;
        let status = page.into_status();
        debug!(state = %status.state, passed = status.passed, total = status.total, "check status");
        Ok(status)
    }

    /// Poll until checks settle or `timeout` elapses, then report the latest status.
    pub fn wait_for_checks(
        &self,
        git_ref: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<CheckStatus> {
        let started = Instant::now();
        while started.elapsed() < timeout {
            let status = self.get_check_status(git_ref)?;
            if status.state.is_final() {
                return Ok(status);
            }
            let remaining = timeout.saturating_sub(started.elapsed());
            thread::sleep(poll_interval.min(remaining));
        }
        self.get_check_status(git_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[test]
    fn parses_ssh_and_https_remotes() {
        assert_eq!(
            parse_remote("git@github.com:acme/widgets.git"),
            Some(("acme".to_string(), "widgets".to_string()))
        );
        assert_eq!(
            parse_remote("https://github.com/acme/widgets"),
            Some(("acme".to_string(), "widgets".to_string()))
        );
        assert_eq!(parse_remote("https://gitlab.com/acme/widgets.git"), None);
    }

    #[test]
    fn creates_pull_request_with_headers() {
        let mut server = Server::new();
        let mock = server
            .mock("POST", "/repos/acme/widgets/pulls")
            .match_header("authorization", "Bearer t0k")
            .match_header("accept", "application/vnd.github+json")
            .match_header("x-github-api-version", API_VERSION)
            .match_body(Matcher::PartialJson(json!({
                "head": "minion/fix", "base": "main", "draft": false
            })))
            .with_status(201)
            .with_body(r#"{"number": 7, "html_url": "https://github.com/acme/widgets/pull/7", "state": "open", "title": "t"}"#)
            .create();

        let client = GitHubClient::from_remote_url(
            &server.url(),
            "t0k",
            "git@github.com:acme/widgets.git",
        )
        .expect("client");
        let pr = client
            .create_pull_request(&NewPullRequest {
                title: "t",
                head: "minion/fix",
                base: "main",
                body: "b",
                draft: false,
            })
            .expect("create");
        assert_eq!(pr.number, 7);
        assert_eq!(pr.html_url, "https://github.com/acme/widgets/pull/7");
        mock.assert();
    }

    #[test]
    fn api_failure_is_an_error() {
        let mut server = Server::new();
        let _mock = server
            .mock("POST", "/repos/acme/widgets/pulls")
            .with_status(422)
            .with_body(r#"{"message": "Validation Failed"}"#)
            .create();
        let client = GitHubClient::new(&server.url(), "t", "acme", "widgets").expect("client");
        let err = client
            .create_pull_request(&NewPullRequest {
                title: "t",
                head: "h",
                base: "main",
                body: "",
                draft: false,
            })
            .unwrap_err();
        assert!(err.to_string().contains("422"));
    }

    #[test]
    fn check_status_classification() {
        let page = |runs: serde_json::Value, total: u64| -> CheckStatus {
            let page: CheckRunsPage =
                serde_json::from_value(json!({"total_count": total, "check_runs": runs}))
                    .expect("page");
            page.into_status()
        };
        let success = page(json!([{"name": "ci", "conclusion": "success"}]), 1);
        assert_eq!(success.state, CheckState::Success);
        assert_eq!(success.summary(), "success: 1/1 passed");

        let failure = page(
            json!([
                {"name": "ci", "conclusion": "success"},
                {"name": "lint", "conclusion": "failure", "output": {"summary": "E501"}}
            ]),
            2,
        );
        assert_eq!(failure.state, CheckState::Failure);
        assert_eq!(failure.failures[0].name, "lint");
        assert_eq!(failure.failures[0].summary, "E501");

        let pending = page(json!([{"name": "ci", "conclusion": null}]), 1);
        assert_eq!(pending.state, CheckState::Pending);
        assert_eq!(page(json!([]), 0).state, CheckState::Pending);
    }

    #[test]
    fn wait_returns_once_checks_settle() {
        let mut server = Server::new();
        let mock = server
            .mock("GET", "/repos/acme/widgets/commits/minion/fix/check-runs")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"total_count": 1, "check_runs": [{"name": "ci", "conclusion": "success"}]}"#)
            .expect(1)
            .create();
        let client = GitHubClient::new(&server.url(), "t", "acme", "widgets").expect("client");
        let status = client
            .wait_for_checks("minion/fix", Duration::from_secs(5), Duration::from_millis(10))
            .expect("wait");
        assert_eq!(status.state, CheckState::Success);
        mock.assert();
    }

    #[test]
    fn wait_reports_pending_after_timeout() {
        let mut server = Server::new();
        let _mock = server
            .mock("GET", "/repos/acme/widgets/commits/abc/check-runs")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"total_count": 1, "check_runs": [{"name": "ci", "conclusion": null}]}"#)
            .create();
        let client = GitHubClient::new(&server.url(), "t", "acme", "widgets").expect("client");
        let status = client
            .wait_for_checks("abc", Duration::from_millis(50), Duration::from_millis(10))
            .expect("wait");
        assert_eq!(status.state, CheckState::Pending);
    }
}
