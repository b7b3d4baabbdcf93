//! Git facade for minion runs.
//!
//! Every operation shells out to `git` in the repository root. Mutating calls
//! fail on a non-zero exit; `status` and `diff` are read-only and tolerant.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::config::GitConfig;

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    branch_prefix: String,
    remote: String,
    base_branch: String,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>, config: &GitConfig) -> Self {
        Self {
            workdir: workdir.into(),
            branch_prefix: config.branch_prefix.clone(),
            remote: config.remote.clone(),
            base_branch: config.base_branch.clone(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Current branch name, or `"HEAD"` when detached.
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["branch", "--show-current"])?;
        let name = out.trim();
        if name.is_empty() {
            debug!("detached HEAD");
            return Ok("HEAD".to_string());
        }
        Ok(name.to_string())
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// Create and check out `{prefix}{name}` at HEAD, returning the full branch name.
    ///
    /// When that branch already exists a numeric suffix (`-2`, `-3`, ...) is appended.
    #[instrument(skip_all, fields(name))]
    pub fn create_branch(&self, name: &str) -> Result<String> {
        let base = format!("{}{}", self.branch_prefix, name);
        let mut branch = base.clone();
        let mut suffix = 2;
        while self.branch_exists(&branch)? {
            branch = format!("{base}-{suffix}");
            suffix += 1;
        }
        self.run_checked(&["checkout", "-b", &branch])?;
        info!(branch = %branch, "created branch");
        Ok(branch)
    }

    /// Stage `paths` (or everything when `None`) and commit.
    #[instrument(skip_all)]
    pub fn stage_and_commit(&self, message: &str, paths: Option<&[String]>) -> Result<()> {
        match paths {
            Some(paths) => {
                for path in paths {
                    self.run_checked(&["add", "--", path])?;
                }
            }
            None => {
                self.run_checked(&["add", "-A"])?;
            }
        }
        self.run_checked(&["commit", "-m", message])?;
        debug!("committed staged changes");
        Ok(())
    }

    /// Push `branch` (default: the current branch) to the configured remote with upstream tracking.
    #[instrument(skip_all)]
    pub fn push(&self, branch: Option<&str>) -> Result<String> {
        let branch = match branch {
            Some(b) => b.to_string(),
            None => self.current_branch()?,
        };
        let output = self.run_checked(&["push", "-u", &self.remote, &branch])?;
        info!(branch = %branch, remote = %self.remote, "pushed branch");
        let text = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        Ok(text.trim().to_string())
    }

    /// Short status text; empty when git fails.
    pub fn status(&self) -> String {
        self.run_tolerant(&["status", "--short"])
    }

    /// Working-tree diff, limited to `paths` when given; empty when git fails.
    pub fn diff(&self, paths: Option<&[String]>) -> String {
        let mut args = vec!["diff"];
        if let Some(paths) = paths {
            args.push("--");
            args.extend(paths.iter().map(String::as_str));
        }
        self.run_tolerant(&args)
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// True when the working tree has staged, unstaged, or untracked changes.
    pub fn has_changes(&self) -> Result<bool> {
        Ok(!self.status_porcelain()?.is_empty())
    }

    /// Fetch the configured base branch from the remote.
    #[instrument(skip_all)]
    pub fn fetch_latest(&self) -> Result<()> {
        self.run_checked(&["fetch", &self.remote, &self.base_branch])?;
        Ok(())
    }

    /// URL of the configured remote.
    pub fn remote_url(&self) -> Result<String> {
        let out = self.run_capture(&["remote", "get-url", &self.remote])?;
        Ok(out.trim().to_string())
    }

    /// Paths currently staged for commit.
    pub fn staged_files(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["diff", "--cached", "--name-only"])?;
        Ok(non_empty_lines(&out))
    }

    /// Every path tracked by git.
    pub fn tracked_files(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["ls-files"])?;
        Ok(non_empty_lines(&out))
    }

    fn run_tolerant(&self, args: &[&str]) -> String {
        match self.run_capture(args) {
            Ok(out) => out,
            Err(err) => {
                warn!(err = %err, "git read failed");
                String::new()
            }
        }
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

/// Top level of the work tree containing `start`.
pub fn find_repo_root(start: &Path) -> Result<PathBuf> {
    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(start)
        .output()
        .with_context(|| format!("spawn git rev-parse in {}", start.display()))?;
    if !output.status.success() {
        return Err(anyhow!("{} is not inside a git work tree", start.display()));
    }
    Ok(PathBuf::from(
        String::from_utf8_lossy(&output.stdout).trim(),
    ))
}

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
