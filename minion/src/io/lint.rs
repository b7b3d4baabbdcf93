//! Lint facade: pick the linters relevant to a set of paths and run them.
//!
//! A linter that is missing or times out counts as a pass with no output.

use std::process::Command;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::core::types::LintResult;
use crate::io::config::{LintConfig, LinterConfig};
use crate::io::git::Git;
use crate::io::process::run_command_with_timeout;

/// Text reported when no linter produced output.
pub const NO_LINTERS_RUN: &str = "No linters run (no matching files).";

const LINT_OUTPUT_LIMIT_BYTES: usize = 200_000;

#[derive(Debug, Clone)]
pub struct Lint {
    git: Git,
    timeout: Duration,
    linters: Vec<LinterConfig>,
}

impl Lint {
    pub fn new(git: Git, config: &LintConfig) -> Self {
        Self {
            git,
            timeout: Duration::from_secs(config.timeout_secs),
            linters: config.linters.clone(),
        }
    }

    /// Lint `paths`; staged files when `None`; every tracked file when that is empty too.
    #[instrument(skip_all)]
    pub fn run_relevant_linters(&self, paths: Option<&[String]>) -> LintResult {
        let files = match paths {
            Some(paths) => paths.to_vec(),
            None => self.staged_or_tracked(),
        };
        debug!(file_count = files.len(), "linting files");

        let mut ok = true;
        let mut sections = Vec::new();
        for linter in &self.linters {
            let bucket: Vec<&str> = files
                .iter()
                .map(String::as_str)
                .filter(|f| linter.matches(f))
                .collect();
            if bucket.is_empty() {
                continue;
            }
            let (passed, output) = self.run_linter(linter, &bucket);
            ok &= passed;
            if !output.is_empty() {
                sections.push(format!("{}:\n{}", linter.label, output));
            }
        }

        let output = if sections.is_empty() {
            NO_LINTERS_RUN.to_string()
        } else {
            sections.join("\n\n")
        };
        LintResult { ok, output }
    }

    fn staged_or_tracked(&self) -> Vec<String> {
        let staged = self.git.staged_files().unwrap_or_else(|err| {
            warn!(err = %err, "listing staged files failed");
            Vec::new()
        });
        if !staged.is_empty() {
            return staged;
        }
        self.git.tracked_files().unwrap_or_else(|err| {
            warn!(err = %err, "listing tracked files failed");
            Vec::new()
        })
    }

    fn run_linter(&self, linter: &LinterConfig, files: &[&str]) -> (bool, String) {
        let Some((program, args)) = linter.command.split_first() else {
            return (true, String::new());
        };
        let mut cmd = Command::new(program);
        cmd.args(args).args(files).current_dir(self.git.workdir());
        match run_command_with_timeout(cmd, self.timeout, LINT_OUTPUT_LIMIT_BYTES) {
            Ok(out) if out.timed_out => {
                warn!(linter = %linter.label, "linter timed out, treating as pass");
                (true, String::new())
            }
            Ok(out) => {
                let text = format!("{}{}", out.stdout_text(), out.stderr_text())
                    .trim()
                    .to_string();
                debug!(linter = %linter.label, exit_code = out.exit_code(), "linter finished");
                (out.status.success(), text)
            }
            Err(err) => {
                debug!(linter = %linter.label, err = %err, "linter unavailable, skipping");
                (true, String::new())
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;
    use std::fs;

    fn linter(label: &str, ext: &str, script: &str) -> LinterConfig {
        LinterConfig {
            label: label.to_string(),
            extensions: vec![ext.to_string()],
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                script.to_string(),
                "lint".to_string(),
            ],
        }
    }

    fn lint_with(repo: &TestRepo, linters: Vec<LinterConfig>) -> Lint {
        Lint::new(
            repo.git(),
            &LintConfig {
                timeout_secs: 5,
                linters,
            },
        )
    }

    #[test]
    fn no_matching_files_passes() {
        let repo = TestRepo::new();
        let lint = lint_with(&repo, vec![linter("py", ".py", "echo bad; exit 1")]);
        let result = lint.run_relevant_linters(Some(&["notes.txt".to_string()]));
        assert!(result.ok);
        assert_eq!(result.output, NO_LINTERS_RUN);
    }

    #[test]
    fn failing_linter_reports_labeled_output() {
        let repo = TestRepo::new();
        let lint = lint_with(
            &repo,
            vec![
                linter("py", ".py", "echo \"E501 $1\"; exit 1"),
                linter("rs", ".rs", "echo fine"),
            ],
        );
        let result = lint.run_relevant_linters(Some(&["app.py".to_string(), "lib.rs".to_string()]));
        assert!(!result.ok);
        assert_eq!(result.output, "py:\nE501 app.py\n\nrs:\nfine");
    }

    #[test]
    fn missing_binary_counts_as_pass() {
        let repo = TestRepo::new();
        let lint = lint_with(
            &repo,
            vec![LinterConfig {
                label: "ghost".to_string(),
                extensions: vec![".py".to_string()],
                command: vec!["minion-no-such-linter".to_string()],
            }],
        );
        let result = lint.run_relevant_linters(Some(&["a.py".to_string()]));
        assert!(result.ok);
        assert_eq!(result.output, NO_LINTERS_RUN);
    }

    #[test]
    fn timeout_counts_as_pass() {
        let repo = TestRepo::new();
        let mut lint = lint_with(&repo, vec![linter("slow", ".py", "sleep 5; exit 1")]);
        lint.timeout = Duration::from_millis(200);
        let result = lint.run_relevant_linters(Some(&["a.py".to_string()]));
        assert!(result.ok);
    }

    #[test]
    fn defaults_to_staged_then_tracked_files() {
        let repo = TestRepo::new();
        fs::write(repo.path().join("tracked.py"), "x = 1\n").expect("write");
        let git = repo.git();
        git.stage_and_commit("add py", None).expect("commit");

        let lint = lint_with(&repo, vec![linter("py", ".py", "echo \"$@\"; exit 1")]);
        let whole_tree = lint.run_relevant_linters(None);
        assert!(!whole_tree.ok);
        assert!(whole_tree.output.contains("tracked.py"));

        fs::write(repo.path().join("staged.py"), "y = 2\n").expect("write");
        std::process::Command::new("git")
            .args(["add", "staged.py"])
            .current_dir(repo.path())
            .status()
            .expect("git add");
        let staged = lint.run_relevant_linters(None);
        assert!(staged.output.contains("staged.py"));
        assert!(!staged.output.contains("tracked.py"));
    }
}
