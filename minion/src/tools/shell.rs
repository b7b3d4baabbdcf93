//! `run_shell`.

use std::process::Command;

use tracing::debug;

use crate::core::text::truncate_chars;
use crate::io::process::run_command_with_timeout;
use crate::tools::{ERROR_PREFIX, ToolEngine, error};

pub(super) fn run_shell(engine: &ToolEngine, command: &str) -> String {
    let limits = engine.limits();
    let mut cmd = shell_command(command);
    cmd.current_dir(engine.root());
    // Room for multi-byte characters before the character cap applies.
    let byte_limit = limits.shell_output_limit_chars.saturating_mul(4);
    let out = match run_command_with_timeout(cmd, limits.shell_timeout, byte_limit) {
        Ok(out) => out,
        Err(err) => return error(&err),
    };
    if out.timed_out {
        return format!(
            "{ERROR_PREFIX}command timed out after {}s",
            limits.shell_timeout.as_secs()
        );
    }
    debug!(exit_code = out.exit_code(), "shell command finished");
    let combined = out.combined_text();
    if combined.is_empty() {
        return format!("exit {}", out.exit_code());
    }
    truncate_chars(&combined, limits.shell_output_limit_chars).to_string()
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::tools::ToolLimits;
    use std::time::{Duration, Instant};

    fn engine(root: &std::path::Path) -> ToolEngine {
        ToolEngine::new(root, ToolLimits::default())
    }

    #[test]
    fn silent_failure_reports_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(run_shell(&engine(temp.path()), "exit 1"), "exit 1");
        assert_eq!(run_shell(&engine(temp.path()), "true"), "exit 0");
    }

    #[test]
    fn combines_streams_in_repo_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("marker.txt"), "").expect("write");
        let out = run_shell(&engine(temp.path()), "ls; echo oops >&2");
        assert_eq!(out, "marker.txt\n\noops");
    }

    #[test]
    fn output_is_capped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let out = run_shell(
            &engine(temp.path()),
            "i=0; while [ $i -lt 3000 ]; do printf 'abcdefghij'; i=$((i+1)); done",
        );
        assert_eq!(out.chars().count(), 10_000);
    }

    #[test]
    fn timeout_is_an_error_string() {
        let temp = tempfile::tempdir().expect("tempdir");
        let limits = ToolLimits {
            shell_timeout: Duration::from_secs(1),
            ..ToolLimits::default()
        };
        let out = run_shell(&ToolEngine::new(temp.path(), limits), "sleep 5");
        assert_eq!(out, "Error: command timed out after 1s");
    }

    #[test]
    fn background_job_keeping_output_open_times_out() {
        let temp = tempfile::tempdir().expect("tempdir");
        let limits = ToolLimits {
            shell_timeout: Duration::from_secs(1),
            ..ToolLimits::default()
        };
        let started = Instant::now();
        let out = run_shell(
            &ToolEngine::new(temp.path(), limits),
            "sleep 8 & echo started",
        );
        assert_eq!(out, "Error: command timed out after 1s");
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
