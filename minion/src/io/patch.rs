//! Unified-diff application through the system `patch` tool.

use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::io::process::run_command_with_timeout;

const PATCH_OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

/// True when `content` opens with a unified-diff header.
pub fn looks_like_diff(content: &str) -> bool {
    let head = content.trim_start();
    head.starts_with("--- a/") || head.starts_with("diff --git")
}

/// Apply `diff` inside `root` with `patch -p1 --forward`, never prompting.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn apply_unified_diff(root: &Path, diff: &str, timeout: Duration) -> Result<()> {
    let mut file = tempfile::Builder::new()
        .prefix("minion-")
        .suffix(".patch")
        .tempfile()
        .context("create temp patch file")?;
    file.write_all(diff.as_bytes()).context("write temp patch file")?;
    if !diff.ends_with('\n') {
        file.write_all(b"\n").context("write temp patch file")?;
    }
    file.flush().context("flush temp patch file")?;

    let mut cmd = Command::new("patch");
    cmd.arg("-p1")
        .arg("--forward")
        .arg("--batch")
        .arg(format!("--input={}", file.path().display()))
        .current_dir(root);
    let out = run_command_with_timeout(cmd, timeout, PATCH_OUTPUT_LIMIT_BYTES)?;
    if out.timed_out {
        return Err(anyhow!("patch timed out after {}s", timeout.as_secs()));
    }
    if !out.status.success() {
        let text = out.combined_text();
        return Err(anyhow!("patch failed: {}", text));
    }
    debug!("diff applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn patch_available() -> bool {
        Command::new("patch")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn detects_diff_headers() {
        assert!(looks_like_diff("--- a/x.py\n+++ b/x.py\n"));
        assert!(looks_like_diff("\n  diff --git a/x b/x\n"));
        assert!(!looks_like_diff("print('--- a/')\n"));
        assert!(!looks_like_diff("--- not a diff"));
    }

    #[test]
    fn applies_diff_to_file() {
        if !patch_available() {
            return;
        }
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("hello.txt"), "one\ntwo\n").expect("write");
        let diff = "--- a/hello.txt\n+++ b/hello.txt\n@@ -1,2 +1,2 @@\n one\n-two\n+three\n";
        apply_unified_diff(temp.path(), diff, Duration::from_secs(10)).expect("apply");
        assert_eq!(
            fs::read_to_string(temp.path().join("hello.txt")).expect("read"),
            "one\nthree\n"
        );
    }

    #[test]
    fn rejects_diff_that_does_not_apply() {
        if !patch_available() {
            return;
        }
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("hello.txt"), "alpha\n").expect("write");
        let diff = "--- a/hello.txt\n+++ b/hello.txt\n@@ -1,1 +1,1 @@\n-beta\n+gamma\n";
        let err = apply_unified_diff(temp.path(), diff, Duration::from_secs(10)).unwrap_err();
        assert!(err.to_string().starts_with("patch failed"));
    }
}
