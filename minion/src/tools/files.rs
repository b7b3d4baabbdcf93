//! `edit_file` and `read_file`.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::core::text::truncate_chars;
use crate::io::patch::{apply_unified_diff, looks_like_diff};
use crate::tools::{ERROR_PREFIX, ToolEngine, error};

/// Join a model-supplied relative path onto `root`.
///
/// Rejects absolute paths and any path whose `..` components climb above `root`.
pub fn resolve_in_root(root: &Path, rel: &str) -> Result<PathBuf> {
    let rel_path = Path::new(rel);
    let mut depth = 0usize;
    for component in rel_path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(escape(rel));
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return Err(escape(rel)),
        }
    }
    Ok(root.join(rel_path))
}

fn escape(rel: &str) -> anyhow::Error {
    anyhow!("path escapes repository root: {rel}")
}

pub(super) fn edit_file(engine: &ToolEngine, path: &str, content: &str) -> String {
    match write_or_patch(engine, path, content) {
        Ok(result) => result,
        Err(err) => error(&err),
    }
}

fn write_or_patch(engine: &ToolEngine, path: &str, content: &str) -> Result<String> {
    let full = resolve_in_root(engine.root(), path)?;
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create directory for {path}"))?;
    }
    if looks_like_diff(content) {
        apply_unified_diff(engine.root(), content, engine.limits().shell_timeout)
            .with_context(|| format!("apply diff to {path}"))?;
        debug!(path, "applied diff");
        return Ok(format!("Applied diff to {path}"));
    }
    fs::write(&full, content).with_context(|| format!("write {path}"))?;
    debug!(path, bytes = content.len(), "wrote file");
    Ok(format!("Wrote {path}"))
}

pub(super) fn read_file(engine: &ToolEngine, path: &str) -> String {
    let full = match resolve_in_root(engine.root(), path) {
        Ok(full) => full,
        Err(err) => return error(&err),
    };
    match fs::read(&full) {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            truncate_chars(&text, engine.limits().read_limit_chars).to_string()
        }
        Err(err) => format!("{ERROR_PREFIX}read {path}: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolLimits;

    #[test]
    fn resolves_nested_relative_paths() {
        let root = Path::new("/repo");
        assert_eq!(
            resolve_in_root(root, "src/./lib.rs").expect("resolve"),
            PathBuf::from("/repo/src/./lib.rs")
        );
        assert!(resolve_in_root(root, "src/../README.md").is_ok());
    }

    #[test]
    fn rejects_escaping_paths() {
        let root = Path::new("/repo");
        for bad in ["../secret", "/etc/passwd", "src/../../x"] {
            let err = resolve_in_root(root, bad).unwrap_err();
            assert_eq!(
                err.to_string(),
                format!("path escapes repository root: {bad}")
            );
        }
    }

    #[test]
    fn edit_outside_root_is_an_error_string() {
        let temp = tempfile::tempdir().expect("tempdir");
        let engine = ToolEngine::new(temp.path().join("repo"), ToolLimits::default());
        let result = edit_file(&engine, "../escape.txt", "x");
        assert_eq!(result, "Error: path escapes repository root: ../escape.txt");
        assert!(!temp.path().join("escape.txt").exists());
    }

    #[test]
    fn read_is_lossy_and_capped() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("bin.dat"), [b'a', 0xff, b'b']).expect("write");
        fs::write(temp.path().join("big.txt"), "x".repeat(25_000)).expect("write");
        let engine = ToolEngine::new(temp.path(), ToolLimits::default());

        assert_eq!(read_file(&engine, "bin.dat"), "a\u{fffd}b");
        assert_eq!(read_file(&engine, "big.txt").chars().count(), 20_000);
    }

    #[test]
    fn read_missing_file_is_an_error_string() {
        let temp = tempfile::tempdir().expect("tempdir");
        let engine = ToolEngine::new(temp.path(), ToolLimits::default());
        assert!(read_file(&engine, "nope.txt").starts_with("Error: read nope.txt"));
    }
}
