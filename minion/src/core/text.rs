//! Deterministic text shaping: truncation, branch slugs, commit and PR titles.

/// Characters of the task considered when deriving a branch slug.
pub const SLUG_SOURCE_CHARS: usize = 40;
/// Maximum slug length.
pub const SLUG_MAX_CHARS: usize = 30;
/// Slug used when the task has no usable characters.
pub const FALLBACK_SLUG: &str = "task";
/// Characters of the task kept in commit messages and PR titles.
pub const TITLE_TASK_CHARS: usize = 72;

/// Longest prefix of `text` holding at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Derive a branch-safe slug from a task description.
///
/// Takes the first 40 characters, lowercases them, turns every run of
/// characters outside `[a-z0-9-]` into a single `-`, trims dashes, and caps
/// the result at 30 characters. Never empty.
pub fn branch_slug(task: &str) -> String {
    let head = truncate_chars(task, SLUG_SOURCE_CHARS).to_lowercase();
    let mut slug = String::with_capacity(head.len());
    for ch in head.chars() {
        let ch = if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            ch
        } else {
            '-'
        };
        if ch == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(ch);
    }
    let capped = truncate_chars(slug.trim_matches('-'), SLUG_MAX_CHARS).trim_end_matches('-');
    if capped.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        capped.to_string()
    }
}

/// Commit message for the run's single commit.
pub fn commit_message(task: &str) -> String {
    format!("minion: {}", truncate_chars(task, TITLE_TASK_CHARS))
}
