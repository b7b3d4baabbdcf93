//! Heuristic for replies that declare completion without calling `done`.

/// Phrases treated as "the model says it is finished". Matched case-insensitively
/// as substrings, so expect false positives and negatives.
const DONE_SIGNALS: [&str; 6] = [
    "task is complete",
    "task is done",
    "changes are complete",
    "all done",
    "i've completed",
    "i have completed",
];

/// True if `response` reads like a completion announcement.
pub fn looks_done(response: &str) -> bool {
    let lower = response.to_lowercase();
    DONE_SIGNALS.iter().any(|signal| lower.contains(signal))
}
