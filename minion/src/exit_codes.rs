//! Stable exit codes for `minion` commands.

/// Command succeeded; for `run`, the agent declared the task done.
pub const OK: i32 = 0;
/// Invalid arguments or config, provider exhaustion, git failure, or a failing lint.
pub const ERROR: i32 = 1;
/// `minion run` hit the turn cap without the agent finishing.
pub const INCOMPLETE: i32 = 2;
