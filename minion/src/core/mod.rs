//! Pure, deterministic logic with no I/O.

pub mod completion;
pub mod text;
pub mod tool_call;
pub mod types;
