pub mod config;
pub mod context;
pub mod git;
pub mod lint;
pub mod patch;
pub mod process;
pub mod prompt;
