//! One-shot coding agent: a task goes in, a reviewed branch (and optionally a
//! pull request) comes out.
//!
//! - **[`core`]**: Pure logic (tool-call parsing, slugs, completion heuristic,
//!   shared records). No I/O.
//! - **[`io`]**: Side effects behind small facades: config, git, linters,
//!   subprocesses, prompts, context hydration.
//! - **[`llm`]**: Provider backends and the ordered fallback chain.
//! - **[`tools`]**: Executes the model's tool calls inside the repository root.
//!
//! [`orchestrator`] drives a run through its phases, [`pr`] and [`github`]
//! publish the result, and [`host`] runs tasks in the background against a
//! shared run registry.

pub mod core;
pub mod exit_codes;
pub mod github;
pub mod host;
pub mod io;
pub mod llm;
pub mod logging;
pub mod orchestrator;
pub mod pr;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
