//! Run orchestrator.
//!
//! One [`Orchestrator::run`] call drives a task through
//! `hydrating -> agent loop -> git -> pull request -> finished`. The agent loop
//! interleaves model turns with deterministic tool execution and lint feedback
//! under a hard turn cap; the git and PR phases only run once the model has
//! declared the task done and the working tree actually changed.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::completion::looks_done;
use crate::core::text::{branch_slug, commit_message};
use crate::core::tool_call::{EDIT_FILE, extract_tool_calls};
use crate::core::types::{Action, Message, Phase};
use crate::github::GitHubClient;
use crate::io::config::MinionConfig;
use crate::io::context::{ContextProvider, RulesContextProvider};
use crate::io::git::Git;
use crate::io::lint::Lint;
use crate::io::prompt::PromptEngine;
use crate::llm::{CompletionModel, CompletionRequest};
use crate::pr::PrPublisher;
use crate::tools::{ERROR_PREFIX, ToolEngine, ToolLimits};

/// Corrective message sent when a reply carries no tool call and does not look finished.
pub const NUDGE_MESSAGE: &str =
    "Please use the edit_file tool to make changes, or the done tool if finished.";

/// Synthetic action recorded when a pull request was opened.
pub const CREATE_PR_ACTION: &str = "create_pr";
/// Synthetic action recorded after waiting for CI checks.
pub const CI_STATUS_ACTION: &str = "ci_status";

/// Everything one run accumulates. Owned by that run alone.
#[derive(Debug, Clone, PartialEq)]
pub struct RunState {
    pub task: String,
    pub repo_root: PathBuf,
    /// Full model context window, in order.
    pub messages: Vec<Message>,
    pub actions: Vec<Action>,
    pub branch_name: Option<String>,
    pub pr_url: Option<String>,
    /// Post-commit lint rounds that found issues.
    pub ci_round: u32,
    pub done: bool,
    /// Model turns taken.
    pub turns: u32,
    pub phase: Phase,
}

impl RunState {
    pub fn new(task: &str, repo_root: &Path) -> Self {
        Self {
            task: task.to_string(),
            repo_root: repo_root.to_path_buf(),
            messages: Vec::new(),
            actions: Vec::new(),
            branch_name: None,
            pr_url: None,
            ci_round: 0,
            done: false,
            turns: 0,
            phase: Phase::Hydrating,
        }
    }

    /// Paths successfully written by `edit_file` across the run, first-seen order.
    pub fn touched_paths(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.actions
            .iter()
            .filter(|a| a.tool == EDIT_FILE && !a.result.starts_with(ERROR_PREFIX))
            .filter_map(Action::path)
            .filter(|p| seen.insert(*p))
            .map(str::to_string)
            .collect()
    }
}

/// Progress hooks. Synchronous and fire-and-forget; every hook defaults to a no-op.
pub trait RunObserver {
    fn on_phase(&self, _phase: &str) {}

    fn on_step(&self, _description: &str) {}

    fn on_action(&self, _action: &Action) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Inputs of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub task: String,
    pub links: Vec<String>,
    pub ticket_id: Option<String>,
    pub create_pr: bool,
    /// Overrides the configured GitHub token for this run.
    pub github_token: Option<String>,
}

impl RunRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Self::default()
        }
    }

    pub fn with_links(mut self, links: Vec<String>) -> Self {
        self.links = links;
        self
    }

    pub fn with_ticket(mut self, ticket_id: impl Into<String>) -> Self {
        self.ticket_id = Some(ticket_id.into());
        self
    }

    pub fn with_pull_request(mut self, github_token: Option<String>) -> Self {
        self.create_pr = true;
        self.github_token = github_token;
        self
    }
}

pub struct Orchestrator<M> {
    config: MinionConfig,
    root: PathBuf,
    model: M,
    git: Git,
    lint: Lint,
    tools: ToolEngine,
    context: Box<dyn ContextProvider>,
    publisher: PrPublisher,
    prompts: PromptEngine,
}

impl<M: CompletionModel> Orchestrator<M> {
    pub fn new(config: MinionConfig, root: impl Into<PathBuf>, model: M) -> Self {
        let root = root.into();
        let git = Git::new(&root, &config.git);
        let lint = Lint::new(git.clone(), &config.lint);
        let tools = ToolEngine::new(&root, ToolLimits::from(&config.agent));
        let context = Box::new(RulesContextProvider::new(&root, &config.agent_rules));
        let publisher = PrPublisher::new(git.clone(), &config.github, &config.git.base_branch);
        Self {
            config,
            root,
            model,
            git,
            lint,
            tools,
            context,
            publisher,
            prompts: PromptEngine::new(),
        }
    }

    /// Replace the default rules-based context provider.
    pub fn with_context_provider(mut self, provider: Box<dyn ContextProvider>) -> Self {
        self.context = provider;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Drive one task to completion. Each call starts from a fresh [`RunState`].
    ///
    /// Provider exhaustion and git failures abort the run with an error; tool and
    /// lint failures are folded back into the conversation.
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub fn run(&self, request: &RunRequest, observer: &dyn RunObserver) -> Result<RunState> {
        let mut state = RunState::new(&request.task, &self.root);

        self.enter(&mut state, Phase::Hydrating, observer);
        let context = self
            .context
            .hydrate(&request.task, &request.links, request.ticket_id.as_deref())
            .context("hydrate context")?;
        let system = self
            .prompts
            .render_system(&context, self.config.agent.shell_timeout_secs)?;
        state.messages.push(Message::user(format!(
            "Task: {}\n\nProceed to complete this task.",
            request.task
        )));

        self.enter(&mut state, Phase::AgentLoop, observer);
        self.agent_loop(&mut state, &system, observer)?;

        if state.done && self.working_tree_changed() {
            self.enter(&mut state, Phase::Git, observer);
            self.commit_and_push(&mut state, observer)?;

            if request.create_pr {
                self.enter(&mut state, Phase::PullRequest, observer);
                self.publish(&mut state, request, observer);
            }
        } else {
            debug!(done = state.done, "skipping git phase");
        }

        self.enter(&mut state, Phase::Finished, observer);
        info!(
            done = state.done,
            turns = state.turns,
            actions = state.actions.len(),
            branch = ?state.branch_name,
            "run finished"
        );
        Ok(state)
    }

    fn enter(&self, state: &mut RunState, phase: Phase, observer: &dyn RunObserver) {
        state.phase = phase;
        debug!(phase = phase.label(), "entering phase");
        observer.on_phase(phase.label());
    }

    /// A root that is not a git work tree counts as unchanged.
    fn working_tree_changed(&self) -> bool {
        match self.git.has_changes() {
            Ok(changed) => changed,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "cannot read git status");
                false
            }
        }
    }

    fn record(&self, state: &mut RunState, action: Action, observer: &dyn RunObserver) {
        observer.on_action(&action);
        state.actions.push(action);
    }

    fn agent_loop(
        &self,
        state: &mut RunState,
        system: &str,
        observer: &dyn RunObserver,
    ) -> Result<()> {
        let max_turns = self.config.agent.max_turns;
        for turn in 1..=max_turns {
            observer.on_step(&format!("Agent turn {turn}/{max_turns}..."));
            state.turns = turn;

            let request = CompletionRequest {
                messages: &state.messages,
                system: Some(system),
                max_tokens: self.config.agent.max_tokens,
                temperature: self.config.agent.temperature,
            };
            let response = self
                .model
                .complete(&request)
                .with_context(|| format!("model completion failed on turn {turn}"))?;
            let calls = extract_tool_calls(&response);
            let finished_in_prose = calls.is_empty() && looks_done(&response);
            state.messages.push(Message::assistant(response));

            if calls.is_empty() {
                if finished_in_prose {
                    info!(turn, "model reported completion without a tool call");
                    state.done = true;
                    break;
                }
                debug!(turn, "no tool call, nudging");
                state.messages.push(Message::user(NUDGE_MESSAGE));
                continue;
            }

            let mut results = Vec::with_capacity(calls.len());
            let mut edited: Vec<String> = Vec::new();
            for call in &calls {
                observer.on_step(&format!("Executing tool: {}", call.name));
                let result = self.tools.execute(call);
                if let Some(path) = call.edited_path() {
                    if !edited.iter().any(|p| p == path) {
                        edited.push(path.to_string());
                    }
                }
                results.push(format!("{}: {}", call.name, result));
                self.record(
                    state,
                    Action::new(call.name.clone(), call.params.clone(), result),
                    observer,
                );
                if call.is_done() {
                    state.done = true;
                    break;
                }
            }
            state
                .messages
                .push(Message::user(format!("Tool results:\n{}", results.join("\n"))));

            if state.done {
                info!(turn, "model called done");
                break;
            }

            if !edited.is_empty() {
                observer.on_step("Running linters...");
                let lint = self.lint.run_relevant_linters(Some(&edited));
                if !lint.ok {
                    info!(turn, "lint failed, feeding back to model");
                    state.messages.push(Message::user(format!(
                        "Linter failed. Fix the issues:\n\n{}",
                        lint.output
                    )));
                }
            }
        }
        if !state.done {
            warn!(turns = state.turns, "turn cap reached without completion");
        }
        Ok(())
    }

    fn commit_and_push(&self, state: &mut RunState, observer: &dyn RunObserver) -> Result<()> {
        let slug = branch_slug(&state.task);
        observer.on_step(&format!(
            "Creating branch: {}{}",
            self.config.git.branch_prefix, slug
        ));
        let branch = self.git.create_branch(&slug)?;
        state.branch_name = Some(branch.clone());

        self.git
            .stage_and_commit(&commit_message(&state.task), None)?;
        info!(branch = %branch, "committed changes");

        observer.on_step("Local lint check before push...");
        let touched = state.touched_paths();
        let paths = (!touched.is_empty()).then_some(touched.as_slice());
        let lint = self.lint.run_relevant_linters(paths);
        if !lint.ok {
            warn!("post-commit lint found issues");
            state.ci_round = (state.ci_round + 1).min(self.config.git.max_ci_rounds);
        }

        observer.on_step("Pushing branch...");
        self.git.push(Some(&branch))?;
        info!(branch = %branch, "pushed branch");
        Ok(())
    }

    fn publish(&self, state: &mut RunState, request: &RunRequest, observer: &dyn RunObserver) {
        let token = request
            .github_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.config.github.token_resolved());

        observer.on_step("Creating pull request...");
        if let Some(url) = self.publisher.create(state, &request.task, token.as_deref()) {
            state.pr_url = Some(url.clone());
            self.record(state, Action::synthetic(CREATE_PR_ACTION, url), observer);
        }

        let Some(token) = token.filter(|_| self.config.github.wait_for_ci) else {
            return;
        };
        observer.on_step("Waiting for CI checks...");
        match self.wait_for_ci(state, &token) {
            Ok(summary) => {
                self.record(state, Action::synthetic(CI_STATUS_ACTION, summary), observer);
            }
            Err(err) => warn!(err = %format!("{err:#}"), "waiting for CI failed"),
        }
    }

    fn wait_for_ci(&self, state: &RunState, token: &str) -> Result<String> {
        let branch = state
            .branch_name
            .as_deref()
            .context("no branch to check")?;
        let github = &self.config.github;
        let remote_url = self.git.remote_url()?;
        let client = GitHubClient::from_remote_url(&github.api_base_url, token, &remote_url)?;
        let status = client.wait_for_checks(
            branch,
            Duration::from_secs(github.ci_timeout_secs),
            Duration::from_secs(github.ci_poll_secs),
        )?;
        for failure in &status.failures {
            info!(check = %failure.name, "CI check failed");
        }
        Ok(status.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingObserver, ScriptedModel, TestRepo, test_config, tool_block};
    use serde_json::json;

    fn orchestrator(root: &Path, model: ScriptedModel) -> Orchestrator<ScriptedModel> {
        Orchestrator::new(test_config(), root, model)
    }

    #[test]
    fn completion_phrase_ends_loop_without_tools() {
        let temp = tempfile::tempdir().expect("tempdir");
        let model = ScriptedModel::new(["Looks like the task is complete."]);
        let orch = orchestrator(temp.path(), model);
        let state = orch
            .run(&RunRequest::new("Check things"), &NoopObserver)
            .expect("run");
        assert!(state.done);
        assert_eq!(state.turns, 1);
        assert_eq!(orch.model().calls(), 1);
        assert!(state.actions.is_empty());
        assert!(state.branch_name.is_none());
    }

    #[test]
    fn prose_without_phrase_gets_one_nudge_per_turn() {
        let temp = tempfile::tempdir().expect("tempdir");
        let model = ScriptedModel::new([
            "I will think about it.",
            "All done here.",
        ]);
        let orch = orchestrator(temp.path(), model);
        let state = orch
            .run(&RunRequest::new("Think"), &NoopObserver)
            .expect("run");
        assert!(state.done);
        assert_eq!(state.turns, 2);
        let nudges = state
            .messages
            .iter()
            .filter(|m| m.content == NUDGE_MESSAGE)
            .count();
        assert_eq!(nudges, 1);
        assert_eq!(state.messages[0].content, "Task: Think\n\nProceed to complete this task.");
    }

    #[test]
    fn done_call_stops_remaining_calls_in_turn() {
        let temp = tempfile::tempdir().expect("tempdir");
        let reply = format!(
            "{}\n{}\n{}",
            tool_block("edit_file", json!({"path": "a.txt", "content": "a"})),
            tool_block("done", json!({"summary": "wrote a"})),
            tool_block("edit_file", json!({"path": "b.txt", "content": "b"})),
        );
        let orch = orchestrator(temp.path(), ScriptedModel::new([reply]));
        let observer = RecordingObserver::default();
        let state = orch.run(&RunRequest::new("Write a"), &observer).expect("run");

        assert!(state.done);
        let tools: Vec<&str> = state.actions.iter().map(|a| a.tool.as_str()).collect();
        assert_eq!(tools, vec!["edit_file", "done"]);
        assert!(!temp.path().join("b.txt").exists());
        assert_eq!(
            state.messages.last().expect("message").content,
            "Tool results:\nedit_file: Wrote a.txt\ndone: Done: wrote a"
        );
        assert_eq!(observer.actions().len(), 2);
    }

    #[test]
    fn turn_cap_is_not_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let model = ScriptedModel::repeating("Still working on the docstring.");
        let orch = orchestrator(temp.path(), model);
        let state = orch
            .run(&RunRequest::new("Add a docstring"), &NoopObserver)
            .expect("run");
        assert!(!state.done);
        assert_eq!(state.turns, 20);
        assert_eq!(orch.model().calls(), 20);
        assert!(state.branch_name.is_none());
        assert_eq!(state.phase, Phase::Finished);
    }

    #[test]
    fn provider_exhaustion_aborts_run() {
        let temp = tempfile::tempdir().expect("tempdir");
        let orch = orchestrator(temp.path(), ScriptedModel::failing("all providers down"));
        let err = orch
            .run(&RunRequest::new("Anything"), &NoopObserver)
            .unwrap_err();
        assert!(format!("{err:#}").contains("all providers down"));
    }

    #[test]
    fn system_prompt_carries_hydrated_task() {
        let temp = tempfile::tempdir().expect("tempdir");
        let orch = orchestrator(temp.path(), ScriptedModel::new(["all done"]));
        orch.run(
            &RunRequest::new("Rename foo").with_ticket("ENG-1"),
            &NoopObserver,
        )
        .expect("run");
        let system = orch.model().systems().pop().flatten().expect("system prompt");
        assert!(system.contains("# Task\n\nRename foo"));
        assert!(system.contains("# Ticket ID: ENG-1"));
        assert!(system.contains("## Tools"));
    }

    #[test]
    fn touched_paths_skip_failed_edits_and_duplicates() {
        let mut state = RunState::new("t", Path::new("/repo"));
        let edit = |path: &str, result: &str| {
            let mut params = serde_json::Map::new();
            params.insert("path".to_string(), json!(path));
            Action::new(EDIT_FILE, params, result)
        };
        state.actions.push(edit("a.py", "Wrote a.py"));
        state.actions.push(edit("../x", "Error: path escapes repository root: ../x"));
        state.actions.push(edit("a.py", "Wrote a.py"));
        state.actions.push(edit("b.py", "Applied diff to b.py"));
        assert_eq!(state.touched_paths(), vec!["a.py", "b.py"]);
    }

    #[test]
    fn git_phase_needs_done_and_changes() {
        let repo = TestRepo::new();
        let orch = orchestrator(repo.path(), ScriptedModel::new(["The task is done."]));
        let state = orch
            .run(&RunRequest::new("Nothing to change"), &NoopObserver)
            .expect("run");
        assert!(state.done);
        assert!(state.branch_name.is_none());
        assert_eq!(repo.git().current_branch().expect("branch"), "main");
    }
}
