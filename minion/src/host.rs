//! Host layer: a run registry and background runs.
//!
//! The orchestrator itself is blocking and owns one [`RunState`] per call. Hosts
//! that accept several tasks (a server, a bot) use [`spawn_run`] to execute each
//! on its own thread with its own orchestrator, recording progress in a
//! [`RunStore`]. Runs against the same working copy are serialized through
//! [`WorkspaceLocks`], since git mutates the checkout in place.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::text::truncate_chars;
use crate::core::types::Action;
use crate::llm::CompletionModel;
use crate::orchestrator::{Orchestrator, RunObserver, RunRequest, RunState};

/// Results kept per action in a run record.
const ACTION_RESULT_CHARS: usize = 200;
/// Actions copied into a finished run's summary.
const SUMMARY_RECENT_ACTIONS: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Finished,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Finished => "finished",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool name and (truncated) result of one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionLogEntry {
    pub tool: String,
    pub result: String,
}

impl From<&Action> for ActionLogEntry {
    fn from(action: &Action) -> Self {
        Self {
            tool: action.tool.clone(),
            result: truncate_chars(&action.result, ACTION_RESULT_CHARS).to_string(),
        }
    }
}

/// Outcome of a finished run, without the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub done: bool,
    pub branch_name: Option<String>,
    pub pr_url: Option<String>,
    pub ci_round: u32,
    pub turns: u32,
    pub actions_count: usize,
    pub recent_actions: Vec<ActionLogEntry>,
}

impl From<&RunState> for RunSummary {
    fn from(state: &RunState) -> Self {
        let skip = state.actions.len().saturating_sub(SUMMARY_RECENT_ACTIONS);
        Self {
            done: state.done,
            branch_name: state.branch_name.clone(),
            pr_url: state.pr_url.clone(),
            ci_round: state.ci_round,
            turns: state.turns,
            actions_count: state.actions.len(),
            recent_actions: state.actions[skip..].iter().map(ActionLogEntry::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRecord {
    pub id: String,
    pub task: String,
    pub repo: PathBuf,
    pub status: RunStatus,
    /// Last phase the run reported.
    pub phase: Option<String>,
    pub summary: Option<RunSummary>,
    pub error: Option<String>,
    /// Every action as it happened.
    pub actions_log: Vec<ActionLogEntry>,
}

impl RunRecord {
    pub fn queued(task: &str, repo: &Path) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task: task.to_string(),
            repo: repo.to_path_buf(),
            status: RunStatus::Queued,
            phase: None,
            summary: None,
            error: None,
            actions_log: Vec::new(),
        }
    }
}

/// Registry of runs. Each record has a single writer: the thread executing it.
pub trait RunStore: Send + Sync {
    fn get(&self, id: &str) -> Option<RunRecord>;

    fn put(&self, record: RunRecord);

    /// Newest first.
    fn list(&self) -> Vec<RunRecord>;
}

/// Read-modify-write of one record; a missing id is ignored.
pub fn update_record(store: &dyn RunStore, id: &str, apply: impl FnOnce(&mut RunRecord)) {
    match store.get(id) {
        Some(mut record) => {
            apply(&mut record);
            store.put(record);
        }
        None => warn!(run_id = id, "run record disappeared"),
    }
}

#[derive(Default)]
struct Registry {
    records: HashMap<String, RunRecord>,
    order: Vec<String>,
}

/// Process-local [`RunStore`]. Records live as long as the store.
#[derive(Default)]
pub struct InMemoryRunStore {
    inner: Mutex<Registry>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for InMemoryRunStore {
    fn get(&self, id: &str) -> Option<RunRecord> {
        let registry = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        registry.records.get(id).cloned()
    }

    fn put(&self, record: RunRecord) {
        let mut registry = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !registry.records.contains_key(&record.id) {
            registry.order.push(record.id.clone());
        }
        registry.records.insert(record.id.clone(), record);
    }

    fn list(&self) -> Vec<RunRecord> {
        let registry = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        registry
            .order
            .iter()
            .rev()
            .filter_map(|id| registry.records.get(id).cloned())
            .collect()
    }
}

/// One mutex per canonical working-copy path. Cloning shares the table.
#[derive(Clone, Default)]
pub struct WorkspaceLocks {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl WorkspaceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock guarding `repo`. Paths that resolve to the same directory share it.
    pub fn lock_for(&self, repo: &Path) -> Result<Arc<Mutex<()>>> {
        let key = repo
            .canonicalize()
            .with_context(|| format!("canonicalize {}", repo.display()))?;
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(locks.entry(key).or_default()))
    }
}

/// Mirrors phase changes and actions into the run's record.
pub struct StoreObserver {
    store: Arc<dyn RunStore>,
    run_id: String,
}

impl StoreObserver {
    pub fn new(store: Arc<dyn RunStore>, run_id: impl Into<String>) -> Self {
        Self {
            store,
            run_id: run_id.into(),
        }
    }
}

impl RunObserver for StoreObserver {
    fn on_phase(&self, phase: &str) {
        update_record(self.store.as_ref(), &self.run_id, |record| {
            record.phase = Some(phase.to_string());
        });
    }

    fn on_action(&self, action: &Action) {
        update_record(self.store.as_ref(), &self.run_id, |record| {
            record.actions_log.push(ActionLogEntry::from(action));
        });
    }
}

/// A run executing on a background thread.
pub struct RunHandle {
    id: String,
    thread: JoinHandle<()>,
}

impl RunHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the run. Its outcome is in the store, including runs that
    /// panicked; this only fails if the store itself panicked.
    pub fn join(self) -> Result<()> {
        self.thread
            .join()
            .map_err(|_| anyhow!("run {} panicked", self.id))
    }
}

/// Register `request` as queued and execute it on a new thread.
///
/// The thread waits for the workspace lock of `repo_root`, builds its own
/// orchestrator with `factory`, and writes `finished` or `failed` back into
/// `store`. A failed factory or a panic during the run counts as a failed run.
pub fn spawn_run<M, F>(
    store: Arc<dyn RunStore>,
    locks: &WorkspaceLocks,
    repo_root: &Path,
    request: RunRequest,
    factory: F,
) -> Result<RunHandle>
where
    M: CompletionModel + 'static,
    F: FnOnce() -> Result<Orchestrator<M>> + Send + 'static,
{
    let lock = locks.lock_for(repo_root)?;
    let record = RunRecord::queued(&request.task, repo_root);
    let id = record.id.clone();
    store.put(record);

    let run_id = id.clone();
    let thread = std::thread::Builder::new()
        .name(format!("minion-run-{}", truncate_chars(&id, 8)))
        .spawn(move || {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            update_record(store.as_ref(), &run_id, |record| {
                record.status = RunStatus::Running;
            });
            info!(run_id = %run_id, "run started");

            let observer = StoreObserver::new(Arc::clone(&store), run_id.clone());
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                factory().and_then(|orchestrator| orchestrator.run(&request, &observer))
            }))
            .unwrap_or_else(|payload| {
                Err(anyhow!("run panicked: {}", panic_message(payload.as_ref())))
            });
            match outcome {
                Ok(state) => {
                    info!(run_id = %run_id, done = state.done, "run finished");
                    update_record(store.as_ref(), &run_id, |record| {
                        record.status = RunStatus::Finished;
                        record.summary = Some(RunSummary::from(&state));
                    });
                }
                Err(err) => {
                    warn!(run_id = %run_id, err = %format!("{err:#}"), "run failed");
                    update_record(store.as_ref(), &run_id, |record| {
                        record.status = RunStatus::Failed;
                        record.error = Some(format!("{err:#}"));
                    });
                }
            }
        })
        .context("spawn run thread")?;

    Ok(RunHandle { id, thread })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}
