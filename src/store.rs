//! Active tasks plus the history log, behind a single writer lock.
//!
//! All mutation goes through `create_task`, `update_task` and
//! `finalize_task` (plus the history-maintenance calls). A reader never
//! sees a task missing from both collections because the move from the
//! active set into history happens under one write guard.

use anyhow::Result;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::StoreError;
use crate::history::{self, HistoryLog};
use crate::task::{HistoryEntry, Outcome, Task, TaskId, TaskPatch, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    Applied,
    /// The id is not in the active set (late event after finalization).
    NotActive,
    /// The patch would move the task along an edge that does not exist.
    Rejected { from: TaskStatus, to: TaskStatus },
}

#[derive(Debug, Default)]
struct Inner {
    active: Vec<Task>,
    history: HistoryLog,
}

#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    inner: Arc<RwLock<Inner>>,
}

impl TaskStore {
    /// Store with an in-memory history that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Store whose history is loaded from (and persisted to) `history_path`.
    pub fn open(history_path: &Path) -> Result<Self> {
        let history = HistoryLog::load(history_path)?;
        Ok(Self {
            inner: Arc::new(RwLock::new(Inner {
                active: Vec::new(),
                history,
            })),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_task(&self, task: Task) -> Result<TaskId, StoreError> {
        let mut inner = self.write();
        if inner.active.iter().any(|t| t.id == task.id) || inner.history.contains(&task.id) {
            return Err(StoreError::DuplicateId(task.id));
        }
        let id = task.id.clone();
        tracing::info!("task {} created ({:?}) for {}", id, task.kind, task.source);
        inner.active.push(task);
        Ok(id)
    }

    pub fn update_task(&self, id: &str, patch: TaskPatch) -> Update {
        let mut inner = self.write();
        let task = match inner.active.iter_mut().find(|t| t.id == id) {
            Some(task) => task,
            None => {
                tracing::debug!("ignoring update for inactive task {}", id);
                return Update::NotActive;
            }
        };

        if let Some(next) = patch.status {
            if !task.status.can_transition(next) {
                tracing::warn!(
                    "task {}: rejected transition {:?} -> {:?}",
                    id,
                    task.status,
                    next
                );
                return Update::Rejected {
                    from: task.status,
                    to: next,
                };
            }
        }
        task.apply(patch);
        Update::Applied
    }

    /// Move the task from the active set to the front of history.
    ///
    /// Returns `None` when the task is not active, so only the first of
    /// several racing finalizations takes effect.
    pub fn finalize_task(
        &self,
        id: &str,
        outcome: Outcome,
        filepath: Option<String>,
        error: Option<String>,
    ) -> Option<HistoryEntry> {
        let mut inner = self.write();
        let index = match inner.active.iter().position(|t| t.id == id) {
            Some(index) => index,
            None => {
                tracing::debug!("finalize for inactive task {} ignored", id);
                return None;
            }
        };

        let mut task = inner.active.remove(index);
        task.status = outcome.status();
        if outcome == Outcome::Failed {
            task.error_detail = error.clone();
        }
        let entry = HistoryEntry::from_task(task, outcome, filepath, error);
        inner.history.push_front(entry.clone());
        tracing::info!("task {} finalized as {:?}", id, outcome);

        Self::persist_locked(&inner.history);
        Some(entry)
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.read().active.iter().find(|t| t.id == id).cloned()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.read().active.iter().any(|t| t.id == id)
    }

    /// Active tasks in insertion order.
    pub fn list_active(&self) -> Vec<Task> {
        self.read().active.clone()
    }

    /// History, newest first.
    pub fn list_history(&self) -> Vec<HistoryEntry> {
        self.read().history.snapshot()
    }

    pub fn delete_history(&self, id: &str) -> bool {
        let mut inner = self.write();
        let removed = inner.history.remove(id);
        if removed {
            Self::persist_locked(&inner.history);
        }
        removed
    }

    pub fn clear_history(&self) {
        let mut inner = self.write();
        inner.history.clear();
        Self::persist_locked(&inner.history);
    }

    // Called with the write guard held so rewrites land in mutation order.
    fn persist_locked(history: &HistoryLog) {
        let Some(path) = history.path() else {
            return;
        };
        let result = history
            .to_json()
            .and_then(|json| history::persist(path, &json));
        if let Err(e) = result {
            tracing::warn!("failed to persist history to {}: {:#}", path.display(), e);
        }
    }
}
