//! Bounded, newest-first log of finished tasks.
//!
//! The whole log is one JSON array on disk. It is read once at startup and
//! rewritten in full after every mutation.

use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use crate::task::HistoryEntry;

pub const MAX_HISTORY: usize = 500;

#[derive(Debug, Default)]
pub struct HistoryLog {
    entries: VecDeque<HistoryEntry>,
    path: Option<PathBuf>,
}

impl HistoryLog {
    /// In-memory log with no backing file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the log from `path`. A missing file yields an empty log; an
    /// unreadable one is an error so it is never silently overwritten.
    pub fn load(path: &Path) -> Result<Self> {
        let mut entries: VecDeque<HistoryEntry> = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read history file {:?}", path))?;
            if content.trim().is_empty() {
                VecDeque::new()
            } else {
                serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse history file {:?}", path))?
            }
        } else {
            VecDeque::new()
        };
        entries.truncate(MAX_HISTORY);
        tracing::debug!("loaded {} history entries from {}", entries.len(), path.display());

        Ok(Self {
            entries,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Insert at the front, evicting the oldest entry past the cap.
    pub fn push_front(&mut self, entry: HistoryEntry) {
        self.entries.push_front(entry);
        while self.entries.len() > MAX_HISTORY {
            if let Some(evicted) = self.entries.pop_back() {
                tracing::debug!("history full, evicted {}", evicted.id);
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Serialized form written by [`HistoryLog::persist`].
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.entries)?)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Rewrite the history file with `json`. Writes to a sibling temp file first
/// so a crash mid-write leaves the previous log intact.
pub fn persist(path: &Path, json: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).context("Failed to create history directory")?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).context("Failed to write history file")?;
    fs::rename(&tmp, path).context("Failed to replace history file")?;
    Ok(())
}
