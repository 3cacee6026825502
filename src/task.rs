use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cli::DownloadMode;

pub type TaskId = String;

pub fn new_task_id() -> TaskId {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    SingleVideo,
    PlaylistItem,
    Torrent,
}

/// Lifecycle of a task:
/// `submitted -> metadata-pending -> downloading -> {completed | failed | cancelled}`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Submitted,
    MetadataPending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    ///
    /// `submitted` may only reach `failed` (validation, transport or an
    /// immediate remote rejection) or `cancelled` (user) directly; completion
    /// always goes through an intermediate state.
    pub fn can_transition(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Submitted, MetadataPending | Downloading | Failed | Cancelled) => true,
            (MetadataPending, MetadataPending | Downloading) => true,
            (Downloading, Downloading) => true,
            (MetadataPending | Downloading, Completed | Failed | Cancelled) => true,
            _ => false,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::Submitted => "Submitted",
            TaskStatus::MetadataPending => "Fetching metadata",
            TaskStatus::Downloading => "Downloading",
            TaskStatus::Completed => "Completed",
            TaskStatus::Failed => "Failed",
            TaskStatus::Cancelled => "Cancelled",
        }
    }
}

/// Terminal result recorded in history.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Completed,
    Failed,
    Cancelled,
}

impl Outcome {
    pub fn status(self) -> TaskStatus {
        match self {
            Outcome::Completed => TaskStatus::Completed,
            Outcome::Failed => TaskStatus::Failed,
            Outcome::Cancelled => TaskStatus::Cancelled,
        }
    }
}

/// Last observed transfer metrics. Both are overwritten together on every
/// progress event; `None` means the engine did not report a value.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metrics {
    pub rate_bytes_per_sec: Option<u64>,
    pub eta_seconds: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    /// Source URL, or magnet link for torrents.
    pub source: String,
    pub mode: DownloadMode,
    pub selected_format: String,
    pub status: TaskStatus,
    pub progress_percent: u8,
    pub metrics: Metrics,
    pub title: Option<String>,
    pub total_bytes: Option<u64>,
    pub metadata_fields: BTreeMap<String, String>,
    pub error_detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        id: TaskId,
        kind: TaskKind,
        source: impl Into<String>,
        mode: DownloadMode,
        selected_format: impl Into<String>,
    ) -> Self {
        Self {
            id,
            kind,
            source: source.into(),
            mode,
            selected_format: selected_format.into(),
            status: TaskStatus::Submitted,
            progress_percent: 0,
            metrics: Metrics::default(),
            title: None,
            total_bytes: None,
            metadata_fields: BTreeMap::new(),
            error_detail: None,
            created_at: Utc::now(),
        }
    }

    /// Merge a patch into this task. Source, format and id are never touched.
    pub fn apply(&mut self, patch: TaskPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(pct) = patch.progress_percent {
            // Out-of-order events must not move the bar backwards.
            self.progress_percent = self.progress_percent.max(pct.min(100));
        }
        if let Some(metrics) = patch.metrics {
            self.metrics = metrics;
        }
        if let Some(title) = patch.title {
            self.title = Some(title);
        }
        if let Some(total) = patch.total_bytes {
            self.total_bytes = Some(total);
        }
        for (key, value) in patch.metadata {
            self.metadata_fields.insert(key, value);
        }
    }

    /// Title if known, otherwise a short form of the source.
    pub fn display_name(&self) -> String {
        match &self.title {
            Some(title) => title.clone(),
            None => crate::utils::placeholder_title(&self.source),
        }
    }
}

/// Partial update for an active task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub progress_percent: Option<u8>,
    pub metrics: Option<Metrics>,
    pub title: Option<String>,
    pub total_bytes: Option<u64>,
    pub metadata: Vec<(String, String)>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Immutable snapshot of a task at terminal time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: TaskId,
    pub kind: TaskKind,
    pub source: String,
    pub mode: DownloadMode,
    pub selected_format: String,
    pub title: Option<String>,
    pub status: Outcome,
    pub filepath: Option<String>,
    pub total_bytes: Option<u64>,
    pub progress_percent: u8,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn from_task(
        task: Task,
        outcome: Outcome,
        filepath: Option<String>,
        error: Option<String>,
    ) -> Self {
        let progress_percent = match outcome {
            Outcome::Completed => 100,
            _ => task.progress_percent,
        };
        Self {
            id: task.id,
            kind: task.kind,
            source: task.source,
            mode: task.mode,
            selected_format: task.selected_format,
            title: task.title,
            status: outcome,
            filepath,
            total_bytes: task.total_bytes,
            progress_percent,
            error: error.or(task.error_detail),
            completed_at: Utc::now(),
        }
    }
}

/// `round(downloaded / total * 100)`, or 0 when the total is unknown or zero.
pub fn progress_percent(downloaded_bytes: u64, total_bytes: Option<u64>) -> u8 {
    match total_bytes {
        Some(total) if total > 0 => {
            let pct = (downloaded_bytes as f64 / total as f64) * 100.0;
            pct.round().clamp(0.0, 100.0) as u8
        }
        _ => 0,
    }
}

/// Percentage reported directly by the engine (torrents), clamped to 0..=100.
pub fn percent_from_engine(progress: f64) -> u8 {
    if progress.is_finite() {
        progress.round().clamp(0.0, 100.0) as u8
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(
            "t1".into(),
            TaskKind::SingleVideo,
            "https://www.youtube.com/watch?v=abc",
            DownloadMode::Video,
            "best",
        )
    }

    #[test]
    fn percent_from_bytes() {
        assert_eq!(progress_percent(250, Some(1000)), 25);
        assert_eq!(progress_percent(1, Some(3)), 33);
        assert_eq!(progress_percent(2, Some(3)), 67);
        assert_eq!(progress_percent(1000, Some(1000)), 100);
        assert_eq!(progress_percent(5000, Some(1000)), 100);
        assert_eq!(progress_percent(250, None), 0);
        assert_eq!(progress_percent(250, Some(0)), 0);
    }

    #[test]
    fn percent_from_engine_is_clamped() {
        assert_eq!(percent_from_engine(42.4), 42);
        assert_eq!(percent_from_engine(99.6), 100);
        assert_eq!(percent_from_engine(120.0), 100);
        assert_eq!(percent_from_engine(-3.0), 0);
        assert_eq!(percent_from_engine(f64::NAN), 0);
    }

    #[test]
    fn lifecycle_edges() {
        use TaskStatus::*;
        assert!(Submitted.can_transition(MetadataPending));
        assert!(Submitted.can_transition(Downloading));
        assert!(Submitted.can_transition(Failed));
        assert!(Submitted.can_transition(Cancelled));
        assert!(!Submitted.can_transition(Completed));
        assert!(MetadataPending.can_transition(Downloading));
        assert!(!Downloading.can_transition(MetadataPending));
        assert!(Downloading.can_transition(Downloading));
        assert!(Downloading.can_transition(Completed));
        for terminal in [Completed, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Submitted, MetadataPending, Downloading, Completed, Failed, Cancelled] {
                assert!(!terminal.can_transition(next));
            }
        }
    }

    #[test]
    fn apply_keeps_progress_monotonic_and_identity_fixed() {
        let mut t = task();
        t.apply(TaskPatch {
            status: Some(TaskStatus::Downloading),
            progress_percent: Some(60),
            ..TaskPatch::default()
        });
        t.apply(TaskPatch {
            progress_percent: Some(40),
            metrics: Some(Metrics {
                rate_bytes_per_sec: Some(1024),
                eta_seconds: None,
            }),
            ..TaskPatch::default()
        });
        assert_eq!(t.progress_percent, 60);
        assert_eq!(t.metrics.rate_bytes_per_sec, Some(1024));
        assert_eq!(t.source, "https://www.youtube.com/watch?v=abc");
        assert_eq!(t.selected_format, "best");
    }

    #[test]
    fn history_entry_from_completed_task() {
        let mut t = task();
        t.title = Some("Clip".into());
        let entry = HistoryEntry::from_task(t, Outcome::Completed, Some("/x/a.mp4".into()), None);
        assert_eq!(entry.status, Outcome::Completed);
        assert_eq!(entry.filepath.as_deref(), Some("/x/a.mp4"));
        assert_eq!(entry.progress_percent, 100);
        assert!(entry.error.is_none());
    }

    #[test]
    fn status_serializes_kebab_case() {
        let json = serde_json::to_string(&TaskStatus::MetadataPending).unwrap();
        assert_eq!(json, "\"metadata-pending\"");
        let kind = serde_json::to_string(&TaskKind::PlaylistItem).unwrap();
        assert_eq!(kind, "\"playlist-item\"");
    }
}
