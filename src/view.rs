//! Terminal rendering of store snapshots with indicatif.
//!
//! The view never mutates the store: it is handed snapshots on every tick
//! and reconciles one progress bar per active task.

use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;

use crate::notify::{Notification, Severity};
use crate::task::{HistoryEntry, Outcome, Task, TaskId};

pub const REFRESH: Duration = Duration::from_millis(100);

const CALCULATING: &str = "calculating…";

pub fn format_rate(rate: Option<u64>) -> String {
    match rate {
        Some(bytes) => format!("{}/s", HumanBytes(bytes)),
        None => CALCULATING.to_string(),
    }
}

pub fn format_eta(eta: Option<u64>) -> String {
    match eta {
        Some(secs) if secs >= 3600 => {
            format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
        Some(secs) => format!("{:02}:{:02}", secs / 60, secs % 60),
        None => CALCULATING.to_string(),
    }
}

/// Message shown next to a task's bar.
pub fn task_line(task: &Task) -> String {
    let mut line = format!(
        "{:<17} {:>14} eta {:>12}  {}",
        task.status.label(),
        format_rate(task.metrics.rate_bytes_per_sec),
        format_eta(task.metrics.eta_seconds),
        task.display_name()
    );
    if let Some(phase) = task.metadata_fields.get("phase") {
        line.push_str(&format!(" ({})", phase));
    }
    if let Some(peers) = task.metadata_fields.get("peers") {
        line.push_str(&format!(" [{} peers]", peers));
    }
    line
}

fn outcome_line(entry: &HistoryEntry) -> String {
    let name = entry
        .title
        .clone()
        .unwrap_or_else(|| crate::utils::placeholder_title(&entry.source));
    match entry.status {
        Outcome::Completed => match &entry.filepath {
            Some(path) => format!("Completed   {} -> {}", name, path),
            None => format!("Completed   {}", name),
        },
        Outcome::Failed => format!(
            "Failed      {}: {}",
            name,
            entry.error.as_deref().unwrap_or("unknown error")
        ),
        Outcome::Cancelled => format!("Cancelled   {}", name),
    }
}

fn notification_line(n: &Notification) -> String {
    let tag = match n.severity {
        Severity::Info => "info",
        Severity::Success => "done",
        Severity::Warning => "warn",
        Severity::Error => "error",
    };
    if n.actions.is_empty() {
        format!("[{}] {}", tag, n.message)
    } else {
        format!("[{}] {} ({})", tag, n.message, n.actions.join(" | "))
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=>-")
}

pub struct TaskView {
    multi_progress: MultiProgress,
    header_pb: ProgressBar,
    bars: HashMap<TaskId, ProgressBar>,
}

impl TaskView {
    pub fn new() -> Self {
        let multi_progress = MultiProgress::new();
        multi_progress.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));

        let header_pb = multi_progress.add(ProgressBar::new(0));
        header_pb.set_style(
            ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        Self {
            multi_progress,
            header_pb,
            bars: HashMap::new(),
        }
    }

    /// Reconcile bars with the current snapshots.
    pub fn render(&mut self, active: &[Task], history: &[HistoryEntry], notes: &[Notification]) {
        for task in active {
            let pb = self.bars.entry(task.id.clone()).or_insert_with(|| {
                let pb = self.multi_progress.add(ProgressBar::new(100));
                pb.set_style(bar_style());
                pb
            });
            pb.set_position(u64::from(task.progress_percent));
            pb.set_message(task_line(task));
        }

        let finished: Vec<TaskId> = self
            .bars
            .keys()
            .filter(|id| !active.iter().any(|t| &t.id == *id))
            .cloned()
            .collect();
        for id in finished {
            if let Some(pb) = self.bars.remove(&id) {
                match history.iter().find(|e| e.id == id) {
                    Some(entry) => {
                        if entry.status == Outcome::Completed {
                            pb.set_position(100);
                        }
                        pb.abandon_with_message(outcome_line(entry));
                    }
                    None => pb.finish_and_clear(),
                }
            }
        }

        let header = match notes.last() {
            Some(n) => format!("Active: {} | {}", active.len(), notification_line(n)),
            None => format!("Active: {}", active.len()),
        };
        self.header_pb.set_message(header);
        self.header_pb.tick();
    }

    pub fn finish(&self) {
        self.header_pb.finish();
    }

    /// Print a line above the bars without tearing them.
    pub fn println(&self, line: impl AsRef<str>) {
        if self.multi_progress.println(line.as_ref()).is_err() {
            eprintln!("{}", line.as_ref());
        }
    }
}

impl Default for TaskView {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::DownloadMode;
    use crate::task::{Metrics, TaskKind, TaskStatus};

    #[test]
    fn absent_metrics_render_as_calculating() {
        assert_eq!(format_rate(None), "calculating…");
        assert_eq!(format_eta(None), "calculating…");
        assert_eq!(format_rate(Some(512)), "512 B/s");
        assert_eq!(format_eta(Some(0)), "00:00");
        assert_eq!(format_eta(Some(65)), "01:05");
        assert_eq!(format_eta(Some(3725)), "1:02:05");
    }

    #[test]
    fn task_line_shows_status_metrics_and_name() {
        let mut task = Task::new(
            "t".into(),
            TaskKind::SingleVideo,
            "https://www.youtube.com/watch?v=abc",
            DownloadMode::Video,
            "best",
        );
        task.status = TaskStatus::Downloading;
        task.metrics = Metrics {
            rate_bytes_per_sec: None,
            eta_seconds: Some(5),
        };
        let line = task_line(&task);
        assert!(line.starts_with("Downloading"));
        assert!(line.contains("calculating…"));
        assert!(line.contains("00:05"));
        assert!(line.ends_with("abc"));
    }

    #[test]
    fn notification_line_lists_actions() {
        let n = Notification {
            id: 1,
            message: "Download complete: Clip".into(),
            severity: Severity::Success,
            duration: None,
            actions: vec!["Open file".into(), "Show in folder".into()],
        };
        assert_eq!(
            notification_line(&n),
            "[done] Download complete: Clip (Open file | Show in folder)"
        );
    }
}
