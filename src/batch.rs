//! Playlist batches: a selection of playlist items downloaded strictly one
//! at a time, with a fixed pause between items.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::cli::DownloadMode;
use crate::config::NotificationConfig;
use crate::controller::{DownloadRequest, TaskController};
use crate::engine::{PlaylistInfo, PlaylistVideo};
use crate::error::BatchError;
use crate::notify::{NotificationSink, Severity};
use crate::task::{Outcome, TaskKind};

/// Running counters. Cancelled items are tracked separately and count
/// towards neither `completed` nor `failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounters {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total_selected: usize,
}

impl BatchCounters {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Completed => self.completed += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Cancelled => self.cancelled += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchJob {
    pub title: String,
    items: Vec<PlaylistVideo>,
    selected: HashSet<String>,
    running: bool,
    counters: BatchCounters,
}

/// A batch shared between the orchestrator and the shell.
pub type SharedBatch = Arc<Mutex<BatchJob>>;

pub fn lock_batch(job: &SharedBatch) -> MutexGuard<'_, BatchJob> {
    job.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BatchJob {
    /// New job with every item selected.
    pub fn new(title: impl Into<String>, items: Vec<PlaylistVideo>) -> Self {
        let selected = items.iter().map(|v| v.id.clone()).collect();
        Self {
            title: title.into(),
            items,
            selected,
            running: false,
            counters: BatchCounters::default(),
        }
    }

    pub fn from_playlist(info: PlaylistInfo) -> Self {
        Self::new(info.playlist_title, info.videos)
    }

    pub fn items(&self) -> &[PlaylistVideo] {
        &self.items
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selected.contains(id)
    }

    /// Selected items in playlist order.
    pub fn selected_items(&self) -> Vec<PlaylistVideo> {
        self.items
            .iter()
            .filter(|v| self.selected.contains(&v.id))
            .cloned()
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn counters(&self) -> BatchCounters {
        self.counters
    }

    fn unlocked(&self) -> Result<(), BatchError> {
        if self.running {
            Err(BatchError::SelectionLocked)
        } else {
            Ok(())
        }
    }

    /// Flip one item's selection; returns whether it is now selected.
    pub fn toggle_selection(&mut self, id: &str) -> Result<bool, BatchError> {
        self.unlocked()?;
        if !self.items.iter().any(|v| v.id == id) {
            return Err(BatchError::UnknownItem(id.to_string()));
        }
        if self.selected.remove(id) {
            Ok(false)
        } else {
            self.selected.insert(id.to_string());
            Ok(true)
        }
    }

    pub fn select_all(&mut self) -> Result<(), BatchError> {
        self.unlocked()?;
        self.selected = self.items.iter().map(|v| v.id.clone()).collect();
        Ok(())
    }

    pub fn clear_selection(&mut self) -> Result<(), BatchError> {
        self.unlocked()?;
        self.selected.clear();
        Ok(())
    }

    /// Replace the selection with the items at the given 1-based positions.
    pub fn select_positions(&mut self, positions: &[usize]) -> Result<(), BatchError> {
        self.unlocked()?;
        let mut selected = HashSet::new();
        for &pos in positions {
            let item = pos
                .checked_sub(1)
                .and_then(|i| self.items.get(i))
                .ok_or_else(|| BatchError::UnknownItem(pos.to_string()))?;
            selected.insert(item.id.clone());
        }
        self.selected = selected;
        Ok(())
    }
}

pub struct BatchOrchestrator {
    controller: TaskController,
    sink: NotificationSink,
    durations: NotificationConfig,
    item_delay: Duration,
}

impl BatchOrchestrator {
    pub fn new(
        controller: TaskController,
        sink: NotificationSink,
        durations: NotificationConfig,
        item_delay: Duration,
    ) -> Self {
        Self {
            controller,
            sink,
            durations,
            item_delay,
        }
    }

    /// Run every selected item to a terminal state, in order, one at a time.
    /// Item failures never stop the batch. The selection is frozen for the
    /// whole run.
    pub async fn start_batch(
        &self,
        job: &SharedBatch,
        mode: DownloadMode,
        format_id: &str,
    ) -> Result<BatchCounters, BatchError> {
        let (title, items) = {
            let mut job = lock_batch(job);
            if job.running {
                return Err(BatchError::AlreadyRunning);
            }
            let items = job.selected_items();
            if items.is_empty() {
                return Err(BatchError::EmptySelection);
            }
            job.running = true;
            job.counters = BatchCounters {
                total_selected: items.len(),
                ..BatchCounters::default()
            };
            (job.title.clone(), items)
        };
        tracing::info!("batch '{}': {} items selected", title, items.len());

        for (n, item) in items.iter().enumerate() {
            if n > 0 {
                tokio::time::sleep(self.item_delay).await;
            }

            let request = DownloadRequest {
                kind: TaskKind::PlaylistItem,
                source: item.url.clone(),
                mode,
                format_id: format_id.to_string(),
                title: Some(item.title.clone()).filter(|t| !t.is_empty()),
            };
            let outcome = match self.controller.run(request).await {
                Ok(report) => report.outcome,
                Err(e) => {
                    tracing::warn!("batch item {} not started: {}", item.id, e);
                    Outcome::Failed
                }
            };
            tracing::debug!("batch item {}/{} -> {:?}", n + 1, items.len(), outcome);
            lock_batch(job).counters.record(outcome);
        }

        let counters = {
            let mut job = lock_batch(job);
            job.running = false;
            job.counters
        };
        self.summarize(&title, counters);
        Ok(counters)
    }

    fn summarize(&self, title: &str, counters: BatchCounters) {
        let shown_for = Some(self.durations.batch_summary());
        if counters.failed == 0 {
            self.sink.show(
                format!("Downloaded {} videos from {}", counters.completed, title),
                Severity::Success,
                shown_for,
                Vec::new(),
            );
        } else {
            self.sink.show(
                format!(
                    "{}: {} completed, {} failed",
                    title, counters.completed, counters.failed
                ),
                Severity::Warning,
                shown_for,
                Vec::new(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ProgressEvent;
    use crate::engine::FileActions;
    use crate::store::TaskStore;
    use crate::testing::{downloading, finished, Behavior, FakeEngine, FakeFiles};
    use tokio::sync::mpsc;

    fn video(n: usize) -> PlaylistVideo {
        PlaylistVideo {
            id: format!("v{}", n),
            title: format!("Video {}", n),
            url: format!("https://www.youtube.com/watch?v=v{}", n),
            duration: None,
        }
    }

    fn playlist(n: usize) -> SharedBatch {
        Arc::new(Mutex::new(BatchJob::new(
            "Mix",
            (1..=n).map(video).collect(),
        )))
    }

    fn orchestrator(engine: Arc<FakeEngine>) -> (BatchOrchestrator, TaskController) {
        let files: Arc<dyn FileActions> = Arc::new(FakeFiles::default());
        let sink = NotificationSink::new();
        let controller = TaskController::new(
            engine,
            files,
            TaskStore::in_memory(),
            sink.clone(),
            NotificationConfig::default(),
        );
        let batch = BatchOrchestrator::new(
            controller.clone(),
            sink,
            NotificationConfig::default(),
            Duration::from_secs(1),
        );
        (batch, controller)
    }

    fn succeeds(n: u64) -> Behavior {
        Behavior::Events(vec![downloading(n, Some(10)), finished(&format!("/x/{}.mp4", n))])
    }

    #[test]
    fn selection_toggles_and_keeps_playlist_order() {
        let mut job = BatchJob::new("Mix", (1..=3).map(video).collect());
        assert_eq!(job.selected_items().len(), 3);
        assert_eq!(job.toggle_selection("v2"), Ok(false));
        let ids: Vec<_> = job.selected_items().into_iter().map(|v| v.id).collect();
        assert_eq!(ids, vec!["v1", "v3"]);
        assert_eq!(job.toggle_selection("v2"), Ok(true));
        assert_eq!(
            job.toggle_selection("nope"),
            Err(BatchError::UnknownItem("nope".into()))
        );

        job.clear_selection().unwrap();
        assert!(job.selected_items().is_empty());
        job.select_positions(&[3, 1]).unwrap();
        let ids: Vec<_> = job.selected_items().into_iter().map(|v| v.id).collect();
        assert_eq!(ids, vec!["v1", "v3"]);
        assert!(job.select_positions(&[0]).is_err());
        job.select_all().unwrap();
        assert!(job.is_selected("v2"));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_failure_runs_every_item_in_order() {
        let engine = FakeEngine::scripted(vec![
            succeeds(1),
            Behavior::Events(vec![ProgressEvent::Error {
                error: Some("Video unavailable".into()),
                message: None,
            }]),
            succeeds(3),
        ]);
        let (batch, controller) = orchestrator(engine.clone());
        let job = playlist(3);

        let counters = batch
            .start_batch(&job, DownloadMode::Video, "best")
            .await
            .unwrap();
        assert_eq!(
            counters,
            BatchCounters {
                completed: 2,
                failed: 1,
                cancelled: 0,
                total_selected: 3,
            }
        );

        let submits: Vec<_> = engine
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("submit:"))
            .collect();
        assert_eq!(
            submits,
            vec![
                "submit:https://www.youtube.com/watch?v=v1",
                "submit:https://www.youtube.com/watch?v=v2",
                "submit:https://www.youtube.com/watch?v=v3",
            ]
        );
        assert_eq!(engine.max_open_channels(), 1);
        assert!(controller.store().list_active().is_empty());
        assert_eq!(controller.store().list_history().len(), 3);
        assert!(!lock_batch(&job).is_running());
        assert_eq!(lock_batch(&job).counters(), counters);

        let summary = batch.sink.list().pop().unwrap();
        assert_eq!(summary.severity, Severity::Warning);
        assert_eq!(summary.message, "Mix: 2 completed, 1 failed");
    }

    #[tokio::test(start_paused = true)]
    async fn items_are_paced_by_the_delay() {
        let engine = FakeEngine::scripted(vec![succeeds(1), succeeds(2), succeeds(3)]);
        let (batch, _) = orchestrator(engine);
        let job = playlist(3);

        let started = tokio::time::Instant::now();
        let counters = batch
            .start_batch(&job, DownloadMode::Audio, "bestaudio")
            .await
            .unwrap();
        let elapsed = started.elapsed();
        assert_eq!(counters.completed, 3);
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(3));

        let summary = batch.sink.list().pop().unwrap();
        assert_eq!(summary.severity, Severity::Success);
        assert_eq!(summary.message, "Downloaded 3 videos from Mix");
    }

    #[tokio::test(start_paused = true)]
    async fn selection_locked_and_cancelled_item_not_counted() {
        let (feed, held) = mpsc::unbounded_channel();
        let engine = FakeEngine::scripted(vec![Behavior::Held(held), succeeds(2)]);
        let (batch, controller) = orchestrator(engine);
        let batch = Arc::new(batch);
        let job = playlist(2);

        let runner = {
            let batch = batch.clone();
            let job = job.clone();
            tokio::spawn(async move { batch.start_batch(&job, DownloadMode::Video, "best").await })
        };

        feed.send(downloading(1, Some(10))).unwrap();
        let id = loop {
            if let Some(task) = controller.store().list_active().first() {
                break task.id.clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };

        assert_eq!(
            lock_batch(&job).toggle_selection("v2"),
            Err(BatchError::SelectionLocked)
        );
        assert_eq!(
            batch.start_batch(&job, DownloadMode::Video, "best").await,
            Err(BatchError::AlreadyRunning)
        );

        assert!(controller.cancel(&id));
        let counters = runner.await.unwrap().unwrap();
        assert_eq!(counters.completed, 1);
        assert_eq!(counters.failed, 0);
        assert_eq!(counters.cancelled, 1);
        assert!(controller.store().list_active().is_empty());
        assert!(lock_batch(&job).toggle_selection("v2").is_ok());
    }

    #[tokio::test]
    async fn empty_selection_is_rejected() {
        let (batch, _) = orchestrator(FakeEngine::scripted(vec![]));
        let job = playlist(2);
        lock_batch(&job).clear_selection().unwrap();
        assert_eq!(
            batch.start_batch(&job, DownloadMode::Video, "best").await,
            Err(BatchError::EmptySelection)
        );
    }
}
