//! Entry points for the shell: read-only snapshots plus the imperative
//! operations (submit, cancel, playlist selection and batch runs).

use anyhow::{Context, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::batch::{lock_batch, BatchCounters, BatchJob, BatchOrchestrator, SharedBatch};
use crate::cli::DownloadMode;
use crate::config::VdlConfig;
use crate::controller::{DownloadRequest, TaskController};
use crate::engine::{FileActions, FormatList, HttpEngine, RemoteEngine};
use crate::error::{BatchError, StoreError, TaskError};
use crate::notify::{Notification, NotificationId, NotificationSink};
use crate::store::TaskStore;
use crate::task::{HistoryEntry, Task, TaskId, TaskKind};
use crate::utils::validate_source;

pub struct Session {
    engine: Arc<dyn RemoteEngine>,
    store: TaskStore,
    sink: NotificationSink,
    controller: TaskController,
    orchestrator: BatchOrchestrator,
    playlist: Mutex<Option<SharedBatch>>,
}

impl Session {
    pub fn new(
        engine: Arc<dyn RemoteEngine>,
        files: Arc<dyn FileActions>,
        store: TaskStore,
        config: &VdlConfig,
    ) -> Self {
        let sink = NotificationSink::new();
        let controller = TaskController::new(
            engine.clone(),
            files,
            store.clone(),
            sink.clone(),
            config.notifications.clone(),
        );
        let orchestrator = BatchOrchestrator::new(
            controller.clone(),
            sink.clone(),
            config.notifications.clone(),
            config.batch_item_delay(),
        );
        Self {
            engine,
            store,
            sink,
            controller,
            orchestrator,
            playlist: Mutex::new(None),
        }
    }

    /// Session against the configured engine, with persisted history.
    pub fn connect(config: &VdlConfig) -> Result<Self> {
        let history_path = config.history_path()?;
        let store = TaskStore::open(&history_path)
            .with_context(|| format!("loading history from {}", history_path.display()))?;
        let engine = Arc::new(HttpEngine::new(&config.server_url));
        tracing::info!("using engine at {}", config.server_url);
        Ok(Self::new(engine.clone(), engine, store, config))
    }

    fn current_playlist(&self) -> MutexGuard<'_, Option<SharedBatch>> {
        self.playlist.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn active_tasks(&self) -> Vec<Task> {
        self.store.list_active()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.store.list_history()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.sink.list()
    }

    /// Snapshot of the loaded playlist, if any.
    pub fn playlist(&self) -> Option<BatchJob> {
        self.current_playlist()
            .as_ref()
            .map(|job| lock_batch(job).clone())
    }

    pub fn submit(&self, request: DownloadRequest) -> Result<TaskId, StoreError> {
        self.controller.submit(request)
    }

    pub fn cancel(&self, id: &str) -> bool {
        self.controller.cancel(id)
    }

    pub fn cancel_all(&self) -> usize {
        self.controller.cancel_all()
    }

    pub async fn list_formats(&self, url: &str) -> Result<FormatList, TaskError> {
        let url = validate_source(TaskKind::SingleVideo, url)?;
        Ok(self.engine.fetch_formats(&url).await?)
    }

    /// Fetch a playlist and make it the current batch, every item selected.
    pub async fn load_playlist(&self, url: &str) -> Result<BatchJob, TaskError> {
        let url = validate_source(TaskKind::PlaylistItem, url)?;
        if self.playlist().map_or(false, |job| job.is_running()) {
            return Err(TaskError::Validation(
                "a playlist batch is already running".into(),
            ));
        }
        let info = self.engine.playlist_info(&url).await?;
        let job = BatchJob::from_playlist(info);
        tracing::info!("loaded playlist '{}' ({} items)", job.title, job.items().len());
        *self.current_playlist() = Some(Arc::new(Mutex::new(job.clone())));
        Ok(job)
    }

    pub fn toggle_selection(&self, item_id: &str) -> Result<bool, BatchError> {
        let job = self
            .current_playlist()
            .clone()
            .ok_or_else(|| BatchError::UnknownItem(item_id.to_string()))?;
        let selected = lock_batch(&job).toggle_selection(item_id);
        selected
    }

    pub fn select_positions(&self, positions: &[usize]) -> Result<(), BatchError> {
        let job = self
            .current_playlist()
            .clone()
            .ok_or(BatchError::EmptySelection)?;
        let result = lock_batch(&job).select_positions(positions);
        result
    }

    /// Run the current playlist selection.
    pub async fn start_batch(
        &self,
        mode: DownloadMode,
        format_id: &str,
    ) -> Result<BatchCounters, BatchError> {
        let job = self
            .current_playlist()
            .clone()
            .ok_or(BatchError::EmptySelection)?;
        self.orchestrator.start_batch(&job, mode, format_id).await
    }

    pub fn delete_history(&self, id: &str) -> bool {
        self.store.delete_history(id)
    }

    pub fn clear_history(&self) {
        self.store.clear_history()
    }

    pub fn dismiss(&self, id: NotificationId) -> bool {
        self.sink.dismiss(id)
    }

    pub async fn trigger(&self, id: NotificationId, index: usize) -> bool {
        self.sink.trigger(id, index).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{PlaylistInfo, PlaylistVideo};
    use crate::task::Outcome;
    use crate::testing::{downloading, finished, Behavior, FakeEngine, FakeFiles};

    fn session(engine: Arc<FakeEngine>) -> Session {
        let config = VdlConfig {
            batch_item_delay_ms: 10,
            ..VdlConfig::default()
        };
        Session::new(
            engine,
            Arc::new(FakeFiles::default()),
            TaskStore::in_memory(),
            &config,
        )
    }

    fn info() -> PlaylistInfo {
        PlaylistInfo {
            playlist_title: "Mix".into(),
            videos: ["a", "b"]
                .iter()
                .map(|id| PlaylistVideo {
                    id: id.to_string(),
                    title: id.to_uppercase(),
                    url: format!("https://www.youtube.com/watch?v={}", id),
                    duration: Some(10.0),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn playlist_selection_then_batch() {
        let engine = FakeEngine::scripted(vec![Behavior::Events(vec![
            downloading(5, Some(5)),
            finished("/x/b.mp4"),
        ])]);
        engine.set_playlist(info());
        let session = session(engine.clone());

        assert_eq!(session.toggle_selection("a"), Err(BatchError::UnknownItem("a".into())));
        let job = session
            .load_playlist("https://www.youtube.com/playlist?list=PL1")
            .await
            .unwrap();
        assert_eq!(job.items().len(), 2);
        assert_eq!(session.toggle_selection("a"), Ok(false));

        let counters = session.start_batch(DownloadMode::Video, "best").await.unwrap();
        assert_eq!(counters.completed, 1);
        assert_eq!(counters.total_selected, 1);

        let history = session.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, TaskKind::PlaylistItem);
        assert_eq!(history[0].title.as_deref(), Some("B"));
        assert!(session.active_tasks().is_empty());
    }

    #[tokio::test]
    async fn playlist_errors_surface_as_remote() {
        let session = session(FakeEngine::scripted(vec![]));
        let err = session
            .load_playlist("https://www.youtube.com/watch?v=x")
            .await
            .unwrap_err();
        assert_eq!(err, TaskError::Remote("Not a playlist".into()));
        assert!(session.playlist().is_none());
        assert_eq!(
            session.start_batch(DownloadMode::Video, "best").await,
            Err(BatchError::EmptySelection)
        );
    }

    #[tokio::test]
    async fn format_listing_validates_first() {
        let engine = FakeEngine::scripted(vec![]);
        let session = session(engine.clone());
        assert!(matches!(
            session.list_formats("  ").await,
            Err(TaskError::Validation(_))
        ));
        assert!(engine.calls().is_empty());

        let formats = session.list_formats("https://example.com/v").await.unwrap();
        assert_eq!(formats.title, "Clip");
    }

    #[tokio::test]
    async fn cancel_moves_task_to_history() {
        let (engine, feed) = FakeEngine::with_held_channel();
        let session = session(engine);
        let id = session
            .submit(DownloadRequest::video("https://example.com/v", DownloadMode::Video, "best"))
            .unwrap();
        feed.send(downloading(1, Some(4))).unwrap();
        assert_eq!(session.active_tasks().len(), 1);

        assert!(session.cancel(&id));
        assert!(session.active_tasks().is_empty());
        assert_eq!(session.history()[0].status, Outcome::Cancelled);
        assert!(session
            .notifications()
            .iter()
            .any(|n| n.message.starts_with("Download cancelled")));
    }

    #[tokio::test]
    async fn history_maintenance() {
        let engine = FakeEngine::scripted(vec![
            Behavior::Events(vec![downloading(1, Some(1)), finished("/x/1.mp4")]),
            Behavior::Events(vec![downloading(1, Some(1)), finished("/x/2.mp4")]),
        ]);
        let session = session(engine);
        let first = session
            .controller
            .run(DownloadRequest::video("https://example.com/1", DownloadMode::Video, "best"))
            .await
            .unwrap();
        session
            .controller
            .run(DownloadRequest::video("https://example.com/2", DownloadMode::Video, "best"))
            .await
            .unwrap();
        assert_eq!(first.outcome, Outcome::Completed);
        assert_eq!(session.history().len(), 2);

        assert!(session.delete_history(&first.id));
        assert!(!session.delete_history(&first.id));
        assert_eq!(session.history().len(), 1);
        session.clear_history();
        assert!(session.history().is_empty());
    }
}
