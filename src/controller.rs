//! Drives one task from submission to a terminal state.
//!
//! The controller creates the task record, opens the task's progress
//! channel, asks the engine to start, then folds incoming events into the
//! store until a terminal event arrives. The channel is closed on every
//! exit path. User cancellation finalizes the task immediately and only
//! then tells the engine, without waiting for it.

use futures::FutureExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::channel::{whole, ProgressChannel, ProgressEvent};
use crate::cli::DownloadMode;
use crate::config::NotificationConfig;
use crate::engine::{FileActions, RemoteEngine, SubmitRequest};
use crate::error::{StoreError, TaskError};
use crate::notify::{ActionEffect, NotificationAction, NotificationSink, Severity};
use crate::store::{TaskStore, Update};
use crate::task::{
    new_task_id, percent_from_engine, progress_percent, Metrics, Outcome, Task, TaskId, TaskKind,
    TaskPatch, TaskStatus,
};
use crate::utils::validate_source;

/// What the user asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    pub kind: TaskKind,
    pub source: String,
    pub mode: DownloadMode,
    pub format_id: String,
    /// Known title (playlist items), shown before the engine reports one.
    pub title: Option<String>,
}

impl DownloadRequest {
    pub fn video(url: impl Into<String>, mode: DownloadMode, format_id: impl Into<String>) -> Self {
        Self {
            kind: TaskKind::SingleVideo,
            source: url.into(),
            mode,
            format_id: format_id.into(),
            title: None,
        }
    }

    pub fn torrent(magnet: impl Into<String>) -> Self {
        Self {
            kind: TaskKind::Torrent,
            source: magnet.into(),
            mode: DownloadMode::Video,
            format_id: String::new(),
            title: None,
        }
    }
}

/// How a controller run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub id: TaskId,
    pub outcome: Outcome,
    pub filepath: Option<String>,
    pub error: Option<String>,
}

enum Step {
    Continue,
    Done(TaskReport),
    /// Task left the active set underneath us (user cancel).
    Inactive,
}

struct Running {
    token: CancellationToken,
    kind: TaskKind,
}

#[derive(Clone)]
pub struct TaskController {
    engine: Arc<dyn RemoteEngine>,
    files: Arc<dyn FileActions>,
    store: TaskStore,
    sink: NotificationSink,
    durations: NotificationConfig,
    running: Arc<Mutex<HashMap<TaskId, Running>>>,
}

impl TaskController {
    pub fn new(
        engine: Arc<dyn RemoteEngine>,
        files: Arc<dyn FileActions>,
        store: TaskStore,
        sink: NotificationSink,
        durations: NotificationConfig,
    ) -> Self {
        Self {
            engine,
            files,
            store,
            sink,
            durations,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    fn running(&self) -> MutexGuard<'_, HashMap<TaskId, Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the task and run it in the background. The task is visible in
    /// the store when this returns.
    pub fn submit(&self, request: DownloadRequest) -> Result<TaskId, StoreError> {
        let (id, token) = self.begin(&request)?;
        let controller = self.clone();
        let task_id = id.clone();
        tokio::spawn(async move {
            controller.drive(task_id, request, token).await;
        });
        Ok(id)
    }

    /// Record the task and drive it to a terminal state.
    pub async fn run(&self, request: DownloadRequest) -> Result<TaskReport, StoreError> {
        let (id, token) = self.begin(&request)?;
        Ok(self.drive(id, request, token).await)
    }

    fn begin(&self, request: &DownloadRequest) -> Result<(TaskId, CancellationToken), StoreError> {
        let mut task = Task::new(
            new_task_id(),
            request.kind,
            request.source.trim(),
            request.mode,
            request.format_id.clone(),
        );
        task.title = request.title.clone();

        let id = self.store.create_task(task)?;
        let token = CancellationToken::new();
        self.running().insert(
            id.clone(),
            Running {
                token: token.clone(),
                kind: request.kind,
            },
        );
        Ok((id, token))
    }

    async fn drive(&self, id: TaskId, request: DownloadRequest, token: CancellationToken) -> TaskReport {
        let report = self.drive_inner(&id, request, &token).await;
        self.running().remove(&id);
        report
    }

    async fn drive_inner(
        &self,
        id: &str,
        request: DownloadRequest,
        token: &CancellationToken,
    ) -> TaskReport {
        let source = match validate_source(request.kind, &request.source) {
            Ok(source) => source,
            Err(e) => return self.fail(id, e),
        };

        // Channel first, so events emitted right after acceptance are not lost.
        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return cancelled_report(id),
            opened = self.engine.open_channel(id, request.kind) => opened,
        };
        let mut channel = match opened {
            Ok(channel) => channel,
            Err(e) => return self.fail(id, e.into()),
        };

        let submit = SubmitRequest {
            id: id.to_string(),
            kind: request.kind,
            source,
            mode: request.mode,
            format_id: request.format_id,
        };
        let accepted = tokio::select! {
            biased;
            _ = token.cancelled() => {
                channel.close().await;
                return cancelled_report(id);
            }
            accepted = self.engine.submit(&submit) => accepted,
        };
        if let Err(e) = accepted {
            channel.close().await;
            return self.fail(id, e.into());
        }

        if let Some(task) = self.store.get(id) {
            self.sink.info(
                format!("Download started: {}", task.display_name()),
                self.durations.started(),
            );
        }

        let report = self.pump(id, channel.as_mut(), token).await;
        channel.close().await;
        report
    }

    /// Apply channel events until the task reaches a terminal state.
    async fn pump(
        &self,
        id: &str,
        channel: &mut dyn ProgressChannel,
        token: &CancellationToken,
    ) -> TaskReport {
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return cancelled_report(id),
                next = channel.next_event() => next,
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => return self.fail(id, TaskError::Transport(e.0)),
                None => {
                    return self.fail(
                        id,
                        TaskError::Transport(
                            "progress channel closed before the download finished".into(),
                        ),
                    )
                }
            };

            match self.apply_event(id, &event) {
                Step::Continue => {}
                Step::Done(report) => return report,
                Step::Inactive => {
                    tracing::debug!("task {} no longer active, dropping channel", id);
                    return cancelled_report(id);
                }
            }
        }
    }

    fn apply_event(&self, id: &str, event: &ProgressEvent) -> Step {
        let task = match self.store.get(id) {
            Some(task) => task,
            None => return Step::Inactive,
        };

        let patch = match event {
            ProgressEvent::FetchingMetadata { peers } => {
                let mut patch = pending_patch(task.status);
                if let Some(peers) = peers {
                    patch.metadata.push(("peers".into(), peers.to_string()));
                }
                patch
            }
            ProgressEvent::Metadata {
                name,
                total_size,
                num_files,
            } => {
                let mut patch = pending_patch(task.status);
                patch.title = name.clone();
                patch.total_bytes = whole(*total_size).filter(|t| *t > 0);
                if let Some(n) = num_files {
                    patch.metadata.push(("num_files".into(), n.to_string()));
                }
                patch
            }
            ProgressEvent::Downloading(d) => {
                let total = whole(d.total_bytes).filter(|t| *t > 0);
                let percent = match (whole(d.downloaded_bytes), d.progress) {
                    (Some(done), _) => progress_percent(done, total.or(task.total_bytes)),
                    (None, Some(pct)) => percent_from_engine(pct),
                    (None, None) => 0,
                };
                let mut patch = TaskPatch {
                    status: Some(TaskStatus::Downloading),
                    progress_percent: Some(percent),
                    metrics: Some(Metrics {
                        rate_bytes_per_sec: whole(d.speed).or(whole(d.download_rate)),
                        eta_seconds: whole(d.eta),
                    }),
                    total_bytes: total,
                    ..TaskPatch::default()
                };
                if let Some(peers) = d.num_peers {
                    patch.metadata.push(("peers".into(), peers.to_string()));
                }
                if let Some(seeds) = d.num_seeds {
                    patch.metadata.push(("seeds".into(), seeds.to_string()));
                }
                patch
            }
            ProgressEvent::Processing { message } => {
                let mut patch = TaskPatch::status(TaskStatus::Downloading);
                patch.metadata.push((
                    "phase".into(),
                    message.clone().unwrap_or_else(|| "Processing".into()),
                ));
                patch
            }
            ProgressEvent::Finished { .. } => {
                if task.status == TaskStatus::Submitted {
                    // The engine skipped progress reporting; record a full
                    // transfer before completing.
                    let mut patch = TaskPatch::status(TaskStatus::Downloading);
                    patch.progress_percent = Some(100);
                    self.store.update_task(id, patch);
                }
                return self.complete(id, event.output_path());
            }
            ProgressEvent::Error { .. } => {
                let detail = event.error_text().unwrap_or_default();
                return Step::Done(self.fail(id, TaskError::Remote(detail)));
            }
            ProgressEvent::Cancelled => {
                return Step::Done(
                    self.fail(id, TaskError::Remote("cancelled by remote engine".into())),
                );
            }
            ProgressEvent::Unknown => return Step::Continue,
        };

        match self.store.update_task(id, patch) {
            Update::Applied | Update::Rejected { .. } => Step::Continue,
            Update::NotActive => Step::Inactive,
        }
    }

    fn complete(&self, id: &str, filepath: Option<String>) -> Step {
        let entry = match self
            .store
            .finalize_task(id, Outcome::Completed, filepath.clone(), None)
        {
            Some(entry) => entry,
            None => return Step::Inactive,
        };

        let name = entry
            .title
            .clone()
            .unwrap_or_else(|| crate::utils::placeholder_title(&entry.source));
        let actions = vec![
            self.file_action("Open file", FileAction::Open, filepath.clone()),
            self.file_action("Show in folder", FileAction::Reveal, filepath.clone()),
        ];
        self.sink.show(
            format!("Download complete: {}", name),
            Severity::Success,
            None,
            actions,
        );

        Step::Done(TaskReport {
            id: id.to_string(),
            outcome: Outcome::Completed,
            filepath,
            error: None,
        })
    }

    /// Finalize as failed and raise the single failure notification.
    ///
    /// If the task was already finalized (a user cancel won the race), the
    /// recorded outcome is reported instead.
    fn fail(&self, id: &str, error: TaskError) -> TaskReport {
        let detail = error.to_string();
        let entry = match self
            .store
            .finalize_task(id, Outcome::Failed, None, Some(detail.clone()))
        {
            Some(entry) => entry,
            None => {
                tracing::debug!("task {} already finalized, dropping failure: {}", id, detail);
                return self.recorded_report(id);
            }
        };

        tracing::warn!("task {} failed: {}", id, detail);
        let name = entry
            .title
            .clone()
            .unwrap_or_else(|| crate::utils::placeholder_title(&entry.source));
        self.sink.error(
            format!("Download failed: {}: {}", name, detail),
            self.durations.failed(),
        );
        TaskReport {
            id: id.to_string(),
            outcome: Outcome::Failed,
            filepath: None,
            error: Some(detail),
        }
    }

    /// Report for a task that already left the active set.
    fn recorded_report(&self, id: &str) -> TaskReport {
        match self.store.list_history().into_iter().find(|e| e.id == id) {
            Some(entry) => TaskReport {
                id: entry.id,
                outcome: entry.status,
                filepath: entry.filepath,
                error: entry.error,
            },
            None => cancelled_report(id),
        }
    }

    /// Cancel an active task. It leaves the active set before this returns;
    /// the engine is told afterwards, best effort. Returns false if the task
    /// is not active.
    pub fn cancel(&self, id: &str) -> bool {
        let running = self.running().remove(id);
        let entry = match self.store.finalize_task(id, Outcome::Cancelled, None, None) {
            Some(entry) => entry,
            None => return false,
        };
        let kind = match running {
            Some(running) => {
                running.token.cancel();
                running.kind
            }
            None => entry.kind,
        };

        let name = entry
            .title
            .clone()
            .unwrap_or_else(|| crate::utils::placeholder_title(&entry.source));
        self.sink
            .info(format!("Download cancelled: {}", name), self.durations.cancelled());

        let engine = self.engine.clone();
        let task_id = id.to_string();
        tokio::spawn(async move {
            if let Err(e) = engine.cancel(&task_id, kind).await {
                tracing::warn!("remote cancel for {} failed: {}", task_id, e);
            }
        });
        true
    }

    /// Cancel every active task (shell shutdown).
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<TaskId> = self.running().keys().cloned().collect();
        ids.iter().filter(|id| self.cancel(id)).count()
    }

    fn file_action(&self, label: &str, action: FileAction, path: Option<String>) -> NotificationAction {
        let files = self.files.clone();
        let sink = self.sink.clone();
        let shown_for = self.durations.action_error();
        let effect: ActionEffect = Arc::new(move || {
            let files = files.clone();
            let sink = sink.clone();
            let path = path.clone();
            async move {
                let result = match &path {
                    Some(p) => {
                        let outcome = match action {
                            FileAction::Open => files.open_path(Path::new(p)).await,
                            FileAction::Reveal => files.reveal_path(Path::new(p)).await,
                        };
                        outcome.map_err(|e| TaskError::Action(e.to_string()))
                    }
                    None => Err(TaskError::Action("file location is unknown".into())),
                };
                if let Err(e) = result {
                    tracing::warn!("{} failed: {}", action.verb(), e);
                    sink.error(format!("Could not {}: {}", action.verb(), e), shown_for);
                }
            }
            .boxed()
        });
        NotificationAction::new(label, effect)
    }
}

#[derive(Debug, Clone, Copy)]
enum FileAction {
    Open,
    Reveal,
}

impl FileAction {
    fn verb(self) -> &'static str {
        match self {
            FileAction::Open => "open file",
            FileAction::Reveal => "show in folder",
        }
    }
}

/// Metadata events move a fresh task to metadata-pending; once bytes are
/// flowing they only fill in fields.
fn pending_patch(current: TaskStatus) -> TaskPatch {
    match current {
        TaskStatus::Submitted | TaskStatus::MetadataPending => {
            TaskPatch::status(TaskStatus::MetadataPending)
        }
        _ => TaskPatch::default(),
    }
}

fn cancelled_report(id: &str) -> TaskReport {
    TaskReport {
        id: id.to_string(),
        outcome: Outcome::Cancelled,
        filepath: None,
        error: None,
    }
}
