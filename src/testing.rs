//! In-process fakes for the engine boundary, shared by unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::channel::{DownloadingEvent, FinishedResult, ProgressChannel, ProgressEvent};
use crate::engine::{
    channel_key, FileActions, FormatList, PlaylistInfo, RemoteEngine, SubmitRequest,
};
use crate::error::{ChannelError, EngineError};
use crate::task::TaskKind;

pub fn downloading(done: u64, total: Option<u64>) -> ProgressEvent {
    ProgressEvent::Downloading(DownloadingEvent {
        downloaded_bytes: Some(done as f64),
        total_bytes: total.map(|t| t as f64),
        speed: Some(100.0),
        ..DownloadingEvent::default()
    })
}

pub fn finished(path: &str) -> ProgressEvent {
    ProgressEvent::Finished {
        save_path: None,
        name: None,
        result: Some(FinishedResult {
            final_path: Some(path.to_string()),
            filename: None,
        }),
    }
}

/// What the next `open_channel` call yields.
pub enum Behavior {
    /// Deliver these events, then report the channel closed.
    Events(Vec<ProgressEvent>),
    /// Deliver whatever the test pushes.
    Held(mpsc::UnboundedReceiver<ProgressEvent>),
    OpenFails(String),
}

#[derive(Default)]
struct Shared {
    calls: Mutex<Vec<String>>,
    closed: Mutex<Vec<bool>>,
    open_now: AtomicUsize,
    max_open: AtomicUsize,
}

impl Shared {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[derive(Default)]
pub struct FakeEngine {
    behaviors: Mutex<VecDeque<Behavior>>,
    submit_errors: Mutex<HashMap<String, EngineError>>,
    cancel_fails: AtomicBool,
    playlist: Mutex<Option<PlaylistInfo>>,
    shared: Arc<Shared>,
}

impl FakeEngine {
    pub fn scripted(behaviors: Vec<Behavior>) -> Arc<Self> {
        Arc::new(Self {
            behaviors: Mutex::new(behaviors.into()),
            ..Self::default()
        })
    }

    pub fn with_held_channel() -> (Arc<Self>, mpsc::UnboundedSender<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::scripted(vec![Behavior::Held(rx)]), tx)
    }

    pub fn reject_submit(&self, source: &str, error: EngineError) {
        self.submit_errors
            .lock()
            .unwrap()
            .insert(source.to_string(), error);
    }

    pub fn fail_cancel(&self) {
        self.cancel_fails.store(true, Ordering::SeqCst);
    }

    pub fn set_playlist(&self, info: PlaylistInfo) {
        *self.playlist.lock().unwrap() = Some(info);
    }

    pub fn calls(&self) -> Vec<String> {
        self.shared.calls.lock().unwrap().clone()
    }

    /// Whether the channel opened `index`-th has been closed.
    pub fn channel_closed(&self, index: usize) -> bool {
        self.shared
            .closed
            .lock()
            .unwrap()
            .get(index)
            .copied()
            .unwrap_or(false)
    }

    /// Most channels that were ever open at the same time.
    pub fn max_open_channels(&self) -> usize {
        self.shared.max_open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteEngine for FakeEngine {
    async fn fetch_formats(&self, url: &str) -> Result<FormatList, EngineError> {
        self.shared.record(format!("formats:{}", url));
        Ok(FormatList {
            title: "Clip".into(),
            ..FormatList::default()
        })
    }

    async fn playlist_info(&self, url: &str) -> Result<PlaylistInfo, EngineError> {
        self.shared.record(format!("playlist:{}", url));
        self.playlist
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| EngineError::remote("Not a playlist"))
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<(), EngineError> {
        self.shared.record(format!("submit:{}", request.source));
        match self.submit_errors.lock().unwrap().get(&request.source) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn cancel(&self, id: &str, _kind: TaskKind) -> Result<(), EngineError> {
        self.shared.record(format!("cancel:{}", id));
        if self.cancel_fails.load(Ordering::SeqCst) {
            Err(EngineError::Transport("engine unreachable".into()))
        } else {
            Ok(())
        }
    }

    async fn open_channel(
        &self,
        id: &str,
        kind: TaskKind,
    ) -> Result<Box<dyn ProgressChannel>, EngineError> {
        self.shared.record(format!("open:{}", channel_key(id, kind)));
        let behavior = self.behaviors.lock().unwrap().pop_front();
        let rx = match behavior {
            Some(Behavior::Events(events)) => {
                let (tx, rx) = mpsc::unbounded_channel();
                for event in events {
                    let _ = tx.send(event);
                }
                rx
            }
            Some(Behavior::Held(rx)) => rx,
            Some(Behavior::OpenFails(msg)) => return Err(EngineError::Transport(msg)),
            None => return Err(EngineError::Transport("no scripted channel".into())),
        };

        let index = {
            let mut closed = self.shared.closed.lock().unwrap();
            closed.push(false);
            closed.len() - 1
        };
        let now = self.shared.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_open.fetch_max(now, Ordering::SeqCst);

        Ok(Box::new(ScriptedChannel {
            rx,
            index,
            open: true,
            shared: self.shared.clone(),
        }))
    }
}

struct ScriptedChannel {
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
    index: usize,
    open: bool,
    shared: Arc<Shared>,
}

#[async_trait]
impl ProgressChannel for ScriptedChannel {
    async fn next_event(&mut self) -> Option<Result<ProgressEvent, ChannelError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.rx.close();
            self.shared.closed.lock().unwrap()[self.index] = true;
            self.shared.open_now.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[derive(Default)]
pub struct FakeFiles {
    failure: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeFiles {
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn run(&self, verb: &str, path: &Path) -> Result<(), EngineError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}:{}", verb, path.display()));
        match &self.failure {
            Some(msg) => Err(EngineError::remote(msg.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl FileActions for FakeFiles {
    async fn open_path(&self, path: &Path) -> Result<(), EngineError> {
        self.run("open", path)
    }

    async fn reveal_path(&self, path: &Path) -> Result<(), EngineError> {
        self.run("reveal", path)
    }
}
