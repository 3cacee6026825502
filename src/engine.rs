//! Client side of the remote download engine: HTTP requests for formats,
//! playlists, submission and cancellation, plus progress channels and
//! the file-system convenience actions the engine host performs.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::channel::{ProgressChannel, WsChannel};
use crate::cli::DownloadMode;
use crate::error::EngineError;
use crate::task::{TaskId, TaskKind};

#[derive(Deserialize, Debug, Clone, Default)]
pub struct FormatList {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub video_formats: Vec<FormatOption>,
    #[serde(default)]
    pub audio_formats: Vec<FormatOption>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct FormatOption {
    pub format_id: String,
    #[serde(default)]
    pub quality: String,
    pub resolution: Option<String>,
    #[serde(default)]
    pub ext: String,
    pub filesize: Option<f64>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct PlaylistInfo {
    #[serde(default)]
    pub playlist_title: String,
    #[serde(default)]
    pub videos: Vec<PlaylistVideo>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct PlaylistVideo {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub url: String,
    pub duration: Option<f64>,
}

/// Everything the engine needs to start one download.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub id: TaskId,
    pub kind: TaskKind,
    pub source: String,
    pub mode: DownloadMode,
    pub format_id: String,
}

/// Operations the core consumes from the remote engine.
#[async_trait]
pub trait RemoteEngine: Send + Sync {
    async fn fetch_formats(&self, url: &str) -> Result<FormatList, EngineError>;

    async fn playlist_info(&self, url: &str) -> Result<PlaylistInfo, EngineError>;

    async fn submit(&self, request: &SubmitRequest) -> Result<(), EngineError>;

    /// Best-effort; callers never wait on this to consider a task cancelled.
    async fn cancel(&self, id: &str, kind: TaskKind) -> Result<(), EngineError>;

    async fn open_channel(
        &self,
        id: &str,
        kind: TaskKind,
    ) -> Result<Box<dyn ProgressChannel>, EngineError>;
}

/// Open/reveal actions offered on a completed download.
#[async_trait]
pub trait FileActions: Send + Sync {
    async fn open_path(&self, path: &Path) -> Result<(), EngineError>;

    async fn reveal_path(&self, path: &Path) -> Result<(), EngineError>;
}

/// Channel key for a task; torrents live under their own prefix.
pub fn channel_key(id: &str, kind: TaskKind) -> String {
    match kind {
        TaskKind::Torrent => format!("torrent_{}", id),
        TaskKind::SingleVideo | TaskKind::PlaylistItem => id.to_string(),
    }
}

/// `http(s)://host` -> `ws(s)://host`.
pub fn websocket_base(server_url: &str) -> String {
    let trimmed = server_url.trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        trimmed.to_string()
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

pub struct HttpEngine {
    client: Client,
    base_url: String,
    ws_base: String,
}

impl HttpEngine {
    pub fn new(server_url: &str) -> Self {
        let client = Client::builder()
            .user_agent("vdl/0.1.0")
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("http client setup failed, using defaults: {}", e);
                Client::new()
            });

        Self {
            client,
            base_url: server_url.trim_end_matches('/').to_string(),
            ws_base: websocket_base(server_url),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response, EngineError> {
        Ok(self
            .client
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await?)
    }
}

/// Decode a 2xx JSON body, or turn an `{error, message}` body into a
/// remote error. Bodies that are not JSON at all are transport failures.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, EngineError> {
    let status = response.status();
    let body = response.text().await?;

    if let Ok(err) = serde_json::from_str::<ErrorBody>(&body) {
        if let Some(code) = err.error {
            tracing::debug!("engine error {} ({}): {:?}", code, status, err.message);
            return Err(EngineError::Remote {
                message: err.message.unwrap_or_else(|| code.clone()),
                code: Some(code),
            });
        }
    }
    if !status.is_success() {
        return Err(EngineError::Remote {
            code: None,
            message: format!("engine returned {}", status),
        });
    }
    serde_json::from_str(&body)
        .map_err(|e| EngineError::Transport(format!("unexpected engine response: {}", e)))
}

#[async_trait]
impl RemoteEngine for HttpEngine {
    async fn fetch_formats(&self, url: &str) -> Result<FormatList, EngineError> {
        let response = self
            .client
            .get(self.endpoint("/formats"))
            .query(&[("url", url)])
            .send()
            .await?;
        decode(response).await
    }

    async fn playlist_info(&self, url: &str) -> Result<PlaylistInfo, EngineError> {
        let response = self
            .post("/playlist/info", &serde_json::json!({ "url": url }))
            .await?;
        decode(response).await
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<(), EngineError> {
        let response = match request.kind {
            TaskKind::Torrent => {
                self.post(
                    "/torrent/add",
                    &serde_json::json!({ "magnet": request.source, "id": request.id }),
                )
                .await?
            }
            TaskKind::SingleVideo | TaskKind::PlaylistItem => {
                self.post(
                    "/download",
                    &serde_json::json!({
                        "url": request.source,
                        "id": request.id,
                        "mode": request.mode.as_str(),
                        "format_id": request.format_id,
                    }),
                )
                .await?
            }
        };
        decode::<serde_json::Value>(response).await?;
        tracing::info!("engine accepted {}", request.id);
        Ok(())
    }

    async fn cancel(&self, id: &str, kind: TaskKind) -> Result<(), EngineError> {
        let path = match kind {
            TaskKind::Torrent => "/torrent/cancel",
            TaskKind::SingleVideo | TaskKind::PlaylistItem => "/cancel",
        };
        let response = self.post(path, &serde_json::json!({ "id": id })).await?;
        decode::<serde_json::Value>(response).await?;
        Ok(())
    }

    async fn open_channel(
        &self,
        id: &str,
        kind: TaskKind,
    ) -> Result<Box<dyn ProgressChannel>, EngineError> {
        let channel = WsChannel::connect(&self.ws_base, &channel_key(id, kind)).await?;
        Ok(Box::new(channel))
    }
}

#[async_trait]
impl FileActions for HttpEngine {
    async fn open_path(&self, path: &Path) -> Result<(), EngineError> {
        let response = self
            .post("/open-file", &serde_json::json!({ "path": path }))
            .await?;
        decode::<serde_json::Value>(response).await?;
        Ok(())
    }

    async fn reveal_path(&self, path: &Path) -> Result<(), EngineError> {
        let response = self
            .post("/show-in-folder", &serde_json::json!({ "path": path }))
            .await?;
        decode::<serde_json::Value>(response).await?;
        Ok(())
    }
}
