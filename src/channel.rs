//! Per-task progress channel: the engine pushes JSON status events over a
//! WebSocket keyed by task id. Frames are decoded into [`ProgressEvent`]
//! here so the controller only ever matches on the tagged union.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{ChannelError, EngineError};

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Torrent peer/metadata discovery still running.
    FetchingMetadata {
        peers: Option<u64>,
    },
    Metadata {
        name: Option<String>,
        #[serde(alias = "total_bytes")]
        total_size: Option<f64>,
        num_files: Option<u64>,
    },
    Downloading(DownloadingEvent),
    /// Post-processing (muxing, audio extraction) after the transfer.
    Processing {
        message: Option<String>,
    },
    Finished {
        save_path: Option<String>,
        name: Option<String>,
        result: Option<FinishedResult>,
    },
    Error {
        error: Option<String>,
        message: Option<String>,
    },
    Cancelled,
    #[serde(other)]
    Unknown,
}

/// Byte counters come from the video engine; `progress`/`download_rate`
/// from the torrent engine. Numbers may arrive as floats.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DownloadingEvent {
    pub downloaded_bytes: Option<f64>,
    pub total_bytes: Option<f64>,
    pub speed: Option<f64>,
    pub eta: Option<f64>,
    pub progress: Option<f64>,
    pub download_rate: Option<f64>,
    pub num_peers: Option<u64>,
    pub num_seeds: Option<u64>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FinishedResult {
    pub final_path: Option<String>,
    pub filename: Option<String>,
}

impl ProgressEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Output location carried by a `finished` event, if any.
    pub fn output_path(&self) -> Option<String> {
        match self {
            ProgressEvent::Finished {
                save_path, result, ..
            } => save_path
                .clone()
                .or_else(|| result.as_ref().and_then(|r| r.final_path.clone()))
                .or_else(|| result.as_ref().and_then(|r| r.filename.clone())),
            _ => None,
        }
    }

    /// Failure text carried by an `error` event.
    pub fn error_text(&self) -> Option<String> {
        match self {
            ProgressEvent::Error { error, message } => Some(
                error
                    .clone()
                    .or_else(|| message.clone())
                    .unwrap_or_else(|| "Download failed".to_string()),
            ),
            _ => None,
        }
    }
}

/// Non-negative whole number from an engine-supplied float.
pub fn whole(value: Option<f64>) -> Option<u64> {
    value
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.round() as u64)
}

#[async_trait]
pub trait ProgressChannel: Send {
    /// Next decoded event, in arrival order. `None` once the remote side
    /// has closed the channel.
    async fn next_event(&mut self) -> Option<Result<ProgressEvent, ChannelError>>;

    /// Release the connection. Safe to call more than once.
    async fn close(&mut self);
}

pub struct WsChannel {
    key: String,
    stream: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl WsChannel {
    pub async fn connect(endpoint: &str, key: &str) -> Result<Self, EngineError> {
        let url = format!("{}/ws/{}", endpoint.trim_end_matches('/'), key);
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| EngineError::Transport(format!("{}: {}", url, e)))?;
        tracing::debug!("progress channel {} open", key);
        Ok(Self {
            key: key.to_string(),
            stream: Some(stream),
        })
    }
}

#[async_trait]
impl ProgressChannel for WsChannel {
    async fn next_event(&mut self) -> Option<Result<ProgressEvent, ChannelError>> {
        loop {
            let stream = self.stream.as_mut()?;
            let message = match stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Some(Err(ChannelError(e.to_string()))),
                None => return None,
            };

            match message {
                Message::Text(text) => match ProgressEvent::parse(&text) {
                    Ok(ProgressEvent::Unknown) => {
                        tracing::debug!("channel {}: skipping unknown status: {}", self.key, text);
                    }
                    Ok(event) => return Some(Ok(event)),
                    Err(e) => {
                        tracing::debug!("channel {}: skipping frame ({}): {}", self.key, e, text);
                    }
                },
                Message::Close(_) => return None,
                // Pings are answered by tungstenite on the next read.
                _ => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                tracing::debug!("channel {}: close failed: {}", self.key, e);
            }
            tracing::debug!("progress channel {} closed", self.key);
        }
    }
}
