use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// What the engine should extract from a video source.
#[derive(ValueEnum, Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMode {
    #[default]
    Video,
    Audio,
}

impl DownloadMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadMode::Video => "video",
            DownloadMode::Audio => "audio",
        }
    }
}
