//! Tracing setup. The progress view owns the terminal, so events go to a
//! log file under the XDG state dir; stderr is only used when that file
//! cannot be opened.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "vdl.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,vdl=debug"))
}

/// Open (append) the log file inside `dir`, creating the directory.
fn open_log_file(dir: &Path) -> Result<(PathBuf, File)> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(LOG_FILE);
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening {}", path.display()))?;
    Ok((path, file))
}

fn state_dir() -> Result<PathBuf> {
    Ok(xdg::BaseDirectories::with_prefix("vdl")?.get_state_home())
}

/// Install the global subscriber. A second call is a no-op.
pub fn init() {
    match state_dir().and_then(|dir| open_log_file(&dir)) {
        Ok((path, file)) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init();
            tracing::info!("logging to {}", path.display());
        }
        Err(e) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .try_init();
            tracing::warn!("file logging unavailable: {:#}", e);
        }
    }
}
