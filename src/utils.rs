use url::Url;

use crate::error::TaskError;
use crate::task::TaskKind;

/// Check user input before anything touches the network and return it trimmed.
pub fn validate_source(kind: TaskKind, input: &str) -> Result<String, TaskError> {
    let raw = input.trim();
    match kind {
        TaskKind::Torrent => {
            if raw.is_empty() {
                return Err(TaskError::Validation("Please enter a magnet link".into()));
            }
            if !is_magnet(raw) {
                return Err(TaskError::Validation(format!(
                    "Not a magnet link: {}",
                    raw
                )));
            }
        }
        TaskKind::SingleVideo | TaskKind::PlaylistItem => {
            if raw.is_empty() {
                return Err(TaskError::Validation("Please enter a URL".into()));
            }
            let url = Url::parse(raw)
                .map_err(|e| TaskError::Validation(format!("Invalid URL {}: {}", raw, e)))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(TaskError::Validation(format!(
                    "Unsupported URL scheme: {}",
                    url.scheme()
                )));
            }
        }
    }
    Ok(raw.to_string())
}

pub fn is_magnet(input: &str) -> bool {
    match Url::parse(input) {
        Ok(url) => {
            url.scheme() == "magnet" && url.query_pairs().any(|(k, v)| k == "xt" && !v.is_empty())
        }
        Err(_) => false,
    }
}

/// Short human label shown before the engine reports a real title.
pub fn placeholder_title(source: &str) -> String {
    let url = match Url::parse(source) {
        Ok(url) => url,
        Err(_) => return source.to_string(),
    };

    if url.scheme() == "magnet" {
        if let Some((_, name)) = url.query_pairs().find(|(k, _)| k == "dn") {
            return name.into_owned();
        }
        return "Torrent".to_string();
    }

    if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "v") {
        return v.into_owned();
    }

    if let Some(segments) = url.path_segments() {
        if let Some(last) = segments.filter(|s| !s.is_empty()).last() {
            return last.to_string();
        }
    }

    url.host_str().unwrap_or(source).to_string()
}
