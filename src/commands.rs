use anyhow::{bail, Context, Result};
use indicatif::HumanBytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::channel::whole;
use crate::cli::DownloadMode;
use crate::controller::DownloadRequest;
use crate::engine::FormatList;
use crate::notify::{NotificationId, Severity};
use crate::session::Session;
use crate::task::{Outcome, TaskId};
use crate::view::{format_eta, TaskView, REFRESH};

/// Time given to best-effort remote cancels before the process exits.
const CANCEL_GRACE: Duration = Duration::from_millis(500);

/// Follow-up to run on the completion notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    Open,
    Reveal,
}

impl FollowUp {
    fn action_index(self) -> usize {
        match self {
            FollowUp::Open => 0,
            FollowUp::Reveal => 1,
        }
    }
}

/// Render until `done` holds. Ctrl-C cancels every active task; returns
/// true if that happened.
async fn watch(session: &Session, done: impl Fn() -> bool) -> bool {
    let interrupted = watch_until(session, done, tokio::signal::ctrl_c()).await;
    if interrupted {
        tokio::time::sleep(CANCEL_GRACE).await;
    }
    interrupted
}

/// The render loop behind [`watch`]. `interrupt` is polled across ticks,
/// so one that resolves while a frame is drawn is still seen.
async fn watch_until<I: Future>(session: &Session, done: impl Fn() -> bool, interrupt: I) -> bool {
    let mut view = TaskView::new();
    let mut interrupted = false;
    tokio::pin!(interrupt);
    loop {
        view.render(
            &session.active_tasks(),
            &session.history(),
            &session.notifications(),
        );
        if done() || interrupted {
            break;
        }
        tokio::select! {
            _ = &mut interrupt => {
                let n = session.cancel_all();
                tracing::info!("interrupted, cancelled {} task(s)", n);
                view.println(format!("Interrupted: cancelled {} active task(s)", n));
                interrupted = true;
            }
            _ = tokio::time::sleep(REFRESH) => {}
        }
    }
    view.finish();
    interrupted
}

pub async fn run_single_download(
    session: Arc<Session>,
    request: DownloadRequest,
    follow_up: Option<FollowUp>,
) -> Result<()> {
    let id = session.submit(request)?;
    let interrupted = watch(&session, || !session.active_tasks().iter().any(|t| t.id == id)).await;
    if interrupted {
        bail!("interrupted");
    }
    report_outcome(&session, &id, follow_up).await
}

async fn report_outcome(session: &Session, id: &TaskId, follow_up: Option<FollowUp>) -> Result<()> {
    let entry = session
        .history()
        .into_iter()
        .find(|e| &e.id == id)
        .context("task finished without a history record")?;

    match entry.status {
        Outcome::Completed => {
            if let Some(follow_up) = follow_up {
                run_follow_up(session, follow_up).await;
            }
            Ok(())
        }
        Outcome::Failed => bail!(
            "download failed: {}",
            entry.error.unwrap_or_else(|| "unknown error".to_string())
        ),
        Outcome::Cancelled => {
            println!("Download cancelled.");
            Ok(())
        }
    }
}

async fn run_follow_up(session: &Session, follow_up: FollowUp) {
    let notes = session.notifications();
    let last_seen: NotificationId = notes.iter().map(|n| n.id).max().unwrap_or(0);
    let completion = notes
        .iter()
        .rev()
        .find(|n| n.severity == Severity::Success && !n.actions.is_empty());

    let Some(completion) = completion else {
        eprintln!("Nothing to open: no completion notification.");
        return;
    };
    if !session.trigger(completion.id, follow_up.action_index()).await {
        eprintln!("Action not available.");
        return;
    }
    session.dismiss(completion.id);
    for note in session.notifications() {
        if note.id > last_seen && note.severity == Severity::Error {
            eprintln!("{}", note.message);
        }
    }
}

pub async fn run_playlist(
    session: Arc<Session>,
    url: String,
    positions: Option<Vec<usize>>,
    mode: DownloadMode,
    format_id: String,
) -> Result<()> {
    let job = session.load_playlist(&url).await?;
    println!("Playlist: {} ({} videos)", job.title, job.items().len());
    for (n, video) in job.items().iter().enumerate() {
        println!("{:>4}. {}", n + 1, video.title);
    }
    if let Some(positions) = positions {
        session.select_positions(&positions)?;
    }

    let runner = {
        let session = session.clone();
        tokio::spawn(async move { session.start_batch(mode, &format_id).await })
    };
    let interrupted = watch(&session, || runner.is_finished()).await;
    if interrupted {
        runner.abort();
        bail!("interrupted");
    }

    let counters = runner.await??;
    println!(
        "Batch finished: {} completed, {} failed, {} cancelled ({} selected)",
        counters.completed, counters.failed, counters.cancelled, counters.total_selected
    );
    if counters.failed > 0 {
        bail!("{} of {} items failed", counters.failed, counters.total_selected);
    }
    Ok(())
}

pub async fn list_formats(session: &Session, url: &str) -> Result<()> {
    let formats = session.list_formats(url).await?;
    for line in format_header(&formats) {
        println!("{}", line);
    }
    println!();
    println!("{:<20} {:<15} {:<12} {:<6} {:>12}", "Format", "Quality", "Resolution", "Ext", "Size");
    println!("{:-<20} {:-<15} {:-<12} {:-<6} {:->12}", "", "", "", "", "");

    for f in formats.video_formats.iter().chain(formats.audio_formats.iter()) {
        let size = match f.filesize {
            Some(bytes) if bytes > 0.0 => format!("{}", HumanBytes(bytes as u64)),
            _ => "-".to_string(),
        };
        println!(
            "{:<20} {:<15} {:<12} {:<6} {:>12}",
            f.format_id,
            f.quality,
            f.resolution.as_deref().unwrap_or("audio"),
            f.ext,
            size
        );
    }
    Ok(())
}

/// Title, duration and thumbnail lines above the format table.
fn format_header(formats: &FormatList) -> Vec<String> {
    let mut lines = vec![formats.title.clone()];
    if let Some(secs) = whole(formats.duration) {
        lines.push(format!("Duration: {}", format_eta(Some(secs))));
    }
    if !formats.thumbnail.is_empty() {
        lines.push(format!("Thumbnail: {}", formats.thumbnail));
    }
    lines
}

pub fn list_history(session: &Session) -> Result<()> {
    let history = session.history();
    if history.is_empty() {
        println!("No downloads in history.");
        return Ok(());
    }

    let count = |o: Outcome| history.iter().filter(|e| e.status == o).count();
    println!(
        "History: {} | Completed: {} | Failed: {} | Cancelled: {}",
        history.len(),
        count(Outcome::Completed),
        count(Outcome::Failed),
        count(Outcome::Cancelled)
    );
    println!();

    println!("{:<36} {:<10} {:<12} {:<40} {}", "Id", "Status", "Size", "Title", "Result");
    println!("{:-<36} {:-<10} {:-<12} {:-<40} {:-<20}", "", "", "", "", "");
    for entry in &history {
        let title = entry
            .title
            .clone()
            .unwrap_or_else(|| crate::utils::placeholder_title(&entry.source));
        let size = entry
            .total_bytes
            .map(|b| format!("{}", HumanBytes(b)))
            .unwrap_or_else(|| "-".to_string());
        let status = match entry.status {
            Outcome::Completed => "Completed",
            Outcome::Failed => "Failed",
            Outcome::Cancelled => "Cancelled",
        };
        let result = match entry.status {
            Outcome::Failed => entry.error.clone().unwrap_or_default(),
            _ => entry.filepath.clone().unwrap_or_default(),
        };
        println!(
            "{:<36} {:<10} {:<12} {:<40} {}",
            entry.id,
            status,
            size,
            truncate(&title, 40),
            result
        );
    }
    Ok(())
}

pub fn delete_history(session: &Session, id: &str) -> Result<()> {
    if !session.delete_history(id) {
        bail!("no history entry with id {}", id);
    }
    println!("Removed {} from history.", id);
    Ok(())
}

pub fn clear_history(session: &Session) -> Result<()> {
    let n = session.history().len();
    session.clear_history();
    println!("Cleared {} history entries.", n);
    Ok(())
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}
