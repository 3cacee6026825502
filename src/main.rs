mod batch;
mod channel;
mod cli;
mod commands;
mod config;
mod controller;
mod engine;
mod error;
mod history;
mod logging;
mod notify;
mod session;
mod store;
mod task;
#[cfg(test)]
mod testing;
mod utils;
mod view;

use anyhow::{bail, Result};
use clap::Parser;
use std::sync::Arc;

use crate::cli::DownloadMode;
use crate::commands::FollowUp;
use crate::config::VdlConfig;
use crate::controller::DownloadRequest;
use crate::session::Session;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Video URL to download (or playlist URL with --playlist)
    #[arg(index = 1)]
    url: Option<String>,

    /// Download a torrent from a magnet link
    #[arg(short = 't', long)]
    torrent: Option<String>,

    /// Treat the URL as a playlist and download its videos one at a time
    #[arg(short = 'p', long)]
    playlist: bool,

    /// Playlist positions to download, 1-based (e.g. 1,3,4); default is all
    #[arg(long, value_delimiter = ',', requires = "playlist")]
    items: Option<Vec<usize>>,

    /// Extract video or audio
    #[arg(short = 'm', long, value_enum)]
    mode: Option<DownloadMode>,

    /// Engine format id (see --list-formats)
    #[arg(short = 'F', long)]
    format: Option<String>,

    /// List the formats the engine offers for the URL, then exit
    #[arg(long)]
    list_formats: bool,

    /// Open the file once the download completes
    #[arg(long, conflicts_with = "reveal")]
    open: bool,

    /// Show the file in its folder once the download completes
    #[arg(long)]
    reveal: bool,

    /// List download history
    #[arg(short = 'l', long)]
    list: bool,

    /// Remove one entry from the history
    #[arg(long, value_name = "ID")]
    delete: Option<String>,

    /// Remove every entry from the history
    #[arg(long)]
    clear_history: bool,

    /// Engine base URL (overrides the config file)
    #[arg(short = 's', long)]
    server: Option<String>,
}

impl Args {
    fn follow_up(&self) -> Option<FollowUp> {
        if self.open {
            Some(FollowUp::Open)
        } else if self.reveal {
            Some(FollowUp::Reveal)
        } else {
            None
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    logging::init();

    let mut config = config::load_or_init()?;
    if let Some(server) = &args.server {
        config.server_url = server.clone();
    }
    let mode = args.mode.unwrap_or(config.default_mode);
    let format = args
        .format
        .clone()
        .unwrap_or_else(|| config.default_format.clone());

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(args, config, mode, format))
}

async fn run(args: Args, config: VdlConfig, mode: DownloadMode, format: String) -> Result<()> {
    let session = Arc::new(Session::connect(&config)?);

    if args.list {
        return commands::list_history(&session);
    }
    if let Some(id) = &args.delete {
        return commands::delete_history(&session, id);
    }
    if args.clear_history {
        return commands::clear_history(&session);
    }

    if let Some(magnet) = args.torrent.clone() {
        return commands::run_single_download(
            session,
            DownloadRequest::torrent(magnet),
            args.follow_up(),
        )
        .await;
    }

    let Some(url) = args.url.clone() else {
        bail!("nothing to do: pass a URL, --torrent <magnet> or --list (see --help)");
    };

    if args.list_formats {
        commands::list_formats(&session, &url).await
    } else if args.playlist {
        commands::run_playlist(session, url, args.items.clone(), mode, format).await
    } else {
        commands::run_single_download(
            session,
            DownloadRequest::video(url, mode, format),
            args.follow_up(),
        )
        .await
    }
}
