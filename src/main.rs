//! Command-line archiver: fetch a playlist, download every segment and write
//! the resulting archive to disk.

use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

use hls_archiver::commands::Command;
use hls_archiver::core::models::NO_WINDOW;
use hls_archiver::utils::logging::init_tracing;
use hls_archiver::utils::validation::validate_url;
use hls_archiver::{AppConfig, AppState, ProgressEvent};

fn usage() -> ! {
    eprintln!("Usage: hls-archiver <playlist-url> [output-dir] [--title <title>]");
    std::process::exit(1);
}

struct CliArgs {
    url: String,
    output_dir: PathBuf,
    title: Option<String>,
}

fn parse_args() -> CliArgs {
    let mut args = env::args().skip(1);
    let mut positional = Vec::new();
    let mut title = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--title" => title = Some(args.next().unwrap_or_else(|| usage())),
            "-h" | "--help" => usage(),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let url = positional.next().unwrap_or_else(|| usage());
    let output_dir = positional
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    CliArgs {
        url,
        output_dir,
        title,
    }
}

fn load_config() -> AppConfig {
    match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration ({:#}), using defaults", e);
            AppConfig::default()
        }
    }
}

fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();
    validate_url(&args.url)?;

    let mut config = load_config();
    // One-shot run: nothing worth keeping between invocations
    config.storage.persist = false;
    init_tracing(&config.logging.level);

    let state = AppState::with_config(config)?;
    let summary = state
        .manager
        .capture_url(&args.url, NO_WINDOW, args.title)
        .await
        .with_context(|| format!("Failed to capture {}", args.url))?;
    info!(
        "Captured {} with {} segments",
        summary.display_name, summary.segment_count
    );

    let reply = state
        .runtime
        .command(Command::StartDownload {
            window_id: NO_WINDOW,
            manifest_id: summary.id.clone(),
        })
        .await?;
    let download_id = match reply["download_id"].as_str() {
        Some(id) => id.to_string(),
        None => bail!(
            "Download did not start: {}",
            reply["error"].as_str().unwrap_or("unknown error")
        ),
    };

    let mut subscription = state.manager.subscribe(&download_id);
    let mut final_event = None;
    loop {
        tokio::select! {
            event = subscription.next() => {
                match event {
                    Some(ProgressEvent::Progress { downloaded_segments, total_segments, speed, status, .. }) => {
                        println!(
                            "[{}] {}/{} segments, {}/s",
                            status,
                            downloaded_segments,
                            total_segments,
                            format_bytes(speed)
                        );
                    }
                    Some(event) => {
                        final_event = Some(event);
                        break;
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling download");
                state.manager.cancel_download(&download_id)?;
            }
        }
    }

    if let Some(ProgressEvent::Finished { error: Some(error), status, .. }) = &final_event {
        bail!("Download {}: {}", status, error);
    }

    let Some(result) = state.manager.take_download_result(&download_id)? else {
        bail!("Download did not produce an archive");
    };

    tokio::fs::create_dir_all(&args.output_dir)
        .await
        .with_context(|| format!("Failed to create {:?}", args.output_dir))?;
    let path = args.output_dir.join(&result.archive_name);
    tokio::fs::write(&path, &result.archive)
        .await
        .with_context(|| format!("Failed to write {:?}", path))?;

    println!(
        "Saved {} ({}, {}/{} segments)",
        path.display(),
        format_bytes(result.archive_size as f64),
        result.succeeded_segments,
        result.total_segments
    );
    if result.is_partial() {
        println!("Missing segments: {:?}", result.missing_segments);
    }

    Ok(())
}
