//! Stowage command-line uploader.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use stowage_upload_client::{
    CoordinatorOptions, TaskStatus, UploadCoordinator, UploadEvent, UploadSource, WsSessionApi,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stowage-uploader")]
#[command(about = "Resumable chunked uploads to a stowage server", long_about = None)]
struct Cli {
    /// Server WebSocket URL.
    #[arg(short, long, default_value = "ws://127.0.0.1:9443")]
    url: String,

    /// Owner the files are stored for.
    #[arg(short, long)]
    owner: String,

    /// Destination folder id (root when omitted).
    #[arg(short, long)]
    folder: Option<String>,

    /// Chunks in flight per file.
    #[arg(short, long, default_value_t = 3)]
    concurrency: usize,

    /// Attempts per chunk before a transient failure fails the file.
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Files to upload.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;
    let failed = rt.block_on(run(cli))?;
    if failed > 0 {
        anyhow::bail!("{failed} upload(s) failed");
    }
    Ok(())
}

/// Uploads every file and returns how many did not complete.
async fn run(cli: Cli) -> anyhow::Result<usize> {
    let api = Arc::new(WsSessionApi::connect(cli.url.as_str()).await?);
    let options = CoordinatorOptions {
        concurrency: cli.concurrency,
        max_retries: cli.retries,
        ..CoordinatorOptions::default()
    };
    let mut coordinator = UploadCoordinator::new(api.clone(), cli.owner.as_str(), options);
    let events = coordinator.take_events();

    let mut names = HashMap::new();
    let mut ids = Vec::new();
    for path in &cli.files {
        let name = file_name(path)?;
        let id = coordinator
            .upload(
                UploadSource::File(path.clone()),
                name.as_str(),
                mime_type(path),
                cli.folder.clone(),
            )
            .await?;
        names.insert(id.clone(), name);
        ids.push(id);
    }

    if let Some(mut events) = events {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                print_event(&names, event);
            }
        });
    }

    let mut failed = 0;
    for id in &ids {
        let snapshot = coordinator.wait(id).await?;
        if snapshot.status != TaskStatus::Completed {
            failed += 1;
        }
    }

    // Let the printer drain the last events.
    tokio::time::sleep(Duration::from_millis(50)).await;
    api.close().await;
    Ok(failed)
}

fn print_event(names: &HashMap<String, String>, event: UploadEvent) {
    let name = |id: &str| names.get(id).map_or(id, String::as_str).to_string();
    match event {
        UploadEvent::StatusChanged { task_id, status } => {
            tracing::debug!(task = %task_id, %status, "status changed");
        }
        UploadEvent::Progress {
            task_id,
            uploaded_bytes,
            total_bytes,
            progress,
            speed,
        } => println!(
            "{}: {progress:5.1}% ({uploaded_bytes}/{total_bytes} bytes, {}/s)",
            name(&task_id),
            human_bytes(speed as u64),
        ),
        UploadEvent::Retrying {
            task_id,
            index,
            retry,
            error,
        } => println!("{}: chunk {index} retry {retry}: {error}", name(&task_id)),
        UploadEvent::Completed { task_id, record } => {
            println!("{}: stored at {} ({})", name(&task_id), record.path, record.id)
        }
        UploadEvent::Failed { task_id, error } => eprintln!("{}: failed: {error}", name(&task_id)),
    }
}

fn file_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("{} has no usable file name", path.display()))
}

fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
