use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;

use safetube_engine::catalog::SqliteCatalog;
use safetube_engine::jobs::{EnqueueRequest, JobQueue, JobStatus};
use safetube_engine::paths::AppPaths;
use safetube_engine::{db, ytdlp};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

fn main() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return Ok(());
    }

    let mut base_dir: Option<PathBuf> = None;
    let mut show_status = false;
    let mut auto_analysis: Option<bool> = None;
    let mut urls: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--base-dir" => {
                i += 1;
                let v = args
                    .get(i)
                    .ok_or_else(|| "--base-dir requires a value".to_string())?;
                base_dir = Some(PathBuf::from(v));
            }
            "--status" => show_status = true,
            "--auto-analysis" => {
                i += 1;
                let v = args
                    .get(i)
                    .ok_or_else(|| "--auto-analysis requires on|off".to_string())?;
                auto_analysis = Some(match v.as_str() {
                    "on" => true,
                    "off" => false,
                    other => return Err(format!("--auto-analysis expects on|off, got {other}")),
                });
            }
            other if other.starts_with("--") => {
                return Err(format!("unknown arg: {other} (try --help)"))
            }
            url => urls.push(url.to_string()),
        }
        i += 1;
    }

    if !show_status && auto_analysis.is_none() && urls.is_empty() {
        return Err("nothing to do (pass URLs, --status or --auto-analysis)".to_string());
    }

    let base_dir = base_dir
        .or_else(default_base_dir)
        .ok_or_else(|| "could not determine base dir; pass --base-dir".to_string())?;

    let paths = AppPaths::new(base_dir);
    paths.ensure_dirs().map_err(|e| e.to_string())?;
    db::ensure_schema(&paths).map_err(|e| e.to_string())?;

    println!("Base dir: {}", paths.base_dir.to_string_lossy());

    if show_status {
        let status = ytdlp::ytdlp_status(&paths);
        println!(
            "{}",
            serde_json::to_string(&status).map_err(|e| e.to_string())?
        );
    }

    if let Some(enabled) = auto_analysis {
        SqliteCatalog::new(paths.clone())
            .set_auto_analysis(enabled)
            .map_err(|e| e.to_string())?;
        println!("Auto analysis: {}", if enabled { "on" } else { "off" });
    }

    if urls.is_empty() {
        return Ok(());
    }

    let queue = JobQueue::open(paths).map_err(|e| e.to_string())?;
    let requests: Vec<EnqueueRequest> = urls
        .into_iter()
        .map(|url| EnqueueRequest::new(url, ""))
        .collect();
    let ids = queue.enqueue(requests);
    println!("Queued {} job(s)", ids.len());

    loop {
        sleep(POLL_INTERVAL);
        let state = queue.snapshot();
        println!(
            "{}",
            serde_json::to_string(&state).map_err(|e| e.to_string())?
        );
        if !state.is_running {
            let failed = state.count(JobStatus::Error);
            if failed > 0 {
                return Err(format!("{failed} job(s) failed"));
            }
            return Ok(());
        }
    }
}

fn default_base_dir() -> Option<PathBuf> {
    if let Ok(v) = std::env::var("SAFETUBE_BASE_DIR") {
        let t = v.trim();
        if !t.is_empty() {
            return Some(PathBuf::from(t));
        }
    }

    if cfg!(windows) {
        if let Ok(appdata) = std::env::var("APPDATA") {
            let t = appdata.trim();
            if !t.is_empty() {
                return Some(PathBuf::from(t).join("safetube"));
            }
        }
    }

    std::env::var("HOME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .map(|h| PathBuf::from(h).join(".safetube"))
}

fn print_help() {
    println!(
        r#"safetube_queue

Queues videos for download into the library and follows the queue until it drains.

Usage:
  cargo run --bin safetube_queue -- https://www.youtube.com/watch?v=...
  cargo run --bin safetube_queue -- --status
  cargo run --bin safetube_queue -- --auto-analysis on

Options:
  --base-dir <path>         Override base dir (default: $SAFETUBE_BASE_DIR, %APPDATA%\safetube or ~/.safetube)
  --status                  Print yt-dlp availability as JSON
  --auto-analysis <on|off>  Toggle caption enrichment after each download
"#
    );
}
