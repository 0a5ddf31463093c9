//! yt-dlp integration: metadata probing, downloads with streamed progress, captions.

use crate::cmd;
use crate::config::QueueSettings;
use crate::fetch::{FetchOutcome, Fetcher, Prober, VideoMetadata};
use crate::joblog::now_ms;
use crate::paths::AppPaths;
use crate::{EngineError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

const TOOL: &str = "yt-dlp";
const LINE_POLL_INTERVAL_MS: u64 = 200;
const SAFE_TITLE_MAX_CHARS: usize = 80;
const CAPTIONS_TIMEOUT_SECS: u64 = 300;
const THUMBNAIL_EXTENSIONS: [&str; 3] = ["jpg", "webp", "png"];

#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

enum StreamLine {
    Out(String),
    Err(String),
}

/// Runs `cmd` to completion, handing every stdout/stderr line to `on_line` as it
/// arrives. Carriage-return progress redraws are split into separate lines.
pub(crate) fn run_tool(
    cmd: &mut Command,
    tool: &str,
    timeout_secs: u64,
    on_line: &mut dyn FnMut(&str),
) -> Result<ToolOutput> {
    use std::process::Stdio;

    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        ErrorKind::NotFound => EngineError::ExternalToolMissing {
            tool: tool.to_string(),
        },
        _ => EngineError::Io(e),
    })?;

    let (tx, rx) = mpsc::channel::<StreamLine>();
    if let Some(out) = child.stdout.take() {
        let tx = tx.clone();
        thread::spawn(move || forward_lines(out, tx, StreamLine::Out));
    }
    if let Some(err) = child.stderr.take() {
        let tx = tx.clone();
        thread::spawn(move || forward_lines(err, tx, StreamLine::Err));
    }
    drop(tx);

    let started = Instant::now();
    let mut stdout = String::new();
    let mut stderr = String::new();
    loop {
        match rx.recv_timeout(Duration::from_millis(LINE_POLL_INTERVAL_MS)) {
            Ok(StreamLine::Out(line)) => {
                on_line(&line);
                stdout.push_str(&line);
                stdout.push('\n');
            }
            Ok(StreamLine::Err(line)) => {
                on_line(&line);
                stderr.push_str(&line);
                stderr.push('\n');
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if timeout_secs > 0 && started.elapsed() >= Duration::from_secs(timeout_secs) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EngineError::ExternalToolTimedOut {
                tool: tool.to_string(),
                secs: timeout_secs,
            });
        }
    }

    let status = child.wait()?;
    Ok(ToolOutput {
        status,
        stdout,
        stderr,
    })
}

fn forward_lines<R: Read>(reader: R, tx: mpsc::Sender<StreamLine>, wrap: fn(String) -> StreamLine) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                for part in text.split('\r') {
                    let line = part.trim_end_matches('\n');
                    if line.trim().is_empty() {
                        continue;
                    }
                    if tx.send(wrap(line.to_string())).is_err() {
                        return;
                    }
                }
            }
        }
    }
}

fn progress_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)%").expect("valid progress regex"))
}

/// Extracts the percentage from a `[download]` status line.
pub fn parse_progress_percent(line: &str) -> Option<f32> {
    let trimmed = line.trim_start();
    if !trimmed.starts_with("[download]") {
        return None;
    }
    let caps = progress_regex().captures(trimmed)?;
    let value: f32 = caps.get(1)?.as_str().parse().ok()?;
    Some(value.clamp(0.0, 100.0))
}

/// Reduces a title to `[A-Za-z0-9_-]` with whitespace runs collapsed to `_`.
pub fn safe_title(title: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || *c == '-' || *c == '_')
        .collect();
    let joined = kept.split_whitespace().collect::<Vec<_>>().join("_");
    let truncated: String = joined.chars().take(SAFE_TITLE_MAX_CHARS).collect();
    if truncated.is_empty() {
        "video".to_string()
    } else {
        truncated
    }
}

#[derive(Debug, Deserialize)]
struct InfoJson {
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
    description: Option<String>,
    webpage_url: Option<String>,
}

pub fn parse_metadata_json(stdout: &str) -> Result<VideoMetadata> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with('{'))
        .ok_or_else(|| EngineError::InvalidToolOutput {
            tool: TOOL.to_string(),
            detail: "no video info in output".to_string(),
        })?;
    let info: InfoJson = serde_json::from_str(line).map_err(|e| EngineError::InvalidToolOutput {
        tool: TOOL.to_string(),
        detail: format!("failed to parse video info: {e}"),
    })?;

    Ok(VideoMetadata {
        title: non_empty(info.title).unwrap_or_else(|| "Untitled".to_string()),
        channel: non_empty(info.uploader).or_else(|| non_empty(info.channel)),
        duration_secs: info
            .duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| d.round() as i64),
        description: non_empty(info.description),
        webpage_url: non_empty(info.webpage_url),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct YtDlpStatus {
    pub available: bool,
    pub bundled_installed: bool,
    pub bundled_path: String,
    pub resolved_path: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    paths: AppPaths,
    settings: QueueSettings,
    program: Option<(OsString, Vec<String>)>,
}

impl YtDlp {
    pub fn new(paths: AppPaths, settings: QueueSettings) -> Self {
        Self {
            paths,
            settings,
            program: None,
        }
    }

    /// Pins the executable instead of searching the bundled copy, PATH and python.
    pub fn with_program(mut self, program: impl Into<OsString>, prefix_args: Vec<String>) -> Self {
        self.program = Some((program.into(), prefix_args));
        self
    }

    fn candidates(&self) -> Vec<(OsString, Vec<String>)> {
        if let Some(pinned) = &self.program {
            return vec![pinned.clone()];
        }

        let mut candidates = Vec::new();
        let bundled = self.paths.bundled_ytdlp_path();
        if bundled.exists() {
            candidates.push((bundled.into_os_string(), Vec::new()));
        }
        candidates.push((OsString::from("yt-dlp"), Vec::new()));
        for python in ["python", "python3"] {
            candidates.push((
                OsString::from(python),
                vec!["-m".to_string(), "yt_dlp".to_string()],
            ));
        }
        candidates
    }

    /// Runs yt-dlp with the first executable that can be started. A non-zero exit is
    /// final, except for a python interpreter that lacks the module.
    pub fn run(
        &self,
        args: &[String],
        timeout_secs: u64,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ToolOutput> {
        for (program, prefix) in self.candidates() {
            let mut cmd = cmd::command(&program);
            cmd.args(&prefix);
            cmd.args(args);
            match run_tool(&mut cmd, TOOL, timeout_secs, &mut *on_line) {
                Ok(output) if output.status.success() => return Ok(output),
                Ok(output) => {
                    let stderr = output.stderr.trim().to_string();
                    if !prefix.is_empty() && stderr.contains("No module named") {
                        continue;
                    }
                    return Err(EngineError::ExternalToolFailed {
                        tool: TOOL.to_string(),
                        code: output.status.code(),
                        stderr: if stderr.is_empty() {
                            "unknown error".to_string()
                        } else {
                            stderr
                        },
                    });
                }
                Err(EngineError::ExternalToolMissing { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(EngineError::ExternalToolMissing {
            tool: "yt-dlp (install with `pip install -U yt-dlp` or place it under tools/yt-dlp/)"
                .to_string(),
        })
    }

    fn common_args(&self) -> Vec<String> {
        let mut args = vec!["--no-playlist".to_string()];
        if let Some(cookies) = self.paths.cookies_file() {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().to_string());
        }
        args.extend(self.settings.extra_args.iter().cloned());
        args
    }

    /// Downloads English auto-captions next to `stem` and returns their raw text, or
    /// `None` when the source has none.
    pub fn fetch_auto_captions(&self, url: &str, stem: &Path) -> Result<Option<String>> {
        let mut args = vec![
            "--write-auto-sub".to_string(),
            "--sub-lang".to_string(),
            "en".to_string(),
            "--sub-format".to_string(),
            "vtt".to_string(),
            "--skip-download".to_string(),
        ];
        args.extend(self.common_args());
        args.push("-o".to_string());
        args.push(format!("{}.%(ext)s", stem.to_string_lossy()));
        args.push(url.to_string());

        match self.run(&args, CAPTIONS_TIMEOUT_SECS, &mut |_| {}) {
            Ok(_) | Err(EngineError::ExternalToolFailed { .. }) => {}
            Err(e) => return Err(e),
        }

        for ext in ["en.vtt", "en.srt"] {
            let candidate = path_with_ext(stem, ext);
            if candidate.exists() {
                let content = std::fs::read_to_string(&candidate)?;
                let _ = std::fs::remove_file(&candidate);
                return Ok(Some(content));
            }
        }
        Ok(None)
    }
}

impl Prober for YtDlp {
    fn probe(&self, url: &str) -> Result<VideoMetadata> {
        let mut args = vec!["--dump-json".to_string(), "--no-download".to_string()];
        args.extend(self.common_args());
        args.push(url.to_string());

        let output = self.run(&args, self.settings.probe_timeout_secs, &mut |_| {})?;
        parse_metadata_json(&output.stdout)
    }
}

impl Fetcher for YtDlp {
    fn fetch(
        &self,
        url: &str,
        known: Option<&VideoMetadata>,
        on_progress: &mut dyn FnMut(f32),
    ) -> Result<FetchOutcome> {
        let media_dir = self.paths.media_dir();
        std::fs::create_dir_all(&media_dir)?;
        let title_part = known.map(|m| safe_title(&m.title)).unwrap_or_else(|| "video".to_string());
        let stem = format!("{title_part}_{}", now_ms());
        let filename = format!("{stem}.mp4");
        let output_path = media_dir.join(&filename);

        on_progress(0.0);

        let mut args = vec![
            "-f".to_string(),
            self.settings.format_selector.clone(),
            "--merge-output-format".to_string(),
            "mp4".to_string(),
            "--write-thumbnail".to_string(),
            "--convert-thumbnails".to_string(),
            "jpg".to_string(),
            "--newline".to_string(),
        ];
        if known.is_none() {
            // Info JSON is printed after the download; no second process for metadata.
            args.push("--print-json".to_string());
        }
        args.extend(self.common_args());
        args.push("-o".to_string());
        args.push(output_path.to_string_lossy().to_string());
        args.push(url.to_string());

        let output = self.run(&args, self.settings.download_timeout_secs, &mut |line| {
            if let Some(percent) = parse_progress_percent(line) {
                on_progress(percent);
            }
        })?;

        let meta = std::fs::metadata(&output_path).map_err(|_| EngineError::InvalidToolOutput {
            tool: TOOL.to_string(),
            detail: format!("expected output file is missing: {filename}"),
        })?;
        if meta.len() == 0 {
            return Err(EngineError::InvalidToolOutput {
                tool: TOOL.to_string(),
                detail: format!("downloaded an empty file: {filename}"),
            });
        }

        let info = match known {
            Some(meta) => meta.clone(),
            None => parse_metadata_json(&output.stdout).unwrap_or_else(|_| VideoMetadata {
                title: url.to_string(),
                channel: None,
                duration_secs: None,
                description: None,
                webpage_url: None,
            }),
        };

        let thumbnail_filename = normalize_thumbnail(&media_dir, &stem)?;

        on_progress(100.0);

        Ok(FetchOutcome {
            title: info.title,
            filename,
            thumbnail_filename,
            duration_secs: info.duration_secs,
            resolved_url: info.webpage_url.filter(|resolved| resolved != url),
        })
    }
}

/// yt-dlp may leave the thumbnail as webp/png when conversion is unavailable; settle
/// on `<stem>.jpg` either way.
fn normalize_thumbnail(media_dir: &Path, stem: &str) -> Result<Option<String>> {
    let target = media_dir.join(format!("{stem}.jpg"));
    for ext in THUMBNAIL_EXTENSIONS {
        let candidate = media_dir.join(format!("{stem}.{ext}"));
        if !candidate.exists() {
            continue;
        }
        if candidate != target {
            std::fs::rename(&candidate, &target)?;
        }
        return Ok(Some(format!("{stem}.jpg")));
    }
    Ok(None)
}

fn path_with_ext(stem: &Path, ext: &str) -> PathBuf {
    let mut name = stem.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

pub fn ytdlp_status(paths: &AppPaths) -> YtDlpStatus {
    let bundled = paths.bundled_ytdlp_path();
    let bundled_installed = bundled.exists();

    let mut candidates: Vec<PathBuf> = Vec::new();
    if bundled_installed {
        candidates.push(bundled.clone());
    }
    candidates.push(PathBuf::from("yt-dlp"));

    for candidate in candidates {
        if let Some(version) = tool_version_first_line(&candidate) {
            return YtDlpStatus {
                available: true,
                bundled_installed,
                bundled_path: bundled.to_string_lossy().to_string(),
                resolved_path: candidate.to_string_lossy().to_string(),
                version: Some(version),
            };
        }
    }

    YtDlpStatus {
        available: false,
        bundled_installed,
        bundled_path: bundled.to_string_lossy().to_string(),
        resolved_path: String::new(),
        version: None,
    }
}

fn tool_version_first_line(program: &Path) -> Option<String> {
    let output = cmd::command(program).arg("--version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let first = text.lines().next()?.trim();
    if first.is_empty() {
        return None;
    }
    Some(first.to_string())
}
