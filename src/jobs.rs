//! In-memory download queue and the driver thread that admits jobs under the
//! concurrency ceiling.
//!
//! Job records are owned by [`JobQueue`]. Worker threads never touch them; they send
//! [`JobEvent`]s to the driver, which applies them under the queue lock. A job only
//! moves forward: `pending -> downloading -> done | error`.

use crate::config::{self, QueueSettings};
use crate::joblog::{self, now_ms};
use crate::paths::AppPaths;
use crate::pipeline::Pipeline;
use crate::{db, Result};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Downloading,
    Done,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub url: String,
    pub title: String,
    pub status: JobStatus,
    pub error: Option<String>,
    /// 0..=100 while downloading, as last reported by the fetcher.
    pub progress: Option<f32>,
    pub video_id: Option<i64>,
    pub created_at_ms: i64,
    pub started_at_ms: Option<i64>,
    pub finished_at_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub url: String,
    #[serde(default)]
    pub title: String,
}

impl EnqueueRequest {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }
}

/// Point-in-time copy of the queue; never shares memory with the live records.
#[derive(Debug, Clone, Serialize)]
pub struct QueueState {
    pub jobs: Vec<Job>,
    pub is_running: bool,
    pub concurrency: usize,
}

impl QueueState {
    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }
}

pub(crate) enum JobEvent {
    Title {
        job_id: String,
        title: String,
    },
    Progress {
        job_id: String,
        percent: f32,
    },
    Finished {
        job_id: String,
        outcome: std::result::Result<i64, String>,
    },
}

/// Handed to the pipeline so it can report title and progress for its job.
pub struct JobReporter {
    job_id: String,
    tx: Sender<JobEvent>,
}

impl JobReporter {
    pub fn title(&self, title: &str) {
        let title = title.trim();
        if title.is_empty() {
            return;
        }
        let _ = self.tx.send(JobEvent::Title {
            job_id: self.job_id.clone(),
            title: title.to_string(),
        });
    }

    pub fn progress(&self, percent: f32) {
        if !percent.is_finite() {
            return;
        }
        let _ = self.tx.send(JobEvent::Progress {
            job_id: self.job_id.clone(),
            percent: percent.clamp(0.0, 100.0),
        });
    }
}

struct QueueInner {
    jobs: Vec<Job>,
    running: bool,
}

struct Shared {
    state: Mutex<QueueInner>,
    pipeline: Arc<Pipeline>,
    settings: QueueSettings,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the process-wide download queue. Cheap to clone; construct once at
/// startup and pass it to whatever serves enqueue/snapshot requests.
#[derive(Clone)]
pub struct JobQueue {
    shared: Arc<Shared>,
}

impl JobQueue {
    pub fn new(pipeline: Pipeline, settings: QueueSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueInner {
                    jobs: Vec::new(),
                    running: false,
                }),
                pipeline: Arc::new(pipeline),
                settings,
            }),
        }
    }

    /// Prepares the app directory and wires the queue to yt-dlp and the SQLite
    /// catalog using the settings stored under `config/queue.json`.
    pub fn open(paths: AppPaths) -> Result<Self> {
        paths.ensure_dirs()?;
        db::ensure_schema(&paths)?;
        let settings = config::load_queue_settings(&paths)?;

        let prune_paths = paths.clone();
        thread::spawn(move || {
            let _ = joblog::prune_job_logs(&prune_paths);
        });

        let pipeline = Pipeline::ytdlp(paths, &settings);
        Ok(Self::new(pipeline, settings))
    }

    pub fn paths(&self) -> &AppPaths {
        self.shared.pipeline.paths()
    }

    /// Adds a pending job per entry and returns the new ids in input order. Entries
    /// whose URL already belongs to a job that has not failed are skipped, so the
    /// result may be shorter than the input. Starts the driver if it is idle.
    pub fn enqueue(&self, entries: Vec<EnqueueRequest>) -> Vec<String> {
        let mut inner = self.shared.lock();
        let mut ids = Vec::new();

        for entry in entries {
            let url = entry.url.trim();
            if url.is_empty() {
                continue;
            }
            if inner
                .jobs
                .iter()
                .any(|j| j.url == url && j.status != JobStatus::Error)
            {
                continue;
            }

            let title = entry.title.trim();
            let id = Uuid::new_v4().to_string();
            inner.jobs.push(Job {
                id: id.clone(),
                url: url.to_string(),
                title: if title.is_empty() {
                    url.to_string()
                } else {
                    title.to_string()
                },
                status: JobStatus::Pending,
                error: None,
                progress: None,
                video_id: None,
                created_at_ms: now_ms(),
                started_at_ms: None,
                finished_at_ms: None,
            });
            ids.push(id);
        }

        let has_pending = inner.jobs.iter().any(|j| j.status == JobStatus::Pending);
        if !inner.running && has_pending {
            inner.running = true;
            let shared = self.shared.clone();
            thread::spawn(move || drive(shared));
        }

        ids
    }

    pub fn snapshot(&self) -> QueueState {
        let inner = self.shared.lock();
        QueueState {
            jobs: inner.jobs.clone(),
            is_running: inner.running,
            concurrency: self.shared.settings.concurrency(),
        }
    }

    /// Removes `done` and `error` jobs, keeping pending and downloading ones in order.
    /// Returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut inner = self.shared.lock();
        let before = inner.jobs.len();
        inner.jobs.retain(|j| !j.status.is_terminal());
        before - inner.jobs.len()
    }
}

fn drive(shared: Arc<Shared>) {
    let (tx, rx) = mpsc::channel::<JobEvent>();
    let ceiling = shared.settings.concurrency();
    let mut active = 0_usize;
    let mut received: Vec<JobEvent> = Vec::new();

    loop {
        let launch = {
            let mut inner = shared.lock();
            for event in received.drain(..) {
                apply_event(&mut inner, event, &mut active);
            }
            while let Ok(event) = rx.try_recv() {
                apply_event(&mut inner, event, &mut active);
            }

            let next = if active < ceiling {
                inner
                    .jobs
                    .iter_mut()
                    .find(|j| j.status == JobStatus::Pending)
            } else {
                None
            };

            match next {
                Some(job) => {
                    job.status = JobStatus::Downloading;
                    job.started_at_ms = Some(now_ms());
                    Some((job.id.clone(), job.url.clone()))
                }
                None if active == 0 => {
                    // Decided under the same lock enqueue uses, so no pending job is
                    // left behind by a driver that is about to exit.
                    inner.running = false;
                    return;
                }
                None => None,
            }
        };

        match launch {
            Some((job_id, url)) => {
                active += 1;
                spawn_worker(&shared, job_id, url, tx.clone());
                pause_after_launch(&shared, &rx, &mut received);
            }
            None => match rx.recv_timeout(shared.settings.idle_wait()) {
                Ok(event) => received.push(event),
                Err(RecvTimeoutError::Timeout) => {}
                // The driver keeps its own sender alive, so this never happens.
                Err(RecvTimeoutError::Disconnected) => {}
            },
        }
    }
}

/// Waits out the launch delay. Progress and titles are applied as they arrive;
/// completions are held back so the slot count and the exit decision are only updated
/// at the top of the driver loop.
fn pause_after_launch(shared: &Shared, rx: &Receiver<JobEvent>, held: &mut Vec<JobEvent>) {
    let deadline = Instant::now() + shared.settings.launch_delay();
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        match rx.recv_timeout(deadline - now) {
            Ok(event @ JobEvent::Finished { .. }) => held.push(event),
            Ok(event) => {
                let mut inner = shared.lock();
                let mut unused = 0;
                apply_event(&mut inner, event, &mut unused);
            }
            Err(_) => return,
        }
    }
}

fn apply_event(inner: &mut QueueInner, event: JobEvent, active: &mut usize) {
    match event {
        JobEvent::Title { job_id, title } => {
            if let Some(job) = downloading_job(inner, &job_id) {
                job.title = title;
            }
        }
        JobEvent::Progress { job_id, percent } => {
            if let Some(job) = downloading_job(inner, &job_id) {
                job.progress = Some(percent);
            }
        }
        JobEvent::Finished { job_id, outcome } => {
            *active = active.saturating_sub(1);
            if let Some(job) = downloading_job(inner, &job_id) {
                job.finished_at_ms = Some(now_ms());
                match outcome {
                    Ok(video_id) => {
                        job.status = JobStatus::Done;
                        job.progress = Some(100.0);
                        job.video_id = Some(video_id);
                        job.error = None;
                    }
                    Err(message) => {
                        job.status = JobStatus::Error;
                        job.error = Some(message);
                    }
                }
            }
        }
    }
}

fn downloading_job<'a>(inner: &'a mut QueueInner, job_id: &str) -> Option<&'a mut Job> {
    inner
        .jobs
        .iter_mut()
        .find(|j| j.id == job_id && j.status == JobStatus::Downloading)
}

fn spawn_worker(shared: &Arc<Shared>, job_id: String, url: String, tx: Sender<JobEvent>) {
    let pipeline = shared.pipeline.clone();
    thread::spawn(move || {
        let reporter = JobReporter {
            job_id: job_id.clone(),
            tx: tx.clone(),
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| pipeline.run(&job_id, &url, &reporter)));
        let outcome = match result {
            Ok(Ok(video_id)) => Ok(video_id),
            Ok(Err(err)) => Err(err.to_string()),
            Err(payload) => {
                let message = format!("job panicked: {}", panic_message(payload.as_ref()));
                joblog::log_best_effort(
                    pipeline.paths(),
                    &job_id,
                    joblog::Level::Error,
                    "job_panicked",
                    serde_json::json!({ "error": message }),
                );
                Err(message)
            }
        };
        let _ = tx.send(JobEvent::Finished { job_id, outcome });
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
