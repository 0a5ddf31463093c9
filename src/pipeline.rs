//! Per-job processing: duplicate checks, metadata probe, fetch, catalog insert and
//! optional enrichment.

use crate::catalog::{Catalog, NewCatalogEntry, SqliteCatalog};
use crate::config::QueueSettings;
use crate::enrich::{CaptionEnricher, Enricher};
use crate::fetch::{Fetcher, Prober, VideoMetadata};
use crate::jobs::JobReporter;
use crate::joblog::{log_best_effort, now_ms, Level};
use crate::paths::AppPaths;
use crate::ytdlp::YtDlp;
use crate::{EngineError, Result};
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

type ContentKey = (String, i64);

pub struct Pipeline {
    paths: AppPaths,
    catalog: Arc<dyn Catalog>,
    fetcher: Arc<dyn Fetcher>,
    prober: Arc<dyn Prober>,
    enricher: Option<Arc<dyn Enricher>>,
    /// (title, duration) keys of jobs that passed the content check and have not
    /// finished yet.
    in_flight: Mutex<HashSet<ContentKey>>,
}

/// Releases a content key when the job that claimed it finishes.
struct ContentClaim<'a> {
    in_flight: &'a Mutex<HashSet<ContentKey>>,
    key: ContentKey,
}

impl Drop for ContentClaim<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl Pipeline {
    pub fn new(
        paths: AppPaths,
        catalog: Arc<dyn Catalog>,
        fetcher: Arc<dyn Fetcher>,
        prober: Arc<dyn Prober>,
    ) -> Self {
        Self {
            paths,
            catalog,
            fetcher,
            prober,
            enricher: None,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// yt-dlp for probing and fetching, the SQLite catalog, caption enrichment.
    pub fn ytdlp(paths: AppPaths, settings: &QueueSettings) -> Self {
        let ytdlp = Arc::new(YtDlp::new(paths.clone(), settings.clone()));
        let catalog = Arc::new(SqliteCatalog::new(paths.clone()));
        let enricher = Arc::new(CaptionEnricher::new(paths.clone(), (*ytdlp).clone()));
        Self::new(paths, catalog, ytdlp.clone(), ytdlp).with_enricher(enricher)
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    /// Runs one job to completion and returns the new catalog id.
    pub fn run(&self, job_id: &str, url: &str, reporter: &JobReporter) -> Result<i64> {
        log_best_effort(&self.paths, job_id, Level::Info, "job_started", json!({ "url": url }));

        let result = self.execute(job_id, url, reporter);
        match &result {
            Ok(video_id) => log_best_effort(
                &self.paths,
                job_id,
                Level::Info,
                "job_succeeded",
                json!({ "video_id": video_id }),
            ),
            Err(err) => log_best_effort(
                &self.paths,
                job_id,
                Level::Error,
                "job_failed",
                json!({ "error": err.to_string(), "duplicate": err.is_duplicate() }),
            ),
        }
        result
    }

    fn execute(&self, job_id: &str, url: &str, reporter: &JobReporter) -> Result<i64> {
        self.reject_known_url(job_id, url)?;

        let metadata = match self.prober.probe(url) {
            Ok(meta) => Some(meta),
            Err(err) => {
                log_best_effort(
                    &self.paths,
                    job_id,
                    Level::Warn,
                    "probe_failed",
                    json!({ "error": err.to_string() }),
                );
                None
            }
        };

        // The catalog records canonical page URLs, so a short or aliased link must be
        // checked again once the probe has resolved it.
        if let Some(canonical) = metadata
            .as_ref()
            .and_then(|m| m.webpage_url.as_deref())
            .filter(|canonical| *canonical != url)
        {
            self.reject_known_url(job_id, canonical)?;
        }

        let _claim = match &metadata {
            Some(meta) => self.check_content(job_id, meta)?,
            None => None,
        };

        if let Some(meta) = &metadata {
            reporter.title(&meta.title);
            log_best_effort(
                &self.paths,
                job_id,
                Level::Info,
                "title_resolved",
                json!({ "title": meta.title, "duration_secs": meta.duration_secs }),
            );
        }

        let outcome = self
            .fetcher
            .fetch(url, metadata.as_ref(), &mut |percent| reporter.progress(percent))
            .inspect_err(|err| {
                log_best_effort(
                    &self.paths,
                    job_id,
                    Level::Error,
                    "fetch_failed",
                    json!({ "error": err.to_string() }),
                );
            })?;

        let record_url = outcome
            .resolved_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(url)
            .to_string();
        let entry = NewCatalogEntry {
            title: outcome.title,
            url: record_url,
            local_path: outcome.filename,
            thumbnail_path: outcome.thumbnail_filename,
            duration_seconds: outcome
                .duration_secs
                .or_else(|| metadata.as_ref().and_then(|m| m.duration_secs)),
            created_at_ms: now_ms(),
        };
        let video_id = match self.catalog.insert(&entry) {
            Ok(id) => id,
            Err(err) => {
                self.discard_outputs(job_id, &entry);
                return Err(err);
            }
        };
        reporter.title(&entry.title);
        log_best_effort(
            &self.paths,
            job_id,
            Level::Info,
            "catalog_inserted",
            json!({ "video_id": video_id, "url": entry.url, "local_path": entry.local_path }),
        );

        self.enrich_best_effort(job_id, url, video_id, &entry);
        Ok(video_id)
    }

    fn reject_known_url(&self, job_id: &str, url: &str) -> Result<()> {
        let Some(existing) = self.catalog.find_by_url(url)? else {
            return Ok(());
        };
        log_best_effort(
            &self.paths,
            job_id,
            Level::Info,
            "duplicate_url",
            json!({ "video_id": existing.id, "url": url }),
        );
        Err(EngineError::DuplicateUrl {
            url: url.to_string(),
        })
    }

    /// Removes the files of a download that never made it into the catalog.
    fn discard_outputs(&self, job_id: &str, entry: &NewCatalogEntry) {
        let mut removed = Vec::new();
        let files =
            std::iter::once(entry.local_path.as_str()).chain(entry.thumbnail_path.as_deref());
        for name in files {
            if std::fs::remove_file(self.paths.media_file(name)).is_ok() {
                removed.push(name.to_string());
            }
        }
        log_best_effort(
            &self.paths,
            job_id,
            Level::Warn,
            "outputs_discarded",
            json!({ "files": removed }),
        );
    }

    /// Rejects content already in the catalog or being downloaded by another job.
    fn check_content(&self, job_id: &str, meta: &VideoMetadata) -> Result<Option<ContentClaim<'_>>> {
        let Some(duration) = meta.duration_secs else {
            return Ok(None);
        };

        if let Some(existing) = self.catalog.find_by_title_and_duration(&meta.title, duration)? {
            log_best_effort(
                &self.paths,
                job_id,
                Level::Info,
                "duplicate_content",
                json!({ "video_id": existing.id }),
            );
            return Err(EngineError::DuplicateContent {
                title: meta.title.clone(),
                duration_secs: duration,
            });
        }

        let key = (meta.title.clone(), duration);
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(key.clone()) {
            log_best_effort(
                &self.paths,
                job_id,
                Level::Info,
                "duplicate_content",
                json!({ "in_flight": true }),
            );
            return Err(EngineError::ContentInFlight {
                title: meta.title.clone(),
                duration_secs: duration,
            });
        }
        Ok(Some(ContentClaim {
            in_flight: &self.in_flight,
            key,
        }))
    }

    fn enrich_best_effort(&self, job_id: &str, url: &str, video_id: i64, entry: &NewCatalogEntry) {
        let Some(enricher) = &self.enricher else {
            return;
        };

        let result = self.catalog.auto_analysis_enabled().and_then(|enabled| {
            if !enabled {
                return Ok(false);
            }
            let patch = enricher.enrich(video_id, url, entry)?;
            self.catalog.apply_enrichment(video_id, &patch)?;
            Ok(!patch.is_empty())
        });

        match result {
            Ok(false) => {}
            Ok(true) => log_best_effort(
                &self.paths,
                job_id,
                Level::Info,
                "enrichment_applied",
                json!({ "video_id": video_id }),
            ),
            Err(err) => log_best_effort(
                &self.paths,
                job_id,
                Level::Warn,
                "enrichment_failed",
                json!({ "video_id": video_id, "error": err.to_string() }),
            ),
        }
    }
}
