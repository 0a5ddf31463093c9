//! Durable library of downloaded videos.
//!
//! The queue only needs existence checks and inserts, expressed by [`Catalog`]. The
//! request-serving side of the application reads the same `videos` table.

use crate::db::{self, OptionalRowExt};
use crate::paths::AppPaths;
use crate::{EngineError, Result};
use rusqlite::{params, Connection, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: i64,
    pub title: String,
    pub youtube_url: Option<String>,
    pub local_path: String,
    pub thumbnail_path: Option<String>,
    pub subtitle_path: Option<String>,
    pub duration_seconds: Option<i64>,
    pub created_at_ms: i64,
    pub ai_score: Option<i64>,
    pub educational_value: Option<String>,
    pub pacing: Option<String>,
    pub educational_tags: Vec<String>,
    pub is_approved: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NewCatalogEntry {
    pub title: String,
    pub url: String,
    pub local_path: String,
    pub thumbnail_path: Option<String>,
    pub duration_seconds: Option<i64>,
    pub created_at_ms: i64,
}

/// Fields an enrichment pass may fill in after the download succeeded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichmentPatch {
    pub subtitle_path: Option<String>,
    pub ai_score: Option<i64>,
    pub educational_value: Option<String>,
    pub pacing: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl EnrichmentPatch {
    pub fn is_empty(&self) -> bool {
        self == &EnrichmentPatch::default()
    }
}

pub trait Catalog: Send + Sync {
    fn find_by_url(&self, url: &str) -> Result<Option<CatalogEntry>>;

    fn find_by_title_and_duration(
        &self,
        title: &str,
        duration_seconds: i64,
    ) -> Result<Option<CatalogEntry>>;

    /// Inserts the entry unless one with the same URL already exists, in which case
    /// `DuplicateUrl` is returned and nothing is written.
    fn insert(&self, entry: &NewCatalogEntry) -> Result<i64>;

    fn apply_enrichment(&self, id: i64, patch: &EnrichmentPatch) -> Result<()>;

    fn auto_analysis_enabled(&self) -> Result<bool> {
        Ok(false)
    }
}

#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    paths: AppPaths,
}

const SELECT_COLUMNS: &str = r#"
SELECT
  id,
  title,
  youtube_url,
  local_path,
  thumbnail_path,
  subtitle_path,
  duration_seconds,
  created_at_ms,
  ai_score,
  educational_value,
  pacing,
  educational_tags,
  is_approved
FROM videos
"#;

impl SqliteCatalog {
    pub fn new(paths: AppPaths) -> Self {
        Self { paths }
    }

    /// Schema setup happens once at startup through [`db::ensure_schema`].
    fn connect(&self) -> Result<Connection> {
        db::open(&self.paths)
    }

    pub fn get_video(&self, id: i64) -> Result<CatalogEntry> {
        let conn = self.connect()?;
        conn.query_row(
            &format!("{SELECT_COLUMNS} WHERE id=?1"),
            params![id],
            entry_from_row,
        )
        .optional()?
        .ok_or_else(|| EngineError::NotFound(format!("video {id}")))
    }

    pub fn list_videos(&self, limit: usize, offset: usize) -> Result<Vec<CatalogEntry>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} ORDER BY created_at_ms DESC, id DESC LIMIT ?1 OFFSET ?2"
        ))?;
        let items = stmt
            .query_map(params![limit as i64, offset as i64], entry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    pub fn count_by_url(&self, url: &str) -> Result<usize> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM videos WHERE youtube_url=?1",
            params![url],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn set_auto_analysis(&self, enabled: bool) -> Result<()> {
        let conn = self.connect()?;
        db::set_setting(
            &conn,
            db::SETTING_AI_AUTO_ANALYSIS,
            if enabled { "true" } else { "false" },
        )
    }
}

impl Catalog for SqliteCatalog {
    fn find_by_url(&self, url: &str) -> Result<Option<CatalogEntry>> {
        let conn = self.connect()?;
        let entry = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE youtube_url=?1 ORDER BY id LIMIT 1"),
                params![url],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    fn find_by_title_and_duration(
        &self,
        title: &str,
        duration_seconds: i64,
    ) -> Result<Option<CatalogEntry>> {
        let conn = self.connect()?;
        let entry = conn
            .query_row(
                &format!(
                    "{SELECT_COLUMNS} WHERE title=?1 AND duration_seconds=?2 ORDER BY id LIMIT 1"
                ),
                params![title, duration_seconds],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    fn insert(&self, entry: &NewCatalogEntry) -> Result<i64> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM videos WHERE youtube_url=?1 LIMIT 1",
                params![&entry.url],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(EngineError::DuplicateUrl {
                url: entry.url.clone(),
            });
        }

        tx.execute(
            r#"
INSERT INTO videos (
  title,
  youtube_url,
  local_path,
  thumbnail_path,
  duration_seconds,
  created_at_ms
) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
"#,
            params![
                &entry.title,
                &entry.url,
                &entry.local_path,
                &entry.thumbnail_path,
                entry.duration_seconds,
                entry.created_at_ms,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    fn apply_enrichment(&self, id: i64, patch: &EnrichmentPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let conn = self.connect()?;
        let tags_json = match &patch.tags {
            Some(tags) => Some(serde_json::to_string(tags)?),
            None => None,
        };
        let updated = conn.execute(
            r#"
UPDATE videos SET
  subtitle_path = COALESCE(?1, subtitle_path),
  ai_score = COALESCE(?2, ai_score),
  educational_value = COALESCE(?3, educational_value),
  pacing = COALESCE(?4, pacing),
  educational_tags = COALESCE(?5, educational_tags)
WHERE id=?6
"#,
            params![
                &patch.subtitle_path,
                patch.ai_score.map(|s| s.clamp(1, 10)),
                &patch.educational_value,
                &patch.pacing,
                tags_json,
                id,
            ],
        )?;
        if updated == 0 {
            return Err(EngineError::NotFound(format!("video {id}")));
        }
        Ok(())
    }

    fn auto_analysis_enabled(&self) -> Result<bool> {
        let conn = self.connect()?;
        db::setting_flag(&conn, db::SETTING_AI_AUTO_ANALYSIS)
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogEntry> {
    let tags_raw: Option<String> = row.get(11)?;
    let educational_tags = tags_raw
        .as_deref()
        .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
        .unwrap_or_default();
    Ok(CatalogEntry {
        id: row.get(0)?,
        title: row.get(1)?,
        youtube_url: row.get(2)?,
        local_path: row.get(3)?,
        thumbnail_path: row.get(4)?,
        subtitle_path: row.get(5)?,
        duration_seconds: row.get(6)?,
        created_at_ms: row.get(7)?,
        ai_score: row.get(8)?,
        educational_value: row.get(9)?,
        pacing: row.get(10)?,
        educational_tags,
        is_approved: row.get(12)?,
    })
}
