//! Optional post-download enrichment of catalog entries.

use crate::captions::strip_caption_markup;
use crate::catalog::{EnrichmentPatch, NewCatalogEntry};
use crate::fetch::Prober;
use crate::joblog::now_ms;
use crate::paths::AppPaths;
use crate::ytdlp::YtDlp;
use crate::Result;
use std::path::Path;

/// Produces extra fields for an entry that was just downloaded. Only runs when the
/// catalog's auto-analysis setting is on; errors never undo the download.
pub trait Enricher: Send + Sync {
    fn enrich(&self, video_id: i64, source_url: &str, entry: &NewCatalogEntry)
        -> Result<EnrichmentPatch>;
}

/// Saves the source's English auto-captions as a plain-text transcript beside the video.
/// Metadata is looked up again first; its description stands in when there are no
/// captions.
#[derive(Debug, Clone)]
pub struct CaptionEnricher {
    paths: AppPaths,
    ytdlp: YtDlp,
}

impl CaptionEnricher {
    pub fn new(paths: AppPaths, ytdlp: YtDlp) -> Self {
        Self { paths, ytdlp }
    }
}

impl Enricher for CaptionEnricher {
    fn enrich(
        &self,
        video_id: i64,
        source_url: &str,
        entry: &NewCatalogEntry,
    ) -> Result<EnrichmentPatch> {
        let metadata = self.ytdlp.probe(source_url)?;

        std::fs::create_dir_all(self.paths.temp_dir())?;
        let scratch = self
            .paths
            .temp_dir()
            .join(format!("captions_{video_id}_{}", now_ms()));

        let captions = self
            .ytdlp
            .fetch_auto_captions(source_url, &scratch)?
            .map(|raw| strip_caption_markup(&raw))
            .filter(|text| !text.is_empty());
        let Some(transcript) = captions.or_else(|| {
            metadata
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
        }) else {
            return Ok(EnrichmentPatch::default());
        };

        let stem = Path::new(&entry.local_path)
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("video_{video_id}"));
        let filename = format!("{stem}.transcript.txt");
        std::fs::create_dir_all(self.paths.media_dir())?;
        std::fs::write(self.paths.media_file(&filename), format!("{transcript}\n"))?;

        Ok(EnrichmentPatch {
            subtitle_path: Some(filename),
            ..EnrichmentPatch::default()
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::QueueSettings;

    fn entry(local_path: &str) -> NewCatalogEntry {
        NewCatalogEntry {
            title: "Five Little Ducks".to_string(),
            url: "https://youtu.be/ducks".to_string(),
            local_path: local_path.to_string(),
            thumbnail_path: None,
            duration_seconds: Some(120),
            created_at_ms: 0,
        }
    }

    fn enricher(dir: &Path, body: &str) -> (AppPaths, CaptionEnricher) {
        let script = dir.join("fake-yt-dlp.sh");
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).expect("write script");
        let paths = AppPaths::new(dir.join("app"));
        paths.ensure_dirs().expect("ensure dirs");
        let ytdlp = YtDlp::new(paths.clone(), QueueSettings::default())
            .with_program("sh", vec![script.to_string_lossy().to_string()]);
        (paths.clone(), CaptionEnricher::new(paths, ytdlp))
    }

    const PROBE_SECTION: &str = r#"
for a in "$@"; do
  if [ "$a" = "--dump-json" ]; then
    echo "$INFO_JSON"
    exit 0
  fi
done
"#;

    fn script(info_json: &str, rest: &str) -> String {
        format!("INFO_JSON='{info_json}'\n{PROBE_SECTION}\n{rest}")
    }

    #[test]
    fn transcript_is_written_next_to_video() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (paths, enricher) = enricher(
            dir.path(),
            &script(
                r#"{"title":"Five Little Ducks","duration":120}"#,
                r#"
out=""; prev=""
for a in "$@"; do
  if [ "$prev" = "-o" ]; then out="$a"; fi
  prev="$a"
done
base=$(printf '%s' "$out" | sed 's/\.%(ext)s$//')
printf 'WEBVTT\n\n00:00:01.000 --> 00:00:02.000\n<c>Five little ducks</c>\n' > "$base.en.vtt"
exit 0
"#,
            ),
        );

        let patch = enricher
            .enrich(7, "https://youtu.be/ducks", &entry("Five_Little_Ducks_1.mp4"))
            .expect("enrich");
        assert_eq!(
            patch.subtitle_path.as_deref(),
            Some("Five_Little_Ducks_1.transcript.txt")
        );
        let text = std::fs::read_to_string(paths.media_file("Five_Little_Ducks_1.transcript.txt"))
            .expect("read transcript");
        assert_eq!(text.trim(), "Five little ducks");
    }

    #[test]
    fn description_stands_in_when_there_are_no_captions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (paths, enricher) = enricher(
            dir.path(),
            &script(
                r#"{"title":"Five Little Ducks","description":"A counting song about ducks."}"#,
                "echo 'no subtitles' 1>&2\nexit 1",
            ),
        );

        let patch = enricher
            .enrich(7, "https://youtu.be/ducks", &entry("ducks_1.mp4"))
            .expect("enrich");
        assert_eq!(patch.subtitle_path.as_deref(), Some("ducks_1.transcript.txt"));
        let text = std::fs::read_to_string(paths.media_file("ducks_1.transcript.txt"))
            .expect("read transcript");
        assert_eq!(text.trim(), "A counting song about ducks.");
    }

    #[test]
    fn no_captions_or_description_yields_empty_patch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (_paths, enricher) = enricher(
            dir.path(),
            &script(r#"{"title":"Five Little Ducks"}"#, "echo 'no subtitles' 1>&2\nexit 1"),
        );
        let patch = enricher
            .enrich(7, "https://youtu.be/ducks", &entry("a.mp4"))
            .expect("enrich");
        assert!(patch.is_empty());
    }

    #[test]
    fn failed_metadata_lookup_fails_enrichment() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (_paths, enricher) = enricher(dir.path(), "echo 'ERROR: private video' 1>&2\nexit 1");
        let err = enricher
            .enrich(7, "https://youtu.be/ducks", &entry("a.mp4"))
            .expect_err("must fail");
        assert!(err.to_string().contains("private video"), "unexpected error: {err}");
    }
}
