use crate::Result;
use serde::{Deserialize, Serialize};

/// What the source reports about a URL without downloading it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub channel: Option<String>,
    pub duration_secs: Option<i64>,
    pub description: Option<String>,
    /// Canonical page URL when the source resolved an alias or redirect.
    pub webpage_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchOutcome {
    pub title: String,
    /// File name relative to the media directory.
    pub filename: String,
    pub thumbnail_filename: Option<String>,
    pub duration_secs: Option<i64>,
    pub resolved_url: Option<String>,
}

/// Retrieves media for one URL. `known` is the metadata the caller already probed, if
/// any; without it the fetcher works out title and duration from the download itself.
/// `on_progress` receives percentages in 0..=100 as the underlying tool reports them;
/// calls may be sparse or absent.
pub trait Fetcher: Send + Sync {
    fn fetch(
        &self,
        url: &str,
        known: Option<&VideoMetadata>,
        on_progress: &mut dyn FnMut(f32),
    ) -> Result<FetchOutcome>;
}

/// Metadata lookup without a download. Must fail fast and with an error distinct from a
/// fetch failure.
pub trait Prober: Send + Sync {
    fn probe(&self, url: &str) -> Result<VideoMetadata>;
}
