use crate::paths::AppPaths;
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MAX_CONCURRENT: usize = 2;
pub const MAX_MAX_CONCURRENT: usize = 8;
pub const DEFAULT_FORMAT_SELECTOR: &str = "bestvideo[height<=720]+bestaudio/best[height<=720]";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Ceiling on jobs in `downloading` at once.
    pub max_concurrent: usize,
    /// Pause after each launch so the source isn't hit by a burst of processes.
    pub launch_delay_ms: u64,
    /// How long the driver waits for a job event while at capacity.
    pub idle_wait_ms: u64,
    /// 0 disables the timeout.
    pub download_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub format_selector: String,
    pub extra_args: Vec<String>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            launch_delay_ms: 500,
            idle_wait_ms: 1_000,
            download_timeout_secs: 7_200,
            probe_timeout_secs: 120,
            format_selector: DEFAULT_FORMAT_SELECTOR.to_string(),
            extra_args: Vec::new(),
        }
    }
}

impl QueueSettings {
    pub fn concurrency(&self) -> usize {
        self.max_concurrent.clamp(1, MAX_MAX_CONCURRENT)
    }

    pub fn launch_delay(&self) -> Duration {
        Duration::from_millis(self.launch_delay_ms)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms.max(1))
    }
}

pub fn load_queue_settings(paths: &AppPaths) -> Result<QueueSettings> {
    let path = paths.queue_settings_path();
    if !path.exists() {
        return Ok(QueueSettings::default());
    }
    let bytes = std::fs::read(&path)?;
    let parsed: QueueSettings = serde_json::from_slice(&bytes).map_err(|e| {
        EngineError::Config(format!(
            "failed to parse queue settings at {}: {e}",
            path.to_string_lossy()
        ))
    })?;
    Ok(parsed)
}

pub fn save_queue_settings(paths: &AppPaths, settings: &QueueSettings) -> Result<()> {
    let path = paths.queue_settings_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(&path, format!("{json}\n"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        let settings = load_queue_settings(&paths).expect("load");
        assert_eq!(settings.concurrency(), DEFAULT_MAX_CONCURRENT);
        assert_eq!(settings.launch_delay(), Duration::from_millis(500));
        assert_eq!(settings.format_selector, DEFAULT_FORMAT_SELECTOR);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        std::fs::create_dir_all(paths.config_dir()).expect("config dir");
        std::fs::write(paths.queue_settings_path(), r#"{"max_concurrent": 40}"#).expect("write");

        let settings = load_queue_settings(&paths).expect("load");
        assert_eq!(settings.max_concurrent, 40);
        assert_eq!(settings.concurrency(), MAX_MAX_CONCURRENT);
        assert_eq!(settings.idle_wait_ms, 1_000);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        std::fs::create_dir_all(paths.config_dir()).expect("config dir");
        std::fs::write(paths.queue_settings_path(), "{not json").expect("write");

        let err = load_queue_settings(&paths).expect_err("must fail");
        assert!(matches!(err, EngineError::Config(_)), "unexpected error: {err}");
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        let settings = QueueSettings {
            max_concurrent: 3,
            extra_args: vec!["--limit-rate".to_string(), "2M".to_string()],
            ..QueueSettings::default()
        };
        save_queue_settings(&paths, &settings).expect("save");
        let loaded = load_queue_settings(&paths).expect("load");
        assert_eq!(loaded.max_concurrent, 3);
        assert_eq!(loaded.extra_args, settings.extra_args);
    }
}
