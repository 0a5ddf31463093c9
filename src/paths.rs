use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_dir: PathBuf,
}

impl AppPaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.base_dir.join("config")
    }

    pub fn queue_settings_path(&self) -> PathBuf {
        self.config_dir().join("queue.json")
    }

    /// Netscape cookie jar handed to yt-dlp when present.
    pub fn cookies_path(&self) -> PathBuf {
        self.config_dir().join("cookies.txt")
    }

    pub fn cookies_file(&self) -> Option<PathBuf> {
        let path = self.cookies_path();
        if path.is_file() {
            Some(path)
        } else {
            None
        }
    }

    /// Downloaded videos and their thumbnails/transcripts.
    pub fn media_dir(&self) -> PathBuf {
        self.base_dir.join("media")
    }

    pub fn media_file(&self, filename: &str) -> PathBuf {
        self.media_dir().join(filename)
    }

    pub fn db_dir(&self) -> PathBuf {
        self.base_dir.join("db")
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_dir().join("app.sqlite")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn job_logs_dir(&self) -> PathBuf {
        self.logs_dir().join("jobs")
    }

    pub fn job_log_path(&self, job_id: &str) -> PathBuf {
        self.job_logs_dir().join(format!("{job_id}.jsonl"))
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.base_dir.join("temp")
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.base_dir.join("tools")
    }

    pub fn bundled_ytdlp_path(&self) -> PathBuf {
        let mut path = self.tools_dir().join("yt-dlp").join("yt-dlp");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.config_dir())?;
        std::fs::create_dir_all(self.media_dir())?;
        std::fs::create_dir_all(self.db_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        std::fs::create_dir_all(self.job_logs_dir())?;
        std::fs::create_dir_all(self.temp_dir())?;
        std::fs::create_dir_all(self.tools_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookies_file_only_reported_when_present() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        paths.ensure_dirs().expect("ensure dirs");
        assert!(paths.cookies_file().is_none());

        std::fs::write(paths.cookies_path(), "# Netscape HTTP Cookie File\n").expect("write");
        assert_eq!(paths.cookies_file(), Some(paths.cookies_path()));
    }
}
