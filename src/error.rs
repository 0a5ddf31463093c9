use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("external tool is missing: {tool}")]
    ExternalToolMissing { tool: String },

    #[error("external tool failed: {tool} (code={code:?}) {stderr}")]
    ExternalToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("external tool timed out: {tool} after {secs}s")]
    ExternalToolTimedOut { tool: String, secs: u64 },

    #[error("unexpected output from {tool}: {detail}")]
    InvalidToolOutput { tool: String, detail: String },

    #[error("video already exists in library: {url}")]
    DuplicateUrl { url: String },

    #[error("duplicate content: \"{title}\" ({duration_secs}s) already exists in library")]
    DuplicateContent { title: String, duration_secs: i64 },

    #[error("duplicate content: \"{title}\" ({duration_secs}s) is already being downloaded")]
    ContentInFlight { title: String, duration_secs: i64 },

    #[error("not found: {0}")]
    NotFound(String),
}

impl EngineError {
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            EngineError::DuplicateUrl { .. }
                | EngineError::DuplicateContent { .. }
                | EngineError::ContentInFlight { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
