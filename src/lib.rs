pub mod captions;
pub mod catalog;
pub mod cmd;
pub mod config;
pub mod db;
pub mod enrich;
mod error;
pub mod fetch;
pub mod joblog;
pub mod jobs;
pub mod paths;
pub mod pipeline;
pub mod ytdlp;

pub use error::{EngineError, Result};
