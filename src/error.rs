use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("output directory does not exist: {0}")]
    PathNotFound(PathBuf),
    #[error("index store was never initialized: {0}")]
    StoreUnavailable(PathBuf),
    #[error("index store is locked by another process: {0}")]
    StoreLocked(PathBuf),
    #[error("index store line {line} in {path} is malformed: {source}")]
    MalformedStore {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("remote listing at {url} no longer contains {level} {wanted}")]
    ResumePointMissing {
        level: &'static str,
        wanted: u32,
        url: String,
    },
    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("unparseable timestamp in file name {name}: {reason}")]
    BadTimestamp { name: String, reason: String },
    #[error("decoder binary not found: {0}")]
    DecoderMissing(String),
    #[error("record decode failed for {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
