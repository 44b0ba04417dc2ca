use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::engine::models::VersionRecord;
use crate::engine::state::Stage;

/// Failures talking to the version endpoint or the download host.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("invalid version payload from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("download incomplete: received {received} of {expected} bytes")]
    Truncated { received: u64, expected: u64 },
    #[error("cannot address {segment:?} under {base}")]
    InvalidUrl { base: String, segment: String },
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("malformed archive: {0}")]
    Malformed(#[from] zip::result::ZipError),
    #[error("archive entry {entry:?} escapes the destination directory")]
    PathTraversal { entry: String },
    #[error("extraction destination {} does not exist", .0.display())]
    MissingDestination(PathBuf),
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("release {id} carries no checksum and checksums are required")]
    MissingChecksum { id: String },
}

/// Read or write failures on the local version file.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unable to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unable to persist version to {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to encode version record: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("unable to create staging directory: {0}")]
    Staging(#[source] io::Error),
    #[error("unable to create {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to move {} to {}: {source}", .from.display(), .to.display())]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to walk staged files: {0}")]
    Walk(#[from] walkdir::Error),
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Install(#[from] InstallError),
    #[error("update cancelled")]
    Cancelled,
}

/// A failed update run, tagged with the stage that failed.
///
/// `pending_record` is only set for [`Stage::Persist`]: the files are already
/// installed and only the version file is stale.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {error}")]
pub struct UpdateFailure {
    pub stage: Stage,
    #[source]
    pub error: UpdateError,
    pub pending_record: Option<VersionRecord>,
}

impl UpdateFailure {
    pub fn new(stage: Stage, error: impl Into<UpdateError>) -> Self {
        Self {
            stage,
            error: error.into(),
            pending_record: None,
        }
    }
}
