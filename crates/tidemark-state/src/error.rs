use std::path::PathBuf;

use thiserror::Error;

/// Persistence failures are fatal for the whole run: staleness decisions made
/// against an unreadable matrix would be unsound.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("read state file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is not valid JSON ({source}); delete it to start over from an empty matrix")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("state file {path} has unsupported schema version {version}")]
    UnsupportedSchema { path: PathBuf, version: u32 },

    #[error("write state file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
