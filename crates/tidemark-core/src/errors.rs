use chrono::NaiveDate;
use thiserror::Error;

/// Fatal configuration problems. Raised before any planning happens.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("rolling window must be at least one day")]
    EmptyWindow,

    #[error("date range start {start} is after end {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },

    #[error("{0}")]
    Invalid(String),
}

/// A single definition could not be normalized for hashing.
///
/// Not fatal: the caller degrades the artifact to always-stale instead of
/// aborting the run.
#[derive(Debug, Error)]
#[error("cannot fingerprint `{artifact_id}`: {reason}")]
pub struct FingerprintError {
    pub artifact_id: String,
    pub reason: String,
}
