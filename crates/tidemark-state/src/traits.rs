use chrono::NaiveDate;
use tidemark_core::{BuildRecord, Fingerprint, MatrixSnapshot, RecordKey};

/// The State Matrix seam. Absence of a key is never an error: it is the
/// normal "never built" state.
pub trait StateStore: Send + Sync {
    /// Read view for the pure planner.
    fn snapshot(&self) -> anyhow::Result<MatrixSnapshot>;

    fn get(&self, key: &RecordKey) -> anyhow::Result<Option<BuildRecord>>;

    /// Replace the record for its key, atomically with respect to readers and
    /// to concurrent puts for other keys. Also advances the per-artifact
    /// last-known-fingerprint map.
    fn put(&self, record: BuildRecord) -> anyhow::Result<()>;

    /// Last fingerprint any build used for this artifact, across all dates.
    fn last_fingerprint(&self, artifact_id: &str) -> anyhow::Result<Option<Fingerprint>>;

    fn keys_for_date(&self, date: NaiveDate) -> anyhow::Result<Vec<RecordKey>>;
}
