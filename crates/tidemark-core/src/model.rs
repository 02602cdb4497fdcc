use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The two dependency layers: reports consume one or more sources for a date.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Source,
    Report,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Source => "source",
            ArtifactKind::Report => "report",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "source" => Some(ArtifactKind::Source),
            "report" => Some(ArtifactKind::Report),
            _ => None,
        }
    }
}

/// Content-derived digest of a definition. Equal fingerprints mean equal
/// semantics; superficial edits (formatting, comments) do not change it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn from_str(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sentinel recorded when a definition failed to normalize. Can never
    /// match a real digest, so the artifact stays stale until it parses again.
    pub fn invalid() -> Self {
        Self("invalid".to_string())
    }
}

/// Key of the State Matrix: one regenerable artifact for one calendar date.
/// The derived ordering (date, kind, id) puts sources before reports per date.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub date: NaiveDate,
    pub kind: ArtifactKind,
    pub id: String,
}

impl RecordKey {
    pub fn source(date: NaiveDate, id: impl Into<String>) -> Self {
        Self { date, kind: ArtifactKind::Source, id: id.into() }
    }

    pub fn report(date: NaiveDate, id: impl Into<String>) -> Self {
        Self { date, kind: ArtifactKind::Report, id: id.into() }
    }
}

/// A raw-telemetry query definition. `query` is opaque executable text; the
/// fingerprint engine normalizes it before hashing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDef {
    pub id: String,
    pub query: String,
    pub output: String,
}

/// A rendered-page definition. Depends on source artifacts of the same date.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDef {
    pub id: String,
    pub depends_on: Vec<String>,
    pub template: String,
    pub params: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Rows(u64),
    Rendered(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { metric: Metric },
    Failure { reason: String },
}

/// Last known build attempt for one key. A new record replaces the previous
/// one; the matrix never keeps history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    #[serde(flatten)]
    pub key: RecordKey,
    pub fingerprint_used: Fingerprint,
    pub built_at: DateTime<Utc>,
    pub outcome: Outcome,
}

impl BuildRecord {
    pub fn success(key: RecordKey, fingerprint: Fingerprint, metric: Metric, built_at: DateTime<Utc>) -> Self {
        Self { key, fingerprint_used: fingerprint, built_at, outcome: Outcome::Success { metric } }
    }

    pub fn failure(key: RecordKey, fingerprint: Fingerprint, reason: String, built_at: DateTime<Utc>) -> Self {
        Self { key, fingerprint_used: fingerprint, built_at, outcome: Outcome::Failure { reason } }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }
}

/// Read-only view of the State Matrix consumed by the pure planner. The
/// imperative shell produces this from storage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatrixSnapshot {
    pub records: BTreeMap<RecordKey, BuildRecord>,
    pub fingerprints: BTreeMap<String, Fingerprint>,
}

impl MatrixSnapshot {
    pub fn get(&self, key: &RecordKey) -> Option<&BuildRecord> {
        self.records.get(key)
    }
}

/// Current fingerprints per artifact id. An id with no entry failed to
/// normalize and is treated as always stale.
#[derive(Clone, Debug, Default)]
pub struct Fingerprints {
    current: BTreeMap<String, Fingerprint>,
}

impl Fingerprints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, fingerprint: Fingerprint) {
        self.current.insert(id.into(), fingerprint);
    }

    pub fn current(&self, id: &str) -> Option<&Fingerprint> {
        self.current.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Fingerprint)> {
        self.current.iter()
    }
}
