use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tidemark_core::{ArtifactKind, BuildRecord, Fingerprint, MatrixSnapshot, RecordKey};

use crate::error::StateError;
use crate::traits::StateStore;

const SCHEMA_VERSION: u32 = 1;

/// On-disk shape: one JSON document holding every committed record plus the
/// per-artifact fingerprint drift map. Records are grouped by date and keyed
/// `kind/id` within it.
#[derive(Serialize, Deserialize)]
struct Document {
    schema_version: u32,
    records: BTreeMap<NaiveDate, BTreeMap<String, BuildRecord>>,
    fingerprints: BTreeMap<String, Fingerprint>,
    updated_at: Option<DateTime<Utc>>,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            records: BTreeMap::new(),
            fingerprints: BTreeMap::new(),
            updated_at: None,
        }
    }
}

fn slot_key(kind: ArtifactKind, id: &str) -> String {
    format!("{}/{}", kind.as_str(), id)
}

fn parse_slot_key(date: NaiveDate, slot: &str) -> Option<RecordKey> {
    let (kind, id) = slot.split_once('/')?;
    Some(RecordKey { date, kind: ArtifactKind::parse(kind)?, id: id.to_string() })
}

/// Durable State Matrix backed by a single JSON snapshot file. Every `put`
/// rewrites the whole document through a temp file in the same directory and
/// renames it over the old one, so a crash mid-write leaves the previously
/// committed records intact.
pub struct JsonStateStore {
    path: PathBuf,
    inner: Mutex<Document>,
}

impl JsonStateStore {
    /// Open (or initialize empty) the store at `path`. An absent file is the
    /// normal never-built state; an unparsable one is a fatal `StateError`.
    pub fn open(path: &Path) -> Result<Self, StateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let doc = if path.exists() {
            let s = std::fs::read_to_string(path)
                .map_err(|source| StateError::Read { path: path.to_path_buf(), source })?;
            let doc: Document = serde_json::from_str(&s)
                .map_err(|source| StateError::Malformed { path: path.to_path_buf(), source })?;
            if doc.schema_version != SCHEMA_VERSION {
                return Err(StateError::UnsupportedSchema {
                    path: path.to_path_buf(),
                    version: doc.schema_version,
                });
            }
            doc
        } else {
            Document::default()
        };
        Ok(Self { path: path.to_path_buf(), inner: Mutex::new(doc) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, doc: &Document) -> Result<(), StateError> {
        let write_err = |source| StateError::Write { path: self.path.clone(), source };
        let bytes = serde_json::to_vec_pretty(doc)
            .map_err(|source| StateError::Malformed { path: self.path.clone(), source })?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = std::fs::File::create(&tmp).map_err(write_err)?;
        file.write_all(&bytes).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)?;
        Ok(())
    }
}

impl StateStore for JsonStateStore {
    fn snapshot(&self) -> anyhow::Result<MatrixSnapshot> {
        let doc = self.inner.lock().unwrap();
        let mut records = BTreeMap::new();
        for (date, slots) in &doc.records {
            for (slot, record) in slots {
                if let Some(key) = parse_slot_key(*date, slot) {
                    records.insert(key, record.clone());
                }
            }
        }
        Ok(MatrixSnapshot { records, fingerprints: doc.fingerprints.clone() })
    }

    fn get(&self, key: &RecordKey) -> anyhow::Result<Option<BuildRecord>> {
        let doc = self.inner.lock().unwrap();
        Ok(doc
            .records
            .get(&key.date)
            .and_then(|slots| slots.get(&slot_key(key.kind, &key.id)))
            .cloned())
    }

    fn put(&self, record: BuildRecord) -> anyhow::Result<()> {
        let mut doc = self.inner.lock().unwrap();
        doc.fingerprints
            .insert(record.key.id.clone(), record.fingerprint_used.clone());
        let slot = slot_key(record.key.kind, &record.key.id);
        doc.records.entry(record.key.date).or_default().insert(slot, record);
        doc.updated_at = Some(Utc::now());
        self.persist(&doc)?;
        Ok(())
    }

    fn last_fingerprint(&self, artifact_id: &str) -> anyhow::Result<Option<Fingerprint>> {
        let doc = self.inner.lock().unwrap();
        Ok(doc.fingerprints.get(artifact_id).cloned())
    }

    fn keys_for_date(&self, date: NaiveDate) -> anyhow::Result<Vec<RecordKey>> {
        let doc = self.inner.lock().unwrap();
        Ok(doc
            .records
            .get(&date)
            .map(|slots| slots.keys().filter_map(|slot| parse_slot_key(date, slot)).collect())
            .unwrap_or_default())
    }
}
