use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::NaiveDate;
use tidemark_core::{BuildRecord, Fingerprint, MatrixSnapshot, RecordKey};

use crate::traits::StateStore;

/// In-memory matrix for tests. Not durable, same visibility guarantees as the
/// durable store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    records: BTreeMap<RecordKey, BuildRecord>,
    fingerprints: BTreeMap<String, Fingerprint>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStore {
    fn snapshot(&self) -> anyhow::Result<MatrixSnapshot> {
        let inner = self.inner.lock().unwrap();
        Ok(MatrixSnapshot {
            records: inner.records.clone(),
            fingerprints: inner.fingerprints.clone(),
        })
    }

    fn get(&self, key: &RecordKey) -> anyhow::Result<Option<BuildRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.records.get(key).cloned())
    }

    fn put(&self, record: BuildRecord) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .fingerprints
            .insert(record.key.id.clone(), record.fingerprint_used.clone());
        inner.records.insert(record.key.clone(), record);
        Ok(())
    }

    fn last_fingerprint(&self, artifact_id: &str) -> anyhow::Result<Option<Fingerprint>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.fingerprints.get(artifact_id).cloned())
    }

    fn keys_for_date(&self, date: NaiveDate) -> anyhow::Result<Vec<RecordKey>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.records.keys().filter(|k| k.date == date).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tidemark_core::Metric;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn record(date: &str, id: &str, fp: &str) -> BuildRecord {
        BuildRecord::success(
            RecordKey::source(d(date), id),
            Fingerprint::from_str(fp),
            Metric::Rows(1),
            Utc::now(),
        )
    }

    #[test]
    fn empty_store_has_no_records() {
        let store = InMemoryStore::new();
        let snap = store.snapshot().unwrap();
        assert!(snap.records.is_empty());
        assert!(store.get(&RecordKey::source(d("2025-06-01"), "blobs")).unwrap().is_none());
    }

    #[test]
    fn put_then_get_roundtrips() {
        let store = InMemoryStore::new();
        let rec = record("2025-06-01", "blobs", "aaa");
        store.put(rec.clone()).unwrap();
        assert_eq!(store.get(&rec.key).unwrap(), Some(rec));
    }

    #[test]
    fn put_replaces_the_previous_record_for_a_key() {
        let store = InMemoryStore::new();
        store.put(record("2025-06-01", "blobs", "aaa")).unwrap();
        store.put(record("2025-06-01", "blobs", "bbb")).unwrap();
        let snap = store.snapshot().unwrap();
        assert_eq!(snap.records.len(), 1);
        let rec = store.get(&RecordKey::source(d("2025-06-01"), "blobs")).unwrap().unwrap();
        assert_eq!(rec.fingerprint_used, Fingerprint::from_str("bbb"));
    }

    #[test]
    fn last_fingerprint_tracks_the_latest_put() {
        let store = InMemoryStore::new();
        store.put(record("2025-06-01", "blobs", "aaa")).unwrap();
        store.put(record("2025-06-02", "blobs", "bbb")).unwrap();
        assert_eq!(store.last_fingerprint("blobs").unwrap(), Some(Fingerprint::from_str("bbb")));
        assert_eq!(store.last_fingerprint("other").unwrap(), None);
    }

    #[test]
    fn keys_for_date_filters_by_date() {
        let store = InMemoryStore::new();
        store.put(record("2025-06-01", "blobs", "aaa")).unwrap();
        store.put(record("2025-06-02", "blobs", "aaa")).unwrap();
        let keys = store.keys_for_date(d("2025-06-01")).unwrap();
        assert_eq!(keys, vec![RecordKey::source(d("2025-06-01"), "blobs")]);
    }
}
