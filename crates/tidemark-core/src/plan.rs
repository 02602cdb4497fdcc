use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::Serialize;

use crate::model::{
    ArtifactKind, BuildRecord, Fingerprint, Fingerprints, MatrixSnapshot, RecordKey, ReportDef,
    SourceDef,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    Missing,
    DefinitionChanged,
    DependencyStale,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub date: NaiveDate,
    pub kind: ArtifactKind,
    pub id: String,
    pub reason: StaleReason,
}

impl PlanEntry {
    pub fn key(&self) -> RecordKey {
        RecordKey { date: self.date, kind: self.kind, id: self.id.clone() }
    }
}

/// Ordered rebuild plan: per date ascending, all source entries before any
/// report entry, so sequential execution always satisfies dependencies.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RebuildPlan {
    pub entries: Vec<PlanEntry>,
}

impl RebuildPlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn retain_artifact(&mut self, id: &str) {
        self.entries.retain(|e| e.id == id);
    }
}

/// Evaluate one artifact's own record against its current fingerprint.
/// `None` means fresh. A missing current fingerprint (normalization failed)
/// makes the artifact unconditionally stale.
fn staleness(
    record: Option<&BuildRecord>,
    current: Option<&Fingerprint>,
) -> Option<StaleReason> {
    let record = match record {
        None => return Some(StaleReason::Missing),
        Some(r) => r,
    };
    match current {
        None => Some(StaleReason::DefinitionChanged),
        Some(f) if record.fingerprint_used != *f => Some(StaleReason::DefinitionChanged),
        // Failures never count as fresh; always eligible for retry.
        Some(_) if !record.is_success() => Some(StaleReason::Missing),
        Some(_) => None,
    }
}

/// Compute the minimal rebuild plan. Pure and idempotent: same inputs, same
/// plan. Sources and reports are walked in the given (id-sorted) order.
pub fn plan(
    dates: &[NaiveDate],
    sources: &[SourceDef],
    reports: &[ReportDef],
    fingerprints: &Fingerprints,
    snapshot: &MatrixSnapshot,
) -> RebuildPlan {
    let mut entries = Vec::new();

    for &date in dates {
        let mut stale_sources: BTreeSet<&str> = BTreeSet::new();

        for source in sources {
            let key = RecordKey::source(date, &source.id);
            if let Some(reason) = staleness(snapshot.get(&key), fingerprints.current(&source.id)) {
                entries.push(PlanEntry { date, kind: ArtifactKind::Source, id: source.id.clone(), reason });
                stale_sources.insert(&source.id);
            }
        }

        for report in reports {
            let key = RecordKey::report(date, &report.id);
            let own = staleness(snapshot.get(&key), fingerprints.current(&report.id));

            let dependency_stale = report.depends_on.iter().any(|dep| {
                stale_sources.contains(dep.as_str())
                    || !snapshot
                        .get(&RecordKey::source(date, dep))
                        .is_some_and(BuildRecord::is_success)
            });

            // Missing/DefinitionChanged take precedence; DependencyStale only
            // upgrades a report whose own record is otherwise fresh.
            match own {
                Some(reason) => {
                    entries.push(PlanEntry { date, kind: ArtifactKind::Report, id: report.id.clone(), reason });
                }
                None if dependency_stale => {
                    entries.push(PlanEntry {
                        date,
                        kind: ArtifactKind::Report,
                        id: report.id.clone(),
                        reason: StaleReason::DependencyStale,
                    });
                }
                None => {}
            }
        }
    }

    RebuildPlan { entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Metric;
    use chrono::Utc;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn source(id: &str) -> SourceDef {
        SourceDef { id: id.to_string(), query: "SELECT 1".to_string(), output: format!("{id}.parquet") }
    }

    fn report(id: &str, deps: &[&str]) -> ReportDef {
        ReportDef {
            id: id.to_string(),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            template: "minimal".to_string(),
            params: Default::default(),
        }
    }

    fn success(key: RecordKey, fp: &str) -> BuildRecord {
        BuildRecord::success(key, Fingerprint::from_str(fp), Metric::Rows(10), Utc::now())
    }

    fn failure(key: RecordKey, fp: &str) -> BuildRecord {
        BuildRecord::failure(key, Fingerprint::from_str(fp), "boom".to_string(), Utc::now())
    }

    fn fingerprints(pairs: &[(&str, &str)]) -> Fingerprints {
        let mut fps = Fingerprints::new();
        for (id, fp) in pairs {
            fps.insert(*id, Fingerprint::from_str(*fp));
        }
        fps
    }

    fn snapshot(records: Vec<BuildRecord>) -> MatrixSnapshot {
        let mut snap = MatrixSnapshot::default();
        for r in records {
            snap.records.insert(r.key.clone(), r);
        }
        snap
    }

    #[test]
    fn never_built_source_is_missing_per_date() {
        let dates = [d("2025-06-01"), d("2025-06-02")];
        let plan = plan(&dates, &[source("blobs")], &[], &fingerprints(&[("blobs", "aaa")]), &MatrixSnapshot::default());
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.entries[0].date, d("2025-06-01"));
        assert_eq!(plan.entries[1].date, d("2025-06-02"));
        assert!(plan.entries.iter().all(|e| e.reason == StaleReason::Missing));
    }

    #[test]
    fn matching_success_is_fresh() {
        let dates = [d("2025-06-01")];
        let snap = snapshot(vec![success(RecordKey::source(d("2025-06-01"), "blobs"), "aaa")]);
        let plan = plan(&dates, &[source("blobs")], &[], &fingerprints(&[("blobs", "aaa")]), &snap);
        assert!(plan.is_empty());
    }

    #[test]
    fn fingerprint_drift_is_definition_changed_for_every_built_date() {
        let dates = [d("2025-06-01"), d("2025-06-02")];
        let snap = snapshot(vec![
            success(RecordKey::source(d("2025-06-01"), "blobs"), "old"),
            success(RecordKey::source(d("2025-06-02"), "blobs"), "old"),
        ]);
        let plan = plan(&dates, &[source("blobs")], &[], &fingerprints(&[("blobs", "new")]), &snap);
        assert_eq!(plan.len(), 2);
        assert!(plan.entries.iter().all(|e| e.reason == StaleReason::DefinitionChanged));
    }

    #[test]
    fn failed_record_is_retried_as_missing() {
        let dates = [d("2025-06-01")];
        let snap = snapshot(vec![failure(RecordKey::source(d("2025-06-01"), "blobs"), "aaa")]);
        let plan = plan(&dates, &[source("blobs")], &[], &fingerprints(&[("blobs", "aaa")]), &snap);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.entries[0].reason, StaleReason::Missing);
    }

    #[test]
    fn unfingerprintable_definition_is_always_stale() {
        let dates = [d("2025-06-01")];
        let snap = snapshot(vec![success(RecordKey::source(d("2025-06-01"), "blobs"), "aaa")]);
        // No entry for `blobs` in the fingerprint set: normalization failed.
        let plan = plan(&dates, &[source("blobs")], &[], &Fingerprints::new(), &snap);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.entries[0].reason, StaleReason::DefinitionChanged);
    }

    #[test]
    fn missing_report_over_fresh_source_is_missing_not_dependency_stale() {
        let date = d("2025-06-01");
        let snap = snapshot(vec![success(RecordKey::source(date, "blobs"), "aaa")]);
        let fps = fingerprints(&[("blobs", "aaa"), ("overview", "bbb")]);
        let plan = plan(&[date], &[source("blobs")], &[report("overview", &["blobs"])], &fps, &snap);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.entries[0].id, "overview");
        assert_eq!(plan.entries[0].reason, StaleReason::Missing);
    }

    #[test]
    fn fresh_report_with_stale_dependency_is_dependency_stale() {
        let date = d("2025-06-01");
        // Source fingerprint drifted; report record still matches.
        let snap = snapshot(vec![
            success(RecordKey::source(date, "blobs"), "old"),
            success(RecordKey::report(date, "overview"), "bbb"),
        ]);
        let fps = fingerprints(&[("blobs", "new"), ("overview", "bbb")]);
        let plan = plan(&[date], &[source("blobs")], &[report("overview", &["blobs"])], &fps, &snap);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.entries[0].id, "blobs");
        assert_eq!(plan.entries[1].id, "overview");
        assert_eq!(plan.entries[1].reason, StaleReason::DependencyStale);
    }

    #[test]
    fn fresh_report_with_failed_dependency_is_dependency_stale() {
        let date = d("2025-06-01");
        let snap = snapshot(vec![
            failure(RecordKey::source(date, "blobs"), "aaa"),
            success(RecordKey::report(date, "overview"), "bbb"),
        ]);
        let fps = fingerprints(&[("blobs", "aaa"), ("overview", "bbb")]);
        let plan = plan(&[date], &[source("blobs")], &[report("overview", &["blobs"])], &fps, &snap);
        assert_eq!(plan.entries.last().unwrap().reason, StaleReason::DependencyStale);
    }

    #[test]
    fn report_without_dependencies_behaves_like_a_source() {
        let date = d("2025-06-01");
        let snap = snapshot(vec![success(RecordKey::report(date, "standalone"), "bbb")]);
        let fps = fingerprints(&[("standalone", "bbb")]);
        let plan = plan(&[date], &[], &[report("standalone", &[])], &fps, &snap);
        assert!(plan.is_empty());
    }

    #[test]
    fn sources_precede_reports_within_a_date() {
        let dates = [d("2025-06-01"), d("2025-06-02")];
        let fps = fingerprints(&[("blobs", "aaa"), ("overview", "bbb")]);
        let plan = plan(&dates, &[source("blobs")], &[report("overview", &["blobs"])], &fps, &MatrixSnapshot::default());
        let order: Vec<_> = plan.entries.iter().map(|e| (e.date, e.kind)).collect();
        assert_eq!(
            order,
            vec![
                (d("2025-06-01"), ArtifactKind::Source),
                (d("2025-06-01"), ArtifactKind::Report),
                (d("2025-06-02"), ArtifactKind::Source),
                (d("2025-06-02"), ArtifactKind::Report),
            ]
        );
    }

    #[test]
    fn planning_is_idempotent() {
        let dates = [d("2025-06-01"), d("2025-06-02")];
        let snap = snapshot(vec![success(RecordKey::source(d("2025-06-01"), "blobs"), "aaa")]);
        let fps = fingerprints(&[("blobs", "aaa"), ("overview", "bbb")]);
        let sources = [source("blobs")];
        let reports = [report("overview", &["blobs"])];
        let first = plan(&dates, &sources, &reports, &fps, &snap);
        let second = plan(&dates, &sources, &reports, &fps, &snap);
        assert_eq!(first, second);
    }
}
