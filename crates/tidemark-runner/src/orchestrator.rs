use std::collections::HashMap;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use tidemark_core::{
    ArtifactKind, BuildRecord, Fingerprint, Fingerprints, Metric, Outcome, RebuildPlan, RecordKey,
    ReportDef, SourceDef,
};
use tidemark_state::StateStore;

use crate::producers::{DependencyArtifact, ReportRenderer, SourceExecutor};
use crate::report::{BuildReport, FailedEntry};

/// Execute a rebuild plan in order against the producer capabilities.
///
/// Each entry's record is committed before the next entry starts, so a crash
/// mid-run leaves the matrix reflecting exactly what completed. Producer
/// failures are recorded and skipped over; only persistence failures abort.
pub fn execute(
    plan: &RebuildPlan,
    sources: &[SourceDef],
    reports: &[ReportDef],
    fingerprints: &Fingerprints,
    store: &dyn StateStore,
    executor: &dyn SourceExecutor,
    renderer: &dyn ReportRenderer,
) -> Result<BuildReport> {
    let source_map: HashMap<&str, &SourceDef> = sources.iter().map(|s| (s.id.as_str(), s)).collect();
    let report_map: HashMap<&str, &ReportDef> = reports.iter().map(|r| (r.id.as_str(), r)).collect();

    // Pre-run view: a dependency that fails in this run may still be usable
    // through its previously persisted success (stale-but-usable).
    let prior = store.snapshot()?;
    let mut built_rows: HashMap<(NaiveDate, String), u64> = HashMap::new();
    let mut report_out = BuildReport::new();

    info!(run_id = %report_out.run_id, entries = plan.len(), "executing rebuild plan");

    for entry in &plan.entries {
        let key = entry.key();
        let fingerprint = fingerprints
            .current(&entry.id)
            .cloned()
            .unwrap_or_else(Fingerprint::invalid);

        let outcome = match entry.kind {
            ArtifactKind::Source => match source_map.get(entry.id.as_str()) {
                Some(def) => {
                    info!(id = %entry.id, date = %entry.date, reason = ?entry.reason, "fetching source");
                    match executor.execute(def, entry.date) {
                        Ok(out) => {
                            built_rows.insert((entry.date, entry.id.clone()), out.row_count);
                            Outcome::Success { metric: Metric::Rows(out.row_count) }
                        }
                        Err(e) => Outcome::Failure { reason: e.to_string() },
                    }
                }
                None => Outcome::Failure { reason: format!("no definition for source `{}`", entry.id) },
            },
            ArtifactKind::Report => match report_map.get(entry.id.as_str()) {
                Some(def) => {
                    info!(id = %entry.id, date = %entry.date, reason = ?entry.reason, "rendering report");
                    match gather_dependencies(def, entry.date, &built_rows, &prior) {
                        Ok(deps) => match renderer.render(def, entry.date, &deps) {
                            Ok(rendered) => Outcome::Success { metric: Metric::Rendered(rendered.reference) },
                            Err(e) => Outcome::Failure { reason: e.to_string() },
                        },
                        Err(unmet) => Outcome::Failure { reason: format!("unmet dependency: {unmet}") },
                    }
                }
                None => Outcome::Failure { reason: format!("no definition for report `{}`", entry.id) },
            },
        };

        match &outcome {
            Outcome::Success { metric } => {
                info!(id = %entry.id, date = %entry.date, ?metric, "built");
                report_out.successes.push(entry.clone());
            }
            Outcome::Failure { reason } => {
                warn!(id = %entry.id, date = %entry.date, %reason, "build failed, continuing");
                report_out.failures.push(FailedEntry { entry: entry.clone(), reason: reason.clone() });
            }
        }

        let record = BuildRecord { key, fingerprint_used: fingerprint, built_at: Utc::now(), outcome };
        store.put(record)?;
    }

    Ok(report_out)
}

/// A dependency is usable when it succeeded earlier in this run, or when its
/// pre-run record is a success. Returns the first unmet dependency id.
fn gather_dependencies(
    def: &ReportDef,
    date: NaiveDate,
    built_rows: &HashMap<(NaiveDate, String), u64>,
    prior: &tidemark_core::MatrixSnapshot,
) -> Result<Vec<DependencyArtifact>, String> {
    let mut deps = Vec::with_capacity(def.depends_on.len());
    for dep in &def.depends_on {
        if let Some(&rows) = built_rows.get(&(date, dep.clone())) {
            deps.push(DependencyArtifact { source_id: dep.clone(), row_count: rows });
            continue;
        }
        match prior.get(&RecordKey::source(date, dep)) {
            Some(record) if record.is_success() => {
                let rows = match &record.outcome {
                    Outcome::Success { metric: Metric::Rows(n) } => *n,
                    _ => 0,
                };
                deps.push(DependencyArtifact { source_id: dep.clone(), row_count: rows });
            }
            _ => return Err(dep.clone()),
        }
    }
    Ok(deps)
}
