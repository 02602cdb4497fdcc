use tidemark_core::PlanEntry;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct FailedEntry {
    pub entry: PlanEntry,
    pub reason: String,
}

/// Aggregated outcome of one `execute` pass over a rebuild plan. Partial
/// failures live here; they never abort the run.
#[derive(Clone, Debug)]
pub struct BuildReport {
    pub run_id: Uuid,
    pub successes: Vec<PlanEntry>,
    pub failures: Vec<FailedEntry>,
}

impl BuildReport {
    pub fn new() -> Self {
        Self { run_id: Uuid::new_v4(), successes: Vec::new(), failures: Vec::new() }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl Default for BuildReport {
    fn default() -> Self {
        Self::new()
    }
}
