use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use tracing::warn;

use tidemark_core::{plan, FingerprintError, Fingerprints, RebuildPlan};
use tidemark_spec::{compute_fingerprints, load_config, PipelineConfig};
use tidemark_state::{JsonStateStore, StateStore};

use crate::orchestrator;
use crate::producers::CommandProducer;
use crate::report::BuildReport;

/// Imperative shell wiring config, store, planner and producers together.
/// Constructed once per invocation; nothing in here is global state.
pub struct Runner {
    pub config: PipelineConfig,
    pub store: JsonStateStore,
}

impl Runner {
    pub fn open(config_path: &Path, state_override: Option<&Path>) -> Result<Self> {
        let config = load_config(config_path)?;
        let state_path = match state_override {
            Some(p) => p.to_path_buf(),
            None => PathBuf::from(shellexpand::tilde(&config.settings.state_path).to_string()),
        };
        let store = JsonStateStore::open(&state_path)
            .with_context(|| format!("open state matrix {}", state_path.display()))?;
        Ok(Self { config, store })
    }

    /// Telemetry for a day is only complete once the day is over, so the
    /// default reference date is yesterday UTC.
    pub fn reference_date() -> NaiveDate {
        Utc::now().date_naive() - Duration::days(1)
    }

    /// Resolve the configured policy, or short-circuit to a single date when
    /// the caller passed an override.
    pub fn resolve(&self, override_date: Option<NaiveDate>) -> Result<Vec<NaiveDate>> {
        if let Some(date) = override_date {
            return Ok(vec![date]);
        }
        let policy = self.config.date_policy()?;
        Ok(tidemark_core::resolve(&policy, Self::reference_date())?)
    }

    pub fn fingerprints(&self) -> (Fingerprints, Vec<FingerprintError>) {
        compute_fingerprints(&self.config)
    }

    /// resolve → fingerprint-all → plan. Fingerprint errors degrade those
    /// definitions to always-stale; they are returned for reporting, not
    /// raised.
    pub fn plan(&self, dates: &[NaiveDate]) -> Result<(RebuildPlan, Vec<FingerprintError>)> {
        let (fingerprints, errors) = self.fingerprints();
        for e in &errors {
            warn!(artifact = %e.artifact_id, reason = %e.reason, "definition cannot be fingerprinted; treating as stale");
        }
        let snapshot = self.store.snapshot()?;
        let plan = plan(
            dates,
            &self.config.source_defs(),
            &self.config.report_defs(),
            &fingerprints,
            &snapshot,
        );
        Ok((plan, errors))
    }

    /// Execute a plan with the command-backed producers from the config.
    pub fn execute(&self, plan: &RebuildPlan) -> Result<BuildReport> {
        let commands = self.config.commands.as_ref().ok_or_else(|| {
            tidemark_core::ConfigError::Invalid(
                "a `commands` section is required to run the pipeline".to_string(),
            )
        })?;
        let data_dir = PathBuf::from(shellexpand::tilde(&self.config.settings.data_dir).to_string());
        let render_dir = PathBuf::from(shellexpand::tilde(&self.config.settings.render_dir).to_string());
        let producer = CommandProducer::new(commands, data_dir, render_dir);

        let (fingerprints, _) = self.fingerprints();
        orchestrator::execute(
            plan,
            &self.config.source_defs(),
            &self.config.report_defs(),
            &fingerprints,
            &self.store,
            &producer,
            &producer,
        )
    }
}
