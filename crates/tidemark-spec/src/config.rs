use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tidemark_core::{ConfigError, DatePolicy, ReportDef, SourceDef};

/// The whole `pipeline.yaml` document. Read once per invocation; malformed
/// configuration fails before any planning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub dates: DatesConfig,
    pub sources: BTreeMap<String, SourceConfig>,
    #[serde(default)]
    pub reports: BTreeMap<String, ReportConfig>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub commands: Option<CommandsConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatesConfig {
    pub mode: String, // "rolling" | "range" | "list"
    #[serde(default)]
    pub rolling: Option<RollingConfig>,
    #[serde(default)]
    pub range: Option<RangeConfig>,
    #[serde(default)]
    pub list: Option<Vec<NaiveDate>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RollingConfig {
    pub window: u32,
    #[serde(default)]
    pub start: Option<NaiveDate>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RangeConfig {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    pub query: String,
    pub output: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub template: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_state_path")]
    pub state_path: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_render_dir")]
    pub render_dir: String,
}

fn default_state_path() -> String {
    ".tidemark/state.json".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_render_dir() -> String {
    "rendered".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            data_dir: default_data_dir(),
            render_dir: default_render_dir(),
        }
    }
}

/// Command templates for the external producers. `{id}`, `{date}` and `{out}`
/// are substituted per plan entry. Only `run` needs this section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandsConfig {
    pub fetch: String,
    pub render: String,
}

pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config: {}", path.display()))?;
    let cfg: PipelineConfig = serde_yaml::from_str(&s).with_context(|| "parse pipeline.yaml")?;
    cfg.validate()?;
    Ok(cfg)
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.date_policy()?;

        if self.sources.is_empty() {
            return Err(ConfigError::Invalid("at least one source must be configured".to_string()));
        }
        for (id, source) in &self.sources {
            if source.query.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("source `{id}` has an empty query")));
            }
            if source.output.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("source `{id}` has an empty output slot")));
            }
        }
        for (id, report) in &self.reports {
            if report.template.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("report `{id}` has an empty template")));
            }
            for dep in &report.depends_on {
                if !self.sources.contains_key(dep) {
                    return Err(ConfigError::Invalid(format!(
                        "report `{id}` depends on unknown source `{dep}`"
                    )));
                }
            }
        }
        Ok(())
    }

    /// The declared mode must have a matching, well-formed section.
    pub fn date_policy(&self) -> Result<DatePolicy, ConfigError> {
        match self.dates.mode.as_str() {
            "rolling" => {
                let rolling = self.dates.rolling.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("date mode is `rolling` but no rolling section is set".to_string())
                })?;
                Ok(DatePolicy::Rolling { window_days: rolling.window, start: rolling.start })
            }
            "range" => {
                let range = self.dates.range.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("date mode is `range` but no range section is set".to_string())
                })?;
                Ok(DatePolicy::Range { start: range.start, end: range.end })
            }
            "list" => {
                let list = self.dates.list.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("date mode is `list` but no list section is set".to_string())
                })?;
                Ok(DatePolicy::List { dates: list.clone() })
            }
            other => Err(ConfigError::Invalid(format!("unknown date mode `{other}`"))),
        }
    }

    /// Source definitions in id order (the planner relies on a stable walk).
    pub fn source_defs(&self) -> Vec<SourceDef> {
        self.sources
            .iter()
            .map(|(id, s)| SourceDef { id: id.clone(), query: s.query.clone(), output: s.output.clone() })
            .collect()
    }

    pub fn report_defs(&self) -> Vec<ReportDef> {
        self.reports
            .iter()
            .map(|(id, r)| ReportDef {
                id: id.clone(),
                depends_on: r.depends_on.clone(),
                template: r.template.clone(),
                params: r.params.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
dates:
  mode: list
  list: [2025-06-01, 2025-06-02]
sources:
  blobs:
    query: "SELECT count() FROM blobs"
    output: blobs.parquet
reports:
  overview:
    depends_on: [blobs]
    template: overview
    params:
      network: mainnet
"#;

    #[test]
    fn parses_and_validates_minimal_config() {
        let cfg: PipelineConfig = serde_yaml::from_str(MINIMAL).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.source_defs().len(), 1);
        assert_eq!(cfg.report_defs()[0].depends_on, vec!["blobs".to_string()]);
        assert_eq!(cfg.settings.state_path, ".tidemark/state.json");
        assert!(matches!(cfg.date_policy().unwrap(), DatePolicy::List { .. }));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let yaml = MINIMAL.replace("depends_on: [blobs]", "depends_on: [nope]");
        let cfg: PipelineConfig = serde_yaml::from_str(&yaml).unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("unknown source `nope`"));
    }

    #[test]
    fn mode_without_matching_section_is_rejected() {
        let yaml = MINIMAL.replace("mode: list", "mode: rolling");
        let cfg: PipelineConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let yaml = MINIMAL.replace("mode: list", "mode: weekly");
        let cfg: PipelineConfig = serde_yaml::from_str(&yaml).unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("unknown date mode"));
    }

    #[test]
    fn empty_query_is_rejected() {
        let yaml = MINIMAL.replace("SELECT count() FROM blobs", "  ");
        let cfg: PipelineConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_config_fails_fast_on_missing_file() {
        assert!(load_config(Path::new("/definitely/not/here.yaml")).is_err());
    }

    #[test]
    fn load_config_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        std::fs::write(&path, MINIMAL).unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.sources.len(), 1);
    }
}
