use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::NaiveDate;
use thiserror::Error;
use tidemark_core::{ReportDef, SourceDef};
use tidemark_spec::CommandsConfig;

#[derive(Debug, Error)]
#[error("{reason}")]
pub struct ExecutionError {
    pub reason: String,
}

#[derive(Debug, Error)]
#[error("{reason}")]
pub struct RenderError {
    pub reason: String,
}

#[derive(Clone, Debug)]
pub struct SourceOutput {
    pub row_count: u64,
}

#[derive(Clone, Debug)]
pub struct RenderedReport {
    pub reference: String,
}

/// A source artifact available to a report renderer, either produced earlier
/// in this run or carried over from a previous one.
#[derive(Clone, Debug)]
pub struct DependencyArtifact {
    pub source_id: String,
    pub row_count: u64,
}

/// External capability: given a source definition and a date, produce a
/// columnar snapshot and report how many rows it holds.
pub trait SourceExecutor {
    fn execute(&self, def: &SourceDef, date: NaiveDate) -> Result<SourceOutput, ExecutionError>;
}

/// External capability: given a report definition, a date and its required
/// source artifacts, produce a rendered page.
pub trait ReportRenderer {
    fn render(
        &self,
        def: &ReportDef,
        date: NaiveDate,
        deps: &[DependencyArtifact],
    ) -> Result<RenderedReport, RenderError>;
}

/// Producers backed by configured shell command templates. The real fetch and
/// render engines stay external; this adapter substitutes `{id}`, `{date}`
/// and `{out}` into the templates and runs them.
pub struct CommandProducer {
    fetch: String,
    render: String,
    data_dir: PathBuf,
    render_dir: PathBuf,
}

impl CommandProducer {
    pub fn new(commands: &CommandsConfig, data_dir: PathBuf, render_dir: PathBuf) -> Self {
        Self {
            fetch: commands.fetch.clone(),
            render: commands.render.clone(),
            data_dir,
            render_dir,
        }
    }

    fn fill(template: &str, id: &str, date: NaiveDate, out: &Path) -> String {
        template
            .replace("{id}", id)
            .replace("{date}", &date.to_string())
            .replace("{out}", &out.to_string_lossy())
    }

    fn run_shell(command: &str) -> Result<String, String> {
        let out = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|e| format!("spawn `{command}`: {e}"))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(format!(
                "command failed ({}): {}",
                out.status,
                stderr.trim().chars().take(500).collect::<String>()
            ));
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    fn last_line(stdout: &str) -> Option<&str> {
        stdout.lines().rev().find(|l| !l.trim().is_empty()).map(str::trim)
    }
}

impl SourceExecutor for CommandProducer {
    fn execute(&self, def: &SourceDef, date: NaiveDate) -> Result<SourceOutput, ExecutionError> {
        let out_path = self.data_dir.join(date.to_string()).join(&def.output);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ExecutionError { reason: format!("create {}: {e}", parent.display()) })?;
        }
        let command = Self::fill(&self.fetch, &def.id, date, &out_path);
        let stdout = Self::run_shell(&command).map_err(|reason| ExecutionError { reason })?;

        // The fetch command reports its row count on the last stdout line.
        let row_count = match Self::last_line(&stdout).map(str::parse::<u64>) {
            Some(Ok(n)) => n,
            _ => {
                tracing::debug!(id = %def.id, "fetch command did not report a row count");
                0
            }
        };
        Ok(SourceOutput { row_count })
    }
}

impl ReportRenderer for CommandProducer {
    fn render(
        &self,
        def: &ReportDef,
        date: NaiveDate,
        _deps: &[DependencyArtifact],
    ) -> Result<RenderedReport, RenderError> {
        let out_path = self.render_dir.join(date.to_string()).join(format!("{}.html", def.id));
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RenderError { reason: format!("create {}: {e}", parent.display()) })?;
        }
        let command = Self::fill(&self.render, &def.id, date, &out_path);
        let stdout = Self::run_shell(&command).map_err(|reason| RenderError { reason })?;

        let reference = Self::last_line(&stdout)
            .map(str::to_string)
            .unwrap_or_else(|| out_path.to_string_lossy().into_owned());
        Ok(RenderedReport { reference })
    }
}
