pub mod core;
pub mod error;
pub mod modules;
pub mod process;
pub mod progress;
pub mod report;
pub mod utils;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indicatif::ProgressBar;
use log::info;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use crate::core::catalog::build_catalog;
pub use crate::core::layout::OutputLayout;
pub use crate::core::runner::PipelineRunner;
pub use crate::core::scheduler::{RunSummary, StageRunner, StageScheduler};
pub use crate::core::stage::{Stage, StageKind, StageRun, StageStatus};
pub use crate::core::state::{RunState, StatusTable};
pub use crate::core::target::Target;
pub use crate::error::{ReconError, Result};
pub use crate::process::ShellLauncher;
pub use crate::progress::ProgressReporter;
pub use crate::report::{ReportLimits, ReportModel};

/// Run configuration shared by the CLI flags and the optional JSON config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    pub target: String,
    /// Defaults to `recon_<domain>` in the current directory.
    pub output_dir: Option<PathBuf>,
    pub interactive: bool,
    pub poll_interval_ms: u64,
    /// Replaces every per-stage timeout, in seconds.
    pub timeout: Option<u64>,
    pub skip: Vec<String>,
    pub report_limits: ReportLimits,
    pub dry_run: bool,
    pub verbose: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            output_dir: None,
            interactive: false,
            poll_interval_ms: 1500,
            timeout: None,
            skip: Vec::new(),
            report_limits: ReportLimits::DEFAULT,
            dry_run: false,
            verbose: false,
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .map_err(|e| ReconError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        serde_json::from_str(&data).map_err(|e| ReconError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    /// Absolute output directory. Stage commands run with it as working
    /// directory, so relative paths are resolved against the current one.
    pub fn output_dir_for(&self, target: &Target) -> Result<PathBuf> {
        let dir = self
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("recon_{}", target)));
        if dir.is_absolute() {
            Ok(dir)
        } else {
            Ok(std::env::current_dir()?.join(dir))
        }
    }
}

/// Output abstraction for the pipeline.
/// The CLI implements this with colored terminal output; tests record events.
pub trait PipelineEventSink: Send + Sync {
    fn on_log(&self, level: &str, message: &str);
    fn on_stage(&self, run: &StageRun);
    fn on_progress(&self, phase: &str, current: usize, total: usize);
}

pub type SinkRef = Arc<dyn PipelineEventSink>;

/// Terminal output sink. Lines are routed through the progress bar when one is
/// attached so the spinner is redrawn below them.
pub struct ConsoleSink {
    bar: Option<ProgressBar>,
}

impl ConsoleSink {
    pub fn new_ref() -> SinkRef {
        Arc::new(Self { bar: None })
    }

    pub fn with_progress(bar: ProgressBar) -> SinkRef {
        Arc::new(Self { bar: Some(bar) })
    }

    fn emit(&self, line: String) {
        use std::io::Write;
        match self.bar {
            Some(ref bar) if !bar.is_hidden() => bar.println(line),
            _ => {
                println!("{}", line);
                std::io::stdout().flush().ok();
            }
        }
    }
}

impl PipelineEventSink for ConsoleSink {
    fn on_log(&self, level: &str, message: &str) {
        use colored::*;
        let colored = match level {
            "success" => message.green().to_string(),
            "error" => message.red().to_string(),
            "warn" => message.yellow().to_string(),
            "phase" => message.bright_cyan().bold().to_string(),
            _ => message.to_string(),
        };
        self.emit(colored);
    }

    fn on_stage(&self, run: &StageRun) {
        use colored::*;
        let line = match run.status {
            StageStatus::Pending => return,
            StageStatus::Running => format!("{} {} started", "[*]".bright_cyan(), run.name.bold()),
            StageStatus::Completed => format!("{} {} completed", "[+]".green().bold(), run.name.bold()),
            StageStatus::Failed if run.skipped => format!(
                "{} {} skipped: {}",
                "[-]".yellow(),
                run.name.bold(),
                run.reason.as_deref().unwrap_or("dependency failed")
            ),
            StageStatus::Failed | StageStatus::TimedOut => format!(
                "{} {} {}: {}",
                "[!]".red().bold(),
                run.name.bold(),
                run.status.to_string().to_lowercase().red(),
                run.reason.as_deref().unwrap_or("no detail").dimmed()
            ),
        };
        self.emit(line);
    }

    fn on_progress(&self, phase: &str, current: usize, total: usize) {
        use colored::*;
        let line = if total > 0 {
            format!("[*] {} ({}/{})", phase, current, total)
        } else {
            format!("[*] {}", phase)
        };
        self.emit(line.bright_cyan().to_string());
    }
}

/// A run that has been planned but not started: target, layout, catalog and
/// the status table UIs can observe.
pub struct Pipeline {
    pub target: Target,
    pub layout: OutputLayout,
    pub stages: Vec<Stage>,
    table: StatusTable,
    config: RunConfig,
}

impl Pipeline {
    /// Validates the target and skip list and builds the catalog. Touches no files.
    pub fn prepare(config: &RunConfig) -> Result<Self> {
        let target = Target::parse(&config.target)?;
        let layout = OutputLayout::new(config.output_dir_for(&target)?);
        let stages = build_catalog(&target, &layout, config.timeout);

        if let Some(unknown) = config.skip.iter().find(|name| !stages.iter().any(|s| &s.name == *name)) {
            return Err(ReconError::Config(format!("unknown stage '{}' in skip list", unknown)));
        }

        let table = StatusTable::for_stages(&stages, &layout);
        Ok(Self {
            target,
            layout,
            stages,
            table,
            config: config.clone(),
        })
    }

    pub fn table(&self) -> StatusTable {
        self.table.clone()
    }

    /// One line per stage: name, dependencies and the command it would run.
    pub fn plan(&self) -> Vec<String> {
        self.stages
            .iter()
            .map(|stage| {
                let mut line = stage.name.clone();
                if !stage.requires.is_empty() {
                    line.push_str(&format!(" requires=[{}]", stage.requires.join(",")));
                }
                if !stage.after.is_empty() {
                    line.push_str(&format!(" after=[{}]", stage.after.join(",")));
                }
                if self.config.skip.contains(&stage.name) {
                    line.push_str(" (skipped)");
                }
                match stage.kind {
                    StageKind::External { ref command, timeout, .. } => {
                        line.push_str(&format!(" timeout={}s\n    $ {}", timeout.as_secs(), command));
                    }
                    StageKind::Internal(ref task) => line.push_str(&format!("\n    (internal) {}", task)),
                }
                line
            })
            .collect()
    }

    /// External binaries the catalog needs that cannot be found.
    pub fn missing_tools(&self) -> Vec<String> {
        let programs: Vec<&str> = self
            .stages
            .iter()
            .filter(|s| !self.config.skip.contains(&s.name))
            .filter_map(|s| match s.kind {
                StageKind::External { ref command, .. } => Some(command.program.as_str()),
                StageKind::Internal(_) => None,
            })
            .collect();
        utils::missing_tools(programs).into_iter().map(String::from).collect()
    }

    pub async fn run(self, sink: SinkRef, cancel: CancellationToken) -> Result<RunSummary> {
        fs::create_dir_all(self.layout.logs_dir())?;
        info!("output directory: {}", self.layout.root().display());

        let runner = PipelineRunner::new(
            Arc::new(ShellLauncher::new()),
            self.layout.clone(),
            self.target.clone(),
            self.table.clone(),
        )
        .interactive(self.config.interactive)
        .poll_interval(self.config.poll_interval())
        .limits(self.config.report_limits);

        let scheduler = StageScheduler::new(self.stages, self.table, Arc::new(runner), sink, cancel)
            .skip_stages(self.config.skip.iter().cloned())
            .persist_to(self.layout.run_state(), self.target.as_str());

        Ok(scheduler.run().await)
    }
}

/// Rebuilds `report.html` from an existing output directory without running
/// any stage. Statuses come from `run_state.json` when it exists.
pub fn regenerate_report(config: &RunConfig) -> Result<ReportModel> {
    let target = Target::parse(&config.target)?;
    let layout = OutputLayout::new(config.output_dir_for(&target)?);
    if !layout.root().is_dir() {
        return Err(ReconError::Config(format!(
            "output directory {} does not exist",
            layout.root().display()
        )));
    }

    let state = RunState::load(&layout.run_state());
    if let Some(ref state) = state {
        if state.target != target.as_str() {
            log::warn!("run_state.json belongs to {}, not {}", state.target, target);
        }
    }
    let statuses = state.as_ref().map(|s| s.stages.as_slice());
    report::generate_report(&layout, target.as_str(), statuses, &config.report_limits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_file_uses_camel_case_and_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recon.json");
        fs::write(&path, r#"{"target":"ex.com","pollIntervalMs":200,"skip":["nmap"],"reportLimits":{"urls":5}}"#).unwrap();

        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.target, "ex.com");
        assert_eq!(config.poll_interval(), Duration::from_millis(200));
        assert_eq!(config.skip, vec!["nmap"]);
        assert_eq!(config.report_limits.urls, 5);
        assert_eq!(config.report_limits.subdomains, ReportLimits::DEFAULT.subdomains);
        assert!(!config.interactive);
    }

    #[test]
    fn test_bad_config_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recon.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(RunConfig::load(&path), Err(ReconError::Config(_))));
    }

    #[test]
    fn test_prepare_rejects_unknown_skip() {
        let config = RunConfig {
            target: "ex.com".into(),
            output_dir: Some(PathBuf::from("/tmp/reconchain-plan")),
            skip: vec!["nope".into()],
            ..RunConfig::default()
        };
        assert!(matches!(Pipeline::prepare(&config), Err(ReconError::Config(_))));
    }

    #[test]
    fn test_plan_lists_every_stage() {
        let config = RunConfig {
            target: "ex.com".into(),
            output_dir: Some(PathBuf::from("/tmp/reconchain-plan")),
            skip: vec!["nmap".into()],
            ..RunConfig::default()
        };
        let pipeline = Pipeline::prepare(&config).unwrap();
        let plan = pipeline.plan();
        assert_eq!(plan.len(), pipeline.stages.len());
        assert!(plan.iter().any(|l| l.starts_with("nmap") && l.contains("(skipped)")));
        assert!(plan.iter().any(|l| l.starts_with("httpx requires=[subdomains]")));
    }

    #[test]
    fn test_regenerate_requires_existing_directory() {
        let dir = tempdir().unwrap();
        let config = RunConfig {
            target: "ex.com".into(),
            output_dir: Some(dir.path().join("missing")),
            ..RunConfig::default()
        };
        assert!(matches!(regenerate_report(&config), Err(ReconError::Config(_))));
    }
}
