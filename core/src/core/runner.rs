use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::core::layout::OutputLayout;
use crate::core::merger;
use crate::core::scheduler::StageRunner;
use crate::core::stage::{CommandSpec, InternalTask, MergeSource, Stage, StageKind, StageOutcome, SuccessPolicy};
use crate::core::state::StatusTable;
use crate::core::target::Target;
use crate::error::{ReconError, Result};
use crate::process::{wait_for_completion, CompletionOutcome, LaunchRequest, ProcessLauncher};
use crate::report::{self, ReportLimits};
use crate::utils;

/// Runs catalog stages: external tools through the launcher plus done-file
/// wait, internal tasks in-process.
pub struct PipelineRunner {
    launcher: Arc<dyn ProcessLauncher>,
    layout: OutputLayout,
    target: Target,
    table: StatusTable,
    interactive: bool,
    poll_interval: Duration,
    limits: ReportLimits,
}

impl PipelineRunner {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, layout: OutputLayout, target: Target, table: StatusTable) -> Self {
        Self {
            launcher,
            layout,
            target,
            table,
            interactive: false,
            poll_interval: Duration::from_millis(1500),
            limits: ReportLimits::DEFAULT,
        }
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn limits(mut self, limits: ReportLimits) -> Self {
        self.limits = limits;
        self
    }

    async fn run_external(
        &self,
        stage: &Stage,
        command: &CommandSpec,
        policy: SuccessPolicy,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> StageOutcome {
        let Some(binary) = utils::get_binary_path(&command.program) else {
            let err = ReconError::ToolNotFound {
                stage: stage.name.clone(),
                binary: command.program.clone(),
            };
            warn!("{}", err);
            return StageOutcome::failed(None, err.to_string());
        };
        let mut resolved = command.clone();
        resolved.program = binary;

        for output in &stage.outputs {
            if let Some(parent) = output.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    return StageOutcome::failed(None, format!("cannot create {}: {}", parent.display(), e));
                }
            }
        }

        let log_path = self.layout.stage_log(&stage.name);
        let done_path = self.layout.stage_done(&stage.name);
        let pid_path = self.layout.stage_pid(&stage.name);
        let request = LaunchRequest {
            stage: &stage.name,
            command: &resolved,
            log_path: &log_path,
            done_path: &done_path,
            pid_path: &pid_path,
            working_dir: self.layout.root(),
            interactive: self.interactive,
        };

        let mut handle = match self.launcher.launch(&request) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("{}", e);
                return StageOutcome::failed(None, e.to_string());
            }
        };
        let pid = handle.pid();
        info!("[{}] started ({:?}, pid {:?}): {}", stage.name, handle.method, pid, resolved);

        match wait_for_completion(&done_path, self.poll_interval, timeout, cancel).await {
            CompletionOutcome::Completed { exit_code } => {
                handle.reap();
                let output_present = stage.primary_output().map_or(false, |p| utils::has_content(p));
                if policy.accepts(exit_code, output_present) {
                    StageOutcome::completed(pid)
                } else {
                    StageOutcome::failed(pid, rejection_reason(policy, exit_code, output_present))
                }
            }
            CompletionOutcome::TimedOut => {
                handle.terminate();
                let err = ReconError::TimedOut {
                    stage: stage.name.clone(),
                    secs: timeout.as_secs(),
                };
                warn!("{}", err);
                StageOutcome::timed_out(pid, err.to_string())
            }
            CompletionOutcome::Cancelled => {
                handle.terminate();
                StageOutcome::failed(pid, "cancelled")
            }
        }
    }

    /// Internal tasks do blocking file I/O, so they run on the blocking pool.
    async fn run_internal(&self, stage: &Stage, task: &InternalTask) -> StageOutcome {
        let task = task.clone();
        let layout = self.layout.clone();
        let target = self.target.clone();
        let limits = self.limits;
        let snapshot = self.table.snapshot();

        let joined = tokio::task::spawn_blocking(move || match task {
            InternalTask::MergeSubdomains { sources, destination } => merge_subdomains(&sources, &destination),
            InternalTask::ExtractLiveHosts { source, destination } => extract_live_hosts(&source, &destination),
            InternalTask::BuildReport => {
                report::generate_report(&layout, target.as_str(), Some(&snapshot), &limits)
                    .map(|model| format!("{} findings", model.counts().vulnerabilities))
            }
        })
        .await;

        match joined {
            Ok(Ok(summary)) => {
                info!("[{}] {}", stage.name, summary);
                StageOutcome::completed(None)
            }
            Ok(Err(e)) => {
                warn!("[{}] {}", stage.name, e);
                StageOutcome::failed(None, e.to_string())
            }
            Err(e) => {
                warn!("[{}] internal task aborted: {}", stage.name, e);
                StageOutcome::failed(None, format!("internal task aborted: {}", e))
            }
        }
    }
}

#[async_trait]
impl StageRunner for PipelineRunner {
    async fn run(&self, stage: &Stage, cancel: &CancellationToken) -> StageOutcome {
        match stage.kind {
            StageKind::External { ref command, policy, timeout } => {
                self.run_external(stage, command, policy, timeout, cancel).await
            }
            StageKind::Internal(ref task) => self.run_internal(stage, task).await,
        }
    }
}

fn rejection_reason(policy: SuccessPolicy, exit_code: Option<i32>, output_present: bool) -> String {
    let status = match exit_code {
        Some(code) => format!("exited with status {}", code),
        None => "exit status unknown".to_string(),
    };
    match policy {
        SuccessPolicy::ExitCode => status,
        SuccessPolicy::OutputExists => "no output produced".to_string(),
        SuccessPolicy::Either if !output_present => format!("{} and no output produced", status),
        SuccessPolicy::Either => status,
    }
}

fn merge_subdomains(sources: &[MergeSource], destination: &Path) -> Result<String> {
    let report = merger::merge_into(sources, destination)?;
    for err in &report.skipped {
        warn!("{}", err);
    }
    if report.producers_read == 0 {
        return Err(ReconError::ParseError {
            path: destination.to_path_buf(),
            reason: "no subdomain producer output was readable".to_string(),
        });
    }
    Ok(format!(
        "{} unique subdomains from {} producer(s)",
        report.entries, report.producers_read
    ))
}

/// Reduces prober lines to their leading URL so downstream tools get plain input.
fn extract_live_hosts(source: &Path, destination: &Path) -> Result<String> {
    let urls: Vec<String> = utils::read_lines(source)?
        .iter()
        .filter_map(|line| line.split_whitespace().next().map(str::to_string))
        .collect();

    let mut body = urls.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    let tmp = destination.with_extension("tmp");
    fs::write(&tmp, body)?;
    fs::rename(&tmp, destination)?;
    Ok(format!("{} live host(s)", urls.len()))
}
