use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a single stage. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl StageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::TimedOut => "TimedOut",
        };
        f.write_str(label)
    }
}

/// How an external stage's result is judged once its done-file appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SuccessPolicy {
    /// The wrapped command must exit with status 0.
    ExitCode,
    /// The primary output artifact must exist and be non-empty.
    OutputExists,
    /// Either of the above is enough.
    Either,
}

impl SuccessPolicy {
    pub fn accepts(self, exit_code: Option<i32>, output_present: bool) -> bool {
        let exit_ok = exit_code == Some(0);
        match self {
            Self::ExitCode => exit_ok,
            Self::OutputExists => output_present,
            Self::Either => exit_ok || output_present,
        }
    }
}

/// Argument vector for an external tool. Never a shell string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// File fed to the tool's standard input, if any.
    pub stdin: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &std::path::Path) -> Self {
        let arg = path.to_string_lossy().into_owned();
        self.arg(arg)
    }

    pub fn stdin_from(mut self, path: PathBuf) -> Self {
        self.stdin = Some(path);
        self
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::process::shell_join(&self.argv()))?;
        if let Some(ref stdin) = self.stdin {
            write!(f, " < {}", crate::process::shell_quote(&stdin.to_string_lossy()))?;
        }
        Ok(())
    }
}

/// Producer file feeding the subdomain merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSource {
    pub path: PathBuf,
    /// Keep only lines containing a dot (for producers whose file is raw tool log text).
    pub require_dot: bool,
}

/// Work performed in-process rather than by an external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalTask {
    MergeSubdomains {
        sources: Vec<MergeSource>,
        destination: PathBuf,
    },
    ExtractLiveHosts {
        source: PathBuf,
        destination: PathBuf,
    },
    BuildReport,
}

impl fmt::Display for InternalTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MergeSubdomains { sources, destination } => {
                write!(f, "merge {} producer(s) into {}", sources.len(), destination.display())
            }
            Self::ExtractLiveHosts { source, destination } => {
                write!(f, "extract URLs from {} into {}", source.display(), destination.display())
            }
            Self::BuildReport => f.write_str("build report.html and text summaries"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageKind {
    External {
        command: CommandSpec,
        policy: SuccessPolicy,
        timeout: Duration,
    },
    Internal(InternalTask),
}

/// One schedulable unit. Built once from the catalog and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub name: String,
    pub kind: StageKind,
    /// Stages that must reach `Completed` before this one may start.
    pub requires: Vec<String>,
    /// Stages that must reach any terminal state before this one may start.
    pub after: Vec<String>,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
}

impl Stage {
    pub fn external(name: &str, command: CommandSpec, policy: SuccessPolicy, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            kind: StageKind::External { command, policy, timeout },
            requires: Vec::new(),
            after: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn internal(name: &str, task: InternalTask) -> Self {
        Self {
            name: name.to_string(),
            kind: StageKind::Internal(task),
            requires: Vec::new(),
            after: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn requires(mut self, names: &[&str]) -> Self {
        self.requires.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn after(mut self, names: &[&str]) -> Self {
        self.after.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn reads(mut self, paths: &[PathBuf]) -> Self {
        self.inputs.extend(paths.iter().cloned());
        self
    }

    pub fn writes(mut self, paths: &[PathBuf]) -> Self {
        self.outputs.extend(paths.iter().cloned());
        self
    }

    /// The artifact checked by `SuccessPolicy::OutputExists`.
    pub fn primary_output(&self) -> Option<&PathBuf> {
        self.outputs.first()
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &String> {
        self.requires.iter().chain(self.after.iter())
    }
}

/// Mutable runtime record of one stage execution, owned by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRun {
    pub name: String,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pid: Option<u32>,
    pub log_path: PathBuf,
    pub done_path: PathBuf,
    /// Why the stage failed or was skipped.
    pub reason: Option<String>,
    /// Set when the stage never ran because a required dependency did not complete.
    #[serde(default)]
    pub skipped: bool,
}

impl StageRun {
    pub fn pending(name: &str, log_path: PathBuf, done_path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            status: StageStatus::Pending,
            started_at: None,
            finished_at: None,
            pid: None,
            log_path,
            done_path,
            reason: None,
            skipped: false,
        }
    }
}

/// What a stage runner reports back when a stage reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub status: StageStatus,
    pub pid: Option<u32>,
    pub reason: Option<String>,
}

impl StageOutcome {
    pub fn completed(pid: Option<u32>) -> Self {
        Self { status: StageStatus::Completed, pid, reason: None }
    }

    pub fn failed(pid: Option<u32>, reason: impl Into<String>) -> Self {
        Self { status: StageStatus::Failed, pid, reason: Some(reason.into()) }
    }

    pub fn timed_out(pid: Option<u32>, reason: impl Into<String>) -> Self {
        Self { status: StageStatus::TimedOut, pid, reason: Some(reason.into()) }
    }
}
