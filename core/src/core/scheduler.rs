use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::core::catalog::REPORT_STAGE;
use crate::core::stage::{Stage, StageOutcome, StageRun, StageStatus};
use crate::core::state::{RunState, StatusTable};
use crate::SinkRef;

pub const CONFIG_SKIP_REASON: &str = "skipped by configuration";
const CANCELLED_REASON: &str = "run cancelled";

/// Executes one stage to a terminal state. Implementations must return
/// promptly once `cancel` fires.
#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn run(&self, stage: &Stage, cancel: &CancellationToken) -> StageOutcome;
}

/// Final per-stage statuses of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stages: Vec<StageRun>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn count(&self, status: StageStatus) -> usize {
        self.stages.iter().filter(|r| r.status == status).count()
    }

    /// Stages that never ran because a required upstream stage did not complete.
    pub fn dependency_failures(&self) -> impl Iterator<Item = &StageRun> {
        self.stages.iter().filter(|r| r.skipped)
    }

    fn report_failed(&self) -> bool {
        self.stages.iter().any(|r| {
            r.name == REPORT_STAGE
                && matches!(r.status, StageStatus::Failed | StageStatus::TimedOut)
                && r.reason.as_deref() != Some(CONFIG_SKIP_REASON)
        })
    }

    /// 130 when interrupted, 1 when a dependent stage had to be skipped or
    /// the report could not be written, 0 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.cancelled {
            130
        } else if self.dependency_failures().next().is_some() || self.report_failed() {
            1
        } else {
            0
        }
    }
}

/// Dependency-driven stage executor.
///
/// Every stage whose dependencies are satisfied is started at once; each
/// terminal transition recomputes the ready set. Stages whose required
/// dependency failed are marked `Failed` without being handed to the runner.
pub struct StageScheduler {
    stages: Vec<Arc<Stage>>,
    table: StatusTable,
    runner: Arc<dyn StageRunner>,
    sink: SinkRef,
    cancel: CancellationToken,
    skip: HashSet<String>,
    state_path: Option<(PathBuf, String)>,
}

impl StageScheduler {
    pub fn new(
        stages: Vec<Stage>,
        table: StatusTable,
        runner: Arc<dyn StageRunner>,
        sink: SinkRef,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stages: stages.into_iter().map(Arc::new).collect(),
            table,
            runner,
            sink,
            cancel,
            skip: HashSet::new(),
            state_path: None,
        }
    }

    pub fn skip_stages<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip.extend(names.into_iter().map(Into::into));
        self
    }

    /// Writes `RunState` to `path` after every transition.
    pub fn persist_to(mut self, path: PathBuf, target: &str) -> Self {
        self.state_path = Some((path, target.to_string()));
        self
    }

    pub fn table(&self) -> StatusTable {
        self.table.clone()
    }

    pub async fn run(self) -> RunSummary {
        let started_at = Utc::now();
        let mut config_skipped: HashSet<String> = HashSet::new();

        for stage in &self.stages {
            if self.skip.contains(&stage.name) && self.table.skip(&stage.name, CONFIG_SKIP_REASON, false) {
                config_skipped.insert(stage.name.clone());
                self.transition(&stage.name, started_at);
            }
        }

        let mut in_flight = FuturesUnordered::new();

        loop {
            if self.cancel.is_cancelled() {
                for stage in &self.stages {
                    if self.table.skip(&stage.name, CANCELLED_REASON, false) {
                        self.transition(&stage.name, started_at);
                    }
                }
            } else {
                self.propagate_failures(&mut config_skipped, started_at);

                for stage in self.ready() {
                    if !self.table.mark_running(&stage.name) {
                        continue;
                    }
                    self.transition(&stage.name, started_at);

                    let runner = Arc::clone(&self.runner);
                    let cancel = self.cancel.clone();
                    let name = stage.name.clone();
                    let handle = tokio::spawn(async move { runner.run(&stage, &cancel).await });
                    in_flight.push(async move { (name, handle.await) });
                }
            }

            let Some((name, joined)) = in_flight.next().await else {
                break;
            };
            let outcome = joined.unwrap_or_else(|e| {
                warn!("[{}] stage task aborted: {}", name, e);
                StageOutcome::failed(None, format!("stage task aborted: {}", e))
            });
            if self.table.finish(&name, &outcome) {
                self.transition(&name, started_at);
            }
        }

        // Anything still pending waits on a stage that will never finish.
        for stage in &self.stages {
            if self.table.skip(&stage.name, "unresolvable dependencies", false) {
                warn!("[{}] left with unresolvable dependencies", stage.name);
                self.transition(&stage.name, started_at);
            }
        }

        RunSummary {
            stages: self.table.snapshot(),
            cancelled: self.cancel.is_cancelled(),
        }
    }

    /// Pending stages whose `requires` are all `Completed` and whose `after`
    /// stages have all reached a terminal state.
    fn ready(&self) -> Vec<Arc<Stage>> {
        self.stages
            .iter()
            .filter(|stage| self.table.status(&stage.name) == Some(StageStatus::Pending))
            .filter(|stage| {
                stage
                    .requires
                    .iter()
                    .all(|dep| self.table.status(dep) == Some(StageStatus::Completed))
            })
            .filter(|stage| {
                stage
                    .after
                    .iter()
                    .all(|dep| self.table.status(dep).map_or(true, StageStatus::is_terminal))
            })
            .cloned()
            .collect()
    }

    /// Marks pending stages `Failed` when a required dependency can no longer
    /// complete, repeating until no more stages change.
    fn propagate_failures(&self, config_skipped: &mut HashSet<String>, started_at: DateTime<Utc>) {
        loop {
            let mut changed = false;
            for stage in &self.stages {
                if self.table.status(&stage.name) != Some(StageStatus::Pending) {
                    continue;
                }
                let blocked = stage.requires.iter().find_map(|dep| match self.table.status(dep) {
                    None => Some((dep, "does not exist")),
                    Some(StageStatus::Failed) | Some(StageStatus::TimedOut) => Some((dep, "did not complete")),
                    _ => None,
                });
                let Some((dep, why)) = blocked else { continue };

                let by_config = config_skipped.contains(dep);
                let reason = if by_config {
                    format!("dependency {} {}", dep, CONFIG_SKIP_REASON)
                } else {
                    format!("dependency {} {}", dep, why)
                };
                if self.table.skip(&stage.name, &reason, !by_config) {
                    if by_config {
                        config_skipped.insert(stage.name.clone());
                    }
                    info!("[{}] skipped: {}", stage.name, reason);
                    self.transition(&stage.name, started_at);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn transition(&self, name: &str, started_at: DateTime<Utc>) {
        let snapshot = self.table.snapshot();
        if let Some(run) = snapshot.iter().find(|r| r.name == name) {
            debug!("[{}] -> {}", name, run.status);
            self.sink.on_stage(run);
        }

        if let Some((ref path, ref target)) = self.state_path {
            if let Err(e) = RunState::new(target, started_at, snapshot).save(path) {
                warn!("could not write {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::layout::OutputLayout;
    use crate::core::stage::InternalTask;
    use crate::PipelineEventSink;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;

    struct QuietSink;

    impl PipelineEventSink for QuietSink {
        fn on_log(&self, _level: &str, _message: &str) {}
        fn on_stage(&self, _run: &StageRun) {}
        fn on_progress(&self, _phase: &str, _current: usize, _total: usize) {}
    }

    /// Records every call and checks that `requires` were met at start time.
    struct RecordingRunner {
        table: Mutex<Option<StatusTable>>,
        outcomes: HashMap<String, StageStatus>,
        calls: Mutex<Vec<String>>,
        violations: Mutex<Vec<String>>,
        hang: HashSet<String>,
    }

    impl RecordingRunner {
        fn new(outcomes: &[(&str, StageStatus)]) -> Self {
            Self {
                table: Mutex::new(None),
                outcomes: outcomes.iter().map(|(n, s)| (n.to_string(), *s)).collect(),
                calls: Mutex::new(Vec::new()),
                violations: Mutex::new(Vec::new()),
                hang: HashSet::new(),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl StageRunner for RecordingRunner {
        async fn run(&self, stage: &Stage, cancel: &CancellationToken) -> StageOutcome {
            self.calls.lock().push(stage.name.clone());
            if let Some(ref table) = *self.table.lock() {
                if table.status(&stage.name) != Some(StageStatus::Running) {
                    self.violations.lock().push(format!("{} not running", stage.name));
                }
                for dep in &stage.requires {
                    if table.status(dep) != Some(StageStatus::Completed) {
                        self.violations.lock().push(format!("{} started before {}", stage.name, dep));
                    }
                }
            }

            if self.hang.contains(&stage.name) {
                cancel.cancelled().await;
                return StageOutcome::failed(None, "cancelled");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;

            match self.outcomes.get(&stage.name).copied().unwrap_or(StageStatus::Completed) {
                StageStatus::Failed => StageOutcome::failed(None, "exit status 1"),
                StageStatus::TimedOut => StageOutcome::timed_out(None, "too slow"),
                _ => StageOutcome::completed(None),
            }
        }
    }

    fn stage(name: &str, requires: &[&str], after: &[&str]) -> Stage {
        Stage::internal(name, InternalTask::BuildReport).requires(requires).after(after)
    }

    fn scheduler(stages: Vec<Stage>, runner: Arc<RecordingRunner>, cancel: CancellationToken) -> StageScheduler {
        let table = StatusTable::for_stages(&stages, &OutputLayout::new("/tmp/reconchain-test"));
        *runner.table.lock() = Some(table.clone());
        StageScheduler::new(stages, table, runner, Arc::new(QuietSink), cancel)
    }

    fn status_of(summary: &RunSummary, name: &str) -> StageStatus {
        summary.stages.iter().find(|r| r.name == name).map(|r| r.status).unwrap()
    }

    #[tokio::test]
    async fn test_dependencies_run_in_order() {
        let runner = Arc::new(RecordingRunner::new(&[]));
        let stages = vec![
            stage("report", &[], &["merge", "probe"]),
            stage("probe", &["merge"], &[]),
            stage("merge", &[], &["enum_a", "enum_b"]),
            stage("enum_a", &[], &[]),
            stage("enum_b", &[], &[]),
        ];
        let summary = scheduler(stages, Arc::clone(&runner), CancellationToken::new()).run().await;

        assert_eq!(summary.count(StageStatus::Completed), 5);
        assert_eq!(summary.exit_code(), 0);
        assert!(runner.violations.lock().is_empty());

        let calls = runner.calls();
        let pos = |n: &str| calls.iter().position(|c| c == n).unwrap();
        assert!(pos("merge") > pos("enum_a") && pos("merge") > pos("enum_b"));
        assert!(pos("probe") > pos("merge"));
        assert_eq!(calls.last().map(String::as_str), Some("report"));
    }

    #[tokio::test]
    async fn test_failed_dependency_skips_without_running() {
        let runner = Arc::new(RecordingRunner::new(&[("probe", StageStatus::Failed)]));
        let stages = vec![
            stage("probe", &[], &[]),
            stage("extract", &["probe"], &[]),
            stage("crawl", &["extract"], &[]),
            stage("ports", &[], &[]),
            stage("report", &[], &["probe", "extract", "crawl", "ports"]),
        ];
        let summary = scheduler(stages, Arc::clone(&runner), CancellationToken::new()).run().await;

        let calls = runner.calls();
        assert!(!calls.contains(&"extract".to_string()));
        assert!(!calls.contains(&"crawl".to_string()));
        assert!(calls.contains(&"report".to_string()));

        assert_eq!(status_of(&summary, "extract"), StageStatus::Failed);
        assert_eq!(status_of(&summary, "crawl"), StageStatus::Failed);
        assert_eq!(status_of(&summary, "ports"), StageStatus::Completed);
        assert_eq!(summary.dependency_failures().count(), 2);
        assert_eq!(summary.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_terminal_for_dependents() {
        let runner = Arc::new(RecordingRunner::new(&[("scan", StageStatus::TimedOut)]));
        let stages = vec![stage("scan", &[], &[]), stage("summary", &["scan"], &[])];
        let summary = scheduler(stages, Arc::clone(&runner), CancellationToken::new()).run().await;

        assert_eq!(status_of(&summary, "scan"), StageStatus::TimedOut);
        assert_eq!(status_of(&summary, "summary"), StageStatus::Failed);
        assert_eq!(runner.calls(), vec!["scan"]);
    }

    #[tokio::test]
    async fn test_after_waits_for_failures_too() {
        let runner = Arc::new(RecordingRunner::new(&[("enum_a", StageStatus::Failed)]));
        let stages = vec![
            stage("enum_a", &[], &[]),
            stage("enum_b", &[], &[]),
            stage("merge", &[], &["enum_a", "enum_b"]),
        ];
        let summary = scheduler(stages, Arc::clone(&runner), CancellationToken::new()).run().await;

        assert_eq!(status_of(&summary, "merge"), StageStatus::Completed);
        assert_eq!(summary.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_config_skip_cascades_without_failing_run() {
        let runner = Arc::new(RecordingRunner::new(&[]));
        let stages = vec![
            stage("probe", &[], &[]),
            stage("crawl", &["probe"], &[]),
            stage("report", &[], &["probe", "crawl"]),
        ];
        let summary = scheduler(stages, Arc::clone(&runner), CancellationToken::new())
            .skip_stages(["probe"])
            .run()
            .await;

        assert_eq!(runner.calls(), vec!["report"]);
        assert_eq!(status_of(&summary, "crawl"), StageStatus::Failed);
        assert_eq!(summary.dependency_failures().count(), 0);
        assert_eq!(summary.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_unknown_requirement_fails_stage() {
        let runner = Arc::new(RecordingRunner::new(&[]));
        let stages = vec![stage("orphan", &["ghost"], &[])];
        let summary = scheduler(stages, Arc::clone(&runner), CancellationToken::new()).run().await;

        assert!(runner.calls().is_empty());
        let run = &summary.stages[0];
        assert_eq!(run.status, StageStatus::Failed);
        assert_eq!(run.reason.as_deref(), Some("dependency ghost does not exist"));
    }

    #[tokio::test]
    async fn test_cancellation_stops_run() {
        let mut runner = RecordingRunner::new(&[]);
        runner.hang.insert("slow".to_string());
        let runner = Arc::new(runner);
        let cancel = CancellationToken::new();
        let stages = vec![stage("slow", &[], &[]), stage("next", &["slow"], &[])];
        let sched = scheduler(stages, Arc::clone(&runner), cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let summary = tokio::time::timeout(Duration::from_secs(5), sched.run()).await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.exit_code(), 130);
        assert_eq!(status_of(&summary, "slow"), StageStatus::Failed);
        assert_eq!(summary.stages[1].reason.as_deref(), Some("run cancelled"));
        assert_eq!(runner.calls(), vec!["slow"]);
    }

    #[tokio::test]
    async fn test_state_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_state.json");
        let runner = Arc::new(RecordingRunner::new(&[]));
        let stages = vec![stage("only", &[], &[])];
        scheduler(stages, runner, CancellationToken::new())
            .persist_to(path.clone(), "ex.com")
            .run()
            .await;

        let state = RunState::load(&path).unwrap();
        assert_eq!(state.target, "ex.com");
        assert_eq!(state.status_of("only"), Some(StageStatus::Completed));
    }
}
