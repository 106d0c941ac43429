/// Stage status table and its on-disk snapshot.
///
/// The table is the only shared mutable state of a run. Every transition goes
/// through one lock so the scheduler's ready-set computation always reads a
/// consistent view; UIs only ever get cloned snapshots.
///
/// The snapshot is flushed to `run_state.json` after each transition with an
/// atomic write (tmp + rename) so an interrupted run leaves a readable file.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::layout::OutputLayout;
use crate::core::stage::{Stage, StageOutcome, StageRun, StageStatus};
use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct StatusTable {
    runs: Arc<Mutex<Vec<StageRun>>>,
}

impl StatusTable {
    pub fn new(runs: Vec<StageRun>) -> Self {
        Self {
            runs: Arc::new(Mutex::new(runs)),
        }
    }

    /// One `Pending` record per stage, in catalog order.
    pub fn for_stages(stages: &[Stage], layout: &OutputLayout) -> Self {
        Self::new(
            stages
                .iter()
                .map(|s| StageRun::pending(&s.name, layout.stage_log(&s.name), layout.stage_done(&s.name)))
                .collect(),
        )
    }

    /// Read-only copy of every stage record, in catalog order.
    pub fn snapshot(&self) -> Vec<StageRun> {
        self.runs.lock().clone()
    }

    pub fn status(&self, name: &str) -> Option<StageStatus> {
        self.runs.lock().iter().find(|r| r.name == name).map(|r| r.status)
    }

    /// `Pending -> Running`. Returns false for any other starting state.
    pub fn mark_running(&self, name: &str) -> bool {
        let mut runs = self.runs.lock();
        match runs.iter_mut().find(|r| r.name == name) {
            Some(run) if run.status == StageStatus::Pending => {
                run.status = StageStatus::Running;
                run.started_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// `Running -> terminal`. Terminal states are never overwritten.
    pub fn finish(&self, name: &str, outcome: &StageOutcome) -> bool {
        let mut runs = self.runs.lock();
        match runs.iter_mut().find(|r| r.name == name) {
            Some(run) if run.status == StageStatus::Running && outcome.status.is_terminal() => {
                run.status = outcome.status;
                run.finished_at = Some(Utc::now());
                run.pid = outcome.pid.or(run.pid);
                run.reason = outcome.reason.clone();
                true
            }
            _ => false,
        }
    }

    /// `Pending -> Failed` without running. `dependency_failure` marks skips
    /// caused by a required upstream stage.
    pub fn skip(&self, name: &str, reason: &str, dependency_failure: bool) -> bool {
        let mut runs = self.runs.lock();
        match runs.iter_mut().find(|r| r.name == name) {
            Some(run) if run.status == StageStatus::Pending => {
                run.status = StageStatus::Failed;
                run.finished_at = Some(Utc::now());
                run.reason = Some(reason.to_string());
                run.skipped = dependency_failure;
                true
            }
            _ => false,
        }
    }

    pub fn counts(&self) -> (usize, usize) {
        let runs = self.runs.lock();
        let done = runs.iter().filter(|r| r.status.is_terminal()).count();
        (done, runs.len())
    }

    pub fn running(&self) -> Vec<String> {
        self.runs
            .lock()
            .iter()
            .filter(|r| r.status == StageStatus::Running)
            .map(|r| r.name.clone())
            .collect()
    }
}

/// Persisted view of a run, read back by report regeneration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub stages: Vec<StageRun>,
}

impl RunState {
    pub fn new(target: &str, started_at: DateTime<Utc>, stages: Vec<StageRun>) -> Self {
        Self {
            target: target.to_string(),
            started_at,
            stages,
        }
    }

    /// Atomic write: serialize to .tmp, then rename over the real file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::from)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Option<Self> {
        let data = fs::read_to_string(path).ok()?;
        serde_json::from_str(&data).ok()
    }

    pub fn status_of(&self, name: &str) -> Option<StageStatus> {
        self.stages.iter().find(|s| s.name == name).map(|s| s.status)
    }
}
