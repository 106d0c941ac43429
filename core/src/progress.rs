use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::state::StatusTable;

/// Spinner line fed from read-only snapshots of the status table.
pub struct ProgressReporter {
    bar: ProgressBar,
    table: StatusTable,
}

/// `"<done>/<total> stages (<pct>%) | running: a, b"`.
pub fn progress_line(table: &StatusTable) -> String {
    let (done, total) = table.counts();
    let pct = if total == 0 { 100 } else { done * 100 / total };
    let running = table.running();
    if running.is_empty() {
        format!("{}/{} stages ({}%)", done, total, pct)
    } else {
        format!("{}/{} stages ({}%) | running: {}", done, total, pct, running.join(", "))
    }
}

impl ProgressReporter {
    pub fn new(table: StatusTable) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Self { bar, table }
    }

    /// A reporter that draws nothing (interactive mode, dry runs, tests).
    pub fn hidden(table: StatusTable) -> Self {
        Self {
            bar: ProgressBar::hidden(),
            table,
        }
    }

    pub fn refresh(&self) {
        self.bar.set_message(progress_line(&self.table));
    }

    /// Handle for printing above the spinner without tearing it.
    pub fn bar(&self) -> ProgressBar {
        self.bar.clone()
    }

    /// Refreshes the spinner until `stop` fires, then clears it.
    pub fn spawn(self, stop: CancellationToken) -> JoinHandle<()> {
        self.bar.enable_steady_tick(Duration::from_millis(120));
        tokio::spawn(async move {
            loop {
                self.refresh();
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                }
            }
            self.bar.finish_and_clear();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stage::{StageOutcome, StageRun};
    use std::path::PathBuf;

    #[test]
    fn test_progress_line_lists_running_stages() {
        let table = StatusTable::new(vec![
            StageRun::pending("amass", PathBuf::from("a.log"), PathBuf::from("a.done")),
            StageRun::pending("httpx", PathBuf::from("h.log"), PathBuf::from("h.done")),
        ]);
        table.mark_running("amass");
        assert_eq!(progress_line(&table), "0/2 stages (0%) | running: amass");

        table.finish("amass", &StageOutcome::completed(None));
        assert_eq!(progress_line(&table), "1/2 stages (50%)");
    }

    #[tokio::test]
    async fn test_hidden_reporter_stops_on_signal() {
        let stop = CancellationToken::new();
        let handle = ProgressReporter::hidden(StatusTable::default()).spawn(stop.clone());
        stop.cancel();
        handle.await.unwrap();
    }
}
