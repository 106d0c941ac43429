use std::path::Path;
use std::time::Duration;

use log::debug;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Written by the wrapper script once the wrapped command has exited.
pub const DONE_MARKER: &str = "RECONCHAIN_STAGE_DONE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The done-file carried the marker. `exit_code` is the wrapped command's status when recorded.
    Completed { exit_code: Option<i32> },
    TimedOut,
    Cancelled,
}

/// Reads a done-file. Returns `None` unless the marker is present, so an empty
/// or half-written file never counts as completion.
pub async fn read_marker(done_path: &Path) -> Option<Option<i32>> {
    let content = tokio::fs::read_to_string(done_path).await.ok()?;
    parse_marker(&content)
}

fn parse_marker(content: &str) -> Option<Option<i32>> {
    let line = content.lines().find(|l| l.contains(DONE_MARKER))?;
    let exit_code = line
        .split_whitespace()
        .find_map(|token| token.strip_prefix("exit="))
        .and_then(|code| code.parse::<i32>().ok());
    Some(exit_code)
}

/// Polls `done_path` until it holds the completion marker, the budget runs
/// out, or `cancel` fires.
pub async fn wait_for_completion(
    done_path: &Path,
    poll_interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> CompletionOutcome {
    let deadline = Instant::now() + timeout;
    let poll_interval = poll_interval.max(Duration::from_millis(10));

    loop {
        if let Some(exit_code) = read_marker(done_path).await {
            debug!("done-file {} observed (exit={:?})", done_path.display(), exit_code);
            return CompletionOutcome::Completed { exit_code };
        }

        let now = Instant::now();
        if now >= deadline {
            return CompletionOutcome::TimedOut;
        }

        let nap = poll_interval.min(deadline - now);
        tokio::select! {
            _ = cancel.cancelled() => return CompletionOutcome::Cancelled,
            _ = sleep(nap) => {}
        }
    }
}
