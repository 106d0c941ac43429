use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::{debug, warn};
use tokio::process::{Child, Command};
use which::which;

use crate::core::stage::CommandSpec;
use crate::error::{ReconError, Result};
use crate::process::completion::DONE_MARKER;
use crate::process::{shell_join, shell_quote};

/// Terminal emulators tried, in order, for interactive launches.
const TERMINALS: &[&str] = &["xfce4-terminal", "xterm", "gnome-terminal", "konsole"];

/// Everything needed to start one stage's external tool.
#[derive(Debug, Clone)]
pub struct LaunchRequest<'a> {
    pub stage: &'a str,
    pub command: &'a CommandSpec,
    pub log_path: &'a Path,
    pub done_path: &'a Path,
    pub pid_path: &'a Path,
    pub working_dir: &'a Path,
    pub interactive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchMethod {
    Terminal(String),
    Background,
}

/// A started wrapper process. Completion is observed through the done-file,
/// not through this handle.
#[derive(Debug)]
pub struct LaunchHandle {
    pub method: LaunchMethod,
    pid: Option<u32>,
    pid_file: Option<PathBuf>,
    child: Option<Child>,
}

impl LaunchHandle {
    pub fn new(method: LaunchMethod, child: Child) -> Self {
        Self {
            method,
            pid: child.id(),
            pid_file: None,
            child: Some(child),
        }
    }

    /// A handle with no process behind it (used by test launchers).
    pub fn detached(method: LaunchMethod, pid: Option<u32>) -> Self {
        Self {
            method,
            pid,
            pid_file: None,
            child: None,
        }
    }

    /// File the wrapper writes its own pid into before running the tool.
    pub fn with_pid_file(mut self, path: PathBuf) -> Self {
        self.pid_file = Some(path);
        self
    }

    /// Pid of the process this handle spawned (the terminal client in interactive mode).
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Pid of the wrapper shell running the tool, once it has recorded it.
    pub fn wrapper_pid(&self) -> Option<u32> {
        let path = self.pid_file.as_ref()?;
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    /// Sends SIGTERM to the wrapper's process group and to the group of the
    /// spawned process. Terminal servers detach the wrapper from the spawned
    /// client, so both are signalled. The spawned child is killed directly
    /// only when signalling its group fails.
    pub fn terminate(&mut self) {
        let wrapper = self.wrapper_pid();
        let mut spawned_signalled = false;
        if let Some(pid) = wrapper {
            match signal_group(pid) {
                Ok(()) => {
                    debug!("sent SIGTERM to wrapper group {}", pid);
                    spawned_signalled = self.pid == Some(pid);
                }
                Err(e) => debug!("SIGTERM to wrapper group {} failed: {}", pid, e),
            }
        }
        if spawned_signalled {
            return;
        }

        let spawned = match self.pid {
            Some(pid) => signal_group(pid),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "no pid recorded")),
        };
        if let Err(e) = spawned {
            debug!("SIGTERM to pid {:?} failed: {}", self.pid, e);
            if let Some(child) = self.child.as_mut() {
                if let Err(e) = child.start_kill() {
                    debug!("kill of pid {:?} failed: {}", self.pid, e);
                }
            }
        }
    }

    /// Collects the exit status if the wrapper already exited, so it does not linger as a zombie.
    pub fn reap(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.try_wait();
        }
    }
}

/// SIGTERM to the group led by `pid`, or to `pid` alone when it leads none.
#[cfg(unix)]
fn signal_group(pid: u32) -> io::Result<()> {
    let pid = pid as libc::pid_t;
    if unsafe { libc::kill(-pid, libc::SIGTERM) } == 0 {
        return Ok(());
    }
    if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
        return Ok(());
    }
    Err(io::Error::last_os_error())
}

#[cfg(not(unix))]
fn signal_group(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "process groups need unix"))
}

/// Starts external commands without waiting for them.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<LaunchHandle>;
}

/// Launches each command inside a bash wrapper that appends output to the
/// stage log and writes the done-file on exit.
pub struct ShellLauncher {
    shell: Option<PathBuf>,
}

impl ShellLauncher {
    pub fn new() -> Self {
        Self { shell: which("bash").ok() }
    }

    fn shell(&self, stage: &str) -> Result<&Path> {
        self.shell.as_deref().ok_or_else(|| ReconError::LaunchFailed {
            stage: stage.to_string(),
            reason: "bash not found in PATH".to_string(),
        })
    }

    fn spawn_in_terminal(&self, request: &LaunchRequest<'_>, shell: &Path, script: &str) -> Option<LaunchHandle> {
        let shell = shell.to_string_lossy().into_owned();
        for terminal in TERMINALS {
            let Ok(binary) = which(terminal) else { continue };
            let title = format!("reconchain: {}", request.stage);
            let mut cmd = Command::new(binary);
            match *terminal {
                "xfce4-terminal" => cmd.args(["--hold", "--disable-server", "-T", title.as_str(), "-x", shell.as_str(), "-c", script]),
                "xterm" => cmd.args(["-hold", "-T", title.as_str(), "-e", shell.as_str(), "-c", script]),
                "gnome-terminal" => cmd.args(["--wait", "--title", title.as_str(), "--", shell.as_str(), "-c", script]),
                _ => cmd.args(["--nofork", "--hold", "-e", shell.as_str(), "-c", script]),
            };
            cmd.current_dir(request.working_dir)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
            #[cfg(unix)]
            cmd.process_group(0);

            match cmd.spawn() {
                Ok(child) => {
                    let handle = LaunchHandle::new(LaunchMethod::Terminal(terminal.to_string()), child);
                    return Some(handle.with_pid_file(request.pid_path.to_path_buf()));
                }
                Err(e) => warn!("[{}] could not open {}: {}", request.stage, terminal, e),
            }
        }
        None
    }
}

impl Default for ShellLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessLauncher for ShellLauncher {
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<LaunchHandle> {
        let launch_failed = |reason: String| ReconError::LaunchFailed {
            stage: request.stage.to_string(),
            reason,
        };

        for path in [request.log_path, request.done_path, request.pid_path] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| launch_failed(e.to_string()))?;
            }
        }
        for stale in [request.done_path, request.pid_path] {
            if stale.exists() {
                fs::remove_file(stale).map_err(|e| launch_failed(e.to_string()))?;
            }
        }

        let shell = self.shell(request.stage)?;

        if request.interactive {
            let script = wrapper_script(request, true);
            if let Some(handle) = self.spawn_in_terminal(request, shell, &script) {
                return Ok(handle);
            }
            warn!("[{}] no terminal emulator available, running in background", request.stage);
        }

        let script = wrapper_script(request, false);
        let mut cmd = Command::new(shell);
        cmd.arg("-c")
            .arg(&script)
            .current_dir(request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| launch_failed(e.to_string()))?;
        Ok(LaunchHandle::new(LaunchMethod::Background, child).with_pid_file(request.pid_path.to_path_buf()))
    }
}

/// Records the wrapper's pid, runs the command, captures combined output into
/// the log, then records the exit status in the done-file through a temp file
/// and rename.
pub fn wrapper_script(request: &LaunchRequest<'_>, visible: bool) -> String {
    let command = shell_join(&request.command.argv());
    let stdin = request
        .command
        .stdin
        .as_ref()
        .map(|p| format!(" < {}", shell_quote(&p.to_string_lossy())))
        .unwrap_or_default();
    let log = shell_quote(&request.log_path.to_string_lossy());
    let pid = shell_quote(&request.pid_path.to_string_lossy());
    let done = request.done_path.to_string_lossy();
    let done_tmp = shell_quote(&format!("{}.tmp", done));
    let done = shell_quote(&done);

    let (run, status) = if visible {
        (format!("{}{} 2>&1 | tee -a {}", command, stdin, log), "${PIPESTATUS[0]}")
    } else {
        (format!("{}{} >> {} 2>&1", command, stdin, log), "$?")
    };

    format!(
        "echo $$ > {pid}; {run}; rc={status}; printf '%s exit=%d\\n' {marker} \"$rc\" > {tmp} && mv -f {tmp} {done}",
        pid = pid,
        run = run,
        status = status,
        marker = DONE_MARKER,
        tmp = done_tmp,
        done = done,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::completion::{wait_for_completion, CompletionOutcome};
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::time::{sleep, Instant};
    use tokio_util::sync::CancellationToken;

    struct Paths {
        log: PathBuf,
        done: PathBuf,
        pid: PathBuf,
        dir: PathBuf,
    }

    impl Paths {
        fn under(dir: &Path, stage: &str) -> Self {
            Self {
                log: dir.join("logs").join(format!("{}.log", stage)),
                done: dir.join("logs").join(format!("{}.done", stage)),
                pid: dir.join("logs").join(format!("{}.pid", stage)),
                dir: dir.to_path_buf(),
            }
        }

        fn request<'a>(&'a self, cmd: &'a CommandSpec) -> LaunchRequest<'a> {
            LaunchRequest {
                stage: "test",
                command: cmd,
                log_path: &self.log,
                done_path: &self.done,
                pid_path: &self.pid,
                working_dir: &self.dir,
                interactive: false,
            }
        }
    }

    /// A tool that appends to `ticks` every 50ms until it is killed.
    fn ticking_tool(ticks: &Path) -> CommandSpec {
        let script = format!("while true; do echo tick >> {}; sleep 0.05; done", shell_quote(&ticks.to_string_lossy()));
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    fn size(path: &Path) -> u64 {
        std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }

    async fn wait_for(mut ready: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !ready() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            sleep(Duration::from_millis(20)).await;
        }
    }

    async fn assert_stopped(ticks: &Path) {
        sleep(Duration::from_millis(300)).await;
        let before = size(ticks);
        sleep(Duration::from_millis(400)).await;
        assert_eq!(size(ticks), before, "tool kept running after terminate");
    }

    #[test]
    fn test_wrapper_quotes_untrusted_arguments() {
        let cmd = CommandSpec::new("subfinder").arg("-d").arg("x.com; rm -rf /");
        let paths = Paths::under(Path::new("/tmp/out"), "subfinder");
        let script = wrapper_script(&paths.request(&cmd), false);

        assert!(script.starts_with(
            "echo $$ > /tmp/out/logs/subfinder.pid; subfinder -d 'x.com; rm -rf /' >> /tmp/out/logs/subfinder.log 2>&1"
        ));
        assert!(script.contains(DONE_MARKER));
        assert!(script.ends_with("mv -f /tmp/out/logs/subfinder.done.tmp /tmp/out/logs/subfinder.done"));
    }

    #[test]
    fn test_visible_wrapper_tees_output() {
        let cmd = CommandSpec::new("aquatone").arg("-out").arg("/o").stdin_from(PathBuf::from("/o/live.txt"));
        let paths = Paths::under(Path::new("/o"), "aquatone");
        let script = wrapper_script(&paths.request(&cmd), true);

        assert!(script.contains("; aquatone -out /o < /o/live.txt 2>&1 | tee -a /o/logs/aquatone.log"));
        assert!(script.contains("${PIPESTATUS[0]}"));
    }

    #[test]
    fn test_wrapper_pid_comes_from_pid_file() {
        let dir = tempdir().unwrap();
        let pid_file = dir.path().join("nmap.pid");
        let handle = LaunchHandle::detached(LaunchMethod::Background, Some(7)).with_pid_file(pid_file.clone());
        assert_eq!(handle.wrapper_pid(), None);

        std::fs::write(&pid_file, "1234\n").unwrap();
        assert_eq!(handle.wrapper_pid(), Some(1234));
        assert_eq!(handle.pid(), Some(7));
    }

    #[tokio::test]
    async fn test_background_launch_writes_log_and_done_file() {
        let launcher = ShellLauncher::new();
        if launcher.shell.is_none() {
            return;
        }
        let dir = tempdir().unwrap();
        let paths = Paths::under(dir.path(), "echo");
        let cmd = CommandSpec::new("sh").arg("-c").arg("echo hello; echo oops >&2; exit 3");

        let mut handle = launcher.launch(&paths.request(&cmd)).unwrap();
        assert_eq!(handle.method, LaunchMethod::Background);

        let outcome =
            wait_for_completion(&paths.done, Duration::from_millis(20), Duration::from_secs(10), &CancellationToken::new())
                .await;
        handle.reap();

        assert_eq!(outcome, CompletionOutcome::Completed { exit_code: Some(3) });
        assert_eq!(handle.wrapper_pid(), handle.pid());
        let log_text = std::fs::read_to_string(&paths.log).unwrap();
        assert!(log_text.contains("hello"));
        assert!(log_text.contains("oops"));
    }

    #[tokio::test]
    async fn test_stale_files_are_removed_before_launch() {
        let launcher = ShellLauncher::new();
        if launcher.shell.is_none() {
            return;
        }
        let dir = tempdir().unwrap();
        let paths = Paths::under(dir.path(), "slow");
        std::fs::create_dir_all(dir.path().join("logs")).unwrap();
        std::fs::write(&paths.done, format!("{} exit=0\n", DONE_MARKER)).unwrap();
        std::fs::write(&paths.pid, "1\n").unwrap();
        let cmd = CommandSpec::new("sleep").arg("5");

        let mut handle = launcher.launch(&paths.request(&cmd)).unwrap();
        assert!(!paths.done.exists());
        assert_ne!(handle.wrapper_pid(), Some(1));
        handle.terminate();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_stops_the_running_tool() {
        let launcher = ShellLauncher::new();
        if launcher.shell.is_none() {
            return;
        }
        let dir = tempdir().unwrap();
        let paths = Paths::under(dir.path(), "ticker");
        let ticks = dir.path().join("ticks.txt");
        let cmd = ticking_tool(&ticks);

        let mut handle = launcher.launch(&paths.request(&cmd)).unwrap();
        wait_for(|| size(&ticks) > 0).await;
        let wrapper = handle.wrapper_pid().expect("wrapper pid recorded");

        handle.terminate();
        assert_stopped(&ticks).await;

        wait_for(|| {
            handle.reap();
            (unsafe { libc::kill(wrapper as libc::pid_t, 0) }) != 0
        })
        .await;
        assert!(!paths.done.exists());
    }

    /// Terminal servers leave the spawned client unrelated to the tool; the
    /// pid file still leads to it.
    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_reaches_tool_through_pid_file_only() {
        let launcher = ShellLauncher::new();
        if launcher.shell.is_none() {
            return;
        }
        let dir = tempdir().unwrap();
        let paths = Paths::under(dir.path(), "ticker");
        let ticks = dir.path().join("ticks.txt");
        let cmd = ticking_tool(&ticks);

        let mut real = launcher.launch(&paths.request(&cmd)).unwrap();
        wait_for(|| size(&ticks) > 0).await;

        let mut client = LaunchHandle::detached(LaunchMethod::Terminal("gnome-terminal".into()), None)
            .with_pid_file(paths.pid.clone());
        client.terminate();
        assert_stopped(&ticks).await;
        real.reap();
    }
}
