//! Managed process abstraction

use crate::config::ServiceSpec;
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};

/// Shell used to run service and check commands
pub const DEFAULT_SHELL: &str = "sh";

/// Build a `<shell> -c <cmd>` command so shell operators work as written
pub fn shell_command(shell: &str, cmd: &str) -> Command {
    let mut command = Command::new(shell);
    command.arg("-c").arg(cmd);
    command
}

/// A running service process.
///
/// Owns the child handle; the OS process is released only by reaping it
/// through [`try_reap`](Self::try_reap).
#[derive(Debug)]
pub struct ManagedProcess {
    /// Service name (for logging)
    name: String,
    /// Process ID
    pid: u32,
    /// Start time
    started_at: Instant,
    /// Child process handle
    child: Child,
}

impl ManagedProcess {
    /// Spawn the service command through `shell`, inheriting stdio.
    ///
    /// The child leads its own process group, so a terminal Ctrl+C only
    /// reaches the supervisor, which forwards it.
    pub fn spawn(spec: &ServiceSpec, shell: &str) -> Result<Self, ProcessError> {
        log::debug!("[{}] Spawning: {} -c {}", spec.name, shell, spec.cmd);

        let mut cmd = shell_command(shell, &spec.cmd);
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .process_group(0);

        let child = cmd.spawn().map_err(|e| ProcessError::SpawnFailed {
            name: spec.name.clone(),
            source: e,
        })?;

        // A child that has not been polled yet always reports its id
        let pid = child.id().ok_or_else(|| ProcessError::NotRunning(spec.name.clone()))?;

        Ok(Self {
            name: spec.name.clone(),
            pid,
            started_at: Instant::now(),
            child,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Get uptime duration
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Collect the exit status if the process has terminated.
    ///
    /// Returns `Ok(None)` while the process is still running.
    pub fn try_reap(&mut self) -> Result<Option<ExitStatus>, ProcessError> {
        self.child.try_wait().map_err(|e| ProcessError::WaitFailed {
            name: self.name.clone(),
            source: e,
        })
    }

    /// Request termination with SIGINT.
    ///
    /// The signal goes to the whole process group so commands started by
    /// the shell see it too, as they would from a terminal.
    pub fn interrupt(&self) -> Result<(), ProcessError> {
        let result = match send_group_signal(self.pid, Signal::SIGINT) {
            Err(Errno::ESRCH) => send_signal(self.pid, Signal::SIGINT),
            other => other,
        };
        result.map_err(|e| ProcessError::SignalFailed {
            name: self.name.clone(),
            source: e,
        })
    }
}

/// Deliver `signal` to `pid`
pub fn send_signal(pid: u32, signal: Signal) -> Result<(), Errno> {
    let raw = i32::try_from(pid).map_err(|_| Errno::ESRCH)?;
    kill(Pid::from_raw(raw), signal)
}

/// Deliver `signal` to the process group led by `pgid`
pub fn send_group_signal(pgid: u32, signal: Signal) -> Result<(), Errno> {
    let raw = i32::try_from(pgid).map_err(|_| Errno::ESRCH)?;
    killpg(Pid::from_raw(raw), signal)
}

/// Liveness probe: signal 0 checks existence without affecting the process.
///
/// A terminated but unreaped process still counts as alive.
pub fn is_alive(pid: u32) -> bool {
    match i32::try_from(pid) {
        // EPERM means the process exists but belongs to someone else
        Ok(raw) => matches!(kill(Pid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM)),
        Err(_) => false,
    }
}

/// Human-readable exit description for logs
pub fn describe_exit(status: &ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit code {}", code),
        (None, Some(signal)) => match Signal::try_from(signal) {
            Ok(sig) => format!("signal {}", sig),
            Err(_) => format!("signal {}", signal),
        },
        (None, None) => "unknown status".to_string(),
    }
}

/// Errors that can occur with managed processes
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn process '{name}': {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait on process '{name}': {source}")]
    WaitFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to signal process '{name}': {source}")]
    SignalFailed {
        name: String,
        #[source]
        source: Errno,
    },

    #[error("Process '{0}' is not running")]
    NotRunning(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, cmd: &str) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            cmd: cmd.to_string(),
            run_once: false,
            deps: Vec::new(),
            checks: None,
        }
    }

    async fn wait_for_exit(process: &mut ManagedProcess) -> ExitStatus {
        for _ in 0..200 {
            if let Some(status) = process.try_reap().unwrap() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("process {} did not exit", process.pid());
    }

    #[tokio::test]
    async fn test_spawn_and_reap() {
        let mut process = ManagedProcess::spawn(&spec("quick", "exit 3"), DEFAULT_SHELL).unwrap();
        assert!(process.pid() > 0);

        let status = wait_for_exit(&mut process).await;
        assert_eq!(status.code(), Some(3));
        assert_eq!(describe_exit(&status), "exit code 3");
        assert!(!is_alive(process.pid()));
    }

    #[tokio::test]
    async fn test_shell_operators_honored() {
        let mut process =
            ManagedProcess::spawn(&spec("pipe", "echo hi | grep -q hi && exit 7"), DEFAULT_SHELL)
                .unwrap();
        assert_eq!(wait_for_exit(&mut process).await.code(), Some(7));
    }

    #[tokio::test]
    async fn test_interrupt_terminates() {
        let mut process = ManagedProcess::spawn(&spec("sleeper", "exec sleep 30"), DEFAULT_SHELL).unwrap();
        assert!(is_alive(process.pid()));
        assert!(process.try_reap().unwrap().is_none());

        process.interrupt().unwrap();
        let status = wait_for_exit(&mut process).await;
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_interrupt_reaches_shell_children() {
        // The shell waits on `sleep`; both must see the interrupt
        let mut process =
            ManagedProcess::spawn(&spec("compound", "sleep 30; exit 0"), DEFAULT_SHELL).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        process.interrupt().unwrap();
        let status = wait_for_exit(&mut process).await;
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_spawn_failure_with_missing_shell() {
        let result = ManagedProcess::spawn(&spec("broken", "true"), "/nonexistent/shell");
        assert!(matches!(result, Err(ProcessError::SpawnFailed { .. })));
    }

    #[test]
    fn test_is_alive_for_self() {
        assert!(is_alive(std::process::id()));
    }
}
