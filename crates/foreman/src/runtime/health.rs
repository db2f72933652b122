//! Periodic health checking for a running service

use crate::config::CheckSpec;
use crate::runtime::process::{describe_exit, is_alive, send_group_signal, shell_command};
use crate::runtime::sockets::{port_owned_by, Protocol};
use crate::runtime::supervisor::Supervisor;
use nix::sys::signal::Signal;
use std::process::Stdio;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Monitors one service process until it is gone.
///
/// Each tick runs, in order: a liveness probe, the dependency check, the
/// check command and the port checks. Failures are reported to the
/// supervisor, which interrupts the process; the checker itself keeps going
/// until the liveness probe finds the process gone.
pub struct HealthChecker {
    supervisor: Supervisor,
    name: String,
    pid: u32,
    checks: CheckSpec,
    interval: Duration,
    timeout: Duration,
    shell: String,
}

impl HealthChecker {
    pub fn new(supervisor: Supervisor, name: String, pid: u32, checks: CheckSpec) -> Self {
        let config = supervisor.config();
        let interval = config.check_interval;
        let timeout = config.check_timeout;
        let shell = config.shell.clone();

        Self {
            supervisor,
            name,
            pid,
            checks,
            interval,
            timeout,
            shell,
        }
    }

    /// Run the checker on the current tokio runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            if !is_alive(self.pid) {
                log::debug!("[{}] PID {} gone, health checker exiting", self.name, self.pid);
                return;
            }

            let failures = self.run_checks().await;
            if failures.is_empty() {
                self.supervisor.mark_healthy(&self.name, self.pid).await;
            } else {
                self.supervisor
                    .report_check_failure(&self.name, self.pid, &failures.join("; "))
                    .await;
            }
        }
    }

    /// Run every check category; one failing category does not skip the rest
    async fn run_checks(&self) -> Vec<String> {
        let mut failures = Vec::new();

        if let Some(dep) = self.supervisor.inactive_dependency(&self.name).await {
            failures.push(format!("dependency '{}' is not active", dep));
        }

        if let Some(cmd) = &self.checks.cmd {
            if let Err(reason) = self.check_command(cmd).await {
                failures.push(reason);
            }
        }

        let ports = self
            .checks
            .tcp_ports
            .iter()
            .map(|p| (Protocol::Tcp, *p))
            .chain(self.checks.udp_ports.iter().map(|p| (Protocol::Udp, *p)));

        for (protocol, port) in ports {
            if let Err(reason) = self.check_port(protocol, port).await {
                failures.push(reason);
            }
        }

        failures
    }

    /// Run the check command in its own process group.
    ///
    /// On timeout the whole group is killed, including commands the shell
    /// forked.
    async fn check_command(&self, cmd: &str) -> Result<(), String> {
        let mut command = shell_command(&self.shell, cmd);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| format!("check command `{}` could not run: {}", cmd, e))?;
        let pgid = child.id();

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(format!(
                "check command `{}` failed with {}",
                cmd,
                describe_exit(&status)
            )),
            Ok(Err(e)) => Err(format!("check command `{}` could not be waited on: {}", cmd, e)),
            Err(_) => {
                if let Some(pgid) = pgid {
                    if let Err(e) = send_group_signal(pgid, Signal::SIGKILL) {
                        log::debug!("[{}] Killing check group {}: {}", self.name, pgid, e);
                    }
                }
                if let Err(e) = child.wait().await {
                    log::debug!("[{}] Reaping timed out check: {}", self.name, e);
                }
                Err(format!(
                    "check command `{}` timed out after {:?}",
                    cmd, self.timeout
                ))
            }
        }
    }

    async fn check_port(&self, protocol: Protocol, port: u16) -> Result<(), String> {
        let pid = self.pid;
        let owned = tokio::task::spawn_blocking(move || port_owned_by(protocol, port, pid)).await;

        match owned {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(format!("{} port {} not held by PID {}", protocol, port, pid)),
            Ok(Err(e)) => Err(format!("{} port {} check failed: {}", protocol, port, e)),
            Err(e) => Err(format!("{} port {} check panicked: {}", protocol, port, e)),
        }
    }
}
