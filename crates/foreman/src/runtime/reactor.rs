//! Signal reactor - reaps terminated children and handles interrupts

use crate::runtime::supervisor::Supervisor;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

/// Waits for SIGCHLD and shutdown requests and drives the supervisor.
pub struct SignalReactor {
    supervisor: Supervisor,
}

impl SignalReactor {
    pub fn new(supervisor: Supervisor) -> Self {
        Self { supervisor }
    }

    /// Run until a shutdown request arrives.
    ///
    /// On SIGCHLD every terminated service is reaped and restarted per
    /// policy. On shutdown the supervisor stops accepting starts and
    /// interrupts every child; this returns without waiting for them.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<()>) -> Result<(), ReactorError> {
        let mut sigchld = signal(SignalKind::child()).map_err(ReactorError::SignalSetup)?;

        // Children may have exited before the handler was installed
        self.supervisor.reap_terminated().await;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        log::warn!("Shutdown channel closed");
                    }
                    log::info!("Interrupt received, stopping all services");
                    self.supervisor.shutdown().await;
                    return Ok(());
                }

                received = sigchld.recv() => {
                    if received.is_none() {
                        return Err(ReactorError::SignalStreamClosed);
                    }
                    let reaped = self.supervisor.reap_terminated().await;
                    if !reaped.is_empty() {
                        log::debug!("Reaped: {}", reaped.join(", "));
                    }
                }
            }
        }
    }
}

/// Errors that can occur in the signal reactor
#[derive(Debug, thiserror::Error)]
pub enum ReactorError {
    #[error("Failed to install SIGCHLD handler: {0}")]
    SignalSetup(#[source] std::io::Error),

    #[error("SIGCHLD stream closed")]
    SignalStreamClosed,
}
