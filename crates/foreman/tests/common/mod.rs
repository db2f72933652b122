//! Test helpers for supervisor integration tests

#![allow(dead_code)]

use foreman::{Procfile, ServiceStatus, Supervisor, SupervisorConfig};
use std::time::Duration;

/// Polling period for state changes
const POLL: Duration = Duration::from_millis(20);

/// Upper bound on any single wait
const MAX_POLLS: usize = 250;

/// Config with fast health ticks for tests
pub fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        check_interval: Duration::from_millis(50),
        check_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

pub fn supervisor(yaml: &str, config: SupervisorConfig) -> Supervisor {
    Supervisor::new(Procfile::from_yaml(yaml).unwrap(), config)
}

/// Reap terminated children until `name` satisfies `pred`
pub async fn reap_until<P>(sup: &Supervisor, name: &str, pred: P) -> ServiceStatus
where
    P: Fn(&ServiceStatus) -> bool,
{
    for _ in 0..MAX_POLLS {
        sup.reap_terminated().await;
        let status = sup.service_status(name).await.expect("service exists");
        if pred(&status) {
            return status;
        }
        tokio::time::sleep(POLL).await;
    }
    panic!(
        "timed out waiting on '{}': {:?}",
        name,
        sup.service_status(name).await
    );
}

/// Wait without reaping, for tests where the signal reactor reaps
pub async fn wait_until<P>(sup: &Supervisor, name: &str, pred: P) -> ServiceStatus
where
    P: Fn(&ServiceStatus) -> bool,
{
    for _ in 0..MAX_POLLS {
        let status = sup.service_status(name).await.expect("service exists");
        if pred(&status) {
            return status;
        }
        tokio::time::sleep(POLL).await;
    }
    panic!(
        "timed out waiting on '{}': {:?}",
        name,
        sup.service_status(name).await
    );
}

/// Interrupt everything and reap until no service is active
pub async fn stop_all(sup: &Supervisor) {
    sup.shutdown().await;
    for _ in 0..MAX_POLLS {
        sup.reap_terminated().await;
        if sup.status().await.iter().all(|s| !s.active) {
            return;
        }
        tokio::time::sleep(POLL).await;
    }
    panic!("services still active after shutdown: {:?}", sup.status().await);
}
