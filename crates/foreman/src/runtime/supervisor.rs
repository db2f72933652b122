//! Lifecycle supervisor - owns every service's runtime state
//!
//! All state changes go through a single [`Supervisor`] handle guarding the
//! registry with one async mutex: startup, restarts from the signal reactor,
//! and check failures reported by health checkers.

use crate::config::{Procfile, ServiceSpec};
use crate::runtime::dependency::{DependencyError, DependencyGraph};
use crate::runtime::health::HealthChecker;
use crate::runtime::process::{describe_exit, ManagedProcess, ProcessError, DEFAULT_SHELL};
use indexmap::IndexMap;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Shell used for service and check commands (`<shell> -c <cmd>`)
    pub shell: String,
    /// Interval between health checker ticks
    pub check_interval: Duration,
    /// Upper bound on a single check command run
    pub check_timeout: Duration,
    /// Delay before restarting a terminated service (zero restarts immediately)
    pub restart_delay: Duration,
    /// Restarts allowed per service before it is left stopped (None = unlimited)
    pub max_restarts: Option<u32>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            check_interval: Duration::from_millis(100),
            check_timeout: Duration::from_secs(5),
            restart_delay: Duration::ZERO,
            max_restarts: None,
        }
    }
}

/// Lifecycle state of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Not started yet
    Pending,
    /// Process spawned, no health check tick has passed yet
    Starting,
    /// Process spawned and passing its checks
    Running,
    /// Interrupt sent, waiting for the process to exit
    Terminating,
    /// Process exited and was reaped; may be restarted
    Terminated,
    /// Permanently stopped (run-once, restart limit, or shutdown)
    Stopped,
}

impl ServiceState {
    /// Check if a process is believed alive
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            ServiceState::Starting | ServiceState::Running | ServiceState::Terminating
        )
    }
}

/// Point-in-time view of one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub name: String,
    pub state: ServiceState,
    pub active: bool,
    pub pid: Option<u32>,
    pub restart_count: u32,
    pub last_exit_code: Option<i32>,
}

/// Service definition plus its live runtime state
#[derive(Debug)]
struct RuntimeService {
    spec: ServiceSpec,
    process: Option<ManagedProcess>,
    state: ServiceState,
    /// True while the process is believed alive
    active: bool,
    restart_count: u32,
    last_exit: Option<ExitStatus>,
}

impl RuntimeService {
    fn new(spec: ServiceSpec) -> Self {
        Self {
            spec,
            process: None,
            state: ServiceState::Pending,
            active: false,
            restart_count: 0,
            last_exit: None,
        }
    }

    fn pid(&self) -> Option<u32> {
        if self.active {
            self.process.as_ref().map(ManagedProcess::pid)
        } else {
            None
        }
    }

    fn status(&self) -> ServiceStatus {
        ServiceStatus {
            name: self.spec.name.clone(),
            state: self.state,
            active: self.active,
            pid: self.pid(),
            restart_count: self.restart_count,
            last_exit_code: self.last_exit.and_then(|s| s.code()),
        }
    }
}

#[derive(Debug)]
struct Registry {
    services: IndexMap<String, RuntimeService>,
    /// Cleared once on shutdown; never set again
    system_active: bool,
    /// Topological start order, filled by `start()`
    order: Vec<String>,
    /// Dependency graph, filled by `start()`
    graph: Option<DependencyGraph>,
}

impl Registry {
    fn is_active(&self, name: &str) -> bool {
        self.services.get(name).is_some_and(|s| s.active)
    }

    fn inactive_dependency(&self, name: &str) -> Option<String> {
        self.services
            .get(name)?
            .spec
            .deps
            .iter()
            .find(|dep| !self.is_active(dep))
            .cloned()
    }

    /// Warn about running services whose dependency check will now fail
    fn warn_dependents(&self, name: &str) {
        let Some(graph) = &self.graph else {
            return;
        };
        let affected: Vec<&str> = graph
            .dependents(name)
            .into_iter()
            .filter(|d| self.is_active(d))
            .collect();
        if !affected.is_empty() {
            log::warn!("[{}] Stopped while {} depend on it", name, affected.join(", "));
        }
    }
}

struct Inner {
    config: SupervisorConfig,
    registry: Mutex<Registry>,
}

/// Handle to the supervisor. Cloning is cheap and shares the same registry.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Create a supervisor for a validated Procfile
    pub fn new(procfile: Procfile, config: SupervisorConfig) -> Self {
        let services = procfile
            .services
            .into_iter()
            .map(|(name, spec)| (name, RuntimeService::new(spec)))
            .collect();

        Self {
            inner: Arc::new(Inner {
                config,
                registry: Mutex::new(Registry {
                    services,
                    system_active: true,
                    order: Vec::new(),
                    graph: None,
                }),
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Compute the start order, failing if the dependency graph has a cycle
    pub async fn start_order(&self) -> Result<Vec<String>, SupervisorError> {
        let registry = self.inner.registry.lock().await;
        Ok(Self::resolve_graph(&registry)?.topological_order())
    }

    /// Build the dependency graph, rejecting cycles
    fn resolve_graph(registry: &Registry) -> Result<DependencyGraph, SupervisorError> {
        let graph = DependencyGraph::from_edges(
            registry
                .services
                .iter()
                .map(|(name, service)| (name.clone(), service.spec.deps.clone())),
        )?;

        if let Some(cycle) = graph.find_cycle() {
            return Err(SupervisorError::CyclicDependency(cycle));
        }

        Ok(graph)
    }

    /// Start every service in dependency order.
    ///
    /// Stops at the first failure and returns it. Services started before
    /// the failure keep running.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        let order = {
            let mut registry = self.inner.registry.lock().await;
            let graph = Self::resolve_graph(&registry)?;
            let order = graph.topological_order();
            registry.order = order.clone();
            registry.graph = Some(graph);
            order
        };

        log::info!("Starting {} services...", order.len());

        for name in &order {
            self.start_service(name).await?;
        }

        log::info!("All services started");
        Ok(())
    }

    /// Start a single service and launch its health checker.
    ///
    /// Every declared dependency must be active. Returns the new pid.
    pub async fn start_service(&self, name: &str) -> Result<u32, SupervisorError> {
        let mut registry = self.inner.registry.lock().await;
        self.start_locked(&mut registry, name)
    }

    fn start_locked(&self, registry: &mut Registry, name: &str) -> Result<u32, SupervisorError> {
        if !registry.system_active {
            return Err(SupervisorError::ShuttingDown(name.to_string()));
        }

        let service = registry
            .services
            .get(name)
            .ok_or_else(|| SupervisorError::UnknownService(name.to_string()))?;

        if service.active {
            return Err(SupervisorError::AlreadyRunning(name.to_string()));
        }

        if let Some(dependency) = registry.inactive_dependency(name) {
            return Err(SupervisorError::BrokenDependency {
                service: name.to_string(),
                dependency,
            });
        }

        let process = ManagedProcess::spawn(&service.spec, &self.inner.config.shell)?;
        let pid = process.pid();

        let service = registry
            .services
            .get_mut(name)
            .ok_or_else(|| SupervisorError::UnknownService(name.to_string()))?;
        service.process = Some(process);
        service.active = true;
        service.state = ServiceState::Starting;

        println!("{} {}: process started", pid, name);
        log::debug!("[{}] Process started with PID: {}", name, pid);

        HealthChecker::new(
            self.clone(),
            name.to_string(),
            pid,
            service.spec.checks.clone().unwrap_or_default(),
        )
        .spawn();

        Ok(pid)
    }

    /// Reap every service process that has terminated and apply the restart
    /// policy. Returns the names of the reaped services.
    pub async fn reap_terminated(&self) -> Vec<String> {
        let mut registry = self.inner.registry.lock().await;
        let mut exited = Vec::new();

        for (name, service) in registry.services.iter_mut() {
            let Some(process) = service.process.as_mut() else {
                continue;
            };

            match process.try_reap() {
                Ok(Some(status)) => {
                    let pid = process.pid();
                    println!("{} {}: process stopped", pid, name);
                    log::info!(
                        "[{}] Process exited with {} after {:?}",
                        name,
                        describe_exit(&status),
                        process.uptime()
                    );

                    service.process = None;
                    service.active = false;
                    service.state = ServiceState::Terminated;
                    service.last_exit = Some(status);
                    exited.push(name.clone());
                }
                Ok(None) => {}
                Err(e) => log::error!("[{}] {}", name, e),
            }
        }

        // Restart dependencies before their dependents
        let order = &registry.order;
        exited.sort_by_key(|name| order.iter().position(|n| n == name).unwrap_or(usize::MAX));

        for name in &exited {
            self.after_exit(&mut registry, name);
        }

        exited
    }

    fn after_exit(&self, registry: &mut Registry, name: &str) {
        let system_active = registry.system_active;
        let Some(service) = registry.services.get_mut(name) else {
            return;
        };

        if service.spec.run_once || !system_active {
            service.state = ServiceState::Stopped;
            log::info!("[{}] Stopped permanently", name);
            if system_active {
                registry.warn_dependents(name);
            }
            return;
        }

        if let Some(max) = self.inner.config.max_restarts {
            if service.restart_count >= max {
                service.state = ServiceState::Stopped;
                log::warn!("[{}] Restart limit of {} reached, not restarting", name, max);
                registry.warn_dependents(name);
                return;
            }
        }

        let delay = self.inner.config.restart_delay;

        if delay.is_zero() {
            if let Err(e) = self.restart_locked(registry, name) {
                log::error!("[{}] Restart failed: {}", name, e);
            }
            return;
        }

        log::info!("[{}] Restarting in {:?}", name, delay);
        let supervisor = self.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let result = {
                let mut registry = supervisor.inner.registry.lock().await;
                supervisor.restart_locked(&mut registry, &name)
            };
            match result {
                Ok(_) => {}
                Err(SupervisorError::ShuttingDown(_)) => {
                    log::debug!("[{}] Restart skipped, shutting down", name)
                }
                Err(e) => log::error!("[{}] Restart failed: {}", name, e),
            }
        });
    }

    /// Start an exited service again. Only restarts that spawn a process
    /// count against `max_restarts`.
    fn restart_locked(&self, registry: &mut Registry, name: &str) -> Result<u32, SupervisorError> {
        let pid = self.start_locked(registry, name)?;
        if let Some(service) = registry.services.get_mut(name) {
            service.restart_count += 1;
        }
        Ok(pid)
    }

    /// Stop accepting starts and interrupt every active process.
    ///
    /// Exited services waiting on a delayed restart become `Stopped`. Does
    /// not wait for the processes to exit.
    pub async fn shutdown(&self) {
        let mut registry = self.inner.registry.lock().await;
        registry.system_active = false;

        for (name, service) in registry.services.iter_mut() {
            if !service.active {
                if service.state == ServiceState::Terminated {
                    log::debug!("[{}] Restart cancelled", name);
                    service.state = ServiceState::Stopped;
                }
                continue;
            }
            if let Some(process) = &service.process {
                log::info!("[{}] Sending interrupt to PID {}", name, process.pid());
                if let Err(e) = process.interrupt() {
                    log::error!("[{}] {}", name, e);
                }
            }
            service.state = ServiceState::Terminating;
        }
    }

    /// Interrupt a service whose health check failed.
    ///
    /// Reports from a checker whose process was already replaced are ignored.
    pub async fn report_check_failure(&self, name: &str, pid: u32, reason: &str) {
        let mut registry = self.inner.registry.lock().await;
        let Some(service) = registry.services.get_mut(name) else {
            return;
        };
        if service.pid() != Some(pid) {
            return;
        }

        log::warn!("[{}] Health check failed: {}", name, reason);
        service.state = ServiceState::Terminating;
        if let Some(process) = &service.process {
            if let Err(e) = process.interrupt() {
                log::error!("[{}] {}", name, e);
            }
        }
    }

    /// Record a passing health check tick
    pub async fn mark_healthy(&self, name: &str, pid: u32) {
        let mut registry = self.inner.registry.lock().await;
        if let Some(service) = registry.services.get_mut(name) {
            if service.pid() == Some(pid) && service.state == ServiceState::Starting {
                log::debug!("[{}] Health checks passing", name);
                service.state = ServiceState::Running;
            }
        }
    }

    /// First declared dependency of `name` that is not active
    pub async fn inactive_dependency(&self, name: &str) -> Option<String> {
        self.inner.registry.lock().await.inactive_dependency(name)
    }

    pub async fn is_system_active(&self) -> bool {
        self.inner.registry.lock().await.system_active
    }

    /// Get status of a single service
    pub async fn service_status(&self, name: &str) -> Option<ServiceStatus> {
        let registry = self.inner.registry.lock().await;
        registry.services.get(name).map(RuntimeService::status)
    }

    /// Get status of all services in declaration order
    pub async fn status(&self) -> Vec<ServiceStatus> {
        let registry = self.inner.registry.lock().await;
        registry.services.values().map(RuntimeService::status).collect()
    }
}

/// Errors that can occur in the supervisor
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Cyclic dependency detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("Dependency error: {0}")]
    Dependency(#[from] DependencyError),

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Service '{service}' cannot start: dependency '{dependency}' is not active")]
    BrokenDependency { service: String, dependency: String },

    #[error("Service '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Supervisor is shutting down, not starting '{0}'")]
    ShuttingDown(String),

    #[error(transparent)]
    Spawn(#[from] ProcessError),
}
