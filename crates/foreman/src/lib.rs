//! Foreman
//!
//! A Procfile-style process supervisor.
//!
//! # Overview
//!
//! Foreman allows you to:
//! - Declare services, their shell commands and dependencies in a YAML Procfile
//! - Start services in dependency order
//! - Health-check running services with commands and TCP/UDP port ownership
//! - Restart services when they exit, unless they are marked `run_once`
//! - Forward Ctrl+C to every service and exit
//!
//! # Example Procfile
//!
//! ```yaml
//! redis:
//!   cmd: "redis-server --port 6379"
//!   checks:
//!     tcp_ports: [6379]
//!
//! migrate:
//!   cmd: "./bin/migrate"
//!   run_once: true
//!   deps: [redis]
//!
//! web:
//!   cmd: "./bin/web | tee web.log"
//!   deps: [redis]
//!   checks:
//!     cmd: "curl -sf http://localhost:8080/health"
//!     tcp_ports: [8080]
//! ```

#[cfg(not(unix))]
compile_error!("foreman supervises Unix processes and requires a Unix target");

pub mod cli;
pub mod config;
pub mod runtime;

pub use cli::ForemanArgs;
pub use config::{CheckSpec, Procfile, ProcfileError, ServiceSpec};
pub use runtime::{
    DependencyError, DependencyGraph, HealthChecker, ManagedProcess, ProcessError, Protocol,
    ReactorError, ServiceState, ServiceStatus, SignalReactor, Supervisor, SupervisorConfig,
    SupervisorError,
};
