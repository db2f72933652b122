//! Procfile YAML schema definitions

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Root Procfile: service name -> service definition
///
/// Entries keep their declaration order so that startup order among
/// unrelated services is stable across runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Procfile {
    pub services: IndexMap<String, ServiceSpec>,
}

/// A single service definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSpec {
    /// Service name, taken from the Procfile key
    #[serde(skip)]
    pub name: String,

    /// Shell command line
    pub cmd: String,

    /// Never restart the service once its process exits
    #[serde(default)]
    pub run_once: bool,

    /// Services that must be active before this one may (re)start
    #[serde(default)]
    pub deps: Vec<String>,

    /// Periodic health checks
    #[serde(default)]
    pub checks: Option<CheckSpec>,
}

/// Health check definition. Empty fields skip that check category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckSpec {
    /// Shell command that must exit with status 0
    #[serde(default)]
    pub cmd: Option<String>,

    /// TCP ports the service process must be listening on
    #[serde(default)]
    pub tcp_ports: Vec<u16>,

    /// UDP ports the service process must be bound to
    #[serde(default)]
    pub udp_ports: Vec<u16>,
}

impl CheckSpec {
    /// True when no check category is configured
    pub fn is_empty(&self) -> bool {
        self.cmd.is_none() && self.tcp_ports.is_empty() && self.udp_ports.is_empty()
    }
}

impl Procfile {
    /// Load a Procfile from a YAML file
    pub fn from_file(path: &str) -> Result<Self, ProcfileError> {
        let content = std::fs::read_to_string(path).map_err(|e| ProcfileError::Io {
            path: path.to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse a Procfile from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self, ProcfileError> {
        let mut procfile: Procfile = serde_yaml::from_str(content).map_err(ProcfileError::Parse)?;
        for (name, service) in procfile.services.iter_mut() {
            service.name = name.clone();
        }
        procfile.validate()?;
        Ok(procfile)
    }

    /// Validate the Procfile configuration
    pub fn validate(&self) -> Result<(), ProcfileError> {
        if self.services.is_empty() {
            return Err(ProcfileError::Validation(
                "Procfile declares no services".to_string(),
            ));
        }

        for (name, service) in &self.services {
            if service.cmd.trim().is_empty() {
                return Err(ProcfileError::Validation(format!(
                    "Service '{}': 'cmd' must not be empty",
                    name
                )));
            }

            let mut seen = HashSet::new();
            for dep in &service.deps {
                if dep == name {
                    return Err(ProcfileError::Validation(format!(
                        "Service '{}': cannot depend on itself",
                        name
                    )));
                }
                if !seen.insert(dep.as_str()) {
                    return Err(ProcfileError::Validation(format!(
                        "Service '{}': dependency '{}' listed more than once",
                        name, dep
                    )));
                }
                if !self.services.contains_key(dep) {
                    return Err(ProcfileError::Validation(format!(
                        "Service '{}': depends on unknown service '{}'",
                        name, dep
                    )));
                }
            }

            if let Some(cmd) = service.checks.as_ref().and_then(|c| c.cmd.as_ref()) {
                if cmd.trim().is_empty() {
                    return Err(ProcfileError::Validation(format!(
                        "Service '{}': 'checks.cmd' must not be empty",
                        name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Look up a service by name
    pub fn get(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.get(name)
    }

    /// Number of declared services
    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Errors that can occur when loading a Procfile
#[derive(Debug, thiserror::Error)]
pub enum ProcfileError {
    #[error("Failed to read Procfile '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse Procfile: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}
