//! Command-line interface for foreman

use crate::runtime::{SupervisorConfig, DEFAULT_SHELL};
use argh::FromArgs;
use std::time::Duration;

/// Procfile-style process supervisor
#[derive(FromArgs, Debug)]
pub struct ForemanArgs {
    /// path to the Procfile (default: Procfile)
    #[argh(positional, default = "String::from(\"Procfile\")")]
    pub procfile: String,

    /// milliseconds between health check ticks
    #[argh(option, default = "100")]
    pub check_interval_ms: u64,

    /// maximum milliseconds a check command may run
    #[argh(option, default = "5000")]
    pub check_timeout_ms: u64,

    /// milliseconds to wait before restarting a terminated service
    #[argh(option, default = "0")]
    pub restart_delay_ms: u64,

    /// restarts allowed per service (default: unlimited)
    #[argh(option)]
    pub max_restarts: Option<u32>,

    /// shell used to run commands (default: sh)
    #[argh(option, default = "String::from(DEFAULT_SHELL)")]
    pub shell: String,

    /// print the start order without starting anything
    #[argh(switch)]
    pub dry_run: bool,

    /// validate the Procfile and exit
    #[argh(switch)]
    pub validate: bool,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,
}

impl ForemanArgs {
    /// Build the supervisor configuration from the command line
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            shell: self.shell.clone(),
            check_interval: Duration::from_millis(self.check_interval_ms.max(1)),
            check_timeout: Duration::from_millis(self.check_timeout_ms),
            restart_delay: Duration::from_millis(self.restart_delay_ms),
            max_restarts: self.max_restarts,
        }
    }

    /// Normalized log level, falling back to `info`
    pub fn log_filter(&self) -> &'static str {
        match self.log_level.to_lowercase().as_str() {
            "error" => "error",
            "warn" => "warn",
            "debug" => "debug",
            "trace" => "trace",
            _ => "info",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<ForemanArgs, argh::EarlyExit> {
        ForemanArgs::from_args(&["foreman"], args)
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.procfile, "Procfile");
        assert!(!args.dry_run);

        let config = args.supervisor_config();
        assert_eq!(config.check_interval, Duration::from_millis(100));
        assert_eq!(config.check_timeout, Duration::from_secs(5));
        assert!(config.restart_delay.is_zero());
        assert_eq!(config.max_restarts, None);
        assert_eq!(config.shell, "sh");
    }

    #[test]
    fn test_restart_policy_options() {
        let args = parse(&[
            "services.yml",
            "--restart-delay-ms",
            "250",
            "--max-restarts",
            "3",
            "--shell",
            "bash",
        ])
        .unwrap();
        assert_eq!(args.procfile, "services.yml");

        let config = args.supervisor_config();
        assert_eq!(config.restart_delay, Duration::from_millis(250));
        assert_eq!(config.max_restarts, Some(3));
        assert_eq!(config.shell, "bash");
    }

    #[test]
    fn test_zero_interval_clamped() {
        let args = parse(&["--check-interval-ms", "0"]).unwrap();
        assert_eq!(args.supervisor_config().check_interval, Duration::from_millis(1));
    }

    #[test]
    fn test_log_filter() {
        assert_eq!(parse(&["-l", "DEBUG"]).unwrap().log_filter(), "debug");
        assert_eq!(parse(&["-l", "verbose"]).unwrap().log_filter(), "info");
    }
}
