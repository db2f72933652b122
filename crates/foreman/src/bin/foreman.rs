//! Foreman CLI
//!
//! Usage:
//!   foreman Procfile
//!   foreman Procfile --restart-delay-ms 500 --max-restarts 10
//!   foreman Procfile --dry-run

use foreman::{ForemanArgs, Procfile, SignalReactor, Supervisor, SupervisorError};
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    let args: ForemanArgs = argh::from_env();

    // Initialize logging
    let env = env_logger::Env::default().default_filter_or(args.log_filter());
    env_logger::init_from_env(env);

    // Load Procfile
    log::info!("Loading Procfile: {}", args.procfile);
    let procfile = match Procfile::from_file(&args.procfile) {
        Ok(p) => p,
        Err(e) => {
            log::error!("Failed to load Procfile: {}", e);
            std::process::exit(1);
        }
    };

    let run_once = procfile.services.values().filter(|s| s.run_once).count();
    let checked = procfile
        .services
        .values()
        .filter(|s| s.checks.as_ref().is_some_and(|c| !c.is_empty()))
        .count();

    let supervisor = Supervisor::new(procfile, args.supervisor_config());

    let order = match supervisor.start_order().await {
        Ok(order) => order,
        Err(e) => {
            log::error!("Invalid Procfile: {}", e);
            std::process::exit(1);
        }
    };

    // Validate only mode
    if args.validate {
        println!("Procfile '{}' is valid", args.procfile);
        println!("  Services: {}", order.len());
        println!("  Run once: {}", run_once);
        println!("  With checks: {}", checked);
        return;
    }

    // Dry run mode
    if args.dry_run {
        println!("Start order:");
        for (i, name) in order.iter().enumerate() {
            println!("  {}. {}", i + 1, name);
        }
        return;
    }

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    // Set up Ctrl+C handler
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    }) {
        log::error!("Error setting Ctrl+C handler: {}", e);
        std::process::exit(1);
    }

    // React to child exits and Ctrl+C, also while services are starting
    let reactor = tokio::spawn(SignalReactor::new(supervisor.clone()).run(shutdown_rx));

    // Start all services
    match supervisor.start().await {
        Ok(()) => {}
        Err(SupervisorError::ShuttingDown(name)) => {
            log::info!("Interrupted during startup, '{}' and later services not started", name);
        }
        Err(e) => {
            log::error!("Startup failed: {}", e);
            supervisor.shutdown().await;
            std::process::exit(1);
        }
    }

    match reactor.await {
        Ok(Ok(())) => {
            log::info!("Foreman exiting");
            std::process::exit(0);
        }
        Ok(Err(e)) => {
            log::error!("Signal reactor failed: {}", e);
            supervisor.shutdown().await;
            std::process::exit(1);
        }
        Err(e) => {
            log::error!("Signal reactor task failed: {}", e);
            supervisor.shutdown().await;
            std::process::exit(1);
        }
    }
}
