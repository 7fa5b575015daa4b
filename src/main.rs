//! Bottomside daemon entry point
//!
//! Builds the vehicle from configuration and drives construct -> run ->
//! teardown cycles: a `restart` command tears the whole instance down
//! (including the broker session) and builds a fresh one, and startup
//! failures either retry or exit depending on configuration.

use bottomside::rov::RunOutcome;
use bottomside::{Config, Rov};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Parse config path from command line arguments.
///
/// Supports:
/// - `bottomside <path>` (positional)
/// - `bottomside --config <path>` (flag-based)
/// - `bottomside -c <path>` (short flag)
///
/// Defaults to `/etc/bottomside.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    "/etc/bottomside.toml".to_string()
}

fn main() {
    let config_path = parse_config_path();
    let config = match Config::load_or_default(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config {}: {}", config_path, e);
            std::process::exit(1);
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.clone()),
    )
    .init();

    log::info!("Bottomside starting (config: {})", config_path);

    // Cooperative shutdown on SIGINT/SIGTERM
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    }) {
        log::warn!("Failed to install signal handler: {}", e);
    }

    loop {
        let mut rov = match Rov::new(&config) {
            Ok(rov) => rov,
            Err(e) => {
                log::error!("Vehicle initialisation failed: {}", e);
                if config.control.restart_on_error && running.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_secs(1));
                    continue;
                }
                std::process::exit(1);
            }
        };

        match rov.run(&running) {
            RunOutcome::Shutdown => break,
            RunOutcome::Restart => {
                log::info!("Restarting vehicle");
                continue;
            }
        }
    }

    log::info!("Bottomside stopped");
}
