// src/main.rs

//! The main entry point for the furbyctl command-line controller.

use anyhow::{Result, anyhow};
use furbyctl::config::Config;
use furbyctl::repl;
use furbyctl::session::{ConnectionSession, Driver};
use furbyctl::transport::{BleTransport, SimulatedTransport, Transport};
use std::env;
use std::path::Path;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    // Define version information.
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("furbyctl version {VERSION}");
        return Ok(());
    }

    // An explicit --config must load; otherwise config.toml is optional.
    let mut config = match args.iter().position(|arg| arg == "--config") {
        Some(i) => {
            let path = args
                .get(i + 1)
                .ok_or_else(|| anyhow!("--config flag requires a value"))?;
            match Config::from_file(path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    eprintln!("Failed to load configuration from \"{path}\": {e:#}");
                    std::process::exit(1);
                }
            }
        }
        None if Path::new("config.toml").exists() => Config::from_file("config.toml")?,
        None => Config::default(),
    };

    if let Some(i) = args.iter().position(|arg| arg == "--address") {
        match args.get(i + 1) {
            Some(address) => config.device.address = Some(address.clone()),
            None => {
                eprintln!("--address flag requires a value");
                std::process::exit(1);
            }
        }
    }

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .with_ansi(true)
        .init();

    if args.contains(&"--scan".to_string()) {
        let transport = BleTransport::new(&config.device);
        let devices = transport.discover().await?;
        if devices.is_empty() {
            println!("No device named '{}' found.", config.device.name_filter);
        }
        for device in devices {
            println!("{}\t{}", device.address, device.name);
        }
        return Ok(());
    }

    let transport: Arc<dyn Transport> = if args.contains(&"--simulate".to_string()) {
        info!("Using the simulated device.");
        Arc::new(SimulatedTransport::new())
    } else {
        Arc::new(BleTransport::new(&config.device))
    };

    let session = Arc::new(ConnectionSession::new(&config, transport));
    let driver = Driver::new(session.clone(), config.action_list.clone());

    if let Err(e) = session.start().await {
        error!("Could not connect to Furby: {}", e);
        return Err(e.into());
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    let mut interrupted = false;
    let outcome = tokio::select! {
        res = repl::run(&driver, stdin, stdout) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted by user.");
            interrupted = true;
            Ok(())
        }
    };

    // An interrupt can land in the middle of `connect` or `disconnect`, so close
    // the session from whatever state it was left in.
    info!("Cleaning up...");
    if let Err(e) = session.shutdown().await {
        error!("Error while disconnecting: {}", e);
    }

    // The blocking stdin reader would otherwise hold the runtime open until the next line.
    if interrupted {
        std::process::exit(0);
    }
    outcome
}
