use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use sshfleet::manager::{Manager, DEFAULT_CAPACITY};
use sshfleet::repl::Repl;
use tracing::{error, info};

/// Supervisor for a fleet of outbound SSH port-forwarding tunnels.
#[derive(Parser, Debug)]
#[command(name = "sshfleet", version, about)]
struct Cli {
    /// Path to the tunnel configuration file.
    #[arg(default_value = "config.json")]
    config: PathBuf,

    /// Directory for per-tunnel log files.
    #[arg(short, long, default_value = "logs")]
    log_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = sshfleet::init_logging() {
        eprintln!("failed to initialize logging: {e}");
    }

    let cli = Cli::parse();

    if let Err(e) = ensure_log_dir(&cli.log_dir) {
        error!("could not create logs directory {}: {}", cli.log_dir.display(), e);
        return ExitCode::FAILURE;
    }

    let manager = Arc::new(Manager::new(
        cli.config.clone(),
        cli.log_dir.clone(),
        DEFAULT_CAPACITY,
    ));

    let loaded = match manager.load(&cli.config) {
        Ok(count) => count,
        Err(e) => {
            error!("failed to load config {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if loaded == 0 {
        error!("no tunnels configured in {}", cli.config.display());
        return ExitCode::FAILURE;
    }

    info!("loaded {} tunnel(s) from {}", loaded, cli.config.display());
    manager.start_all();

    let shutdown_manager = Arc::clone(&manager);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received, stopping tunnels...");
        shutdown_manager.shutdown().await;
        std::process::exit(0);
    });

    let mut repl = Repl::new(manager, cli.config);
    repl.run().await;

    ExitCode::SUCCESS
}

fn ensure_log_dir(path: &std::path::Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

/// Waits for either interrupt (Ctrl+C) or terminate (SIGTERM on unix).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
